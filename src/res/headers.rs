#![warn(missing_docs)]

/// Buffered response headers, preserved in insertion order.
///
/// Names are lowercased on insertion. `set` replaces any prior value for the
/// name; nothing reaches the wire until the application flushes the response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHeaders {
    inner: Vec<(String, String)>,
}

impl ResponseHeaders {
    /// Creates an empty header buffer.
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }

    /// Sets a header, replacing any existing value for the name.
    pub fn set(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        if let Some(entry) = self.inner.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.to_string();
        } else {
            self.inner.push((key, value.to_string()));
        }
    }

    /// Returns a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase();
        self.inner
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Removes a header by name, returning whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        let before = self.inner.len();
        self.inner.retain(|(k, _)| *k != key);
        before != self.inner.len()
    }

    /// Whether a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The number of buffered headers.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
