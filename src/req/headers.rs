#![warn(missing_docs)]
use ahash::AHashMap;

/// Case-insensitive request header map.
///
/// Header names are lowercased on insertion, matching the HTTP/1.1 rule that
/// field names are case-insensitive. Repeated headers are joined with `, `
/// except `set-cookie`-style fields, which do not occur on requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestHeaders {
    inner: AHashMap<String, String>,
}

impl RequestHeaders {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self {
            inner: AHashMap::new(),
        }
    }

    /// Builds the map from hyper's header view.
    pub(crate) fn from_hyper(headers: &hyper::HeaderMap) -> Self {
        let mut map = Self::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                map.insert(name.as_str(), value);
            }
        }
        map
    }

    /// Inserts a header, joining repeated names with `, `.
    pub fn insert(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        match self.inner.get_mut(&key) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                self.inner.insert(key, value.to_string());
            }
        }
    }

    /// Returns a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The number of distinct header names.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = RequestHeaders::new();
        headers.insert("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = RequestHeaders::new();
        headers.insert("accept", "text/html");
        headers.insert("Accept", "application/json");
        assert_eq!(headers.get("accept"), Some("text/html, application/json"));
    }
}
