#![warn(missing_docs)]
use ahash::AHashMap;
use std::fmt;
use std::str::FromStr;

/// Query parameters from the URL query string with support for repeated keys.
///
/// Handles URLs like `/search?q=rust&tags=web&tags=backend&page=1`.
///
/// # Examples
///
/// ```
/// use nextrush::req::query_params::QueryParams;
///
/// let params = QueryParams::parse("q=rust&tags=web&tags=backend&page=1");
/// assert_eq!(params.get("q"), Some("rust"));
/// assert_eq!(params.get_all("tags"), vec!["web", "backend"]);
/// assert_eq!(params.get_parsed::<u32>("page"), Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    // name -> values in first-seen order; repeated keys accumulate
    inner: AHashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl QueryParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self {
            inner: AHashMap::new(),
            order: Vec::new(),
        }
    }

    /// Parses a raw query string (without the leading `?`), percent-decoding
    /// keys and values and treating `+` as a space.
    pub fn parse(query: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.append(key.into_owned(), value.into_owned());
        }
        params
    }

    /// Appends a value for a key, keeping earlier values for repeated keys.
    pub fn append(&mut self, key: String, value: String) {
        match self.inner.get_mut(&key) {
            Some(values) => values.push(value),
            None => {
                self.order.push(key.clone());
                self.inner.insert(key, vec![value]);
            }
        }
    }

    /// Returns the first value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value recorded for a key, in arrival order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.inner
            .get(key)
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the first value for a key parsed into `T`, or `None` when the
    /// key is missing or the value does not parse.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| value.parse().ok())
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// The number of distinct keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no parameters were recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over `(key, value)` pairs; repeated keys yield one pair per
    /// value, keys in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().flat_map(move |key| {
            self.inner
                .get(key)
                .into_iter()
                .flatten()
                .map(move |value| (key.as_str(), value.as_str()))
        })
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.iter() {
            ser.append_pair(key, value);
        }
        write!(f, "{}", ser.finish())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_repeated_keys_in_order() {
        let params = QueryParams::parse("tags=a&tags=b&tags=c");
        assert_eq!(params.get_all("tags"), vec!["a", "b", "c"]);
        assert_eq!(params.get("tags"), Some("a"));
    }

    #[test]
    fn decodes_percent_and_plus() {
        let params = QueryParams::parse("q=hello+world&sym=%26%3D%25");
        assert_eq!(params.get("q"), Some("hello world"));
        assert_eq!(params.get("sym"), Some("&=%"));
    }

    #[test]
    fn round_trips_reserved_characters() {
        let mut params = QueryParams::new();
        params.append("a&b".into(), "1=2".into());
        params.append("p".into(), "100%".into());
        let encoded = params.to_string();
        let reparsed = QueryParams::parse(&encoded);
        assert_eq!(reparsed.get("a&b"), Some("1=2"));
        assert_eq!(reparsed.get("p"), Some("100%"));
    }

    #[test]
    fn typed_access() {
        let params = QueryParams::parse("page=3&active=true&broken=x");
        assert_eq!(params.get_parsed::<u32>("page"), Some(3));
        assert_eq!(params.get_parsed::<bool>("active"), Some(true));
        assert_eq!(params.get_parsed::<u32>("broken"), None);
        assert_eq!(params.get_parsed::<u32>("missing"), None);
    }
}
