//! Dynamic document value type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamic document value.
///
/// Documents have a total order: first by kind (in declaration order), then
/// by content. Floats are not supported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Document {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Array of values.
    Array(Vec<Document>),
    /// Map with sorted string keys.
    Map(BTreeMap<String, Document>),
}

/// The kind of a [`Document`], used to type index domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `Document::Null`
    Null,
    /// `Document::Bool`
    Bool,
    /// `Document::Integer`
    Integer,
    /// `Document::Text`
    Text,
    /// `Document::Bytes`
    Bytes,
    /// `Document::Array`
    Array,
    /// `Document::Map`
    Map,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Array => "array",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

impl Document {
    /// Creates a map document from key/value pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Document>,
        I: IntoIterator<Item = (K, V)>,
    {
        Document::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the kind of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Document::Null => ValueType::Null,
            Document::Bool(_) => ValueType::Bool,
            Document::Integer(_) => ValueType::Integer,
            Document::Text(_) => ValueType::Text,
            Document::Bytes(_) => ValueType::Bytes,
            Document::Array(_) => ValueType::Array,
            Document::Map(_) => ValueType::Map,
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Document::Null)
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Document::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Document::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Document]> {
        match self {
            Document::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Look up a top-level key in this map value.
    pub fn get(&self, key: &str) -> Option<&Document> {
        match self {
            Document::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Looks up a dotted path such as `address.city`.
    ///
    /// An empty path returns the document itself.
    pub fn get_path(&self, path: &str) -> Option<&Document> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |doc, part| doc.get(part))
    }

    /// Sets the value at a dotted path, creating intermediate maps.
    ///
    /// Returns `false` if a non-map value sits on the path, or if the value
    /// was already equal.
    pub fn set_path(&mut self, path: &str, value: Document) -> bool {
        let mut parts = path.split('.').peekable();
        let mut current = self;
        while let Some(part) = parts.next() {
            let Document::Map(entries) = current else {
                return false;
            };
            if parts.peek().is_none() {
                if entries.get(part) == Some(&value) {
                    return false;
                }
                entries.insert(part.to_string(), value);
                return true;
            }
            current = entries
                .entry(part.to_string())
                .or_insert_with(|| Document::Map(BTreeMap::new()));
        }
        false
    }

    /// Removes the value at a dotted path, returning it.
    pub fn remove_path(&mut self, path: &str) -> Option<Document> {
        let (parent, last) = match path.rsplit_once('.') {
            Some((parent, last)) => (Some(parent), last),
            None => (None, path),
        };
        let target = match parent {
            Some(parent) => self.get_path_mut(parent)?,
            None => self,
        };
        match target {
            Document::Map(entries) => entries.remove(last),
            _ => None,
        }
    }

    fn get_path_mut(&mut self, path: &str) -> Option<&mut Document> {
        path.split('.').try_fold(self, |doc, part| match doc {
            Document::Map(entries) => entries.get_mut(part),
            _ => None,
        })
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Document::Null => f.write_str("null"),
            Document::Bool(b) => write!(f, "{b}"),
            Document::Integer(n) => write!(f, "{n}"),
            Document::Text(s) => write!(f, "{s:?}"),
            Document::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Document::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Document::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Document {
    fn from(b: bool) -> Self {
        Document::Bool(b)
    }
}

impl From<i64> for Document {
    fn from(n: i64) -> Self {
        Document::Integer(n)
    }
}

impl From<i32> for Document {
    fn from(n: i32) -> Self {
        Document::Integer(i64::from(n))
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Document::Text(s)
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Document::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Document {
    fn from(b: Vec<u8>) -> Self {
        Document::Bytes(b)
    }
}

impl From<Vec<Document>> for Document {
    fn from(v: Vec<Document>) -> Self {
        Document::Array(v)
    }
}

impl From<()> for Document {
    fn from((): ()) -> Self {
        Document::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Document {
        Document::map([
            ("name", Document::from("Alice")),
            ("age", Document::from(30)),
            (
                "address",
                Document::map([("city", Document::from("Oslo"))]),
            ),
        ])
    }

    #[test]
    fn kind_ordering() {
        assert!(Document::Null < Document::Bool(false));
        assert!(Document::Bool(true) < Document::Integer(i64::MIN));
        assert!(Document::Integer(i64::MAX) < Document::from(""));
        assert!(Document::Integer(-5) < Document::Integer(3));
    }

    #[test]
    fn get_path_nested() {
        let doc = person();
        assert_eq!(doc.get_path("name"), Some(&Document::from("Alice")));
        assert_eq!(doc.get_path("address.city"), Some(&Document::from("Oslo")));
        assert_eq!(doc.get_path("address.zip"), None);
        assert_eq!(doc.get_path("name.first"), None);
        assert_eq!(doc.get_path(""), Some(&doc));
    }

    #[test]
    fn set_path_creates_maps() {
        let mut doc = person();
        assert!(doc.set_path("address.zip", Document::from("0150")));
        assert!(doc.set_path("meta.tags.primary", Document::from(true)));
        assert_eq!(doc.get_path("meta.tags.primary"), Some(&Document::Bool(true)));

        // Same value reports no change.
        assert!(!doc.set_path("age", Document::from(30)));
        // Cannot descend into a scalar.
        assert!(!doc.set_path("age.years", Document::from(1)));
    }

    #[test]
    fn remove_path() {
        let mut doc = person();
        assert_eq!(doc.remove_path("address.city"), Some(Document::from("Oslo")));
        assert_eq!(doc.remove_path("address.city"), None);
        assert_eq!(doc.remove_path("age"), Some(Document::from(30)));
        assert_eq!(doc.get("age"), None);
    }

    #[test]
    fn value_types() {
        assert_eq!(Document::from(1).value_type(), ValueType::Integer);
        assert_eq!(person().value_type(), ValueType::Map);
        assert_eq!(ValueType::Text.to_string(), "text");
    }

    #[test]
    fn display() {
        let doc = Document::map([("a", Document::from(vec![Document::from(1), Document::Null]))]);
        assert_eq!(doc.to_string(), "{a: [1, null]}");
    }
}
