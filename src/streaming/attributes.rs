//! Attributes collected while scanning one ESI start tag
//!
//! e.g. for `<esi:include src='/foo/bar/' timeout='10'/>` the list holds
//! `(src, /foo/bar/)` then `(timeout, 10)`, in the order they were scanned.
//! Names and values are owned copies, never views into the scan buffer.

/// A single `name='value'` pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Attribute value (quotes stripped, escapes resolved)
    pub value: String,
}

impl Attribute {
    /// Create an attribute from raw scanned bytes
    pub fn from_bytes(name: &[u8], value: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(value).into_owned(),
        }
    }

    /// Create an attribute from strings
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Ordered attribute list for the tag currently being completed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeList {
    attributes: Vec<Attribute>,
}

impl AttributeList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute (insertion order is preserved)
    pub fn push(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Value of the first attribute with this name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Iterate in scan order
    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Release every attribute (called once the tag's callbacks returned)
    pub fn clear(&mut self) {
        self.attributes.clear();
    }
}

impl<'a> IntoIterator for &'a AttributeList {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.iter()
    }
}

impl FromIterator<Attribute> for AttributeList {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order() {
        let mut list = AttributeList::new();
        list.push(Attribute::new("src", "/foo/bar/"));
        list.push(Attribute::new("timeout", "10"));

        let names: Vec<&str> = list.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["src", "timeout"]);
    }

    #[test]
    fn test_get_first_match() {
        let list: AttributeList = vec![
            Attribute::new("src", "/a"),
            Attribute::new("src", "/b"),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.get("src"), Some("/a"));
        assert_eq!(list.get("alt"), None);
    }

    #[test]
    fn test_lossy_bytes() {
        let attr = Attribute::from_bytes(b"src", &[b'/', 0xFF, b'x']);
        assert_eq!(attr.name, "src");
        assert!(attr.value.starts_with('/'));
        assert!(attr.value.ends_with('x'));
    }

    #[test]
    fn test_clear() {
        let mut list = AttributeList::new();
        list.push(Attribute::new("a", "1"));
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }
}
