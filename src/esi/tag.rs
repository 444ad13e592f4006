//! The reserved ESI tag names

/// Kind of a recognised ESI tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// `esi:try` - groups an attempt with its fallback
    Try,
    /// `esi:attempt` - content used unless an exception is raised
    Attempt,
    /// `esi:except` - fallback content
    Except,
    /// `esi:include` - fragment fetched from a URL
    Include,
    /// `esi:invalidate` - cache invalidation request (content dropped)
    Invalidate,
    /// `esi:vars` - variable substitution block
    Vars,
    /// `esi:remove` - content shown only when ESI is not processed
    Remove,
}

impl TagKind {
    /// Map a scanned tag name (including the `esi:` prefix) to its kind
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"esi:try" => Some(TagKind::Try),
            b"esi:attempt" => Some(TagKind::Attempt),
            b"esi:except" => Some(TagKind::Except),
            b"esi:include" => Some(TagKind::Include),
            b"esi:invalidate" => Some(TagKind::Invalidate),
            b"esi:vars" => Some(TagKind::Vars),
            b"esi:remove" => Some(TagKind::Remove),
            _ => None,
        }
    }

    /// Whether literal bytes inside the tag reach the document.
    ///
    /// `Except` is conditional; see [`crate::esi::TagTree`].
    pub fn retains_content(&self) -> bool {
        matches!(self, TagKind::Attempt | TagKind::Vars | TagKind::Except)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Try => "esi:try",
            TagKind::Attempt => "esi:attempt",
            TagKind::Except => "esi:except",
            TagKind::Include => "esi:include",
            TagKind::Invalidate => "esi:invalidate",
            TagKind::Vars => "esi:vars",
            TagKind::Remove => "esi:remove",
        }
    }
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(TagKind::from_name(b"esi:try"), Some(TagKind::Try));
        assert_eq!(TagKind::from_name(b"esi:include"), Some(TagKind::Include));
        assert_eq!(TagKind::from_name(b"esi:remove"), Some(TagKind::Remove));
        assert_eq!(TagKind::from_name(b"esi:t"), None);
        assert_eq!(TagKind::from_name(b"esi:comment"), None);
        assert_eq!(TagKind::from_name(b"try"), None);
    }

    #[test]
    fn test_name_round_trip() {
        for kind in [
            TagKind::Try,
            TagKind::Attempt,
            TagKind::Except,
            TagKind::Include,
            TagKind::Invalidate,
            TagKind::Vars,
            TagKind::Remove,
        ] {
            assert_eq!(TagKind::from_name(kind.as_str().as_bytes()), Some(kind));
        }
    }

    #[test]
    fn test_retention() {
        assert!(TagKind::Vars.retains_content());
        assert!(TagKind::Attempt.retains_content());
        assert!(!TagKind::Try.retains_content());
        assert!(!TagKind::Remove.retains_content());
        assert!(!TagKind::Invalidate.retains_content());
        assert!(!TagKind::Include.retains_content());
    }
}
