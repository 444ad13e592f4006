//! Fragment fetches requested by `<esi:include>`
//!
//! An include names its fragment with `src` and optionally a fallback `alt`.
//! `onerror="continue"` asks for a failed fragment to be dropped quietly.
//! Before dispatch the URL is resolved against the page being processed,
//! producing the `:authority` and `:path` pseudo headers of the sub-request.

use crate::streaming::AttributeList;

/// One fragment fetch registered by the tag tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeRequest {
    /// Primary fragment URL
    pub src: String,
    /// Fallback URL, tried once when `src` fails
    pub alt: Option<String>,
    /// `onerror="continue"`: a failure is not worth a warning
    pub continue_on_error: bool,
}

/// Resolved sub-request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeCall {
    pub authority: String,
    pub path: String,
}

impl IncludeRequest {
    pub fn new(src: &str) -> Self {
        Self {
            src: src.to_string(),
            alt: None,
            continue_on_error: false,
        }
    }

    /// Build from the attributes of an `<esi:include>` tag
    pub fn from_attributes(attributes: &AttributeList) -> Result<Self, IncludeError> {
        let src = attributes.get("src").unwrap_or("");
        if src.is_empty() {
            return Err(IncludeError::MissingSrc);
        }

        Ok(Self {
            src: src.to_string(),
            alt: attributes
                .get("alt")
                .filter(|alt| !alt.is_empty())
                .map(str::to_string),
            continue_on_error: attributes
                .get("onerror")
                .map_or(false, |v| v.eq_ignore_ascii_case("continue")),
        })
    }

    /// Resolve `src` relative to the page at `authority` + `request_path`
    pub fn resolve(
        &self,
        authority: &str,
        request_path: &str,
    ) -> Result<IncludeCall, IncludeError> {
        resolve_url(&self.src, authority, request_path)
    }

    /// Resolve `alt`, if there is one
    pub fn resolve_alt(
        &self,
        authority: &str,
        request_path: &str,
    ) -> Option<Result<IncludeCall, IncludeError>> {
        self.alt
            .as_deref()
            .map(|alt| resolve_url(alt, authority, request_path))
    }
}

/// Turn a fragment URL into sub-request pseudo headers.
///
/// Accepts `http://` and `https://` URLs, absolute paths, and paths relative
/// to the directory of `request_path`.
pub fn resolve_url(
    url: &str,
    authority: &str,
    request_path: &str,
) -> Result<IncludeCall, IncludeError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(IncludeError::MissingSrc);
    }

    if let Some(scheme_end) = url.find("://") {
        let scheme = &url[..scheme_end];
        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            return Err(IncludeError::UnsupportedScheme(scheme.to_string()));
        }

        let rest = &url[scheme_end + 3..];
        let (host, path) = match rest.find(|c: char| c == '/' || c == '?') {
            Some(at) if rest.as_bytes()[at] == b'?' => (&rest[..at], format!("/{}", &rest[at..])),
            Some(at) => (&rest[..at], rest[at..].to_string()),
            None => (rest, "/".to_string()),
        };
        if host.is_empty() {
            return Err(IncludeError::MissingHost(url.to_string()));
        }

        return Ok(IncludeCall {
            authority: host.to_string(),
            path,
        });
    }

    if authority.is_empty() {
        return Err(IncludeError::MissingHost(url.to_string()));
    }

    let path = if url.starts_with('/') {
        url.to_string()
    } else {
        // relative to the directory of the page, ignoring its query
        let page = request_path.split('?').next().unwrap_or("");
        let dir = match page.rfind('/') {
            Some(at) => &page[..=at],
            None => "/",
        };
        format!("{}{}", dir, url)
    };

    Ok(IncludeCall {
        authority: authority.to_string(),
        path,
    })
}

/// Include errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeError {
    /// `src` attribute absent or empty
    MissingSrc,
    /// Scheme other than http/https
    UnsupportedScheme(String),
    /// No host to send the sub-request to
    MissingHost(String),
}

impl std::fmt::Display for IncludeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncludeError::MissingSrc => write!(f, "esi:include without src"),
            IncludeError::UnsupportedScheme(s) => write!(f, "Unsupported scheme: {}", s),
            IncludeError::MissingHost(url) => write!(f, "No host for include: {}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::Attribute;

    fn attrs(pairs: &[(&str, &str)]) -> AttributeList {
        pairs.iter().map(|(k, v)| Attribute::new(k, v)).collect()
    }

    #[test]
    fn test_from_attributes() {
        let request = IncludeRequest::from_attributes(&attrs(&[
            ("src", "/a"),
            ("alt", "/b"),
            ("onerror", "continue"),
        ]))
        .unwrap();
        assert_eq!(request.src, "/a");
        assert_eq!(request.alt.as_deref(), Some("/b"));
        assert!(request.continue_on_error);

        let plain =
            IncludeRequest::from_attributes(&attrs(&[("src", "/a"), ("alt", "")])).unwrap();
        assert_eq!(plain, IncludeRequest::new("/a"));
    }

    #[test]
    fn test_missing_src() {
        assert_eq!(
            IncludeRequest::from_attributes(&attrs(&[("alt", "/b")])),
            Err(IncludeError::MissingSrc)
        );
        assert_eq!(
            IncludeRequest::from_attributes(&attrs(&[("src", "")])),
            Err(IncludeError::MissingSrc)
        );
    }

    #[test]
    fn test_resolve_absolute_url() {
        let call = resolve_url("http://fragments.local:8080/header?v=2", "www", "/").unwrap();
        assert_eq!(call.authority, "fragments.local:8080");
        assert_eq!(call.path, "/header?v=2");

        let call = resolve_url("https://cdn.example", "www", "/").unwrap();
        assert_eq!(call.authority, "cdn.example");
        assert_eq!(call.path, "/");

        let call = resolve_url("http://cdn.example?x=1", "www", "/").unwrap();
        assert_eq!(call.path, "/?x=1");
    }

    #[test]
    fn test_resolve_absolute_path() {
        let call = resolve_url("/frag/nav", "www.example.com", "/shop/index.html").unwrap();
        assert_eq!(
            call,
            IncludeCall {
                authority: "www.example.com".to_string(),
                path: "/frag/nav".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_relative_path() {
        let call = resolve_url("nav.html", "www", "/shop/index.html?page=2").unwrap();
        assert_eq!(call.path, "/shop/nav.html");

        let call = resolve_url("nav.html", "www", "/shop/").unwrap();
        assert_eq!(call.path, "/shop/nav.html");

        let call = resolve_url("nav.html", "www", "").unwrap();
        assert_eq!(call.path, "/nav.html");
    }

    #[test]
    fn test_resolve_errors() {
        assert_eq!(
            resolve_url("ftp://host/x", "www", "/"),
            Err(IncludeError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(
            resolve_url("http:///x", "www", "/"),
            Err(IncludeError::MissingHost(_))
        ));
        assert!(matches!(
            resolve_url("/x", "", "/"),
            Err(IncludeError::MissingHost(_))
        ));
        assert_eq!(resolve_url("  ", "www", "/"), Err(IncludeError::MissingSrc));
    }

    #[test]
    fn test_resolve_alt() {
        let mut request = IncludeRequest::new("/a");
        assert!(request.resolve_alt("www", "/").is_none());

        request.alt = Some("/b".to_string());
        let call = request.resolve_alt("www", "/").unwrap().unwrap();
        assert_eq!(call.path, "/b");
    }
}
