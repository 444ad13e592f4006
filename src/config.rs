//! Configuration module for the ESI filter
//!
//! CRITICAL: Configuration is loaded from Envoy plugin configuration,
//! NOT from external files. This avoids file I/O in the Wasm sandbox.

use serde::Deserialize;

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FilterConfig {
    /// Master switch for ESI processing
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Suppress exceptions and warnings for failed or malformed includes
    #[serde(default)]
    pub silent_errors: bool,

    /// Response content types to process (case-insensitive prefix match)
    #[serde(default = "default_types")]
    pub types: Vec<String>,

    /// Maximum include nesting depth (carried in `x-esi-depth`)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Bodies above this size pass through unprocessed (prevent OOM)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Envoy cluster that serves included fragments
    #[serde(default = "default_upstream_cluster")]
    pub upstream_cluster: String,

    /// Timeout for each fragment fetch
    #[serde(default = "default_include_timeout_ms")]
    pub include_timeout_ms: u64,

    /// Trace every tag event (for debugging)
    #[serde(default)]
    pub log_tags: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_types() -> Vec<String> {
    vec!["text/html".to_string()]
}

fn default_max_depth() -> u32 {
    256
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_upstream_cluster() -> String {
    "esi_upstream".to_string()
}

fn default_include_timeout_ms() -> u64 {
    5000
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            silent_errors: false,
            types: default_types(),
            max_depth: default_max_depth(),
            max_body_size: default_max_body_size(),
            upstream_cluster: default_upstream_cluster(),
            include_timeout_ms: default_include_timeout_ms(),
            log_tags: false,
        }
    }
}

impl FilterConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str =
            std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        let config: Self =
            serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;

        if config.types.is_empty() {
            return Err(ConfigError::NoContentTypes);
        }
        Ok(config)
    }

    /// Check a `content-type` header value against the configured types.
    ///
    /// `text/html; charset=utf-8` matches `text/html`.
    pub fn matches_content_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim_start().as_bytes();
        self.types.iter().any(|t| {
            let t = t.as_bytes();
            content_type.len() >= t.len() && content_type[..t.len()].eq_ignore_ascii_case(t)
        })
    }
}

/// Configuration parsing errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidUtf8(String),
    InvalidJson(String),
    NoContentTypes,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUtf8(e) => write!(f, "Invalid UTF-8: {}", e),
            ConfigError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            ConfigError::NoContentTypes => write!(f, "types must list at least one content type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FilterConfig::default();
        assert!(config.enabled);
        assert!(!config.silent_errors);
        assert_eq!(config.types, vec!["text/html"]);
        assert_eq!(config.max_depth, 256);
        assert!(config.max_body_size > 0);
    }

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "silent_errors": true,
            "types": ["text/html", "application/xhtml+xml"],
            "max_depth": 3
        }"#;
        let config = FilterConfig::from_bytes(json.as_bytes()).unwrap();
        assert!(config.silent_errors);
        assert_eq!(config.types.len(), 2);
        assert_eq!(config.max_depth, 3);
        // untouched fields keep their defaults
        assert!(config.enabled);
        assert_eq!(config.upstream_cluster, "esi_upstream");
        assert_eq!(config.include_timeout_ms, 5000);
    }

    #[test]
    fn test_parse_empty_object() {
        let config = FilterConfig::from_bytes(b"{}").unwrap();
        assert!(config.enabled);
        assert!(!config.log_tags);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            FilterConfig::from_bytes(&[0xFF, 0xFE]),
            Err(ConfigError::InvalidUtf8(_))
        ));
        assert!(matches!(
            FilterConfig::from_bytes(b"{not json"),
            Err(ConfigError::InvalidJson(_))
        ));
        assert!(matches!(
            FilterConfig::from_bytes(br#"{"types": []}"#),
            Err(ConfigError::NoContentTypes)
        ));
    }

    #[test]
    fn test_content_type_matching() {
        let config = FilterConfig::default();
        assert!(config.matches_content_type("text/html"));
        assert!(config.matches_content_type("Text/HTML; charset=utf-8"));
        assert!(!config.matches_content_type("application/json"));
        assert!(!config.matches_content_type("text/htm"));
    }
}
