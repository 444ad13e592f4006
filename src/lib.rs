//! ESI Wasm Filter for Envoy Proxy
//!
//! This filter scans HTML responses for Edge Side Includes markup as the
//! body streams through, drops or keeps content according to the ESI tags,
//! fetches every `<esi:include>` fragment with an Envoy HTTP call and
//! writes the assembled page back before releasing the response.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod config;
pub mod esi;
pub mod streaming;
pub mod telemetry;

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, LogLevel};

use crate::config::FilterConfig;
use crate::esi::{BodyDecision, Document, EsiBodyProcessor, IncludeRequest};
use crate::telemetry::{
    audit_assembled, audit_include_failed, audit_skipped, EsiEvent, EsiEventType,
};

/// Request header carrying the include nesting depth
pub const DEPTH_HEADER: &str = "x-esi-depth";

// Thread-local storage for filter configuration
thread_local! {
    static CONFIG: RefCell<FilterConfig> = RefCell::new(FilterConfig::default());
}

/// Root context for filter lifecycle management
pub struct EsiRootContext {
    config: FilterConfig,
}

impl EsiRootContext {
    fn new() -> Self {
        Self {
            config: FilterConfig::default(),
        }
    }
}

impl Context for EsiRootContext {}

impl RootContext for EsiRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        if let Some(config_bytes) = self.get_plugin_configuration() {
            match FilterConfig::from_bytes(&config_bytes) {
                Ok(config) => self.config = config,
                Err(e) => {
                    warn!("Rejecting ESI filter configuration: {}", e);
                    return false;
                }
            }
        }

        // Store config in thread-local for HTTP contexts to access
        CONFIG.with(|c| {
            *c.borrow_mut() = self.config.clone();
        });

        info!(
            "ESI Filter initialized (enabled: {}, types: {:?}, upstream: {})",
            self.config.enabled, self.config.types, self.config.upstream_cluster
        );

        true
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(EsiHttpContext::new(context_id)))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// Why a response is passed through untouched, if it is
pub fn skip_reason(
    config: &FilterConfig,
    depth: u32,
    content_type: Option<&str>,
    content_length: Option<&str>,
) -> Option<&'static str> {
    if !config.enabled {
        return Some("ESI disabled");
    }
    if depth >= config.max_depth {
        return Some("Include depth limit reached");
    }
    match content_type {
        Some(ct) if config.matches_content_type(ct) => {}
        _ => return Some("Content type not configured for ESI"),
    }
    if let Some(length) = content_length.and_then(|v| v.trim().parse::<usize>().ok()) {
        if length == 0 {
            return Some("Empty body");
        }
        if length > config.max_body_size {
            return Some("Body exceeds max size");
        }
    }
    None
}

/// Include depth from the `x-esi-depth` header (0 when absent or garbled)
pub fn parse_depth(value: Option<&str>) -> u32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

/// A fragment fetch waiting for its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    slot: usize,
    using_alt: bool,
}

/// Parsed document whose fragments are still being fetched
pub struct PendingAssembly {
    document: Document,
    fragments: HashMap<usize, Vec<u8>>,
    in_flight: HashMap<u32, InFlight>,
    /// Size of the buffered body the assembled page replaces
    body_size: usize,
}

impl PendingAssembly {
    pub fn new(document: Document, body_size: usize) -> Self {
        Self {
            document,
            fragments: HashMap::new(),
            in_flight: HashMap::new(),
            body_size,
        }
    }

    pub fn request(&self, slot: usize) -> Option<&IncludeRequest> {
        self.document.include(slot)
    }

    /// Remember the call `token` fetches `slot`
    pub fn track(&mut self, token: u32, slot: usize, using_alt: bool) {
        self.in_flight.insert(token, InFlight { slot, using_alt });
    }

    /// Forget the call `token`. Returns its slot and whether it was the `alt` URL.
    pub fn complete(&mut self, token: u32) -> Option<(usize, bool)> {
        self.in_flight
            .remove(&token)
            .map(|call| (call.slot, call.using_alt))
    }

    pub fn fill(&mut self, slot: usize, body: Vec<u8>) {
        self.fragments.insert(slot, body);
    }

    /// No call outstanding
    pub fn is_done(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn render(&self) -> Vec<u8> {
        self.document.render(&self.fragments)
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}

/// HTTP context for per-request processing
pub struct EsiHttpContext {
    context_id: u32,
    /// Configuration snapshot for this request
    config: FilterConfig,
    authority: String,
    request_path: String,
    depth: u32,
    /// Present only for responses that get ESI processing
    processor: Option<EsiBodyProcessor>,
    /// Buffered body bytes already fed to the processor
    body_seen: usize,
    /// Present while fragment calls are outstanding
    assembly: Option<PendingAssembly>,
}

impl EsiHttpContext {
    fn new(context_id: u32) -> Self {
        let config = CONFIG.with(|c| c.borrow().clone());

        Self {
            context_id,
            config,
            authority: String::new(),
            request_path: String::new(),
            depth: 0,
            processor: None,
            body_seen: 0,
            assembly: None,
        }
    }

    /// Send the fetch for `slot` (or its `alt` URL). Returns whether a call is in flight.
    fn dispatch_include(
        &self,
        assembly: &mut PendingAssembly,
        slot: usize,
        request: &IncludeRequest,
        using_alt: bool,
    ) -> bool {
        let target = if using_alt {
            request.resolve_alt(&self.authority, &self.request_path)
        } else {
            Some(request.resolve(&self.authority, &self.request_path))
        };
        let call = match target {
            Some(Ok(call)) => call,
            Some(Err(e)) => {
                warn!("[context_id={}] Cannot include: {}", self.context_id, e);
                return false;
            }
            None => return false,
        };

        let depth = (self.depth + 1).to_string();
        let headers = vec![
            (":method", "GET"),
            (":path", call.path.as_str()),
            (":authority", call.authority.as_str()),
            (DEPTH_HEADER, depth.as_str()),
        ];

        match self.dispatch_http_call(
            &self.config.upstream_cluster,
            headers,
            None,
            vec![],
            Duration::from_millis(self.config.include_timeout_ms),
        ) {
            Ok(token) => {
                assembly.track(token, slot, using_alt);
                EsiEvent::new(EsiEventType::IncludeDispatched)
                    .with_request_path(&self.request_path)
                    .with_src(&call.path)
                    .with_depth(self.depth + 1)
                    .emit();
                true
            }
            Err(status) => {
                warn!(
                    "[context_id={}] Failed to dispatch include {}: {:?}",
                    self.context_id, call.path, status
                );
                false
            }
        }
    }

    /// Fetch `slot` via `src`, falling back to `alt` when `src` cannot be sent
    fn start_include(&self, assembly: &mut PendingAssembly, slot: usize) {
        let request = match assembly.request(slot) {
            Some(request) => request.clone(),
            None => return,
        };
        if self.dispatch_include(assembly, slot, &request, false) {
            return;
        }
        if request.alt.is_some() && self.dispatch_include(assembly, slot, &request, true) {
            return;
        }
        self.report_failure(&request, "dispatch failed");
    }

    fn report_failure(&self, request: &IncludeRequest, reason: &str) {
        audit_include_failed(&request.src, reason)
            .with_request_path(&self.request_path)
            .emit();
        if !request.continue_on_error && !self.config.silent_errors {
            warn!(
                "[context_id={}] Include {} dropped: {}",
                self.context_id, request.src, reason
            );
        }
    }

    /// Body fully parsed: write it back or go fetch its fragments
    fn assemble(&mut self, document: Document, body_size: usize) -> Action {
        let slots = document.pending_includes();
        let mut assembly = PendingAssembly::new(document, body_size);
        for slot in slots {
            self.start_include(&mut assembly, slot);
        }

        if assembly.is_done() {
            self.write_body(&assembly);
            return Action::Continue;
        }

        debug!(
            "[context_id={}] Waiting on {} include(s)",
            self.context_id,
            assembly.in_flight.len()
        );
        self.assembly = Some(assembly);
        Action::Pause
    }

    fn write_body(&self, assembly: &PendingAssembly) {
        let body = assembly.render();
        self.set_http_response_body(0, assembly.body_size, &body);
        audit_assembled(body.len(), assembly.fragment_count())
            .with_request_path(&self.request_path)
            .emit();
    }
}

impl Context for EsiHttpContext {
    fn on_http_call_response(
        &mut self,
        token_id: u32,
        _num_headers: usize,
        body_size: usize,
        _num_trailers: usize,
    ) {
        let mut assembly = match self.assembly.take() {
            Some(assembly) => assembly,
            None => return,
        };
        let (slot, using_alt) = match assembly.complete(token_id) {
            Some(call) => call,
            None => {
                self.assembly = Some(assembly);
                return;
            }
        };

        let status = self
            .get_http_call_response_header(":status")
            .and_then(|s| s.parse::<u32>().ok());

        match status {
            Some(status) if (200..300).contains(&status) => {
                let body = self
                    .get_http_call_response_body(0, body_size)
                    .unwrap_or_default();
                assembly.fill(slot, body);
            }
            _ => {
                let reason = match status {
                    Some(status) => format!("status {}", status),
                    None => "no response".to_string(),
                };
                if let Some(request) = assembly.request(slot).cloned() {
                    let retried = !using_alt && request.alt.is_some() && {
                        EsiEvent::new(EsiEventType::IncludeFailover)
                            .with_src(&request.src)
                            .with_reason(&reason)
                            .emit();
                        self.dispatch_include(&mut assembly, slot, &request, true)
                    };
                    if !retried {
                        self.report_failure(&request, &reason);
                    }
                }
            }
        }

        if assembly.is_done() {
            self.write_body(&assembly);
            self.resume_http_response();
        } else {
            self.assembly = Some(assembly);
        }
    }
}

impl HttpContext for EsiHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        self.authority = self
            .get_http_request_header(":authority")
            .unwrap_or_default();
        self.request_path = self.get_http_request_header(":path").unwrap_or_default();
        self.depth = parse_depth(self.get_http_request_header(DEPTH_HEADER).as_deref());

        debug!(
            "[context_id={}] Request {}{} at include depth {}",
            self.context_id, self.authority, self.request_path, self.depth
        );
        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let content_type = self.get_http_response_header("content-type");
        let content_length = self.get_http_response_header("content-length");

        if let Some(reason) = skip_reason(
            &self.config,
            self.depth,
            content_type.as_deref(),
            content_length.as_deref(),
        ) {
            debug!("[context_id={}] Skipping ESI: {}", self.context_id, reason);
            if self.depth >= self.config.max_depth {
                audit_skipped(reason)
                    .with_request_path(&self.request_path)
                    .with_depth(self.depth)
                    .emit();
            }
            return Action::Continue;
        }

        // The assembled body has a different length
        self.set_http_response_header("content-length", None);
        self.processor = Some(EsiBodyProcessor::new(&self.config));
        Action::Continue
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if self.processor.is_none() {
            return Action::Continue;
        }

        // Envoy keeps buffering while we pause; only the new tail is unseen
        let chunk = if body_size > self.body_seen {
            self.get_http_response_body(self.body_seen, body_size - self.body_seen)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        self.body_seen = body_size;

        let decision = match self.processor.as_mut() {
            Some(processor) => processor.on_body_chunk(&chunk, end_of_stream),
            None => return Action::Continue,
        };

        match decision {
            BodyDecision::Continue => Action::Pause,
            BodyDecision::Skip(reason) => {
                audit_skipped(reason)
                    .with_request_path(&self.request_path)
                    .emit();
                self.processor = None;
                Action::Continue
            }
            BodyDecision::Complete(document) => {
                self.processor = None;
                self.assemble(document, body_size)
            }
        }
    }

    fn on_log(&mut self) {
        if self.assembly.is_some() {
            warn!(
                "[context_id={}] Response finished with includes outstanding",
                self.context_id
            );
        } else {
            debug!("[context_id={}] Request processing complete", self.context_id);
        }
    }
}

// Register the filter with proxy-wasm runtime
proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Info);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(EsiRootContext::new())
    });
}}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esi::{Fragment, IncludeRequest};

    fn html_config() -> FilterConfig {
        FilterConfig {
            max_depth: 2,
            max_body_size: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_skip_reason_accepts_html() {
        let config = html_config();
        assert_eq!(
            skip_reason(&config, 0, Some("text/html; charset=utf-8"), None),
            None
        );
        assert_eq!(skip_reason(&config, 1, Some("TEXT/HTML"), Some("42")), None);
    }

    #[test]
    fn test_skip_reason_rejects() {
        let config = html_config();
        assert!(skip_reason(&config, 0, Some("application/json"), None).is_some());
        assert!(skip_reason(&config, 0, None, None).is_some());
        assert_eq!(
            skip_reason(&config, 0, Some("text/html"), Some("0")),
            Some("Empty body")
        );
        assert_eq!(
            skip_reason(&config, 0, Some("text/html"), Some("101")),
            Some("Body exceeds max size")
        );
        assert_eq!(
            skip_reason(&config, 2, Some("text/html"), None),
            Some("Include depth limit reached")
        );

        let disabled = FilterConfig {
            enabled: false,
            ..html_config()
        };
        assert_eq!(
            skip_reason(&disabled, 0, Some("text/html"), None),
            Some("ESI disabled")
        );
    }

    #[test]
    fn test_parse_depth() {
        assert_eq!(parse_depth(None), 0);
        assert_eq!(parse_depth(Some("3")), 3);
        assert_eq!(parse_depth(Some(" 7 ")), 7);
        assert_eq!(parse_depth(Some("deep")), 0);
    }

    #[test]
    fn test_pending_assembly() {
        let mut root = Fragment::new();
        root.push_bytes(b"<body>");
        root.push_include(0);
        root.push_include(1);
        root.push_bytes(b"</body>");
        let document = Document::new(
            root,
            vec![IncludeRequest::new("/a"), IncludeRequest::new("/b")],
        );

        let mut assembly = PendingAssembly::new(document, 64);
        assembly.track(11, 0, false);
        assembly.track(12, 1, false);
        assert!(!assembly.is_done());

        assert_eq!(assembly.complete(11), Some((0, false)));
        assembly.fill(0, b"[a]".to_vec());
        assert_eq!(assembly.complete(11), None);

        // slot 1 failed and was retried through its alt URL
        assert_eq!(assembly.complete(12), Some((1, false)));
        assembly.track(13, 1, true);
        assert_eq!(assembly.complete(13), Some((1, true)));

        assert!(assembly.is_done());
        assert_eq!(assembly.fragment_count(), 1);
        assert_eq!(assembly.render(), b"<body>[a]</body>".to_vec());
        assert_eq!(assembly.request(1).map(|r| r.src.as_str()), Some("/b"));
    }
}
