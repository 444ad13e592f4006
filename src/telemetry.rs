//! Telemetry Module for the ESI filter
//!
//! In Wasm, we emit structured logs that can be collected by
//! Envoy's access logging or external collectors.

use log::{info, warn};
use serde::Serialize;

/// Audit event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EsiEventType {
    /// Fragment fetch sent upstream
    IncludeDispatched,
    /// Fragment fetch failed (status, timeout or dispatch error)
    IncludeFailed,
    /// Retrying a failed fragment with its `alt` URL
    IncludeFailover,
    /// Final body written back to the response
    DocumentAssembled,
    /// Response passed through without ESI processing
    ProcessingSkipped,
}

/// Audit event for logging
#[derive(Debug, Clone, Serialize)]
pub struct EsiEvent {
    /// Event type
    pub event_type: EsiEventType,
    /// Path of the response being processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_path: Option<String>,
    /// Fragment URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Upstream HTTP status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    /// Include nesting depth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    /// Size of the assembled body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    /// Number of fragments spliced in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub includes: Option<usize>,
    /// Reason for action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EsiEvent {
    /// Create a new audit event
    pub fn new(event_type: EsiEventType) -> Self {
        Self {
            event_type,
            request_path: None,
            src: None,
            status: None,
            depth: None,
            bytes: None,
            includes: None,
            reason: None,
        }
    }

    pub fn with_request_path(mut self, path: &str) -> Self {
        self.request_path = Some(path.to_string());
        self
    }

    pub fn with_src(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }

    pub fn with_status(mut self, status: u32) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_includes(mut self, includes: usize) -> Self {
        self.includes = Some(includes);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Log the event
    pub fn emit(&self) {
        // Serialize to JSON for structured logging
        match serde_json::to_string(self) {
            Ok(json) => match self.event_type {
                EsiEventType::IncludeFailed => warn!("[ESI-AUDIT] {}", json),
                _ => info!("[ESI-AUDIT] {}", json),
            },
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
            }
        }
    }
}

/// Create a skipped-response audit event
pub fn audit_skipped(reason: &str) -> EsiEvent {
    EsiEvent::new(EsiEventType::ProcessingSkipped).with_reason(reason)
}

/// Create a failed-include audit event
pub fn audit_include_failed(src: &str, reason: &str) -> EsiEvent {
    EsiEvent::new(EsiEventType::IncludeFailed)
        .with_src(src)
        .with_reason(reason)
}

/// Create an assembled-document audit event
pub fn audit_assembled(bytes: usize, includes: usize) -> EsiEvent {
    EsiEvent::new(EsiEventType::DocumentAssembled)
        .with_bytes(bytes)
        .with_includes(includes)
}
