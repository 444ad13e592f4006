//! Streaming ESI Body Processor
//!
//! CRITICAL: chunks are scanned as they arrive. Only the assembled output
//! (literal runs and include slots) is kept, never the raw body.

use crate::config::FilterConfig;
use crate::streaming::EsiParser;

use super::document::Document;
use super::tree::TagTree;

/// Per-response driver: scanner plus tag tree
pub struct EsiBodyProcessor {
    parser: EsiParser<TagTree>,
    /// Total bytes seen
    total_bytes_seen: usize,
    /// Bodies above this pass through unprocessed
    max_bytes: usize,
    /// Whether processing is complete
    complete: bool,
}

impl EsiBodyProcessor {
    /// Create a new processor from configuration
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            parser: EsiParser::with_handler(TagTree::new(config.silent_errors, config.log_tags)),
            total_bytes_seen: 0,
            max_bytes: config.max_body_size,
            complete: false,
        }
    }

    /// Process a body chunk
    ///
    /// Call this for each chunk received. The document is handed over once,
    /// on the chunk that ends the stream.
    pub fn on_body_chunk(&mut self, chunk: &[u8], end_of_stream: bool) -> BodyDecision {
        // Already complete, don't process further
        if self.complete {
            return BodyDecision::Skip("Body already processed");
        }

        self.total_bytes_seen += chunk.len();

        // Size limit check
        if self.total_bytes_seen > self.max_bytes {
            self.complete = true;
            return BodyDecision::Skip("Body exceeds max size");
        }

        self.parser.execute(chunk);
        if !end_of_stream {
            return BodyDecision::Continue;
        }

        self.parser.finish();
        self.complete = true;
        BodyDecision::Complete(self.parser.handler_mut().take_document())
    }

    /// Report a failure to the innermost `esi:attempt`
    pub fn raise_exception(&mut self) {
        self.parser.handler_mut().raise_exception();
    }

    /// Check if processing is complete
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Get total bytes processed
    pub fn total_bytes(&self) -> usize {
        self.total_bytes_seen
    }

    /// Reset the processor for reuse
    pub fn reset(&mut self) {
        self.parser.init();
        self.parser.handler_mut().take_document();
        self.total_bytes_seen = 0;
        self.complete = false;
    }
}

/// Decision after a body chunk
#[derive(Debug)]
pub enum BodyDecision {
    /// More chunks expected
    Continue,
    /// Whole body parsed
    Complete(Document),
    /// Leave the body untouched
    Skip(&'static str),
}

impl BodyDecision {
    /// Check if processing should continue
    pub fn should_continue(&self) -> bool {
        matches!(self, BodyDecision::Continue)
    }

    /// Take the finished document, if any
    pub fn into_document(self) -> Option<Document> {
        match self {
            BodyDecision::Complete(doc) => Some(doc),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> FilterConfig {
        FilterConfig {
            max_body_size: 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_static_body() {
        let mut processor = EsiBodyProcessor::new(&test_config());

        let result = processor.on_body_chunk(b"<p>a<esi:remove>b</esi:remove></p>", true);
        let doc = result.into_document().unwrap();

        assert!(doc.is_static());
        assert_eq!(doc.render(&HashMap::new()), b"<p>a</p>".to_vec());
        assert!(processor.is_complete());
    }

    #[test]
    fn test_chunked_include() {
        let mut processor = EsiBodyProcessor::new(&test_config());

        let first = processor.on_body_chunk(b"<p><esi:incl", false);
        assert!(first.should_continue());
        let second = processor.on_body_chunk(b"ude src='/nav'/></p>", true);

        let doc = second.into_document().unwrap();
        assert_eq!(doc.pending_includes(), vec![0]);
        assert_eq!(doc.include(0).map(|r| r.src.as_str()), Some("/nav"));
        assert_eq!(processor.total_bytes(), 32);
    }

    #[test]
    fn test_raise_exception_selects_except() {
        let mut processor = EsiBodyProcessor::new(&test_config());

        processor.on_body_chunk(b"<esi:try><esi:attempt>A", false);
        processor.raise_exception();
        let doc = processor
            .on_body_chunk(b"</esi:attempt><esi:except>E</esi:except></esi:try>", true)
            .into_document()
            .unwrap();
        assert_eq!(doc.render(&HashMap::new()), b"E".to_vec());
    }

    #[test]
    fn test_size_limit() {
        let mut config = test_config();
        config.max_body_size = 10; // Very small limit

        let mut processor = EsiBodyProcessor::new(&config);
        let result = processor.on_body_chunk(b"This is more than 10 bytes", true);

        assert!(matches!(result, BodyDecision::Skip(_)));
        assert!(processor.is_complete());
    }

    #[test]
    fn test_reset() {
        let mut processor = EsiBodyProcessor::new(&test_config());

        processor.on_body_chunk(b"<esi:vars>half", true);
        assert!(processor.is_complete());

        processor.reset();
        assert!(!processor.is_complete());
        assert_eq!(processor.total_bytes(), 0);

        let doc = processor.on_body_chunk(b"fresh", true).into_document().unwrap();
        assert_eq!(doc.render(&HashMap::new()), b"fresh".to_vec());
    }
}
