//! Streaming module for chunk-by-chunk ESI tag scanning
//!
//! This module provides streaming primitives that:
//! - Recognise ESI tags without buffering the whole body
//! - Carry half-seen tags across chunk boundaries
//! - Pass every other byte through unchanged, in order

pub mod attributes;
pub mod carry_buffer;
pub mod echo_buffer;
pub mod parser;
pub mod prefix_scan;

pub use attributes::{Attribute, AttributeList};
pub use carry_buffer::{CarryBuffer, Cursors, Span};
pub use echo_buffer::EchoBuffer;
pub use parser::{Callbacks, EsiHandler, EsiParser, State};
pub use prefix_scan::find_tag_start;
