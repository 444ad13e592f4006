//! ESI tag semantics and response assembly
//!
//! The streaming scanner reports tags; this module decides what they mean:
//! - which bytes survive (`tree`)
//! - which fragments must be fetched (`include`)
//! - how the final body is put together (`document`)

pub mod document;
pub mod include;
pub mod processor;
pub mod tag;
pub mod tree;

pub use document::{Document, Fragment, Segment};
pub use include::{IncludeCall, IncludeError, IncludeRequest};
pub use processor::{BodyDecision, EsiBodyProcessor};
pub use tag::TagKind;
pub use tree::TagTree;
