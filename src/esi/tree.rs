//! ESI Tag Tree
//!
//! Consumes scanner events and decides which bytes reach the client:
//! - `esi:remove`, `esi:invalidate` and bare `esi:try` bodies are dropped
//! - `esi:attempt` and `esi:vars` bodies are kept
//! - `esi:except` is kept only when its attempt raised an exception
//! - `esi:include` becomes an include slot in the output
//!
//! Closing follows a fixed rule: a matching root tag closes first,
//! otherwise the first match after the root closes together with every tag
//! opened after it.

use log::{debug, warn};

use super::document::{Document, Fragment};
use super::include::IncludeRequest;
use super::tag::TagKind;
use crate::streaming::{AttributeList, EsiHandler};

/// A tag whose end has not been seen yet
#[derive(Debug)]
struct OpenTag {
    kind: TagKind,
    /// Literal content of this tag reaches the parent
    retains: bool,
    /// Collected output (for `esi:try`: the attempt branch)
    content: Fragment,
    /// Retained `esi:except` branch of an `esi:try`
    except: Option<Fragment>,
    /// An exception was raised inside this `esi:try`
    failed: bool,
}

impl OpenTag {
    fn new(kind: TagKind, retains: bool) -> Self {
        Self {
            kind,
            retains,
            content: Fragment::new(),
            except: None,
            failed: false,
        }
    }
}

/// Tag tree bound to one response body
pub struct TagTree {
    stack: Vec<OpenTag>,
    document: Fragment,
    includes: Vec<IncludeRequest>,
    exception_raised: bool,
    ignore_tag: bool,
    silent_errors: bool,
    log_tags: bool,
}

impl TagTree {
    pub fn new(silent_errors: bool, log_tags: bool) -> Self {
        Self {
            stack: Vec::new(),
            document: Fragment::new(),
            includes: Vec::new(),
            exception_raised: false,
            ignore_tag: false,
            silent_errors,
            log_tags,
        }
    }

    /// Flag a failure inside the current attempt.
    ///
    /// The innermost `esi:try` remembers it, so its `esi:except` is used.
    pub fn raise_exception(&mut self) {
        self.exception_raised = true;
        if let Some(try_tag) = self.innermost_try_mut() {
            try_tag.failed = true;
        }
    }

    pub fn exception_raised(&self) -> bool {
        self.exception_raised
    }

    /// Close whatever is still open and hand over the assembled output
    pub fn take_document(&mut self) -> Document {
        if !self.stack.is_empty() {
            debug!("closing {} unterminated esi tag(s)", self.stack.len());
            self.close_from(0);
        }
        self.exception_raised = false;
        self.ignore_tag = false;

        Document::new(
            std::mem::take(&mut self.document),
            std::mem::take(&mut self.includes),
        )
    }

    fn innermost_try_mut(&mut self) -> Option<&mut OpenTag> {
        self.stack.iter_mut().rev().find(|t| t.kind == TagKind::Try)
    }

    fn innermost_try_failed(&self) -> bool {
        self.stack
            .iter()
            .rev()
            .find(|t| t.kind == TagKind::Try)
            .map_or(false, |t| t.failed)
    }

    /// Where literal output goes right now, if anywhere
    fn sink(&mut self) -> Option<&mut Fragment> {
        match self.stack.last_mut() {
            Some(top) if top.retains => Some(&mut top.content),
            Some(_) => None,
            None => Some(&mut self.document),
        }
    }

    fn open_include(&mut self, attributes: &AttributeList) {
        match IncludeRequest::from_attributes(attributes) {
            Ok(request) => {
                let slot = self.includes.len();
                if self.log_tags {
                    debug!("esi:include slot {} -> {}", slot, request.src);
                }
                self.includes.push(request);
                if let Some(sink) = self.sink() {
                    sink.push_include(slot);
                }
            }
            Err(e) if self.silent_errors => debug!("{}", e),
            Err(e) => {
                warn!("{}", e);
                self.raise_exception();
            }
        }
    }

    /// Index of the tag an end tag of `kind` closes.
    ///
    /// Searches from the root upward, not from the innermost tag, so a nested
    /// `</esi:attempt>` closes the outermost open attempt.
    fn close_index(&self, kind: TagKind) -> Option<usize> {
        let root = self.stack.first()?;
        if root.kind == kind {
            return Some(0);
        }
        self.stack
            .iter()
            .skip(1)
            .position(|t| t.kind == kind)
            .map(|at| at + 1)
    }

    /// Close the tag at `index` and every tag opened after it
    fn close_from(&mut self, index: usize) {
        while self.stack.len() > index {
            match self.stack.pop() {
                Some(tag) => self.close(tag),
                None => break,
            }
        }
    }

    fn close(&mut self, tag: OpenTag) {
        if self.log_tags {
            debug!("esi close {}", tag.kind);
        }
        if matches!(tag.kind, TagKind::Attempt | TagKind::Except) {
            self.exception_raised = false;
            self.ignore_tag = false;
        }

        let kind = tag.kind;
        let retains = tag.retains;
        let output = match kind {
            TagKind::Try => tag.except.unwrap_or(tag.content),
            _ => tag.content,
        };

        match self.stack.last_mut() {
            Some(parent) if parent.kind == TagKind::Try && kind == TagKind::Attempt => {
                parent.content.append(output);
            }
            Some(parent) if parent.kind == TagKind::Try && kind == TagKind::Except => {
                if retains {
                    parent
                        .except
                        .get_or_insert_with(Fragment::new)
                        .append(output);
                }
            }
            Some(parent) => {
                if parent.retains && (retains || kind == TagKind::Try) {
                    parent.content.append(output);
                }
            }
            None => {
                if retains || kind == TagKind::Try {
                    self.document.append(output);
                }
            }
        }
    }
}

impl EsiHandler for TagTree {
    fn start_tag(&mut self, name: &[u8], attributes: &AttributeList) {
        let kind = match TagKind::from_name(name) {
            Some(kind) => kind,
            None => {
                debug!("ignoring unknown tag <{}>", String::from_utf8_lossy(name));
                return;
            }
        };
        if self.log_tags {
            debug!("esi open {} ({} attributes)", kind, attributes.len());
        }

        match kind {
            TagKind::Attempt => self.exception_raised = false,
            TagKind::Except => {
                self.ignore_tag = !(self.exception_raised || self.innermost_try_failed());
            }
            TagKind::Include if !self.ignore_tag => self.open_include(attributes),
            _ => {}
        }

        let retains = match kind {
            TagKind::Except => !self.ignore_tag,
            other => other.retains_content(),
        };
        self.stack.push(OpenTag::new(kind, retains));
    }

    fn end_tag(&mut self, name: &[u8]) {
        let kind = match TagKind::from_name(name) {
            Some(kind) => kind,
            None => {
                debug!("ignoring unknown end tag </{}>", String::from_utf8_lossy(name));
                return;
            }
        };

        match self.close_index(kind) {
            Some(index) => self.close_from(index),
            None => debug!("unmatched end tag </{}>", kind),
        }
    }

    fn output(&mut self, bytes: &[u8]) {
        if let Some(sink) = self.sink() {
            sink.push_bytes(bytes);
        }
    }
}
