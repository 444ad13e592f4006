//! Streaming ESI Tag Scanner
//!
//! Byte-at-a-time automaton that recognises `<esi:NAME ...>`, `</esi:NAME>`
//! and `<esi:NAME .../>` inside an otherwise opaque body. Every byte that is
//! not part of a recognised tag reaches the output handler unchanged and in
//! order; recognised tags are reported through the start/end handlers
//! instead.
//!
//! CRITICAL: chunk boundaries must be invisible. Feeding a body in one call
//! or split at any offset yields the same concatenated output and the same
//! tag events. Unresolved constructs are carried over in a
//! [`CarryBuffer`] and ambiguous bytes are staged in an [`EchoBuffer`].

use memchr::memchr;

use super::attributes::{Attribute, AttributeList};
use super::carry_buffer::{CarryBuffer, Cursors, Span};
use super::echo_buffer::EchoBuffer;
use super::prefix_scan::find_tag_start;

/// Namespace every recognised tag starts with, after `<` or `</`
const ESI_PREFIX: &[u8] = b"esi:";

/// Scanner state.
///
/// [`State::Text`] is both the start state and the only quiescent state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Plain passthrough
    Text,
    /// Saw `<`
    Open,
    /// Matching the `esi:` namespace (`matched` bytes so far)
    Prefix { closing: bool, matched: usize },
    /// Inside the tag name
    Name { closing: bool },
    /// Whitespace after an end tag's name
    EndTrailing,
    /// Between attributes of a start tag
    BeforeAttr,
    /// Inside an attribute key
    AttrName,
    /// After `=`, waiting for the opening quote
    BeforeValue,
    /// Inside a quoted value
    Quoted { quote: u8 },
    /// Right after a backslash inside a quoted value
    Escaped { quote: u8 },
    /// Saw the `/` of `/>`
    SelfClose,
}

impl State {
    /// Nothing is pending; carried bytes can be dropped
    pub fn is_idle(&self) -> bool {
        matches!(self, State::Text)
    }
}

impl Default for State {
    fn default() -> Self {
        State::Text
    }
}

/// Receiver of scanner events.
///
/// Output is always delivered before the tag event that follows it.
pub trait EsiHandler {
    /// A start tag (or the first half of a self-closing tag) completed
    fn start_tag(&mut self, _name: &[u8], _attributes: &AttributeList) {}

    /// An end tag (or the second half of a self-closing tag) completed
    fn end_tag(&mut self, _name: &[u8]) {}

    /// Bytes that belong to no recognised tag
    fn output(&mut self, _bytes: &[u8]) {}
}

pub type StartTagFn = Box<dyn FnMut(&[u8], &AttributeList)>;
pub type EndTagFn = Box<dyn FnMut(&[u8])>;
pub type OutputFn = Box<dyn FnMut(&[u8])>;

/// Closure-based handler. Unset callbacks are no-ops.
#[derive(Default)]
pub struct Callbacks {
    start_tag: Option<StartTagFn>,
    end_tag: Option<EndTagFn>,
    output: Option<OutputFn>,
}

impl EsiHandler for Callbacks {
    fn start_tag(&mut self, name: &[u8], attributes: &AttributeList) {
        if let Some(f) = self.start_tag.as_mut() {
            f(name, attributes);
        }
    }

    fn end_tag(&mut self, name: &[u8]) {
        if let Some(f) = self.end_tag.as_mut() {
            f(name);
        }
    }

    fn output(&mut self, bytes: &[u8]) {
        if let Some(f) = self.output.as_mut() {
            f(bytes);
        }
    }
}

/// What one byte did to the current construct
enum Step {
    /// Staged, construct still open
    Pending,
    /// Plain text byte, stays in the passthrough run
    Passthrough,
    /// Construct abandoned; this byte starts a new passthrough run
    Rejected,
    /// Tag completed on this byte
    Fired,
}

/// Restartable ESI scanner bound to a handler
pub struct EsiParser<H: EsiHandler> {
    handler: H,
    state: State,
    previous: State,
    echo: EchoBuffer,
    carry: Option<CarryBuffer>,
    cursors: Cursors,
    attributes: AttributeList,
}

impl EsiParser<Callbacks> {
    /// Parser with no-op callbacks
    pub fn new() -> Self {
        Self::with_handler(Callbacks::default())
    }

    pub fn set_start_tag_handler<F>(&mut self, f: F)
    where
        F: FnMut(&[u8], &AttributeList) + 'static,
    {
        self.handler.start_tag = Some(Box::new(f));
    }

    pub fn set_end_tag_handler<F>(&mut self, f: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.handler.end_tag = Some(Box::new(f));
    }

    pub fn set_output_handler<F>(&mut self, f: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.handler.output = Some(Box::new(f));
    }
}

impl Default for EsiParser<Callbacks> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: EsiHandler> EsiParser<H> {
    /// Parser delivering events to `handler`
    pub fn with_handler(handler: H) -> Self {
        Self {
            handler,
            state: State::Text,
            previous: State::Text,
            echo: EchoBuffer::new(),
            carry: None,
            cursors: Cursors::default(),
            attributes: AttributeList::new(),
        }
    }

    /// Reset to the start state, discarding anything pending.
    pub fn init(&mut self) -> State {
        self.echo.clear();
        self.carry = None;
        self.reset_construct();
        self.previous = State::Text;
        self.state
    }

    /// Scan the next chunk of the body.
    pub fn execute(&mut self, chunk: &[u8]) -> State {
        if let Some(mut carry) = self.carry.take() {
            let resume = carry.append(chunk);
            self.scan(carry.as_slice(), resume);
            if !self.state.is_idle() {
                carry.compact(&mut self.cursors);
                self.carry = Some(carry);
            }
            return self.state;
        }

        if chunk.is_empty() {
            return self.state;
        }

        // Text up to the first possible opener needs no per-byte work
        let from = match find_tag_start(chunk) {
            Some(at) => at,
            None => {
                self.emit(chunk);
                return self.state;
            }
        };
        self.emit(&chunk[..from]);
        self.scan(chunk, from);

        if !self.state.is_idle() {
            self.carry = Some(CarryBuffer::capture(chunk, &mut self.cursors));
        }
        self.state
    }

    /// End of body: staged bytes of an unfinished construct become output.
    pub fn finish(&mut self) -> State {
        let handler = &mut self.handler;
        self.echo.drain_into(|bytes| handler.output(bytes));
        self.carry = None;
        self.previous = self.state;
        self.reset_construct();
        self.state
    }

    /// State before the most recently scanned byte
    pub fn previous_state(&self) -> State {
        self.previous
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Run the automaton over `buf[from..]`.
    ///
    /// Passthrough bytes are emitted as contiguous runs straight from `buf`.
    fn scan(&mut self, buf: &[u8], from: usize) {
        let mut run = from;
        let mut i = from;

        while i < buf.len() {
            if self.state.is_idle() {
                match memchr(b'<', &buf[i..]) {
                    Some(offset) => {
                        i += offset;
                        self.emit(&buf[run..i]);
                        run = i;
                    }
                    None => {
                        i = buf.len();
                        break;
                    }
                }
            }

            self.previous = self.state;
            match self.step(buf, i) {
                Step::Pending | Step::Passthrough => {}
                Step::Rejected => run = i,
                Step::Fired => run = i + 1,
            }
            i += 1;
        }

        if self.state.is_idle() && run < i {
            self.emit(&buf[run..i]);
        }
    }

    fn step(&mut self, buf: &[u8], i: usize) -> Step {
        let byte = buf[i];

        match self.state {
            State::Quoted { quote } => {
                if byte == b'\\' {
                    self.state = State::Escaped { quote };
                } else if byte == quote {
                    self.capture_value(buf, i);
                    self.cursors.mark = Some(i);
                    self.state = State::BeforeAttr;
                }
                self.echo.push(byte);
                return Step::Pending;
            }
            State::Escaped { quote } => return self.advance(byte, State::Quoted { quote }),
            _ => {}
        }

        if byte == b'<' {
            self.restart(i);
            return Step::Pending;
        }

        match self.state {
            State::Text => Step::Passthrough,
            State::Open => match byte {
                b'e' => self.advance(
                    byte,
                    State::Prefix {
                        closing: false,
                        matched: 1,
                    },
                ),
                b'/' => self.advance(
                    byte,
                    State::Prefix {
                        closing: true,
                        matched: 0,
                    },
                ),
                _ => self.reject(),
            },
            State::Prefix { closing, matched } if matched < ESI_PREFIX.len() => {
                if byte == ESI_PREFIX[matched] {
                    self.advance(
                        byte,
                        State::Prefix {
                            closing,
                            matched: matched + 1,
                        },
                    )
                } else {
                    self.reject()
                }
            }
            State::Prefix { closing, .. } => {
                if byte.is_ascii_lowercase() {
                    self.advance(byte, State::Name { closing })
                } else {
                    self.reject()
                }
            }
            State::Name { closing } => match byte {
                b'a'..=b'z' => self.advance(byte, self.state),
                b'>' => {
                    self.capture_name(buf, i, closing);
                    if closing {
                        self.fire_end(buf)
                    } else {
                        self.fire_start(buf, false)
                    }
                }
                b'/' if !closing => {
                    self.capture_name(buf, i, closing);
                    self.cursors.mark = Some(i);
                    self.advance(byte, State::SelfClose)
                }
                b if is_space(b) => {
                    self.capture_name(buf, i, closing);
                    self.cursors.mark = Some(i);
                    let next = if closing {
                        State::EndTrailing
                    } else {
                        State::BeforeAttr
                    };
                    self.advance(byte, next)
                }
                _ => self.reject(),
            },
            State::EndTrailing => match byte {
                b'>' => self.fire_end(buf),
                b if is_space(b) => self.advance(byte, self.state),
                _ => self.reject(),
            },
            State::BeforeAttr => match byte {
                b'>' => self.fire_start(buf, false),
                b'/' => self.advance(byte, State::SelfClose),
                b if is_space(b) => self.advance(byte, self.state),
                b if is_key_start(b) => self.advance(byte, State::AttrName),
                _ => self.reject(),
            },
            State::AttrName => match byte {
                b'=' => {
                    if let Some(mark) = self.cursors.mark {
                        self.cursors.attr_key = Some(trim(Span::between(mark, i), buf));
                    }
                    self.cursors.mark = Some(i);
                    self.advance(byte, State::BeforeValue)
                }
                b if is_key_char(b) => self.advance(byte, self.state),
                _ => self.reject(),
            },
            State::BeforeValue => match byte {
                b'"' | b'\'' => {
                    self.cursors.attr_value = self.cursors.mark.map(|mark| Span::new(mark, 0));
                    self.advance(byte, State::Quoted { quote: byte })
                }
                b if is_space(b) => self.advance(byte, self.state),
                _ => self.reject(),
            },
            State::SelfClose => match byte {
                b'>' => self.fire_start(buf, true),
                _ => self.reject(),
            },
            State::Quoted { .. } | State::Escaped { .. } => Step::Pending,
        }
    }

    #[inline]
    fn advance(&mut self, byte: u8, next: State) -> Step {
        self.echo.push(byte);
        self.state = next;
        Step::Pending
    }

    /// Begin a new candidate at the `<` at offset `i`.
    ///
    /// Anything staged for an older candidate is plain output.
    fn restart(&mut self, i: usize) {
        let handler = &mut self.handler;
        self.echo.drain_into(|bytes| handler.output(bytes));
        self.attributes.clear();
        self.cursors.reset();
        self.cursors.mark = Some(i);
        self.echo.push(b'<');
        self.state = State::Open;
    }

    fn reject(&mut self) -> Step {
        let handler = &mut self.handler;
        self.echo.drain_into(|bytes| handler.output(bytes));
        self.reset_construct();
        Step::Rejected
    }

    fn fire_start(&mut self, buf: &[u8], self_closing: bool) -> Step {
        self.echo.clear();
        let name = self
            .cursors
            .tag_name
            .map(|span| span.slice(buf))
            .unwrap_or_default();
        self.handler.start_tag(name, &self.attributes);
        if self_closing {
            self.handler.end_tag(name);
        }
        self.reset_construct();
        Step::Fired
    }

    fn fire_end(&mut self, buf: &[u8]) -> Step {
        self.echo.clear();
        let name = self
            .cursors
            .tag_name
            .map(|span| span.slice(buf))
            .unwrap_or_default();
        self.handler.end_tag(name);
        self.reset_construct();
        Step::Fired
    }

    fn capture_name(&mut self, buf: &[u8], i: usize, closing: bool) {
        if let Some(mark) = self.cursors.mark {
            // skip `<` or `</`
            let skip = if closing { 2 } else { 1 };
            self.cursors.tag_name = Some(trim(Span::between(mark + skip, i), buf));
        }
    }

    /// Closing quote at `i`: store the finished key/value pair.
    fn capture_value(&mut self, buf: &[u8], i: usize) {
        if let (Some(key), Some(value)) = (self.cursors.attr_key, self.cursors.attr_value) {
            let value = trim_value(Span::between(value.start, i), buf);
            self.attributes.push(Attribute::from_bytes(
                key.slice(buf),
                &unescape(value.slice(buf)),
            ));
        }
        self.cursors.attr_key = None;
        self.cursors.attr_value = None;
    }

    fn reset_construct(&mut self) {
        self.attributes.clear();
        self.cursors.reset();
        self.state = State::Text;
    }

    #[inline]
    fn emit(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.handler.output(bytes);
        }
    }
}

#[inline]
fn is_space(byte: u8) -> bool {
    byte.is_ascii_whitespace()
}

#[inline]
fn is_key_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'-' || byte == b'_'
}

#[inline]
fn is_key_char(byte: u8) -> bool {
    is_key_start(byte) || byte.is_ascii_digit()
}

#[inline]
fn is_left_delimiter(byte: u8) -> bool {
    is_space(byte) || matches!(byte, b'=' | b'"' | b'\'' | b'<')
}

#[inline]
fn is_right_delimiter(byte: u8) -> bool {
    is_space(byte) || matches!(byte, b'=' | b'"' | b'\'' | b'>')
}

/// Strip delimiters from both ends of `span`
fn trim(span: Span, buf: &[u8]) -> Span {
    let mut start = span.start;
    let mut end = span.end();
    while start < end && is_left_delimiter(buf[start]) {
        start += 1;
    }
    while end > start && is_right_delimiter(buf[end - 1]) {
        end -= 1;
    }
    Span::between(start, end)
}

/// Like [`trim`], but a trailing delimiter escaped by `\` is kept
fn trim_value(span: Span, buf: &[u8]) -> Span {
    let mut start = span.start;
    let mut end = span.end();
    while start < end && is_left_delimiter(buf[start]) {
        start += 1;
    }
    while end > start && is_right_delimiter(buf[end - 1]) && !is_escaped(buf, start, end - 1) {
        end -= 1;
    }
    Span::between(start, end)
}

/// Odd run of backslashes right before `at` (not looking before `floor`)
fn is_escaped(buf: &[u8], floor: usize, at: usize) -> bool {
    buf[floor..at]
        .iter()
        .rev()
        .take_while(|&&b| b == b'\\')
        .count()
        % 2
        == 1
}

/// Resolve `\x` to `x`. A lone trailing backslash is kept.
fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&b) = bytes.next() {
        if b == b'\\' {
            match bytes.next() {
                Some(&next) => out.push(next),
                None => out.push(b),
            }
        } else {
            out.push(b);
        }
    }
    out
}
