//! Echo Buffer for Ambiguous Bytes
//!
//! Bytes such as `<e` might open `<esi:try>` or might be the start of `<em>`.
//! Until the automaton decides, they are staged here. Once resolved they are
//! either released to the output handler (ordinary markup) or discarded
//! (they were part of a recognised ESI tag).

/// Default staging capacity
pub const DEFAULT_ECHO_CAPACITY: usize = 4096;

/// Growable staging buffer for not-yet-classified bytes.
pub struct EchoBuffer {
    /// Staged bytes, never already committed to output
    bytes: Vec<u8>,
}

impl EchoBuffer {
    /// Create with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ECHO_CAPACITY)
    }

    /// Create with a custom initial capacity (grows on demand)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Stage one byte
    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    /// Forget staged bytes without emitting them
    #[inline]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Hand the staged bytes to `sink` and clear the buffer
    pub fn drain_into<F: FnMut(&[u8])>(&mut self, mut sink: F) {
        if !self.bytes.is_empty() {
            sink(&self.bytes);
            self.bytes.clear();
        }
    }
}

impl Default for EchoBuffer {
    fn default() -> Self {
        Self::new()
    }
}
