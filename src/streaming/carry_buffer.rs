//! Carry Buffer for Constructs Split Across Chunks
//!
//! The network may cut a response body anywhere, including in the middle of
//! `<esi:include src='/fr` + `agment'/>`. When a chunk ends mid-construct the
//! unresolved tail is copied here, and every in-flight cursor (mark, tag
//! name, attribute key, attribute value) is rewritten relative to the copy.
//! The next chunk is appended and scanning resumes where it stopped.
//!
//! Cursors are plain offsets, so appending never invalidates them. Only
//! dropping a consumed prefix shifts them, and that always goes through
//! [`Cursors::rebase`].

/// Half-open byte range `[start, start + len)` in the active scan buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// Span covering `[start, end)`
    pub fn between(start: usize, end: usize) -> Self {
        Self {
            start,
            len: end.saturating_sub(start),
        }
    }

    /// One past the last byte
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Borrow the spanned bytes
    #[inline]
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end()]
    }
}

/// Every offset into the scan buffer that must survive a chunk boundary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursors {
    /// Start of the current candidate construct
    pub mark: Option<usize>,
    /// Tag name, once its delimiter was seen
    pub tag_name: Option<Span>,
    /// Attribute key, once its `=` was seen
    pub attr_key: Option<Span>,
    /// Attribute value, while its quotes are open
    pub attr_value: Option<Span>,
}

impl Cursors {
    /// Lowest offset still referenced, if any
    pub fn lowest(&self) -> Option<usize> {
        [
            self.mark,
            self.tag_name.map(|s| s.start),
            self.attr_key.map(|s| s.start),
            self.attr_value.map(|s| s.start),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Shift every cursor left by `shift` bytes.
    ///
    /// `shift` must not exceed [`Cursors::lowest`].
    pub fn rebase(&mut self, shift: usize) {
        if shift == 0 {
            return;
        }
        debug_assert!(self.lowest().map_or(true, |low| low >= shift));

        if let Some(mark) = self.mark.as_mut() {
            *mark -= shift;
        }
        for span in [&mut self.tag_name, &mut self.attr_key, &mut self.attr_value]
            .into_iter()
            .flatten()
        {
            span.start -= shift;
        }
    }

    /// Forget every cursor
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Owned copy of input the automaton has not finished resolving.
pub struct CarryBuffer {
    data: Vec<u8>,
}

impl CarryBuffer {
    /// Copy the unresolved tail of `buf` and rebase `cursors` into the copy.
    ///
    /// Bytes before the lowest live cursor were already resolved into output
    /// or tag events and are left behind.
    pub fn capture(buf: &[u8], cursors: &mut Cursors) -> Self {
        let from = cursors.lowest().unwrap_or(buf.len()).min(buf.len());
        cursors.rebase(from);

        Self {
            data: buf[from..].to_vec(),
        }
    }

    /// Append the next chunk. Returns the offset where scanning resumes.
    pub fn append(&mut self, chunk: &[u8]) -> usize {
        let resume = self.data.len();
        self.data.extend_from_slice(chunk);
        resume
    }

    /// Drop the prefix no cursor points into any more.
    pub fn compact(&mut self, cursors: &mut Cursors) {
        let from = cursors.lowest().unwrap_or(self.data.len()).min(self.data.len());
        if from > 0 {
            self.data.drain(..from);
            cursors.rebase(from);
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursors_at(mark: usize) -> Cursors {
        Cursors {
            mark: Some(mark),
            ..Default::default()
        }
    }

    #[test]
    fn test_capture_keeps_tail_from_lowest_cursor() {
        let buf = b"hello <esi:include src='/fr";
        let mut cursors = cursors_at(18);
        cursors.tag_name = Some(Span::new(7, 11));

        let carry = CarryBuffer::capture(buf, &mut cursors);

        assert_eq!(carry.as_slice(), b"esi:include src='/fr");
        assert_eq!(cursors.tag_name, Some(Span::new(0, 11)));
        assert_eq!(cursors.mark, Some(11));
        assert_eq!(
            cursors.tag_name.unwrap().slice(carry.as_slice()),
            b"esi:include"
        );
    }

    #[test]
    fn test_append_preserves_offsets() {
        let mut cursors = cursors_at(0);
        let mut carry = CarryBuffer::capture(b"<esi:t", &mut cursors);

        let resume = carry.append(b"ry>");
        assert_eq!(resume, 6);
        assert_eq!(carry.as_slice(), b"<esi:try>");
        assert_eq!(cursors.mark, Some(0));
    }

    #[test]
    fn test_compact_rebases_all_spans() {
        let mut cursors = Cursors {
            mark: Some(20),
            tag_name: Some(Span::new(5, 11)),
            attr_key: Some(Span::new(17, 3)),
            attr_value: Some(Span::new(20, 0)),
        };
        let mut carry = CarryBuffer::capture(b"xxxx<esi:include src='abc", &mut cursors);
        assert_eq!(carry.as_slice().len(), 20);
        assert_eq!(cursors.tag_name, Some(Span::new(0, 11)));

        // Tag name no longer needed: only the key and value remain live.
        cursors.tag_name = None;
        carry.compact(&mut cursors);

        assert_eq!(carry.as_slice(), b"src='abc");
        assert_eq!(cursors.attr_key, Some(Span::new(0, 3)));
        assert_eq!(cursors.mark, Some(3));
        assert_eq!(cursors.attr_value, Some(Span::new(3, 0)));
    }

    #[test]
    fn test_capture_without_cursors_is_empty() {
        let mut cursors = Cursors::default();
        let carry = CarryBuffer::capture(b"plain text", &mut cursors);
        assert!(carry.as_slice().is_empty());
    }

    #[test]
    fn test_lowest_picks_minimum() {
        let cursors = Cursors {
            mark: Some(9),
            tag_name: Some(Span::new(2, 3)),
            attr_key: None,
            attr_value: Some(Span::new(7, 1)),
        };
        assert_eq!(cursors.lowest(), Some(2));
        assert_eq!(Cursors::default().lowest(), None);
    }

    #[test]
    fn test_span_between() {
        let span = Span::between(3, 8);
        assert_eq!(span, Span::new(3, 5));
        assert_eq!(span.end(), 8);
        assert_eq!(span.slice(b"012345678"), b"34567");
        assert_eq!(Span::between(8, 3).len, 0);
    }
}
