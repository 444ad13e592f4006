//! Passthrough Pre-Scan
//!
//! Most of an HTML body contains no ESI markup at all. Before the byte
//! automaton runs, a chunk that starts in the text state is searched for the
//! first `<esi:` or `</esi:` opener. Everything before it is plain output and
//! never needs per-byte state transitions.
//!
//! A chunk may end in the middle of an opener (`...<es`), so a trailing
//! partial match is reported too and the automaton picks it up from there.

use memchr::memchr_iter;

const START_OPENER: &[u8] = b"<esi:";
const END_OPENER: &[u8] = b"</esi:";

/// Offset of the `<` where an ESI tag could begin.
///
/// That is either a complete `<esi:` or `</esi:` opener, or a prefix of one
/// cut off by the end of the chunk. Returns `None` when the whole chunk is
/// plain output.
pub fn find_tag_start(chunk: &[u8]) -> Option<usize> {
    memchr_iter(b'<', chunk).find(|&at| {
        let rest = &chunk[at..];
        rest.starts_with(START_OPENER)
            || rest.starts_with(END_OPENER)
            || is_partial_opener(rest)
    })
}

/// `rest` is shorter than an opener and matches one as far as it goes
fn is_partial_opener(rest: &[u8]) -> bool {
    (rest.len() < START_OPENER.len() && START_OPENER.starts_with(rest))
        || (rest.len() < END_OPENER.len() && END_OPENER.starts_with(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_chunk() {
        assert_eq!(find_tag_start(b"<html><body>hello</body></html>"), None);
        assert_eq!(find_tag_start(b""), None);
    }

    #[test]
    fn test_full_start_opener() {
        let chunk = b"<p>a</p><esi:include src='/x'/>";
        assert_eq!(find_tag_start(chunk), Some(8));
    }

    #[test]
    fn test_full_end_opener() {
        assert_eq!(find_tag_start(b"x</esi:try>"), Some(1));
    }

    #[test]
    fn test_partial_at_chunk_end() {
        assert_eq!(find_tag_start(b"abc<"), Some(3));
        assert_eq!(find_tag_start(b"abc<es"), Some(3));
        assert_eq!(find_tag_start(b"abc</esi"), Some(3));
    }

    #[test]
    fn test_lookalikes_skipped() {
        // `<em>` and `<es>` are ordinary markup; the real opener comes later
        let chunk = b"<em>x</em><es><esi:vars>";
        assert_eq!(find_tag_start(chunk), Some(14));
        assert_eq!(find_tag_start(b"<esx"), None);
    }
}
