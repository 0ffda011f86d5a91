//! Streaming text segmentation for TTS handoff, ported from the original's
//! `segment_text`. A token stream from the LLM is chunked into segments at
//! sentence-ish delimiters so TTS can start speaking before the full
//! response is generated.
//!
//! The original has a latent bug: back-to-back delimiters (e.g. `".."`)
//! can flush an empty segment, because only the soft-split branch guards
//! with `if seg:` — the delimiter branch does not. This port applies the
//! non-empty guard uniformly to both branches.
//!
//! A delimiter always splits regardless of buffer length — `min_chars` is
//! only a floor on the *soft*-split cut point, never a gate on the
//! delimiter branch (`find_first_delim_index` in the original fires
//! unconditionally). Every emitted segment also carries its exact source
//! bytes, including surrounding whitespace: nothing is trimmed, so the
//! concatenation of all emitted segments equals the concatenation of all
//! pushed input.

use voicecore_domain::config::pipeline_tunables::{SEGMENT_DELIMITERS, SEGMENT_MAX_BUFFER, SEGMENT_MIN_CHARS, SEGMENT_MIN_WORDS};

/// Incremental segmenter: feed it streamed text chunks via [`Segmenter::push`]
/// and drain completed segments; call [`Segmenter::flush`] once the stream
/// ends to emit any trailing partial segment.
#[derive(Default)]
pub struct Segmenter {
    buffer: String,
}

impl Segmenter {
    pub fn new() -> Self {
        Self { buffer: String::new() }
    }

    /// Feed a chunk of streamed text, returning zero or more completed
    /// segments (in order).
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut out = Vec::new();
        for ch in chunk.chars() {
            self.buffer.push(ch);

            if SEGMENT_DELIMITERS.contains(ch) {
                let seg = std::mem::take(&mut self.buffer);
                if !seg.is_empty() {
                    out.push(seg);
                }
                continue;
            }

            let word_count = self.buffer.split_whitespace().count();
            if self.buffer.len() >= SEGMENT_MAX_BUFFER || word_count >= SEGMENT_MIN_WORDS * 2 {
                let len = self.buffer.len();
                let target = SEGMENT_MIN_CHARS.max(len.min(SEGMENT_MAX_BUFFER)).min(len);
                // Split after the last space at-or-before `target` so the
                // space itself stays with the emitted segment; if none
                // exists, fall back to a hard cut at `target`.
                let split_at = self.buffer[..target].rfind(' ').map(|i| i + 1).unwrap_or(target);
                if split_at > 0 {
                    let rest = self.buffer.split_off(split_at);
                    let seg = std::mem::replace(&mut self.buffer, rest);
                    if !seg.is_empty() {
                        out.push(seg);
                    }
                }
            }
        }
        out
    }

    /// Flush any remaining buffered text as a final segment (non-empty only).
    pub fn flush(&mut self) -> Option<String> {
        let seg = std::mem::take(&mut self.buffer);
        if seg.is_empty() {
            None
        } else {
            Some(seg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_delimiter_regardless_of_length() {
        let mut seg = Segmenter::new();
        let mut out = seg.push("Hi");
        out.extend(seg.push(". "));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], "Hi.");
    }

    #[test]
    fn long_clause_also_splits_on_delimiter() {
        let mut seg = Segmenter::new();
        let long_sentence = "This is a reasonably long opening clause that exceeds the minimum";
        let mut out = seg.push(long_sentence);
        out.extend(seg.push(". "));
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("This is"));
    }

    #[test]
    fn concatenation_of_segments_equals_input() {
        let mut seg = Segmenter::new();
        let mut out = seg.push("Hello. ");
        out.extend(seg.push(" World"));
        if let Some(last) = seg.flush() {
            out.push(last);
        }
        assert_eq!(out.concat(), "Hello.  World");
    }

    #[test]
    fn back_to_back_delimiters_never_yield_empty_segment() {
        let mut seg = Segmenter::new();
        let mut out = seg.push("This sentence is long enough to cross the minimum character threshold");
        out.extend(seg.push(".."));
        out.extend(seg.push(" more text"));
        if let Some(last) = seg.flush() {
            out.push(last);
        }
        assert!(out.iter().all(|s| !s.trim().is_empty()));
    }

    #[test]
    fn flush_emits_trailing_partial_segment() {
        let mut seg = Segmenter::new();
        seg.push("no terminal punctuation here");
        assert_eq!(seg.flush().as_deref(), Some("no terminal punctuation here"));
    }

    #[test]
    fn flush_on_empty_buffer_yields_none() {
        let mut seg = Segmenter::new();
        assert!(seg.flush().is_none());
    }
}
