//! Passage segmentation for plain text and transcripts.
//!
//! A passage ends at a run of terminal punctuation followed by whitespace
//! (or the end of the text), or at a line break. Transcript segments are
//! always boundaries. Passage ranges index the source text directly, so
//! the source can be rebuilt from the passages plus the whitespace between
//! them.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::semantic::document::Transcript;
use crate::semantic::preprocess::normalize_text;

/// Characters that stay attached to a passage when they directly follow
/// its terminal punctuation.
const CLOSERS: &[char] = &['"', '\'', ')', ']', '}', '”', '’', '»'];

/// Time bounds in seconds, as recorded by the transcriber.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: f64,
    pub end: f64,
}

/// The atomic unit of search and ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    /// Position of the passage within its document
    pub index: usize,
    /// Normalized passage text (whitespace collapsed)
    pub text: String,
    /// Byte range of the trimmed span in its source text; for transcripts
    /// the source is the text of `segment`
    pub range: Range<usize>,
    /// Originating transcript segment
    pub segment: Option<usize>,
    pub time: Option<TimeInterval>,
    pub speaker: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    terminals: Vec<char>,
    max_chars: usize,
}

impl Segmenter {
    pub fn new(terminals: Vec<char>, max_chars: usize) -> Self {
        Self {
            terminals,
            max_chars: max_chars.max(1),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(config.terminal_punctuation.clone(), config.max_passage_chars)
    }

    /// Split a plain-text document into passages.
    pub fn segment_text(&self, text: &str) -> Vec<Passage> {
        self.spans(text)
            .into_iter()
            .enumerate()
            .map(|(index, range)| Passage {
                index,
                text: normalize_text(&text[range.clone()]),
                range,
                segment: None,
                time: None,
                speaker: None,
                group: None,
            })
            .collect()
    }

    /// Split a transcript into passages. Every passage inherits the time
    /// interval of its segment; no timing is interpolated inside a segment.
    pub fn segment_transcript(&self, transcript: &Transcript) -> Vec<Passage> {
        let mut passages = Vec::new();

        for (segment_idx, segment) in transcript.segments.iter().enumerate() {
            let time = Some(TimeInterval {
                start: segment.start,
                end: segment.end,
            });

            for range in self.spans(&segment.text) {
                passages.push(Passage {
                    index: passages.len(),
                    text: normalize_text(&segment.text[range.clone()]),
                    range,
                    segment: Some(segment_idx),
                    time,
                    speaker: segment.speaker.clone(),
                    group: segment.group.clone(),
                });
            }
        }

        passages
    }

    /// Trimmed, non-empty, length-bounded passage ranges in source order.
    pub fn spans(&self, text: &str) -> Vec<Range<usize>> {
        self.raw_spans(text)
            .into_iter()
            .filter_map(|range| trim_range(text, range))
            .flat_map(|range| self.split_long(text, range))
            .collect()
    }

    /// Boundary ranges covering the text, excluding line break characters.
    fn raw_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            if c == '\n' || c == '\r' {
                spans.push(start..idx);
                start = idx + c.len_utf8();
                continue;
            }

            if !self.terminals.contains(&c) {
                continue;
            }

            let mut end = idx + c.len_utf8();
            while let Some(&(next_idx, next)) = chars.peek() {
                if self.terminals.contains(&next) || CLOSERS.contains(&next) {
                    end = next_idx + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }

            // "3.14" and "example.com" do not end a passage
            let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
            if at_boundary {
                spans.push(start..end);
                start = end;
            }
        }

        spans.push(start..text.len());
        spans
    }

    /// Break an over-long range at the last whitespace before the limit,
    /// or hard at the limit when the range has no whitespace.
    fn split_long(&self, text: &str, range: Range<usize>) -> Vec<Range<usize>> {
        let mut pieces = Vec::new();
        let mut start = range.start;

        while start < range.end {
            let rest = &text[start..range.end];
            let limit = match rest.char_indices().nth(self.max_chars) {
                Some((offset, _)) => start + offset,
                None => {
                    pieces.extend(trim_range(text, start..range.end));
                    break;
                }
            };

            let cut = text[start..limit]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(offset, _)| start + offset)
                .filter(|&cut| cut > start)
                .unwrap_or(limit);

            pieces.extend(trim_range(text, start..cut));
            start = skip_whitespace(text, cut, range.end);
        }

        pieces
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

/// Shrink a range to exclude surrounding whitespace; `None` if nothing is left.
fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();

    if leading == slice.len() {
        return None;
    }

    Some(range.start + leading..range.end - trailing)
}

fn skip_whitespace(text: &str, from: usize, end: usize) -> usize {
    text[from..end]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(offset, _)| from + offset)
        .unwrap_or(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::document::TranscriptSegment;

    fn texts(passages: &[Passage]) -> Vec<&str> {
        passages.iter().map(|p| p.text.as_str()).collect()
    }

    /// Passages plus the gaps between them must give back the source.
    fn assert_reconstructs(text: &str, passages: &[Passage]) {
        let mut cursor = 0;
        let mut rebuilt = String::new();
        for passage in passages {
            let gap = &text[cursor..passage.range.start];
            assert!(gap.trim().is_empty(), "non-whitespace dropped: {gap:?}");
            rebuilt.push_str(gap);
            rebuilt.push_str(&text[passage.range.clone()]);
            cursor = passage.range.end;
        }
        assert!(text[cursor..].trim().is_empty());
        rebuilt.push_str(&text[cursor..]);
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_splits_on_terminal_punctuation() {
        let text = "First sentence. Second one! Is it third? Yes… done";
        let passages = Segmenter::default().segment_text(text);

        assert_eq!(
            texts(&passages),
            vec!["First sentence.", "Second one!", "Is it third?", "Yes…", "done"]
        );
        assert_reconstructs(text, &passages);
    }

    #[test]
    fn test_terminal_runs_and_closers_stay_together() {
        let text = "Really?! \"Quoted.\" Then... more";
        let passages = Segmenter::default().segment_text(text);

        assert_eq!(texts(&passages), vec!["Really?!", "\"Quoted.\"", "Then...", "more"]);
        assert_reconstructs(text, &passages);
    }

    #[test]
    fn test_inner_dots_do_not_split() {
        let passages = Segmenter::default().segment_text("Pi is 3.14 on example.com today.");
        assert_eq!(passages.len(), 1);
    }

    #[test]
    fn test_line_breaks_are_boundaries_and_blank_lines_dropped() {
        let text = "line one\n\n   \nline two\r\nline three";
        let passages = Segmenter::default().segment_text(text);

        assert_eq!(texts(&passages), vec!["line one", "line two", "line three"]);
        assert_reconstructs(text, &passages);
    }

    #[test]
    fn test_empty_and_whitespace_text() {
        assert!(Segmenter::default().segment_text("").is_empty());
        assert!(Segmenter::default().segment_text(" \n\t \n").is_empty());
    }

    #[test]
    fn test_normalizes_passage_text() {
        let passages = Segmenter::default().segment_text("  lots   of\tspace.  ");
        assert_eq!(passages[0].text, "lots of space.");
        assert_eq!(passages[0].range, 2..18);
    }

    #[test]
    fn test_custom_terminals() {
        let segmenter = Segmenter::new(vec![';'], 1000);
        let passages = segmenter.segment_text("a; b. c");
        assert_eq!(texts(&passages), vec!["a;", "b. c"]);
    }

    #[test]
    fn test_long_passages_split_at_whitespace() {
        let segmenter = Segmenter::new(vec!['.'], 16);
        let text = "alpha beta gamma delta epsilon zeta";
        let passages = segmenter.segment_text(text);

        assert!(passages.len() > 1);
        for passage in &passages {
            assert!(passage.text.chars().count() <= 16, "{:?}", passage.text);
            assert!(!passage.text.starts_with(' ') && !passage.text.ends_with(' '));
        }
        assert_reconstructs(text, &passages);
    }

    #[test]
    fn test_long_word_is_hard_split() {
        let segmenter = Segmenter::new(vec!['.'], 16);
        let text = "x".repeat(40);
        let passages = segmenter.segment_text(&text);

        assert_eq!(passages.len(), 3);
        assert_reconstructs(&text, &passages);
    }

    #[test]
    fn test_multibyte_text_keeps_char_boundaries() {
        let text = "日本語の文です。次の文！ Ünïcödé… end";
        let passages = Segmenter::default().segment_text(text);
        assert_reconstructs(text, &passages);
    }

    #[test]
    fn test_transcript_segments_are_boundaries() {
        let transcript = Transcript {
            name: None,
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 2.5,
                    text: " We went to the market".to_string(),
                    speaker: Some("Ana".to_string()),
                    group: None,
                },
                TranscriptSegment {
                    start: 2.5,
                    end: 6.0,
                    text: " and bought apples. Then we left.".to_string(),
                    speaker: None,
                    group: Some("intro".to_string()),
                },
                TranscriptSegment {
                    start: 6.0,
                    end: 7.0,
                    text: "   ".to_string(),
                    speaker: None,
                    group: None,
                },
            ],
        };

        let passages = Segmenter::default().segment_transcript(&transcript);

        assert_eq!(
            texts(&passages),
            vec!["We went to the market", "and bought apples.", "Then we left."]
        );
        assert_eq!(passages[0].segment, Some(0));
        assert_eq!(passages[0].speaker.as_deref(), Some("Ana"));
        assert_eq!(passages[1].time, Some(TimeInterval { start: 2.5, end: 6.0 }));
        assert_eq!(passages[2].time, passages[1].time);
        assert_eq!(passages[2].group.as_deref(), Some("intro"));
        assert_eq!(
            passages.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
