use anyhow::Result;
use tracing::debug;

use crate::config::MatcherTuning;
use crate::fuzzy;
use crate::phoneme::PhonemeConverter;
use crate::segment::TextSegment;
use crate::srt::TranscriptIndex;

/// Every outcome the matcher can produce for a piece of text. All four are
/// persisted to the ledger; only `Matched` contributes to the slice list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentRecord {
    /// Reference text located in the transcript.
    Matched {
        start_ms: i64,
        end_ms: i64,
        phonetic: String,
        transcript: String,
        text: String,
    },
    /// Reference text with no acceptable home in the transcript. The
    /// timestamp range is degenerate (start == end) and the cursor stays put.
    ReferenceOnly {
        at_ms: i64,
        phonetic: String,
        text: String,
    },
    /// Transcript span consumed without a reference counterpart, skipped on
    /// the way to an accepted match.
    TranscriptOnly {
        start_ms: i64,
        end_ms: i64,
        words: String,
        transcript: String,
    },
    /// A candidate rejected for sitting too deep in the search window.
    Ambiguous {
        start_ms: i64,
        end_ms: i64,
        transcript: String,
        phonetic: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Matched,
    ReferenceOnly,
    TranscriptOnly,
    Ambiguous,
}

impl RecordKind {
    pub fn marker(self) -> char {
        match self {
            RecordKind::Matched => 'G',
            RecordKind::ReferenceOnly => 'B',
            RecordKind::TranscriptOnly => 'S',
            RecordKind::Ambiguous => 'M',
        }
    }
}

impl AlignmentRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            AlignmentRecord::Matched { .. } => RecordKind::Matched,
            AlignmentRecord::ReferenceOnly { .. } => RecordKind::ReferenceOnly,
            AlignmentRecord::TranscriptOnly { .. } => RecordKind::TranscriptOnly,
            AlignmentRecord::Ambiguous { .. } => RecordKind::Ambiguous,
        }
    }

    pub fn start_ms(&self) -> i64 {
        match self {
            AlignmentRecord::Matched { start_ms, .. }
            | AlignmentRecord::TranscriptOnly { start_ms, .. }
            | AlignmentRecord::Ambiguous { start_ms, .. } => *start_ms,
            AlignmentRecord::ReferenceOnly { at_ms, .. } => *at_ms,
        }
    }

    pub fn end_ms(&self) -> i64 {
        match self {
            AlignmentRecord::Matched { end_ms, .. }
            | AlignmentRecord::TranscriptOnly { end_ms, .. }
            | AlignmentRecord::Ambiguous { end_ms, .. } => *end_ms,
            AlignmentRecord::ReferenceOnly { at_ms, .. } => *at_ms,
        }
    }

    /// The text that goes on the record line itself.
    pub fn primary_text(&self) -> &str {
        match self {
            AlignmentRecord::Matched { text, .. } => text,
            AlignmentRecord::ReferenceOnly { text, .. } => text,
            AlignmentRecord::TranscriptOnly { transcript, .. } => transcript,
            AlignmentRecord::Ambiguous { phonetic, .. } => phonetic,
        }
    }

    /// Discarded alternate texts, written as `# ` comment lines for audit.
    pub fn aux_texts(&self) -> Vec<&str> {
        match self {
            AlignmentRecord::Matched {
                phonetic,
                transcript,
                ..
            } => vec![phonetic, transcript],
            AlignmentRecord::ReferenceOnly { phonetic, .. } => vec![phonetic],
            AlignmentRecord::TranscriptOnly { words, .. } => vec![words],
            AlignmentRecord::Ambiguous { transcript, .. } => vec![transcript],
        }
    }
}

/// Single-pass fuzzy matcher over the phonetic transcript.
///
/// The cursor is the last accepted buffer offset and never moves backwards:
/// the reference text and the audio are assumed to proceed in the same order,
/// so a failed segment leaves the cursor alone rather than re-searching
/// earlier transcript.
pub struct Matcher<'a> {
    index: &'a TranscriptIndex,
    converter: &'a dyn PhonemeConverter,
    tuning: MatcherTuning,
    cursor: usize,
}

impl<'a> Matcher<'a> {
    pub fn new(
        index: &'a TranscriptIndex,
        converter: &'a dyn PhonemeConverter,
        tuning: MatcherTuning,
    ) -> Self {
        Self {
            index,
            converter,
            tuning,
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Align one segment, returning its records in emission order. At most
    /// one `Matched` per segment; every rejected candidate is kept as
    /// `Ambiguous` for the audit trail.
    pub fn align_segment(&mut self, segment: &TextSegment) -> Result<Vec<AlignmentRecord>> {
        let phonetic = format!("{} ", self.converter.convert(&segment.text)?.trim());
        let needle: Vec<char> = phonetic.chars().collect();
        let len = needle.len();

        // Long segments match right away or not at all, so cap their window
        // at twice their own length. Short segments may trail an arbitrary
        // unmatched preamble (chapter headings, narrator credits), bounded by
        // the fixed lookahead.
        let window_end = if len > self.tuning.long_needle_cutoff {
            self.cursor + 2 * len
        } else {
            self.cursor + self.tuning.short_lookahead
        };
        let window_end = window_end.min(self.index.buffer_len());
        let window = &self.index.buffer()[self.cursor.min(window_end)..window_end];
        let max_dist = len / self.tuning.max_dist_divisor.max(1);

        let mut records = Vec::new();
        for candidate in fuzzy::find_near_matches(&needle, window, max_dist) {
            let start = self.cursor + candidate.start;
            let end = self.cursor + candidate.end;
            let start_ms = self.index.time_at(start);
            let end_ms = self.index.time_at(end);

            // Candidates near the cursor are trusted even when sloppy; the
            // deeper into the window one sits, the closer to exact it must be.
            let horizon = self.tuning.accept_horizon as f64
                * (1.0 - candidate.dist as f64 / len as f64);
            if (candidate.start as f64) < horizon {
                if candidate.start != 0 {
                    records.push(AlignmentRecord::TranscriptOnly {
                        start_ms: self.index.time_at(self.cursor),
                        end_ms: start_ms,
                        words: self.index.words_in_range(self.cursor, start),
                        transcript: self.index.phonetic_range(self.cursor, start),
                    });
                }
                records.push(AlignmentRecord::Matched {
                    start_ms,
                    end_ms,
                    phonetic,
                    transcript: self.index.phonetic_range(start, end),
                    text: segment.text.clone(),
                });
                debug!(start, end, dist = candidate.dist, "segment matched");
                self.cursor = end;
                return Ok(records);
            }
            records.push(AlignmentRecord::Ambiguous {
                start_ms,
                end_ms,
                transcript: self.index.phonetic_range(start, end),
                phonetic: phonetic.clone(),
            });
        }

        // No acceptable candidate: the segment is reference-only and the
        // cursor stays where it was.
        let at_ms = self.index.time_at(self.cursor);
        records.push(AlignmentRecord::ReferenceOnly {
            at_ms,
            phonetic,
            text: segment.text.clone(),
        });
        Ok(records)
    }
}
