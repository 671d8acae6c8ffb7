use std::io::BufRead;

use anyhow::{anyhow, Result};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::phoneme::PhonemeConverter;

/// Protocol violations in the one-word-per-record SRT stream. The producer is
/// assumed buggy or the file corrupted, so all of these abort the run.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("record {expected}: counter line reads {found:?}")]
    CounterMismatch { expected: u64, found: String },
    #[error("record {record}: bad timestamp line {line:?}")]
    BadTimestamp { record: u64, line: String },
    #[error("record {record}: word contains whitespace: {word:?}")]
    WordWhitespace { record: u64, word: String },
    #[error("record {record}: expected blank separator, got {line:?}")]
    NonBlankSeparator { record: u64, line: String },
}

/// How many transcript words go to the phonemizer per call.
const PHONEME_BATCH: usize = 64;

struct RawWord {
    start_ms: i64,
    end_ms: i64,
    text: String,
}

/// The concatenated phonetic transcript with parallel offset and time tables.
///
/// `offsets[i]` is the position of word i's first phonetic character inside
/// `buffer`; `times[i]` its start/end in milliseconds. Both are non-decreasing
/// in word order. Read-only once ingest returns.
#[derive(Debug)]
pub struct TranscriptIndex {
    buffer: Vec<char>,
    offsets: Vec<usize>,
    times: Vec<(i64, i64)>,
    graphemes: Vec<String>,
}

impl TranscriptIndex {
    /// Consume the whole transcript stream and build the index.
    ///
    /// Each record is four lines: a counter strictly incrementing from 1, a
    /// `HH:MM:SS,mmm --> HH:MM:SS,mmm` timestamp, exactly one word, and a
    /// blank separator. End of stream is an empty read. Words are phonemized
    /// in record-order batches; each word's offset is recorded before its
    /// phonemes are appended.
    pub fn ingest<R: BufRead>(mut reader: R, converter: &dyn PhonemeConverter) -> Result<Self> {
        let timestamp_re =
            Regex::new(r"^(\d{2}):(\d{2}):(\d{2}),(\d{3}) --> (\d{2}):(\d{2}):(\d{2}),(\d{3})")?;

        let mut index = TranscriptIndex {
            buffer: Vec::new(),
            offsets: Vec::new(),
            times: Vec::new(),
            graphemes: Vec::new(),
        };
        let mut pending: Vec<RawWord> = Vec::new();
        let mut count: u64 = 0;
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let counter = line.trim();
            if counter.is_empty() {
                // tolerate trailing newlines after the last record
                break;
            }
            count += 1;
            if counter.parse::<u64>().ok() != Some(count) {
                return Err(ProtocolError::CounterMismatch {
                    expected: count,
                    found: counter.to_string(),
                }
                .into());
            }

            line.clear();
            reader.read_line(&mut line)?;
            let (start_ms, end_ms) = parse_timestamp_line(&timestamp_re, line.trim_end())
                .ok_or_else(|| ProtocolError::BadTimestamp {
                    record: count,
                    line: line.trim_end().to_string(),
                })?;

            line.clear();
            reader.read_line(&mut line)?;
            let word = line.trim().to_string();
            if word.chars().any(char::is_whitespace) {
                return Err(ProtocolError::WordWhitespace {
                    record: count,
                    word,
                }
                .into());
            }

            line.clear();
            if reader.read_line(&mut line)? != 0 && !line.trim().is_empty() {
                return Err(ProtocolError::NonBlankSeparator {
                    record: count,
                    line: line.trim_end().to_string(),
                }
                .into());
            }

            pending.push(RawWord {
                start_ms,
                end_ms,
                text: word,
            });
            if pending.len() >= PHONEME_BATCH {
                index.append_batch(&mut pending, converter)?;
            }
        }
        index.append_batch(&mut pending, converter)?;

        debug!(
            words = index.word_count(),
            chars = index.buffer.len(),
            "transcript indexed"
        );
        Ok(index)
    }

    fn append_batch(
        &mut self,
        pending: &mut Vec<RawWord>,
        converter: &dyn PhonemeConverter,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = pending.iter().map(|w| w.text.clone()).collect();
        let phonetics = converter.convert_batch(&texts)?;
        if phonetics.len() != texts.len() {
            return Err(anyhow!(
                "phoneme converter returned {} results for {} words",
                phonetics.len(),
                texts.len()
            ));
        }
        for (word, phonetic) in pending.drain(..).zip(phonetics) {
            self.offsets.push(self.buffer.len());
            self.times.push((word.start_ms, word.end_ms));
            self.graphemes.push(word.text);
            self.buffer.extend(phonetic.trim().chars());
            self.buffer.push(' ');
        }
        Ok(())
    }

    pub fn word_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn buffer(&self) -> &[char] {
        &self.buffer
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn times(&self) -> &[(i64, i64)] {
        &self.times
    }

    /// Phonetic buffer contents for `[a, b)`, clamped to the buffer.
    pub fn phonetic_range(&self, a: usize, b: usize) -> String {
        let a = a.min(self.buffer.len());
        let b = b.min(self.buffer.len()).max(a);
        self.buffer[a..b].iter().collect()
    }

    /// Original transcript words whose phonemes start inside `[a, b)`.
    pub fn words_in_range(&self, a: usize, b: usize) -> String {
        let lo = self.offsets.partition_point(|&o| o < a);
        let hi = self.offsets.partition_point(|&o| o < b);
        self.graphemes[lo..hi].join(" ")
    }

    /// Resolve a buffer offset to a millisecond timestamp.
    ///
    /// Offsets at or before the first word resolve to its start time, offsets
    /// at or past the end to the last word's end time, and an offset equal to
    /// a word's start offset to exactly that word's start time. Other interior
    /// offsets round to the nearest word start (ties go to the following word)
    /// and yield the midpoint of the silence before that word.
    pub fn time_at(&self, offset: usize) -> i64 {
        if self.times.is_empty() {
            return 0;
        }
        let pos = self.offsets.partition_point(|&o| o < offset);
        if pos == 0 {
            return self.times[0].0;
        }
        if pos == self.offsets.len() {
            return self.times[pos - 1].1;
        }
        if self.offsets[pos] == offset {
            return self.times[pos].0;
        }
        let before = self.offsets[pos - 1];
        let after = self.offsets[pos];
        let pos = if offset - before < after - offset {
            pos - 1
        } else {
            pos
        };
        if pos == 0 {
            return self.times[0].0;
        }
        let prev_end = self.times[pos - 1].1;
        let next_start = self.times[pos].0;
        prev_end + (next_start - prev_end) / 2
    }
}

fn parse_timestamp_line(re: &Regex, line: &str) -> Option<(i64, i64)> {
    let caps = re.captures(line)?;
    let mut nums = [0i64; 8];
    for (slot, cap) in nums.iter_mut().zip(caps.iter().skip(1)) {
        *slot = cap?.as_str().parse().ok()?;
    }
    let to_ms = |h: i64, m: i64, s: i64, f: i64| ((h * 60 + m) * 60 + s) * 1000 + f;
    Some((
        to_ms(nums[0], nums[1], nums[2], nums[3]),
        to_ms(nums[4], nums[5], nums[6], nums[7]),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phoneme::testing::Identity;
    use std::io::Cursor;

    // three words of five letters each: offsets 0 / 6 / 12 with Identity
    const ABUTTING: &str = "1\n00:00:00,000 --> 00:00:00,500\nhello\n\n\
                            2\n00:00:00,500 --> 00:00:00,900\nagain\n\n\
                            3\n00:00:00,900 --> 00:00:01,400\nthird\n\n";
    const GAPPED: &str = "1\n00:00:00,000 --> 00:00:00,500\nhello\n\n\
                          2\n00:00:00,600 --> 00:00:00,900\nagain\n\n\
                          3\n00:00:01,000 --> 00:00:01,400\nthird\n\n";

    fn ingest(srt: &str) -> TranscriptIndex {
        TranscriptIndex::ingest(Cursor::new(srt), &Identity).unwrap()
    }

    #[test]
    fn ingest_builds_parallel_tables() {
        let index = ingest(ABUTTING);
        assert_eq!(index.word_count(), 3);
        assert_eq!(index.offsets(), &[0, 6, 12]);
        assert_eq!(index.times(), &[(0, 500), (500, 900), (900, 1400)]);
        assert_eq!(
            index.buffer().iter().collect::<String>(),
            "hello again third "
        );
    }

    #[test]
    fn offsets_and_times_are_non_decreasing() {
        let index = ingest(GAPPED);
        assert_eq!(index.offsets().len(), index.times().len());
        assert_eq!(index.offsets().len(), index.word_count());
        assert!(index.offsets().windows(2).all(|w| w[0] <= w[1]));
        assert!(index
            .times()
            .windows(2)
            .all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
    }

    #[test]
    fn counter_mismatch_is_fatal() {
        let srt = "2\n00:00:00,000 --> 00:00:00,500\nhello\n\n";
        let err = TranscriptIndex::ingest(Cursor::new(srt), &Identity).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::CounterMismatch { expected: 1, .. })
        ));
    }

    #[test]
    fn whitespace_in_word_is_fatal() {
        let srt = "1\n00:00:00,000 --> 00:00:00,500\ntwo words\n\n";
        let err = TranscriptIndex::ingest(Cursor::new(srt), &Identity).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::WordWhitespace { record: 1, .. })
        ));
    }

    #[test]
    fn non_blank_separator_is_fatal() {
        let srt = "1\n00:00:00,000 --> 00:00:00,500\nhello\njunk\n";
        let err = TranscriptIndex::ingest(Cursor::new(srt), &Identity).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::NonBlankSeparator { record: 1, .. })
        ));
    }

    #[test]
    fn bad_timestamp_is_fatal() {
        let srt = "1\n00:00:00.000 -> 00:00:00.500\nhello\n\n";
        let err = TranscriptIndex::ingest(Cursor::new(srt), &Identity).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProtocolError>(),
            Some(ProtocolError::BadTimestamp { record: 1, .. })
        ));
    }

    #[test]
    fn timestamp_hours_and_minutes_carry() {
        let srt = "1\n01:02:03,004 --> 01:02:04,005\nhello\n\n";
        let index = ingest(srt);
        assert_eq!(index.times(), &[(3_723_004, 3_724_005)]);
    }

    #[test]
    fn exact_word_start_round_trips() {
        let index = ingest(GAPPED);
        for (i, &offset) in index.offsets().iter().enumerate() {
            assert_eq!(index.time_at(offset), index.times()[i].0);
        }
    }

    #[test]
    fn boundary_offsets_clamp() {
        let index = ingest(GAPPED);
        assert_eq!(index.time_at(0), 0);
        assert_eq!(index.time_at(index.buffer_len()), 1400);
        assert_eq!(index.time_at(index.buffer_len() + 100), 1400);
    }

    #[test]
    fn interior_offset_abutting_words_hits_boundary() {
        // offset 9 sits between word starts 6 and 12; the tie assigns it to
        // the third word, whose preceding silence is zero-width at 900
        let index = ingest(ABUTTING);
        assert_eq!(index.time_at(9), 900);
    }

    #[test]
    fn interior_offset_gapped_words_hits_silence_midpoint() {
        let index = ingest(GAPPED);
        assert_eq!(index.time_at(9), 950);
    }

    #[test]
    fn interior_offset_near_preceding_word() {
        // offset 7 is closer to word start 6: boundary before the second word
        let index = ingest(GAPPED);
        assert_eq!(index.time_at(7), 550);
    }

    #[test]
    fn words_in_range_returns_graphemes() {
        let index = ingest(ABUTTING);
        assert_eq!(index.words_in_range(0, 12), "hello again");
        assert_eq!(index.words_in_range(6, 18), "again third");
        assert_eq!(index.words_in_range(13, 14), "");
    }

    #[test]
    fn empty_stream_yields_empty_index() {
        let index = ingest("");
        assert!(index.is_empty());
        assert_eq!(index.time_at(5), 0);
    }
}
