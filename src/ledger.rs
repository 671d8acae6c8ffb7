use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use crate::align::{AlignmentRecord, RecordKind};

/// One validated cut for the audio splitter: ascending, non-overlapping.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Slice {
    pub start: i64, // milliseconds
    pub end: i64,   // milliseconds
    pub text: String,
}

/// A ledger below this size is treated as leftover junk, not a checkpoint.
const MIN_RESUME_LEN: u64 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerCounts {
    pub matched: usize,
    pub reference_only: usize,
    pub transcript_only: usize,
    pub ambiguous: usize,
}

/// Append-only writer for the alignment ledger.
///
/// Every record becomes one `<kind>|<start_ms>|<end_ms>|<text>` line,
/// preceded by `# ` comment lines carrying the discarded alternate texts so
/// bad matches can be reviewed and hand-edited before slicing.
pub struct LedgerWriter {
    out: BufWriter<File>,
    path: PathBuf,
    slices: Vec<Slice>,
    counts: LedgerCounts,
}

impl LedgerWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create ledger {:?}", path))?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            slices: Vec::new(),
            counts: LedgerCounts::default(),
        })
    }

    pub fn append(&mut self, record: &AlignmentRecord) -> Result<()> {
        match record.kind() {
            RecordKind::Matched => self.counts.matched += 1,
            RecordKind::ReferenceOnly => self.counts.reference_only += 1,
            RecordKind::TranscriptOnly => self.counts.transcript_only += 1,
            RecordKind::Ambiguous => self.counts.ambiguous += 1,
        }

        for aux in record.aux_texts() {
            writeln!(self.out, "# {}", aux)?;
        }
        writeln!(
            self.out,
            "{}|{}|{}|{}",
            record.kind().marker(),
            record.start_ms(),
            record.end_ms(),
            record.primary_text()
        )?;

        if record.kind() == RecordKind::Matched {
            self.slices.push(Slice {
                start: record.start_ms(),
                end: record.end_ms(),
                text: record.primary_text().to_string(),
            });
        }
        Ok(())
    }

    pub fn counts(&self) -> LedgerCounts {
        self.counts
    }

    /// Flush and run the global post-condition: a run that discarded more
    /// text than it matched is judged a failure, the ledger is removed and
    /// the whole pipeline aborts.
    pub fn finish(mut self) -> Result<Vec<Slice>> {
        self.out.flush()?;
        let c = self.counts;
        if c.matched < c.reference_only + c.transcript_only {
            drop(self.out);
            let _ = fs::remove_file(&self.path);
            bail!(
                "merge failed more than it succeeded: {} matched, {} reference-only, \
                 {} transcript-only. Wrong text file? Empty text file? \
                 Removed the inadequate ledger {:?}",
                c.matched,
                c.reference_only,
                c.transcript_only,
                self.path
            );
        }
        println!(
            "{} matched, {} reference-only, {} transcript-only, {} ambiguous",
            c.matched, c.reference_only, c.transcript_only, c.ambiguous
        );
        Ok(self.slices)
    }

    /// Path of the ledger being written, for cleanup on abort.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rebuild the slice list from an existing ledger. Lines not starting with
/// the matched-kind marker are skipped, so comments and hand-disabled records
/// cost nothing.
pub fn read_slices(path: &Path) -> Result<Vec<Slice>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read ledger {:?}", path))?;

    let mut slices = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if !line.starts_with(RecordKind::Matched.marker()) {
            continue;
        }
        let parse = || -> Result<Slice> {
            let mut parts = line.splitn(4, '|');
            let _kind = parts.next();
            let start = parts
                .next()
                .ok_or_else(|| anyhow!("missing start field"))?
                .parse::<i64>()?;
            let end = parts
                .next()
                .ok_or_else(|| anyhow!("missing end field"))?
                .parse::<i64>()?;
            let text = parts
                .next()
                .ok_or_else(|| anyhow!("missing text field"))?
                .to_string();
            Ok(Slice { start, end, text })
        };
        let slice =
            parse().with_context(|| format!("Bad ledger record at {:?} line {}", path, i + 1))?;
        slices.push(slice);
    }
    debug!(slices = slices.len(), "ledger read back");
    Ok(slices)
}

/// The resumable pipeline stage: if a non-trivial ledger already exists it is
/// trusted (allowing hand edits between runs) and alignment is skipped;
/// otherwise `align` runs against a fresh writer and the result is validated.
/// A run that dies mid-alignment takes its partial ledger with it.
pub fn load_or_align(
    path: &Path,
    align: impl FnOnce(&mut LedgerWriter) -> Result<()>,
) -> Result<Vec<Slice>> {
    if let Ok(meta) = fs::metadata(path) {
        if meta.is_file() && meta.len() > MIN_RESUME_LEN {
            info!(path = ?path, "resuming from existing ledger");
            println!("An existing ledger was found with directions on where to slice");
            return read_slices(path);
        }
    }

    let mut writer = LedgerWriter::create(path)?;
    if let Err(e) = align(&mut writer) {
        let path = writer.path().to_path_buf();
        drop(writer);
        let _ = fs::remove_file(&path);
        return Err(e);
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignmentRecord;

    fn matched(start: i64, end: i64, text: &str) -> AlignmentRecord {
        AlignmentRecord::Matched {
            start_ms: start,
            end_ms: end,
            phonetic: "fonetik ".into(),
            transcript: "transkript ".into(),
            text: text.into(),
        }
    }

    fn reference_only(at: i64) -> AlignmentRecord {
        AlignmentRecord::ReferenceOnly {
            at_ms: at,
            phonetic: "fonetik ".into(),
            text: "lost text".into(),
        }
    }

    #[test]
    fn written_ledger_reads_back_matched_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");

        let mut writer = LedgerWriter::create(&path).unwrap();
        writer.append(&matched(0, 1200, "First line.")).unwrap();
        writer
            .append(&AlignmentRecord::TranscriptOnly {
                start_ms: 1200,
                end_ms: 1500,
                words: "um uh".into(),
                transcript: "ʌm ʌ ".into(),
            })
            .unwrap();
        writer.append(&matched(1500, 2000, "Second | line.")).unwrap();
        writer.append(&matched(2000, 2500, "Third.")).unwrap();
        let slices = writer.finish().unwrap();

        assert_eq!(slices.len(), 3);
        let reread = read_slices(&path).unwrap();
        assert_eq!(reread, slices);
        // text keeps its pipe character
        assert_eq!(reread[1].text, "Second | line.");
    }

    #[test]
    fn comment_lines_precede_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");

        let mut writer = LedgerWriter::create(&path).unwrap();
        writer.append(&matched(0, 1000, "hello")).unwrap();
        writer.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "# fonetik \n# transkript \nG|0|1000|hello\n"
        );
    }

    #[test]
    fn malformed_record_names_the_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");
        std::fs::write(&path, "# comment\nG|12|not-a-number|text\n").unwrap();

        let err = read_slices(&path).unwrap_err();
        assert!(format!("{}", err).contains("line 2"));
    }

    #[test]
    fn validation_failure_removes_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");

        let mut writer = LedgerWriter::create(&path).unwrap();
        writer.append(&matched(0, 1000, "one good")).unwrap();
        writer.append(&reference_only(1000)).unwrap();
        writer.append(&reference_only(1000)).unwrap();
        let err = writer.finish().unwrap_err();

        assert!(format!("{}", err).contains("merge failed"));
        assert!(!path.exists());
    }

    #[test]
    fn load_or_align_computes_then_resumes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");

        let fill = |w: &mut LedgerWriter| -> Result<()> {
            w.append(&matched(0, 900, "a"))?;
            w.append(&matched(900, 1400, "b"))?;
            Ok(())
        };

        let first = load_or_align(&path, fill).unwrap();
        let first_bytes = std::fs::read(&path).unwrap();

        // second run must not recompute: the closure would fail loudly
        let resumed = load_or_align(&path, |_| panic!("alignment ran twice")).unwrap();
        assert_eq!(resumed, first);
        assert_eq!(std::fs::read(&path).unwrap(), first_bytes);
    }

    #[test]
    fn trivial_ledger_is_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");
        std::fs::write(&path, "tiny\n").unwrap();

        let slices = load_or_align(&path, |w| {
            w.append(&matched(0, 500, "fresh"))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].text, "fresh");
    }

    #[test]
    fn failed_alignment_leaves_no_partial_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");

        let err = load_or_align(&path, |w| {
            w.append(&matched(0, 500, "half done"))?;
            bail!("transcript went sideways")
        })
        .unwrap_err();

        assert!(format!("{}", err).contains("sideways"));
        assert!(!path.exists());
    }

    #[test]
    fn slices_are_sorted_and_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.csv");

        let mut writer = LedgerWriter::create(&path).unwrap();
        for (s, e) in [(0, 800), (800, 1500), (2000, 2600)] {
            writer.append(&matched(s, e, "x")).unwrap();
        }
        let slices = writer.finish().unwrap();
        assert!(slices.windows(2).all(|w| w[0].end <= w[1].start));
        assert!(slices.windows(2).all(|w| w[0].start <= w[1].start));
    }
}
