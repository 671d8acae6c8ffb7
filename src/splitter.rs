use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use tracing::warn;

use crate::ledger::Slice;

/// Cut the audiobook into one numbered mp3 per slice.
///
/// Audio is stream-copied, never re-encoded, with input-side seeking. Each
/// cut appends a `<n>|<text>` line to `metadata-all.csv` next to the
/// audiobook; numbering continues from an existing metadata file so several
/// books can share one training set directory. Returns the total expected
/// file count.
pub fn split_file(
    audiobook: &Path,
    slices: &[Slice],
    ffmpeg: &str,
    pb: &ProgressBar,
) -> Result<usize> {
    let parent = audiobook.parent().unwrap_or_else(|| Path::new("."));
    let log_path = parent.join("ffmpeg_log.txt");
    let metadata_path = parent.join("metadata-all.csv");

    let counter_offset = read_counter_offset(&metadata_path)?;
    let mut metadata = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&metadata_path)
        .with_context(|| format!("Failed to open {:?}", metadata_path))?;

    let mut log = open_log(&log_path)?;

    for (counter, slice) in slices.iter().enumerate() {
        let out_path: PathBuf = parent.join(format!("{}.mp3", counter + 1 + counter_offset));

        writeln!(log, "----------------------------------------------------\n")?;
        let status = Command::new(ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "info"])
            .arg("-ss")
            .arg(format!("{}ms", slice.start))
            .arg("-to")
            .arg(format!("{}ms", slice.end))
            .arg("-i")
            .arg(audiobook)
            .args(["-c", "copy"])
            .arg(&out_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?))
            .status()
            .with_context(|| format!("Failed to run {}", ffmpeg))?;
        if !status.success() {
            // the count check after splitting reports the damage
            warn!(slice = counter + 1, ?status, "ffmpeg exited non-zero");
        }

        writeln!(metadata, "{}|{}", counter + 1 + counter_offset, slice.text)?;
        pb.inc(1);
    }

    Ok(counter_offset + slices.len())
}

/// Numbering continues where the last run stopped: the first field of the
/// metadata file's last line.
fn read_counter_offset(metadata_path: &Path) -> Result<usize> {
    if !metadata_path.exists() {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(metadata_path)?);
    let mut last = String::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last = line;
        }
    }
    let offset = last
        .split('|')
        .next()
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);
    if offset == 0 {
        bail!(
            "failed to read offset from last line of existing {:?}",
            metadata_path
        );
    }
    Ok(offset)
}

fn open_log(log_path: &Path) -> Result<File> {
    let existed = log_path.exists();
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open {:?}", log_path))?;
    if existed {
        writeln!(
            log,
            "********************************************************\n\
             NEW LOG START\n\
             ********************************************************\n"
        )?;
    }
    Ok(log)
}

/// Compare produced files against the expected count. Shortfalls only warn;
/// partial output is still usable.
pub fn verify_count(audiobook: &Path, expected: usize) -> Result<()> {
    let parent = audiobook.parent().unwrap_or_else(|| Path::new("."));
    let stem = audiobook.file_stem().unwrap_or_default();

    let mut file_count = 0;
    for entry in std::fs::read_dir(parent)? {
        let path = entry?.path();
        if path.extension().map_or(false, |e| e == "mp3")
            && path.file_stem().map_or(false, |s| s != stem)
        {
            file_count += 1;
        }
    }

    if file_count >= expected {
        println!("SUCCESS! Audiobook split into {} files", file_count);
    } else {
        println!(
            "WARNING: {} files were generated which is less than the expected {}",
            file_count, expected
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_metadata_starts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let offset = read_counter_offset(&dir.path().join("metadata-all.csv")).unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn offset_continues_from_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata-all.csv");
        std::fs::write(&path, "1|first\n2|second\n17|seventeenth\n").unwrap();
        assert_eq!(read_counter_offset(&path).unwrap(), 17);
    }

    #[test]
    fn unreadable_offset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata-all.csv");
        std::fs::write(&path, "garbage without a number\n").unwrap();
        assert!(read_counter_offset(&path).is_err());
    }

    #[test]
    fn split_writes_metadata_and_counts() {
        // `true` stands in for ffmpeg: no audio is produced, but the
        // metadata and numbering side of the splitter is exercised
        let dir = tempfile::tempdir().unwrap();
        let audiobook = dir.path().join("book.mp3");
        std::fs::write(&audiobook, b"not really audio").unwrap();

        let slices = vec![
            Slice {
                start: 0,
                end: 1000,
                text: "one".into(),
            },
            Slice {
                start: 1000,
                end: 2500,
                text: "two".into(),
            },
        ];
        let pb = ProgressBar::hidden();
        let expected = split_file(&audiobook, &slices, "true", &pb).unwrap();
        assert_eq!(expected, 2);

        let metadata =
            std::fs::read_to_string(dir.path().join("metadata-all.csv")).unwrap();
        assert_eq!(metadata, "1|one\n2|two\n");

        // a second book appends and keeps numbering
        let expected = split_file(&audiobook, &slices[..1].to_vec(), "true", &pb).unwrap();
        assert_eq!(expected, 3);
        let metadata =
            std::fs::read_to_string(dir.path().join("metadata-all.csv")).unwrap();
        assert_eq!(metadata, "1|one\n2|two\n3|one\n");
    }

    #[test]
    fn verify_count_ignores_the_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let audiobook = dir.path().join("book.mp3");
        std::fs::write(&audiobook, b"src").unwrap();
        std::fs::write(dir.path().join("1.mp3"), b"a").unwrap();
        std::fs::write(dir.path().join("2.mp3"), b"b").unwrap();

        verify_count(&audiobook, 2).unwrap();
    }
}
