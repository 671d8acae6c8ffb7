use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// Text to phonetic-string conversion.
///
/// Implementations must be deterministic and free of side effects: the
/// alignment run calls `convert` once per reference segment and
/// `convert_batch` once per chunk of transcript words, and both call sites
/// assume the same text always yields the same phonemes.
pub trait PhonemeConverter {
    fn convert(&self, text: &str) -> Result<String>;

    /// Convert many units in one call. The default just loops over `convert`;
    /// backends that can amortize a process spawn should override it.
    fn convert_batch(&self, texts: &[String]) -> Result<Vec<String>> {
        texts.iter().map(|t| self.convert(t)).collect()
    }
}

/// espeak-ng driven through piped stdio.
pub struct Espeak {
    program: String,
    voice: String,
}

impl Espeak {
    pub fn new(program: &str, voice: &str) -> Self {
        Self {
            program: program.to_string(),
            voice: voice.to_string(),
        }
    }

    fn run(&self, input: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(["-q", "--ipa", "-v", &self.voice, "--stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("no stdin handle for {}", self.program))?;
        stdin.write_all(input.as_bytes())?;
        stdin.write_all(b"\n")?;
        drop(stdin);

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(anyhow!("{} exited with {}", self.program, output.status));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PhonemeConverter for Espeak {
    fn convert(&self, text: &str) -> Result<String> {
        let out = self.run(text)?;
        // espeak wraps long clauses; collapse to one space-separated line
        Ok(out.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    /// One process for the whole batch, one unit per input line. espeak-ng
    /// emits one output line per input line for plain text, but that is not
    /// guaranteed for every voice, so a count mismatch falls back to
    /// per-unit conversion.
    fn convert_batch(&self, texts: &[String]) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let joined = texts.join("\n");
        let out = self.run(&joined)?;
        let lines: Vec<String> = out
            .lines()
            .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();

        if lines.len() == texts.len() {
            return Ok(lines);
        }

        debug!(
            expected = texts.len(),
            got = lines.len(),
            "batch line count mismatch, converting per unit"
        );
        texts.iter().map(|t| self.convert(t)).collect()
    }
}
