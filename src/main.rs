mod align;
mod config;
mod fuzzy;
mod ledger;
mod output;
mod phoneme;
mod segment;
mod splitter;
mod srt;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::align::Matcher;
use crate::config::{AppConfig, MatcherTuning};
use crate::ledger::Slice;
use crate::phoneme::Espeak;
use crate::segment::Segmenter;
use crate::srt::TranscriptIndex;

#[derive(Parser)]
#[command(name = "bookalign")]
#[command(
    about = "Aligns an ebook against a word-level SRT transcript and slices the audiobook into labeled training clips",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align the ebook text, then cut the audiobook into numbered clips
    Run {
        /// Input audiobook file (mp3)
        audiobook: PathBuf,

        /// Ebook text file (default: audiobook path with .txt)
        #[arg(short, long)]
        text: Option<PathBuf>,

        /// Word-level SRT transcript (default: audiobook path with .srt)
        #[arg(short, long)]
        srt: Option<PathBuf>,

        /// Ledger file (default: audiobook path with .csv)
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Configuration profile or file path
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Produce the ledger and slice list without touching the audio
    Align {
        /// Input audiobook file; sibling paths are derived from it
        audiobook: PathBuf,

        /// Ebook text file (default: audiobook path with .txt)
        #[arg(short, long)]
        text: Option<PathBuf>,

        /// Word-level SRT transcript (default: audiobook path with .srt)
        #[arg(short, long)]
        srt: Option<PathBuf>,

        /// Ledger file (default: audiobook path with .csv)
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Configuration profile or file path
        #[arg(short, long)]
        profile: Option<String>,
    },
}

struct JobPaths {
    text: PathBuf,
    srt: PathBuf,
    ledger: PathBuf,
    slices_json: PathBuf,
}

fn resolve_paths(
    audiobook: &Path,
    text: Option<PathBuf>,
    srt: Option<PathBuf>,
    ledger: Option<PathBuf>,
) -> JobPaths {
    JobPaths {
        text: text.unwrap_or_else(|| audiobook.with_extension("txt")),
        srt: srt.unwrap_or_else(|| audiobook.with_extension("srt")),
        ledger: ledger.unwrap_or_else(|| audiobook.with_extension("csv")),
        slices_json: audiobook.with_extension("slices.json"),
    }
}

fn resolve_tuning(profile: Option<&str>) -> Result<MatcherTuning> {
    match profile {
        Some(p) => {
            let conf_path = config::resolve_profile_path(p)?;
            let run_config =
                config::load_run_config(&conf_path).context("Failed to load run config")?;
            Ok(run_config.matcher.unwrap_or_default())
        }
        None => Ok(MatcherTuning::default()),
    }
}

fn bytes_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

fn count_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

/// Alignment with the load-or-compute contract: an existing non-trivial
/// ledger short-circuits everything, including transcript phonemization.
fn run_alignment(paths: &JobPaths, app_config: &AppConfig, tuning: MatcherTuning) -> Result<Vec<Slice>> {
    let espeak = Espeak::new(&app_config.espeak.program, &app_config.espeak.voice);

    ledger::load_or_align(&paths.ledger, |writer| {
        println!("Phonemizing transcript...");
        let srt_file = File::open(&paths.srt)
            .with_context(|| format!("Failed to open transcript {:?}", paths.srt))?;
        let pb = bytes_bar(srt_file.metadata()?.len());
        let index = TranscriptIndex::ingest(BufReader::new(pb.wrap_read(srt_file)), &espeak)?;
        pb.finish();

        println!("Merging text...");
        let text_file = File::open(&paths.text)
            .with_context(|| format!("Failed to open text file {:?}", paths.text))?;
        let pb = bytes_bar(text_file.metadata()?.len());
        let segments = Segmenter::new(BufReader::new(pb.wrap_read(text_file)));
        let mut matcher = Matcher::new(&index, &espeak, tuning);
        for segment in segments {
            let segment = segment.context("Failed to read text file")?;
            for record in matcher.align_segment(&segment)? {
                writer.append(&record)?;
            }
        }
        pb.finish();
        Ok(())
    })
}

fn report_slices(paths: &JobPaths, slices: &[Slice]) -> Result<()> {
    output::save_slices_json(&paths.slices_json, slices)?;
    println!("Saved slice list to {:?}", paths.slices_json);
    if let (Some(first), Some(last)) = (slices.first(), slices.last()) {
        println!(
            "{} slices spanning {} - {}",
            slices.len(),
            output::format_timestamp(first.start),
            output::format_timestamp(last.end)
        );
    }
    Ok(())
}


fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            audiobook,
            text,
            srt,
            ledger,
            profile,
        } => {
            if audiobook.extension().map_or(true, |e| e != "mp3") {
                bail!("only mp3 audiobooks are supported: audio is stream-copied, not re-encoded");
            }

            let app_config = config::load_app_config().context("Failed to load app config")?;
            let tuning = resolve_tuning(profile.as_deref())?;
            let paths = resolve_paths(&audiobook, text, srt, ledger);

            let slices = run_alignment(&paths, &app_config, tuning)?;
            report_slices(&paths, &slices)?;

            println!("Splitting audiobook...");
            let pb = count_bar(slices.len() as u64);
            let expected =
                splitter::split_file(&audiobook, &slices, &app_config.ffmpeg.program, &pb)?;
            pb.finish();

            splitter::verify_count(&audiobook, expected)?;
        }
        Commands::Align {
            audiobook,
            text,
            srt,
            ledger,
            profile,
        } => {
            let app_config = config::load_app_config().context("Failed to load app config")?;
            let tuning = resolve_tuning(profile.as_deref())?;
            let paths = resolve_paths(&audiobook, text, srt, ledger);

            let slices = run_alignment(&paths, &app_config, tuning)?;
            report_slices(&paths, &slices)?;
        }
    }

    Ok(())
}
