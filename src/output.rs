use crate::ledger::Slice;
use anyhow::Result;
use std::fs::File;
use std::path::Path;

pub fn save_slices_json(path: &Path, slices: &[Slice]) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, slices)?;
    Ok(())
}

pub fn format_timestamp(ms: i64) -> String {
    let hours = ms / 3600000;
    let minutes = (ms % 3600000) / 60000;
    let seconds = (ms % 60000) / 1000;
    let millis = ms % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}
