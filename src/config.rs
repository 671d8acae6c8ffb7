use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub espeak: EspeakConfig,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EspeakConfig {
    pub program: String,
    pub voice: String,
}

impl Default for EspeakConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            voice: "en-us".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub program: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunConfig {
    pub matcher: Option<MatcherTuning>,
}

/// Empirical matcher constants. The defaults assume an audiobook with at most
/// ~2K characters of narrator preamble per chapter; other corpora can
/// override them per profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherTuning {
    /// Search window length past the cursor for short segments.
    pub short_lookahead: usize,
    /// Phonetic length beyond which a segment only searches `2 * len`.
    pub long_needle_cutoff: usize,
    /// Acceptance horizon: a candidate at `start` is accepted only if
    /// `start < horizon * (1 - dist / len)`.
    pub accept_horizon: usize,
    /// Maximum edit distance is `len / max_dist_divisor`.
    pub max_dist_divisor: usize,
}

impl Default for MatcherTuning {
    fn default() -> Self {
        Self {
            short_lookahead: 2000,
            long_needle_cutoff: 80,
            accept_horizon: 1000,
            max_dist_divisor: 4,
        }
    }
}

/// `~/.bookalign/config.yaml`; a missing file just means defaults.
pub fn load_app_config() -> Result<AppConfig> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let config_path = home.join(".bookalign/config.yaml");

    if !config_path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)?;
    let config: AppConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {:?}", config_path))?;
    Ok(config)
}

pub fn load_run_config(path: &PathBuf) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: RunConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(config)
}

pub fn resolve_profile_path(profile: &str) -> Result<PathBuf> {
    if let Some(rest) = profile.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not find home directory")?;
        return Ok(home.join(rest));
    }

    let path = PathBuf::from(profile);
    if path.is_absolute() || profile.starts_with("./") || profile.starts_with("../") {
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home
        .join(".bookalign/profiles")
        .join(format!("{}.yaml", profile)))
}
