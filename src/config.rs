use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use printmatch_engine::Threshold;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::identify::{MatchSettings, ScanPolicy};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("PRINTMATCH_CONFIG_PATH").unwrap_or("/usr/local/etc/printmatch/config.toml"),
    )
});

pub static GALLERY_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("PRINTMATCH_GALLERY_PATH").unwrap_or("/usr/local/etc/printmatch/gallery.json"),
    )
});

/// Per-user config location, used when the system-wide file is absent.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "printmatch").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Accept a candidate when the false-match probability is under 1 in this many.
    pub false_match_odds: u32,
    pub policy: ScanPolicy,
    pub workers: usize,
    pub deadline_ms: Option<u64>,
    pub gallery: PathBuf,
    pub template_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            false_match_odds: printmatch_engine::template::DEFAULT_FALSE_MATCH_ODDS,
            policy: ScanPolicy::FirstMatch,
            workers: 1,
            deadline_ms: None,
            gallery: GALLERY_PATH.to_path_buf(),
            template_cache: true,
        }
    }
}

impl Config {
    pub fn match_settings(&self) -> Result<MatchSettings> {
        let threshold = Threshold::from_false_match_odds(self.false_match_odds)
            .context("false_match_odds must be at least 1")?;
        Ok(MatchSettings {
            threshold,
            policy: self.policy,
            workers: self.workers,
            deadline: self.deadline_ms.map(Duration::from_millis),
        })
    }
}

/// Load from `path`, else the system path, else the per-user path, else defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None if CONFIG_PATH.exists() => CONFIG_PATH.to_path_buf(),
        None => match user_config_path() {
            Some(user) if user.exists() => user,
            _ => return Ok(Config::default()),
        },
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
