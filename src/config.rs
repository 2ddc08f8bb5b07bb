use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("ROLLCALL_CONFIG_PATH").unwrap_or("/usr/local/etc/rollcall/config.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the directory/attendance backend.
    pub directory_url: String,
    pub camera: String,
    /// Directory holding the detector and encoder ONNX models.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a match.
    pub tolerance: f32,
    /// Minimum seconds between two reported sightings of one identity.
    pub cooldown_secs: u64,
    /// Run extraction on every Nth frame only.
    pub frame_interval: u32,
    /// Downscale factor applied to frames before detection.
    pub downscale: f32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Pending attendance reports beyond this are dropped oldest-first.
    pub report_queue_depth: usize,
    /// Where to write the annotated preview frame; no preview when unset.
    pub preview_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory_url: "http://127.0.0.1:8000".to_string(),
            camera: "/dev/video0".to_string(),
            model_dir: PathBuf::from("/usr/local/share/rollcall/models"),
            tolerance: 0.5,
            cooldown_secs: 60,
            frame_interval: 3,
            downscale: 0.25,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            report_queue_depth: 8,
            preview_path: None,
        }
    }
}

impl Config {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
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
