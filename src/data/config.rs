use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::protocol;

const LOCAL_CONFIG: &str = "vis-bridge.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    /// Capture device name; unset picks the best loopback/monitor device.
    pub source: Option<String>,
    pub fft_size: usize,
    pub bar_count: usize,
    pub freq_min: f32,
    pub freq_max: f32,
    pub send_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: protocol::BIND_ADDR.to_string(),
            port: protocol::WS_PORT,
            source: None,
            fft_size: protocol::FFT_SIZE,
            bar_count: protocol::BAR_COUNT,
            freq_min: protocol::FREQ_MIN,
            freq_max: protocol::FREQ_MAX,
            send_fps: protocol::SEND_FPS,
        }
    }
}

impl Config {
    /// Loads `explicit` if given, else the first existing default location.
    /// No file at all means defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_paths().into_iter().find(|p| p.exists()),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let cfg = Self::load(&path)?;
        log::info!("loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn send_interval_ms(&self) -> u64 {
        1000 / self.send_fps.max(1) as u64
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "vis-bridge") {
        paths.push(dirs.config_dir().join("config.toml"));
    }
    paths
}
