use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub devices: DevicesConfig,

    #[serde(default)]
    pub spindown: SpindownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// How long a disk has to stay idle, also the sampling interval ("10m", "1h30m", "600")
    pub idle: String,
    /// Counters feed to sample
    pub diskstats: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    /// Block device paths to watch, e.g. "/dev/sda" or "/dev/disk/by-id/..."
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindownConfig {
    /// Program run as `<command> <args...> -- <device>`
    pub command: String,
    pub args:    Vec<String>,
}

// ── Defaults ─────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            idle:      "10m".into(),
            diskstats: crate::collectors::diskstats::default_path(),
        }
    }
}

impl Default for SpindownConfig {
    fn default() -> Self {
        Self { command: "hdparm".into(), args: vec!["-y".into()] }
    }
}

// ── Load ─────────────────────────────────────────────────────────────

impl Config {
    /// Loads `explicit` if given, else the per-user default file. Only the
    /// default file may be absent; a file that exists must parse.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Config::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
            .map_err(|e| MonitorError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MonitorError::Config(e.to_string()))
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("spindownd").join("spindownd.toml"))
    }

    /// The sampling interval, validated.
    pub fn interval(&self) -> Result<Duration> {
        parse_duration(&self.general.idle)
    }

    /// Fails when no device was configured anywhere.
    pub fn validate(&self) -> Result<()> {
        if self.devices.paths.is_empty() {
            return Err(MonitorError::Config("no devices given".into()));
        }
        self.interval().map(|_| ())
    }
}

/// Parses "90", "90s", "10m", "1h30m", "250ms". A bare number is seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let bad = |why: &str| MonitorError::Config(format!("invalid duration {:?}: {}", text, why));

    let text = text.trim();
    if text.is_empty() {
        return Err(bad("empty"));
    }
    if let Ok(secs) = text.parse::<u64>() {
        return nonzero(Duration::from_secs(secs)).ok_or_else(|| bad("must be greater than zero"));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(bad("expected a number"));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| bad("number too large"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s"  => Duration::from_secs(value),
            "m"  => Duration::from_secs(value.saturating_mul(60)),
            "h"  => Duration::from_secs(value.saturating_mul(3600)),
            ""   => return Err(bad("missing unit")),
            unit => return Err(bad(&format!("unknown unit {:?}", unit))),
        };
        total = total.saturating_add(part);
        rest = &rest[unit_len..];
    }

    nonzero(total).ok_or_else(|| bad("must be greater than zero"))
}

fn nonzero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}
