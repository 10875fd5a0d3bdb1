//! Recorder configuration.
//!
//! Values resolve in layers, later layers winning: built-in defaults, an
//! optional JSON file, `RSSI_RECORDER_*` environment variables, and finally
//! whatever the caller overrides (command-line flags). Nothing is required.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ToolVariant;
use crate::error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:7420";
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_RETRIES: u32 = 2;

pub const ENV_ENDPOINT: &str = "RSSI_RECORDER_ENDPOINT";
pub const ENV_WINDOW: &str = "RSSI_RECORDER_WINDOW";
pub const ENV_STORE: &str = "RSSI_RECORDER_STORE";
pub const ENV_TAG: &str = "RSSI_RECORDER_TAG";

/// Resolved configuration for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    /// `host:port` of the telemetry feed.
    pub endpoint: String,
    /// Length of every collection window.
    pub window: Duration,
    /// Workbook file the rows are merged into.
    pub store_path: PathBuf,
    /// Only keep detections of this tag, if set.
    pub tag_filter: Option<String>,
    /// Extra attempts after a failed store write.
    pub write_retries: u32,
}

/// On-disk configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub endpoint: Option<String>,
    /// Duration string, e.g. `"60s"` or `"2m"`.
    pub window: Option<String>,
    pub store: Option<PathBuf>,
    pub tag: Option<String>,
    pub write_retries: Option<u32>,
}

impl RecorderConfig {
    /// Built-in defaults for `variant`.
    pub fn defaults(variant: ToolVariant) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            window: DEFAULT_WINDOW,
            store_path: PathBuf::from(variant.default_store_file()),
            tag_filter: None,
            write_retries: DEFAULT_WRITE_RETRIES,
        }
    }

    /// Defaults, then `config_file` if given, then the process environment.
    pub fn load(variant: ToolVariant, config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::defaults(variant);
        if let Some(path) = config_file {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
            let file: FileConfig = serde_json::from_str(&contents)
                .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?;
            config.apply_file(file)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) -> Result<()> {
        if let Some(endpoint) = file.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(window) = file.window {
            self.window = parse_duration(&window)?;
        }
        if let Some(store) = file.store {
            self.store_path = store;
        }
        if file.tag.is_some() {
            self.tag_filter = file.tag;
        }
        if let Some(retries) = file.write_retries {
            self.write_retries = retries;
        }
        Ok(())
    }

    /// Apply `RSSI_RECORDER_*` overrides read through `lookup`. Blank values
    /// are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(endpoint) = get(ENV_ENDPOINT) {
            self.endpoint = endpoint.trim().to_string();
        }
        if let Some(window) = get(ENV_WINDOW) {
            self.window = parse_duration(&window)?;
        }
        if let Some(store) = get(ENV_STORE) {
            self.store_path = PathBuf::from(store);
        }
        if let Some(tag) = get(ENV_TAG) {
            self.tag_filter = Some(tag);
        }
        Ok(())
    }
}

/// Parse a duration string like `"5m"`, `"30s"`, `"1h"`, `"100ms"`. A bare
/// number is seconds. Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration '{s}'")))?;
    let millis = value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("duration '{s}' is too large")))?;
    if millis == 0 {
        return Err(Error::Config("duration must be greater than zero".to_string()));
    }
    Ok(Duration::from_millis(millis))
}
