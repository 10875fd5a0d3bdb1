pub mod prompt;
pub mod record;
pub mod show;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use rssi_recorder_core::{CollectionContext, RecorderConfig, ToolVariant, parse_duration};

/// Flags shared by the recording commands. Each one overrides the config
/// file and the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Telemetry feed address (host:port)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Collection window length, e.g. 60s, 2m, 1500ms
    #[arg(long)]
    pub window: Option<String>,

    /// Store file rows are merged into
    #[arg(long)]
    pub store: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    pub config: Option<String>,

    /// Only keep detections with this tag id
    #[arg(long)]
    pub tag: Option<String>,
}

/// Context given on the command line instead of prompted for.
#[derive(Debug, Clone)]
pub enum PresetContext {
    Point {
        source: String,
        distance: String,
        note: Option<String>,
    },
    Survey {
        location: String,
        x: String,
        y: String,
        z: Option<String>,
    },
}

impl PresetContext {
    pub fn build(&self) -> rssi_recorder_core::Result<CollectionContext> {
        match self {
            Self::Point {
                source,
                distance,
                note,
            } => CollectionContext::point(source, distance, note.as_deref()),
            Self::Survey { location, x, y, z } => {
                CollectionContext::survey(location, x, y, z.as_deref())
            }
        }
    }
}

/// Defaults, config file, environment, then command-line flags.
pub fn resolve_config(variant: ToolVariant, args: &SessionArgs) -> anyhow::Result<RecorderConfig> {
    let mut config = RecorderConfig::load(variant, args.config.as_deref().map(Path::new))
        .context("failed to load configuration")?;
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.trim().to_string();
    }
    if let Some(window) = &args.window {
        config.window = parse_duration(window).context("invalid --window")?;
    }
    if let Some(store) = &args.store {
        config.store_path = PathBuf::from(store);
    }
    if let Some(tag) = &args.tag {
        config.tag_filter = Some(tag.clone()).filter(|t| !t.trim().is_empty());
    }
    Ok(config)
}
