//! CLI for rssi-recorder: timed RSSI capture for calibration and site surveys.

mod commands;

use clap::{Parser, Subcommand};
use rssi_recorder_core::ToolVariant;

use commands::SessionArgs;

#[derive(Parser)]
#[command(name = "rssi-recorder")]
#[command(about = "rssi-recorder: timed RSSI capture for calibration and site surveys")]
#[command(version = rssi_recorder_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record distance calibration points for a single source.
    /// Without --source, prompts for one point after another.
    Calibrate {
        #[command(flatten)]
        session: SessionArgs,

        /// Source (gateway) id to keep, e.g. AA:BB:CC:DD:EE:FF
        #[arg(long, requires = "distance")]
        source: Option<String>,

        /// Distance to the source in metres
        #[arg(long, allow_hyphen_values = true, requires = "source")]
        distance: Option<String>,

        /// Free-text note stored with the row
        #[arg(long, requires = "source")]
        note: Option<String>,
    },

    /// Record fingerprint survey points from every visible source.
    /// Without --location, prompts for one point after another.
    Survey {
        #[command(flatten)]
        session: SessionArgs,

        /// Location id of the survey point
        #[arg(long, requires_all = ["x", "y"])]
        location: Option<String>,

        /// X coordinate
        #[arg(long, allow_hyphen_values = true, requires = "location")]
        x: Option<String>,

        /// Y coordinate
        #[arg(long, allow_hyphen_values = true, requires = "location")]
        y: Option<String>,

        /// Z coordinate (defaults to 0)
        #[arg(long, allow_hyphen_values = true, requires = "location")]
        z: Option<String>,
    },

    /// Print a tool's table from the store
    Show {
        /// Which table to print
        #[arg(long, default_value = "survey", value_parser = ["calibration", "survey"])]
        tool: String,

        /// Store file (defaults to the tool's configured store)
        #[arg(long)]
        store: Option<String>,

        /// JSON configuration file
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Calibrate {
            session,
            source,
            distance,
            note,
        } => {
            let preset = source.map(|source| commands::PresetContext::Point {
                source,
                distance: distance.unwrap_or_default(),
                note,
            });
            commands::record::run(ToolVariant::Calibration, &session, preset).await
        }
        Commands::Survey {
            session,
            location,
            x,
            y,
            z,
        } => {
            let preset = location.map(|location| commands::PresetContext::Survey {
                location,
                x: x.unwrap_or_default(),
                y: y.unwrap_or_default(),
                z,
            });
            commands::record::run(ToolVariant::Survey, &session, preset).await
        }
        Commands::Show {
            tool,
            store,
            config,
        } => commands::show::run(&tool, store.as_deref(), config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
