//! # rssi-recorder-core
//!
//! **Timed RSSI capture into tables that grow with the site.**
//!
//! `rssi-recorder-core` collects signal-strength telemetry over fixed time
//! windows, reduces each window to per-source statistics, and appends one row
//! per window to a persisted workbook whose columns grow as new sources show
//! up.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rssi_recorder_core::{CollectionContext, CycleOutcome, MeasurementSession,
//!     RecorderConfig, ToolVariant};
//!
//! # async fn run() -> rssi_recorder_core::Result<()> {
//! let config = RecorderConfig::load(ToolVariant::Survey, None)?;
//! let session = MeasurementSession::from_config(ToolVariant::Survey, &config);
//!
//! // Telemetry lines go to session.controller().ingest(..), usually via feed::pump.
//! let context = CollectionContext::survey("hall-3", "4.0", "1.5", None)?;
//! if let CycleOutcome::Recorded(report) = session.run_cycle(context).await? {
//!     println!("{} rows in '{}'", report.merge.rows, report.merge.sheet);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Feed → Window (arm, buffer, close) → Reduce → Row → Merge → Workbook
//!
//! Two tools share the pipeline:
//! - **Calibration**: one filtered source at a known distance. One mean per row.
//! - **Survey**: every source at a coordinate. One column per source, added
//!   in sorted position the first time a source is observed.

pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod measurement;
pub mod merge;
pub mod schema;
pub mod session;
pub mod stats;
pub mod store;
pub mod window;

pub use config::{FileConfig, RecorderConfig, parse_duration};
pub use context::{CollectionContext, ToolVariant, normalize_source_id};
pub use error::{Error, Result};
pub use feed::FeedStats;
pub use ingest::{DecodedMessage, Detection, Sample, decode_message};
pub use measurement::{MeasurementRow, RECORDED_AT_FORMAT};
pub use merge::{MergeEngine, MergeReport, TableView};
pub use schema::TableSchema;
pub use session::{CycleOutcome, CycleReport, MeasurementSession};
pub use stats::{Reduction, SourceStatistics, WindowSummary, reduce, round2};
pub use store::{Cell, Sheet, Workbook, WorkbookStore};
pub use window::{
    IngestCounters, IngestOutcome, WindowController, WindowHandle, WindowOutcome, WindowPhase,
    WindowProgress,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
