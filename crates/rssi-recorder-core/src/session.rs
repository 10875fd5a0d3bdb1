//! One measurement cycle: arm a window, wait for it, reduce, merge.
//!
//! [`MeasurementSession`] owns the window controller and the merge engine for
//! one tool. Callers that need to draw progress or abort split the cycle into
//! [`MeasurementSession::open`] and [`MeasurementSession::complete`]; everyone
//! else uses [`MeasurementSession::run_cycle`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use log::{info, warn};
use serde::Serialize;

use crate::config::RecorderConfig;
use crate::context::{CollectionContext, ToolVariant};
use crate::error::{Error, Result};
use crate::measurement::MeasurementRow;
use crate::merge::{MergeEngine, MergeReport};
use crate::stats::{Reduction, reduce};
use crate::window::{IngestCounters, WindowController, WindowHandle, WindowOutcome};

/// Pause before the first store-write retry. Doubles per attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// A row that made it into the store.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub row: MeasurementRow,
    pub reduction: Reduction,
    pub merge: MergeReport,
    pub counters: IngestCounters,
}

/// How one cycle ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Recorded(CycleReport),
    /// The window closed without usable samples. The store was not touched.
    NoData {
        context: CollectionContext,
        observed_sources: BTreeSet<String>,
    },
    /// The window was aborted. The store was not touched.
    Aborted { discarded: usize },
}

/// Window controller plus merge engine for a single tool.
pub struct MeasurementSession {
    controller: WindowController,
    engine: Arc<MergeEngine>,
    write_retries: u32,
    retry_delay: Duration,
}

impl MeasurementSession {
    pub fn new(controller: WindowController, engine: MergeEngine) -> Self {
        Self {
            controller,
            engine: Arc::new(engine),
            write_retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Session for `variant` wired from a resolved configuration.
    pub fn from_config(variant: ToolVariant, config: &RecorderConfig) -> Self {
        let controller = WindowController::with_tag_filter(config.window, config.tag_filter.clone());
        let engine = MergeEngine::new(&config.store_path, variant);
        Self::new(controller, engine).with_write_retries(config.write_retries, DEFAULT_RETRY_DELAY)
    }

    pub fn with_write_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.write_retries = retries;
        self.retry_delay = delay;
        self
    }

    /// The controller telemetry should be pumped into.
    pub fn controller(&self) -> &WindowController {
        &self.controller
    }

    pub fn engine(&self) -> &MergeEngine {
        &self.engine
    }

    pub fn variant(&self) -> ToolVariant {
        self.engine.variant()
    }

    /// Arm a window for `context`.
    ///
    /// The context must belong to this session's tool; a survey context on a
    /// calibration session would write into the wrong table.
    pub fn open(&self, context: CollectionContext) -> Result<WindowHandle> {
        if context.variant() != self.variant() {
            return Err(Error::invalid(
                "context",
                format!(
                    "{} context given to a {} session",
                    context.variant(),
                    self.variant()
                ),
            ));
        }
        self.controller.arm(context)
    }

    /// Turn a finished window into a persisted row.
    pub async fn complete(&self, outcome: WindowOutcome) -> Result<CycleOutcome> {
        let window = match outcome {
            WindowOutcome::Collected(window) => window,
            WindowOutcome::NoData {
                context,
                observed_sources,
                ..
            } => {
                warn!("no samples for {}; nothing recorded", context.label());
                return Ok(CycleOutcome::NoData {
                    context,
                    observed_sources,
                });
            }
            WindowOutcome::Aborted { discarded } => {
                return Ok(CycleOutcome::Aborted { discarded });
            }
        };

        let reduction = reduce(&window.samples);
        let recorded_at = window.closed_at.with_timezone(&Local);
        let Some(row) = MeasurementRow::build(
            &window.context,
            &reduction,
            &window.observed_sources,
            recorded_at,
        ) else {
            warn!("no samples for {}; nothing recorded", window.context.label());
            return Ok(CycleOutcome::NoData {
                context: window.context,
                observed_sources: window.observed_sources,
            });
        };

        let merge = self.persist(&row).await?;
        Ok(CycleOutcome::Recorded(CycleReport {
            row,
            reduction,
            merge,
            counters: window.counters,
        }))
    }

    /// Arm, wait for the timer, and persist.
    pub async fn run_cycle(&self, context: CollectionContext) -> Result<CycleOutcome> {
        let handle = self.open(context)?;
        let outcome = handle.wait().await;
        self.complete(outcome).await
    }

    async fn persist(&self, row: &MeasurementRow) -> Result<MergeReport> {
        let attempts = self.write_retries.saturating_add(1);
        let mut delay = self.retry_delay;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let engine = Arc::clone(&self.engine);
            let pending = row.clone();
            let result = tokio::task::spawn_blocking(move || engine.merge(&pending))
                .await
                .unwrap_or_else(|e| {
                    Err(Error::store_io(self.engine.path(), std::io::Error::other(e)))
                });

            match result {
                Ok(report) => return Ok(report),
                Err(e) if attempt < attempts => {
                    warn!(
                        "store write to {} failed (attempt {attempt}/{attempts}): {e}; retrying in {}ms",
                        self.engine.path().display(),
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    info!("giving up on store write after {attempt} attempt(s)");
                    return Err(Error::RowNotPersisted {
                        row: Box::new(row.clone()),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
