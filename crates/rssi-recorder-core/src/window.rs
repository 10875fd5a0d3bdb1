//! Timed collection windows.
//!
//! A [`WindowController`] moves through `Idle → Armed → Closed`. Arming
//! spawns one timer task on the tokio runtime; when the timer fires the
//! buffer is frozen and handed to whoever holds the [`WindowHandle`]. The
//! handle can also abort the window, which discards the buffer.
//!
//! Ingest, close and abort all take the same lock, so closing establishes a
//! total order with in-flight deliveries: an append that got the lock first
//! is in the window, anything after it is rejected. The lock is held only for
//! filtering and appending; decoding happens before it is taken.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::context::CollectionContext;
use crate::error::{Error, Result};
use crate::ingest::{Sample, decode_message, extract};

/// Observable state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowPhase {
    Idle,
    Armed,
    Closed,
}

/// Per-window message accounting. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounters {
    /// Messages that passed the context filter.
    pub accepted: u64,
    /// Messages from a source the point filter excludes.
    pub filtered: u64,
    /// Payloads that did not decode.
    pub undecodable: u64,
}

/// What a single `ingest` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted { samples: usize },
    Filtered,
    Undecodable,
    /// No window is armed.
    Inactive,
}

/// Running view of an armed window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowProgress {
    pub label: String,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub samples: usize,
    pub sources: usize,
    pub counters: IngestCounters,
}

/// A window that closed on its timer with at least one sample.
#[derive(Debug, Clone)]
pub struct ClosedWindow {
    pub context: CollectionContext,
    pub samples: Vec<Sample>,
    pub observed_sources: BTreeSet<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub counters: IngestCounters,
}

/// How a window ended.
#[derive(Debug, Clone)]
pub enum WindowOutcome {
    Collected(ClosedWindow),
    /// The timer fired with an empty buffer.
    NoData {
        context: CollectionContext,
        observed_sources: BTreeSet<String>,
        counters: IngestCounters,
    },
    /// The window was aborted before its timer fired.
    Aborted { discarded: usize },
}

struct ArmedWindow {
    generation: u64,
    context: CollectionContext,
    samples: Vec<Sample>,
    observed: BTreeSet<String>,
    /// Sources that contributed at least one sample.
    sampled: BTreeSet<String>,
    opened_at: DateTime<Utc>,
    anchor: Instant,
    counters: IngestCounters,
}

enum WindowState {
    Idle,
    Armed(ArmedWindow),
    Closed,
}

struct Inner {
    state: WindowState,
    generation: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    duration: Duration,
    tag_filter: Option<String>,
    /// Deliveries before the first window or after an abort.
    idle: AtomicU64,
    /// Deliveries after a window closed, before the next one was armed.
    late: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self, generation: u64) -> WindowOutcome {
        let mut inner = self.lock();
        let window = match std::mem::replace(&mut inner.state, WindowState::Closed) {
            WindowState::Armed(w) if w.generation == generation => w,
            other => {
                inner.state = other;
                return WindowOutcome::Aborted { discarded: 0 };
            }
        };
        drop(inner);

        let closed_at = Utc::now();
        info!(
            "window closed for {}: {} samples from {} sources in {:.1}s",
            window.context.label(),
            window.samples.len(),
            window.observed.len(),
            window.anchor.elapsed().as_secs_f64()
        );
        debug!(
            "window ingest counters: accepted={} filtered={} undecodable={}",
            window.counters.accepted, window.counters.filtered, window.counters.undecodable
        );

        if window.samples.is_empty() {
            WindowOutcome::NoData {
                context: window.context,
                observed_sources: window.observed,
                counters: window.counters,
            }
        } else {
            WindowOutcome::Collected(ClosedWindow {
                context: window.context,
                samples: window.samples,
                observed_sources: window.observed,
                opened_at: window.opened_at,
                closed_at,
                counters: window.counters,
            })
        }
    }

    fn abort(&self, generation: u64) -> WindowOutcome {
        let mut inner = self.lock();
        let armed = match &inner.state {
            WindowState::Armed(w) if w.generation == generation => {
                Some((w.samples.len(), w.context.label()))
            }
            _ => None,
        };
        let Some((discarded, label)) = armed else {
            return WindowOutcome::Aborted { discarded: 0 };
        };
        inner.state = WindowState::Idle;
        drop(inner);

        info!("window aborted for {label}: {discarded} samples discarded");
        WindowOutcome::Aborted { discarded }
    }
}

/// Owner of the single collection window.
///
/// Cloning is cheap; clones share the same window, so one clone can sit on
/// the delivery path while another drives the cycle.
#[derive(Clone)]
pub struct WindowController {
    shared: Arc<Shared>,
}

impl WindowController {
    pub fn new(duration: Duration) -> Self {
        Self::with_tag_filter(duration, None)
    }

    /// Controller whose windows keep only detections of `tag_filter`.
    pub fn with_tag_filter(duration: Duration, tag_filter: Option<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: WindowState::Idle,
                    generation: 0,
                }),
                duration,
                tag_filter,
                idle: AtomicU64::new(0),
                late: AtomicU64::new(0),
            }),
        }
    }

    pub fn duration(&self) -> Duration {
        self.shared.duration
    }

    pub fn phase(&self) -> WindowPhase {
        match self.shared.lock().state {
            WindowState::Idle => WindowPhase::Idle,
            WindowState::Armed(_) => WindowPhase::Armed,
            WindowState::Closed => WindowPhase::Closed,
        }
    }

    /// Deliveries dropped because no window was armed.
    pub fn ignored_deliveries(&self) -> u64 {
        self.idle_deliveries() + self.late_deliveries()
    }

    /// Deliveries dropped while idle: before the first window or after an
    /// abort.
    pub fn idle_deliveries(&self) -> u64 {
        self.shared.idle.load(Ordering::Relaxed)
    }

    /// Deliveries dropped because they arrived after a window had closed.
    pub fn late_deliveries(&self) -> u64 {
        self.shared.late.load(Ordering::Relaxed)
    }

    /// Open a window for `context` and start its timer.
    ///
    /// Fails with [`Error::WindowBusy`] while another window is armed. Must be
    /// called from within a tokio runtime.
    pub fn arm(&self, context: CollectionContext) -> Result<WindowHandle> {
        let generation = {
            let mut inner = self.shared.lock();
            if matches!(inner.state, WindowState::Armed(_)) {
                return Err(Error::WindowBusy);
            }
            inner.generation += 1;
            let generation = inner.generation;
            info!(
                "window armed for {} ({}s)",
                context.label(),
                self.shared.duration.as_secs_f64()
            );
            inner.state = WindowState::Armed(ArmedWindow {
                generation,
                context,
                samples: Vec::new(),
                observed: BTreeSet::new(),
                sampled: BTreeSet::new(),
                opened_at: Utc::now(),
                anchor: Instant::now(),
                counters: IngestCounters::default(),
            });
            generation
        };

        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = tokio::time::sleep(shared.duration) => shared.close(generation),
                _ = token.cancelled() => shared.abort(generation),
            };
            let _ = tx.send(outcome);
        });

        Ok(WindowHandle { rx, cancel })
    }

    /// Offer one raw payload to the armed window.
    ///
    /// Never fails: payloads that are malformed, filtered out, or arrive
    /// outside a window are dropped and reported through the outcome only.
    pub fn ingest(&self, payload: &[u8]) -> IngestOutcome {
        let observed_at = Utc::now();
        let decoded = decode_message(payload);

        let mut inner = self.shared.lock();
        let window = match &mut inner.state {
            WindowState::Armed(window) => window,
            WindowState::Closed => {
                self.shared.late.fetch_add(1, Ordering::Relaxed);
                return IngestOutcome::Inactive;
            }
            WindowState::Idle => {
                self.shared.idle.fetch_add(1, Ordering::Relaxed);
                return IngestOutcome::Inactive;
            }
        };
        let Some(message) = decoded else {
            window.counters.undecodable += 1;
            return IngestOutcome::Undecodable;
        };
        let Some(extraction) = extract(
            &message,
            &window.context,
            self.shared.tag_filter.as_deref(),
            observed_at,
        ) else {
            window.counters.filtered += 1;
            return IngestOutcome::Filtered;
        };

        window.counters.accepted += 1;
        let samples = extraction.samples.len();
        if samples > 0 && !window.sampled.contains(&extraction.source_id) {
            window.sampled.insert(extraction.source_id.clone());
        }
        window.observed.insert(extraction.source_id);
        window.samples.extend(extraction.samples);
        IngestOutcome::Accepted { samples }
    }

    /// Progress of the armed window, if any.
    pub fn progress(&self) -> Option<WindowProgress> {
        let inner = self.shared.lock();
        let WindowState::Armed(window) = &inner.state else {
            return None;
        };
        let elapsed = window.anchor.elapsed();
        Some(WindowProgress {
            label: window.context.label(),
            elapsed,
            remaining: self.shared.duration.saturating_sub(elapsed),
            samples: window.samples.len(),
            sources: window.sampled.len(),
            counters: window.counters,
        })
    }
}

/// Handle to one armed window.
#[derive(Debug)]
pub struct WindowHandle {
    rx: oneshot::Receiver<WindowOutcome>,
    cancel: CancellationToken,
}

impl WindowHandle {
    /// Abort the window. The buffer is discarded and `wait` resolves to
    /// [`WindowOutcome::Aborted`]. Has no effect once the timer has fired.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Token that aborts this window when cancelled, for signal handlers.
    pub fn abort_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the window to close or abort.
    pub async fn wait(self) -> WindowOutcome {
        self.rx
            .await
            .unwrap_or(WindowOutcome::Aborted { discarded: 0 })
    }
}
