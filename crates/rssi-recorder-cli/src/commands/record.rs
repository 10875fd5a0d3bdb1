//! `rssi-recorder calibrate|survey`: run collection cycles against the feed.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use log::{debug, info};
use rssi_recorder_core::feed::{self, FeedStats};
use rssi_recorder_core::{
    CycleOutcome, CycleReport, Error, MeasurementSession, ToolVariant, WindowController,
};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::prompt::Prompter;
use super::{PresetContext, SessionArgs, resolve_config};

type FeedTask = JoinHandle<rssi_recorder_core::Result<FeedStats>>;

/// Abort token of the armed window, shared with the Ctrl+C handler.
#[derive(Clone, Default)]
struct AbortSlot(Arc<Mutex<Option<CancellationToken>>>);

impl AbortSlot {
    fn set(&self, token: Option<CancellationToken>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Abort the armed window. Returns false when no window is armed.
    fn fire(&self) -> bool {
        match self.0.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Run the calibrate or survey command.
pub async fn run(
    variant: ToolVariant,
    args: &SessionArgs,
    preset: Option<PresetContext>,
) -> anyhow::Result<()> {
    let config = resolve_config(variant, args)?;
    let session = MeasurementSession::from_config(variant, &config);

    println!("Recording {variant} session");
    println!("  Feed:    {}", config.endpoint);
    println!("  Window:  {:.1}s", config.window.as_secs_f64());
    println!("  Store:   {}", config.store_path.display());
    if let Some(tag) = &config.tag_filter {
        println!("  Tag:     {tag}");
    }
    println!();

    let reader = feed::connect(&config.endpoint)
        .await
        .context("cannot reach the telemetry feed")?;
    let stop = CancellationToken::new();
    let mut feed_task: FeedTask = tokio::spawn({
        let controller = session.controller().clone();
        let endpoint = config.endpoint.clone();
        let stop = stop.clone();
        async move { feed::pump(reader, controller, &endpoint, stop).await }
    });

    // Ctrl+C aborts the armed window; while idle it ends the session.
    let slot = AbortSlot::default();
    let handler_slot = slot.clone();
    ctrlc::set_handler(move || {
        if !handler_slot.fire() {
            println!();
            println!("Session ended.");
            std::process::exit(0);
        }
    })
    .context("failed to install Ctrl+C handler")?;

    let mut prompter = Prompter::new(BufReader::new(tokio::io::stdin()));
    let result = drive(&session, variant, preset, &mut prompter, &slot, &mut feed_task).await;

    stop.cancel();
    if !feed_task.is_finished() {
        match feed_task.await {
            Ok(Ok(stats)) => debug!(
                "feed closed: {} lines, {} accepted, {} dropped, {} late, {} idle",
                stats.lines,
                stats.accepted,
                stats.dropped,
                session.controller().late_deliveries(),
                session.controller().idle_deliveries()
            ),
            Ok(Err(e)) => debug!("feed closed with error: {e}"),
            Err(e) => debug!("feed task failed: {e}"),
        }
    }

    let recorded = result?;
    println!("Session finished: {recorded} row(s) recorded.");
    Ok(())
}

/// The cycle loop. Returns the number of rows recorded.
async fn drive<R: AsyncBufRead + Unpin>(
    session: &MeasurementSession,
    variant: ToolVariant,
    preset: Option<PresetContext>,
    prompter: &mut Prompter<R>,
    slot: &AbortSlot,
    feed_task: &mut FeedTask,
) -> anyhow::Result<usize> {
    let once = preset.is_some();
    let mut preset = preset;
    let mut recorded = 0;

    loop {
        let answer = match preset.take() {
            Some(p) => p.build(),
            None if once => break,
            None => match prompter.next_context(variant).await? {
                Some(answer) => answer,
                None => break,
            },
        };
        let context = match answer {
            Ok(context) => context,
            Err(e) if once => return Err(e).context("invalid measurement context"),
            Err(e) => {
                eprintln!("  {e}; nothing recorded, try again.");
                continue;
            }
        };

        if feed_task.is_finished() {
            return Err(feed_ended((&mut *feed_task).await));
        }

        let handle = session.open(context)?;
        slot.set(Some(handle.abort_token()));
        println!(
            "  Collecting for {:.0}s (Ctrl+C to abort)...",
            session.controller().duration().as_secs_f64()
        );

        let wait = handle.wait();
        tokio::pin!(wait);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let outcome = loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                _ = ticker.tick() => print_progress(session.controller()),
                joined = &mut *feed_task => {
                    slot.set(None);
                    println!();
                    return Err(feed_ended(joined));
                }
            }
        };
        slot.set(None);
        println!();

        match session.complete(outcome).await {
            Ok(CycleOutcome::Recorded(report)) => {
                print_report(&report);
                recorded += 1;
            }
            Ok(CycleOutcome::NoData {
                context,
                observed_sources,
            }) => {
                eprintln!(
                    "  No samples received for {} ({} source(s) seen); nothing recorded.",
                    context.label(),
                    observed_sources.len()
                );
            }
            Ok(CycleOutcome::Aborted { discarded }) => {
                println!("  Window aborted; {discarded} sample(s) discarded.");
            }
            Err(Error::RowNotPersisted {
                row,
                attempts,
                source,
            }) => {
                eprintln!("  Row NOT saved after {attempts} attempt(s): {source}");
                eprintln!("  Unsaved row:");
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&row).unwrap_or_else(|e| format!("<{e}>"))
                );
                bail!("store write failed; the row above was not persisted");
            }
            Err(e) => return Err(e).context("measurement cycle failed"),
        }
        println!();

        if once {
            break;
        }
    }
    info!("session done: {recorded} row(s) recorded");
    Ok(recorded)
}

fn feed_ended(joined: Result<rssi_recorder_core::Result<FeedStats>, JoinError>) -> anyhow::Error {
    match joined {
        Ok(Ok(stats)) => anyhow!(
            "telemetry feed closed the connection after {} line(s)",
            stats.lines
        ),
        Ok(Err(e)) => anyhow::Error::new(e).context("telemetry feed failed"),
        Err(e) => anyhow!("telemetry feed task failed: {e}"),
    }
}

fn print_progress(controller: &WindowController) {
    if let Some(p) = controller.progress() {
        print!(
            "\r  Samples: {:<6} Sources: {:<4} Elapsed: {:>4.0}/{:.0}s",
            p.samples,
            p.sources,
            p.elapsed.as_secs_f64(),
            controller.duration().as_secs_f64()
        );
        let _ = std::io::stdout().flush();
    }
}

fn print_report(report: &CycleReport) {
    println!(
        "  Recorded row {} in sheet '{}' ({} samples)",
        report.merge.rows,
        report.merge.sheet,
        report.reduction.total_samples()
    );
    println!(
        "  {:<20} {:>6} {:>8} {:>8} {:>8}",
        "Source", "Count", "Min", "Mean", "Max"
    );
    for s in report.reduction.per_source.values() {
        println!(
            "  {:<20} {:>6} {:>8.1} {:>8.2} {:>8.1}",
            s.source_id,
            s.sample_count,
            s.min,
            s.rounded_mean(),
            s.max
        );
    }
    if report.row.variant == ToolVariant::Survey
        && let Some(summary) = &report.reduction.summary
    {
        println!(
            "  Overall: {} samples from {} source(s), min {:.1}, max {:.1}",
            summary.samples,
            report.reduction.per_source.len(),
            summary.min,
            summary.max
        );
    }
    if !report.merge.added_columns.is_empty() {
        println!("  New columns: {}", report.merge.added_columns.join(", "));
    }
    if let Some(backup) = &report.merge.corrupt_backup {
        println!("  Unreadable store was moved to {}", backup.display());
    }
}
