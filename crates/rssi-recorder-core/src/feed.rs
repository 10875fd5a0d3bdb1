//! Line-delimited telemetry feed.
//!
//! The bus bridge delivers one JSON message per line over TCP. This module
//! connects to it and pumps every line into a [`WindowController`]. Losing
//! the connection is a transport error; individual bad lines are not.

use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::window::{IngestOutcome, WindowController};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Totals for one feed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub lines: u64,
    pub accepted: u64,
    pub dropped: u64,
}

/// Connect to the feed at `endpoint` (`host:port`).
pub async fn connect(endpoint: &str) -> Result<BufReader<TcpStream>> {
    let transport = |reason: String| Error::Transport {
        endpoint: endpoint.to_string(),
        reason,
    };
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint))
        .await
        .map_err(|_| transport(format!("connect timed out after {}s", CONNECT_TIMEOUT.as_secs())))?
        .map_err(|e| transport(e.to_string()))?;
    info!("connected to telemetry feed at {endpoint}");
    Ok(BufReader::new(stream))
}

/// Feed every line from `reader` to `controller` until EOF or `stop`.
///
/// Returns the stats on EOF or stop. A read error is reported as
/// [`Error::Transport`] tagged with `endpoint`.
pub async fn pump<R>(
    reader: R,
    controller: WindowController,
    endpoint: &str,
    stop: CancellationToken,
) -> Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();

    loop {
        let line = tokio::select! {
            _ = stop.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("telemetry feed at {endpoint} reached end of stream");
                break;
            }
            Err(e) => {
                return Err(Error::Transport {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        stats.lines += 1;
        match controller.ingest(line.as_bytes()) {
            IngestOutcome::Accepted { .. } => stats.accepted += 1,
            _ => stats.dropped += 1,
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CollectionContext;
    use crate::window::WindowOutcome;

    #[tokio::test]
    async fn pumps_lines_into_window() {
        let wc = WindowController::new(Duration::from_millis(80));
        let handle = wc
            .arm(CollectionContext::survey("p", "0", "0", None).unwrap())
            .unwrap();

        let input = concat!(
            r#"{"gateway":{"id":"x1"},"detections":[{"rssi":-70},{"rssi":-72}]}"#,
            "\n\n",
            "not json\n",
            r#"{"gateway":{"id":"x2"},"detections":[{"rssi":-50}]}"#,
            "\n",
        );
        let stats = pump(input.as_bytes(), wc.clone(), "test", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            stats,
            FeedStats {
                lines: 3,
                accepted: 2,
                dropped: 1,
            }
        );

        let WindowOutcome::Collected(w) = handle.wait().await else {
            panic!("expected collected window");
        };
        assert_eq!(w.samples.len(), 3);
    }

    #[tokio::test]
    async fn stop_token_ends_pump() {
        let (client, _server) = tokio::io::duplex(64);
        let stop = CancellationToken::new();
        stop.cancel();
        let stats = pump(
            BufReader::new(client),
            WindowController::new(Duration::from_secs(1)),
            "test",
            stop,
        )
        .await
        .unwrap();
        assert_eq!(stats, FeedStats::default());
    }

    #[tokio::test]
    async fn connect_failure_is_transport_error() {
        // Bind then drop a listener so the port is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&addr).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }
}
