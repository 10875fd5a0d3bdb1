//! Interactive prompts for the next collection context.

use std::io::Write;

use rssi_recorder_core::{CollectionContext, ToolVariant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Reads operator answers one line at a time.
pub struct Prompter<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> Prompter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Print `label` and read one trimmed answer. `None` on end of input.
    pub async fn ask(&mut self, label: &str) -> anyhow::Result<Option<String>> {
        print!("{label}");
        let _ = std::io::stdout().flush();
        let line = self.lines.next_line().await?;
        Ok(line.map(|l| l.trim().to_string()))
    }

    /// Ask for the next context. `Ok(None)` means the operator is done: a
    /// blank identifier, `q`, or end of input.
    ///
    /// Invalid answers come back as the inner error so the caller can report
    /// them and ask again.
    pub async fn next_context(
        &mut self,
        variant: ToolVariant,
    ) -> anyhow::Result<Option<rssi_recorder_core::Result<CollectionContext>>> {
        match variant {
            ToolVariant::Calibration => {
                let Some(source) = self.ask_id("Source id (blank to quit): ").await? else {
                    return Ok(None);
                };
                let Some(distance) = self.ask("Distance (m): ").await? else {
                    return Ok(None);
                };
                let Some(note) = self.ask("Note (optional): ").await? else {
                    return Ok(None);
                };
                Ok(Some(CollectionContext::point(
                    &source,
                    &distance,
                    Some(note.as_str()),
                )))
            }
            ToolVariant::Survey => {
                let Some(location) = self.ask_id("Location (blank to quit): ").await? else {
                    return Ok(None);
                };
                let Some(x) = self.ask("X: ").await? else {
                    return Ok(None);
                };
                let Some(y) = self.ask("Y: ").await? else {
                    return Ok(None);
                };
                let Some(z) = self.ask("Z [0]: ").await? else {
                    return Ok(None);
                };
                Ok(Some(CollectionContext::survey(
                    &location,
                    &x,
                    &y,
                    Some(z.as_str()),
                )))
            }
        }
    }

    async fn ask_id(&mut self, label: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .ask(label)
            .await?
            .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("q")))
    }
}
