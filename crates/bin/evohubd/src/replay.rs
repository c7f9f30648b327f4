//! JSON-lines replay: decoded messages in, commands and projections out.
//!
//! Every input line is one [`Message`]. Every command the engine submits is
//! written as one output line as soon as the message that caused it has
//! been applied. [`Replay::finish`] writes a last line holding the
//! projections of every system.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use evohub_app::config::EngineConfig;
use evohub_app::outbound::{Outbound, OutboundQueue};
use evohub_app::registry::Registry;
use evohub_domain::error::EvohubError;
use evohub_domain::message::Message;
use evohub_domain::schema::SystemSchema;
use evohub_domain::time::{Timestamp, now};

/// Counters reported when the replay ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Lines applied to the registry.
    pub messages: usize,
    /// Lines that did not decode as a message.
    pub rejected: usize,
    /// Commands written out.
    pub commands: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read input")]
    Read(#[source] std::io::Error),
    #[error("failed to write output")]
    Write(#[source] std::io::Error),
    #[error("failed to encode output")]
    Encode(#[from] serde_json::Error),
}

pub struct Replay<W> {
    registry: Registry<Arc<OutboundQueue>>,
    queue: Arc<OutboundQueue>,
    outbound: mpsc::Receiver<Outbound>,
    output: W,
    clock: Option<Timestamp>,
    summary: Summary,
}

impl<W: AsyncWrite + Unpin> Replay<W> {
    /// `capacity` bounds the commands emitted by a single message or tick.
    #[must_use]
    pub fn new(config: EngineConfig, capacity: usize, output: W) -> Self {
        let (queue, outbound) = OutboundQueue::new(capacity);
        let queue = Arc::new(queue);
        Self {
            registry: Registry::new(config, Arc::clone(&queue)),
            queue,
            outbound,
            output,
            clock: None,
            summary: Summary::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry<Arc<OutboundQueue>> {
        &self.registry
    }

    /// Apply configured topologies before any traffic is seen.
    ///
    /// # Errors
    ///
    /// Returns the first schema that conflicts with itself or another one.
    pub fn apply_schemas(&mut self, schemas: &[SystemSchema]) -> Result<(), EvohubError> {
        for schema in schemas {
            self.registry.apply_schema(schema)?;
            tracing::info!(controller = %schema.controller, "applied configured schema");
        }
        Ok(())
    }

    /// Decode and apply one input line.
    ///
    /// Undecodable lines are counted and skipped. Engine errors are logged:
    /// they concern one system and never stop the replay.
    ///
    /// # Errors
    ///
    /// Returns an error only if the resulting commands cannot be written.
    pub async fn feed_line(&mut self, line: &str) -> Result<(), ReplayError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let msg: Message = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(error = %err, "skipping undecodable line");
                self.summary.rejected += 1;
                return Ok(());
            }
        };

        self.queue.resolve(&msg);
        self.clock = Some(self.clock.map_or(msg.timestamp(), |c| c.max(msg.timestamp())));
        if let Err(err) = self.registry.handle_message(&msg) {
            tracing::warn!(error = %err, %msg, "message rejected by engine");
        }
        self.summary.messages += 1;
        self.flush().await
    }

    /// Re-issue due periodic requests, on the clock of the traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the commands cannot be written.
    pub async fn tick(&mut self) -> Result<usize, ReplayError> {
        let sent = self.registry.tick(self.clock.unwrap_or_else(now));
        self.flush().await?;
        Ok(sent)
    }

    /// Apply `input` until it ends or `shutdown` completes, ticking every
    /// `tick`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the input or writing the output fails.
    pub async fn run<R, F>(&mut self, input: R, tick: Duration, shutdown: F) -> Result<(), ReplayError>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let mut lines = input.lines();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line() => match line.map_err(ReplayError::Read)? {
                    Some(line) => self.feed_line(&line).await?,
                    None => break,
                },
                _ = ticker.tick() => {
                    self.tick().await?;
                }
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Write the projections of every system and hand back the output.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    pub async fn finish(mut self) -> Result<(Summary, W), ReplayError> {
        self.flush().await?;
        let snapshot = serde_json::to_string(&json!({ "systems": self.registry.snapshot() }))?;
        self.write_line(&snapshot).await?;
        self.output.flush().await.map_err(ReplayError::Write)?;
        Ok((self.summary, self.output))
    }

    async fn flush(&mut self) -> Result<(), ReplayError> {
        while let Ok(out) = self.outbound.try_recv() {
            let line = serde_json::to_string(&json!({
                "command": out.command,
                "priority": out.options.priority,
            }))?;
            self.write_line(&line).await?;
            self.summary.commands += 1;
        }
        self.output.flush().await.map_err(ReplayError::Write)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ReplayError> {
        self.output
            .write_all(line.as_bytes())
            .await
            .map_err(ReplayError::Write)?;
        self.output
            .write_all(b"\n")
            .await
            .map_err(ReplayError::Write)
    }
}
