//! Per-connection tweet emission loop
//!
//! Sleep a random number of seconds, write one JSON line, flush, repeat.
//! The loop ends when the connection's cancellation token fires or the
//! sink reports an error.

use crate::{tweet, Error, FilterSpec, Result};
use rand::Rng;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Emission timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Shortest pause between tweets, in whole seconds
    pub min_delay_secs: u64,
    /// Longest pause between tweets, in whole seconds
    pub max_delay_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 1,
            max_delay_secs: 3,
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay_secs(mut self, min: u64, max: u64) -> Self {
        self.min_delay_secs = min;
        self.max_delay_secs = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_delay_secs > self.max_delay_secs {
            return Err(Error::Config(format!(
                "min delay {}s is above max delay {}s",
                self.min_delay_secs, self.max_delay_secs
            )));
        }
        Ok(())
    }
}

/// Why an emission loop stopped
#[derive(Debug)]
pub enum StreamEnd {
    /// Client gone or server shutting down
    Cancelled,
    /// Write or flush failed, usually a closed connection
    Disconnected(io::Error),
    /// Tweet could not be serialized
    Encode(serde_json::Error),
}

/// Drives one filter stream
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    config: StreamConfig,
}

impl Emitter {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Delay before the next tweet, uniform over the configured whole seconds
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let secs = rng.gen_range(self.config.min_delay_secs..=self.config.max_delay_secs);
        Duration::from_secs(secs)
    }

    /// Run until cancelled or the sink fails.
    ///
    /// Only the sleep races the token; a line that has started going out is
    /// always written whole, so the wire never carries a torn object.
    pub async fn run<W, R>(
        &self,
        sink: &mut W,
        spec: &FilterSpec,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> StreamEnd
    where
        W: AsyncWrite + Unpin,
        R: Rng + ?Sized,
    {
        let mut sent: u64 = 0;

        let end = loop {
            let delay = self.next_delay(rng);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            let line = match tweet::generate(spec, rng).to_line() {
                Ok(line) => line,
                Err(e) => break StreamEnd::Encode(e),
            };

            if let Err(e) = sink.write_all(&line).await {
                break StreamEnd::Disconnected(e);
            }
            if let Err(e) = sink.flush().await {
                break StreamEnd::Disconnected(e);
            }
            sent += 1;
        };

        debug!(sent, reason = ?end, "filter stream ended");
        end
    }
}
