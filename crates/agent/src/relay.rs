//! Streaming relay: re-emits a finished answer as ordered chunk events.

use crate::stream_event::TurnEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Split `text` into slices of at most `size` characters.
///
/// Splits on char boundaries, so multi-byte characters are never cut.
/// Concatenating the slices gives back `text` exactly.
pub fn split_chunks(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Paces a finished answer out to the caller.
#[derive(Debug, Clone)]
pub struct StreamingRelay {
    chunk_size: usize,
    interval: Duration,
}

impl StreamingRelay {
    pub fn new(chunk_size: usize, interval: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            interval,
        }
    }

    pub fn from_config(config: &deskpilot_config::RelayConfig) -> Self {
        Self::new(config.chunk_size, Duration::from_millis(config.interval_ms))
    }

    /// All events for `text`, without pacing.
    pub fn events(&self, text: &str) -> Vec<TurnEvent> {
        split_chunks(text, self.chunk_size)
            .into_iter()
            .map(|content| TurnEvent::Chunk { content })
            .chain(std::iter::once(TurnEvent::Done))
            .collect()
    }

    /// Stream the events for `text`.
    ///
    /// Emission runs on its own task and stops as soon as the receiving side
    /// is dropped, so a disconnected caller costs nothing further.
    pub fn relay(&self, text: String) -> ReceiverStream<TurnEvent> {
        self.spawn(text).0
    }

    /// Like [`relay`](Self::relay), also returning the emitting task.
    ///
    /// The task resolves to the number of events handed to the channel.
    pub fn spawn(&self, text: String) -> (ReceiverStream<TurnEvent>, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(16);
        let events = self.events(&text);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let total = events.len();
            for (i, event) in events.into_iter().enumerate() {
                if i > 0 && !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
                if tx.send(event).await.is_err() {
                    debug!(sent = i, total, "Caller went away, relay stopped");
                    return i;
                }
            }
            total
        });

        (ReceiverStream::new(rx), handle)
    }
}

impl Default for StreamingRelay {
    fn default() -> Self {
        Self::new(32, Duration::ZERO)
    }
}
