//! Per-run log sink
//!
//! Every captured line is timestamp-tagged and (a) appended to an
//! accumulating buffer that becomes the run's final log blob, and (b)
//! published to a bounded fan-out channel that live subscribers drain. The
//! channel prefers liveness over completeness: a subscriber that falls more
//! than the channel capacity behind loses the oldest lines. The buffer is
//! the source of truth.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// In-memory line channel capacity per run.
pub const LOG_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct RunLogSink {
    tx: broadcast::Sender<String>,
    buffer: Arc<Mutex<String>>,
}

impl RunLogSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { tx, buffer: Arc::new(Mutex::new(String::new())) }
    }

    /// Tags `message` with the current timestamp, records it, and publishes
    /// it to live subscribers.
    pub fn publish(&self, message: &str) {
        let line = format!("[{}] {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"), message);

        {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push_str(&line);
            buffer.push('\n');
        }

        // No subscribers is fine; the buffer already has the line.
        let _ = self.tx.send(line);
    }

    /// Attaches a live subscriber. The receiver yields lines published from
    /// this point on and ends once the run reaches a terminal state.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Handle used by the registry to serve subscriptions for this run.
    pub fn sender(&self) -> broadcast::Sender<String> {
        self.tx.clone()
    }

    /// Snapshot of everything captured so far; flushed to storage at
    /// terminal state.
    pub fn captured(&self) -> String {
        self.buffer.lock().unwrap().clone()
    }
}

impl Default for RunLogSink {
    fn default() -> Self {
        Self::new()
    }
}
