//! The lazy-sequence half of `ConsensusStore::watch`.

use tokio::sync::mpsc;

use crate::store::WatchEvent;

/// A restartable stream of `WatchEvent`s over a key prefix. Dropping this
/// value cancels the underlying subscription; it carries no buffering
/// guarantees beyond what the concrete store implementation provides.
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl WatchStream {
    pub fn new(rx: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { rx }
    }

    /// Awaits the next event. Returns `None` once the store has closed the
    /// subscription (it will never be restarted by the store itself; the
    /// caller re-issues `watch` from the last revision it observed).
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}
