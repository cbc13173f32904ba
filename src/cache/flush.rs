//! Debounced background persistence of cache snapshots
//!
//! The cache hands snapshots to a tokio task over a channel and returns
//! immediately. The task waits for a quiet period; snapshots arriving in the
//! meantime replace the pending one, so a burst of updates costs one write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::manager::Snapshot;
use super::store::KeyValueStore;

/// Messages sent from the cache to the flusher task
#[derive(Debug)]
enum FlushMessage {
    /// Replace the pending snapshot and restart the quiet period
    Write(Snapshot),
    /// Drop any pending snapshot and remove the stored one
    Clear,
    /// Write the pending snapshot now, then acknowledge
    Flush(oneshot::Sender<()>),
}

/// Handle to the background flusher task
///
/// Dropping the handle lets the task write its last pending snapshot and exit.
#[derive(Debug)]
pub(crate) struct FlushHandle {
    sender: mpsc::UnboundedSender<FlushMessage>,
}

impl FlushHandle {
    /// Spawns the flusher on the current tokio runtime
    pub(crate) fn spawn(store: Arc<dyn KeyValueStore>, debounce: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_flusher(store, debounce, receiver));
        Self { sender }
    }

    /// Queues a snapshot for a debounced write; never blocks
    pub(crate) fn schedule(&self, snapshot: Snapshot) {
        if self.sender.send(FlushMessage::Write(snapshot)).is_err() {
            warn!("cache flusher has stopped, snapshot dropped");
        }
    }

    /// Cancels any pending write and removes the persisted snapshot
    pub(crate) fn clear(&self) {
        if self.sender.send(FlushMessage::Clear).is_err() {
            warn!("cache flusher has stopped, stored snapshot not removed");
        }
    }

    /// Waits until every message sent so far has been handled
    pub(crate) async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(FlushMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_flusher(
    store: Arc<dyn KeyValueStore>,
    debounce: Duration,
    mut receiver: mpsc::UnboundedReceiver<FlushMessage>,
) {
    let mut pending: Option<Snapshot> = None;

    loop {
        let message = if pending.is_some() {
            tokio::select! {
                message = receiver.recv() => message,
                _ = tokio::time::sleep(debounce) => {
                    if let Some(snapshot) = pending.take() {
                        write_snapshot(&store, snapshot).await;
                    }
                    continue;
                }
            }
        } else {
            receiver.recv().await
        };

        match message {
            Some(FlushMessage::Write(snapshot)) => {
                if pending.replace(snapshot).is_some() {
                    debug!("collapsed pending cache snapshot");
                }
            }
            Some(FlushMessage::Clear) => {
                pending = None;
                remove_snapshot(&store).await;
            }
            Some(FlushMessage::Flush(ack)) => {
                if let Some(snapshot) = pending.take() {
                    write_snapshot(&store, snapshot).await;
                }
                let _ = ack.send(());
            }
            None => {
                if let Some(snapshot) = pending.take() {
                    write_snapshot(&store, snapshot).await;
                }
                break;
            }
        }
    }
}

async fn write_snapshot(store: &Arc<dyn KeyValueStore>, snapshot: Snapshot) {
    let store = Arc::clone(store);
    let entries = snapshot.entries.len();
    match tokio::task::spawn_blocking(move || snapshot.save(store.as_ref())).await {
        Ok(Ok(())) => debug!(entries, "persisted cafe cache snapshot"),
        Ok(Err(e)) => warn!(error = %e, "failed to persist cafe cache"),
        Err(e) => warn!(error = %e, "cache writer task failed"),
    }
}

async fn remove_snapshot(store: &Arc<dyn KeyValueStore>) {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || Snapshot::remove(store.as_ref())).await {
        Ok(Ok(())) => debug!("removed persisted cafe cache"),
        Ok(Err(e)) => warn!(error = %e, "failed to remove persisted cafe cache"),
        Err(e) => warn!(error = %e, "cache writer task failed"),
    }
}
