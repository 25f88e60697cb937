//! Long-lived progress subscription for one batch.
//!
//! A listener task reads snapshots until a terminal one, a channel error,
//! or cancellation. The [`ProgressSubscription`] handle shares a guard with
//! the task; whichever side closes first wins and the close is recorded
//! exactly once. Dropping the handle closes it too.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures_util::StreamExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::client::SnapshotStream;
use super::snapshot::Snapshot;
use super::types::BatchId;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Terminal,
    ChannelError,
    Cancelled,
    Teardown,
}

#[derive(Debug)]
pub enum ChannelEvent {
    Snapshot(Snapshot),
    Error(IngestError),
}

struct ChannelGuard {
    batch_id: BatchId,
    token: CancellationToken,
    reason: OnceLock<CloseReason>,
}

impl ChannelGuard {
    fn close(&self, reason: CloseReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        info!(
            "[CHANNEL] batch {} closed ({:?})",
            self.batch_id.redacted(),
            reason
        );
        true
    }
}

pub struct ProgressSubscription {
    guard: Arc<ChannelGuard>,
}

impl ProgressSubscription {
    pub fn batch_id(&self) -> &BatchId {
        &self.guard.batch_id
    }

    /// Returns `true` only for the call that actually closed the channel.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.guard.close(reason)
    }

    pub fn is_closed(&self) -> bool {
        self.guard.reason.get().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.guard.reason.get().copied()
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.guard.close(CloseReason::Teardown);
    }
}

/// Spawns the listener on `runtime`. `open` produces the snapshot stream;
/// every snapshot and the final error (if any) go to `sink`. Nothing is
/// delivered once the subscription has been closed from outside.
pub fn subscribe<O, F>(runtime: &Handle, batch_id: BatchId, open: O, sink: F) -> ProgressSubscription
where
    O: Future<Output = Result<SnapshotStream, IngestError>> + Send + 'static,
    F: Fn(ChannelEvent) + Send + Sync + 'static,
{
    let guard = Arc::new(ChannelGuard {
        batch_id,
        token: CancellationToken::new(),
        reason: OnceLock::new(),
    });

    let task_guard = guard.clone();
    runtime.spawn(async move {
        let token = task_guard.token.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {}
            _ = listen(&task_guard, open, &sink) => {}
        }
    });

    ProgressSubscription { guard }
}

async fn listen<O, F>(guard: &ChannelGuard, open: O, sink: &F)
where
    O: Future<Output = Result<SnapshotStream, IngestError>>,
    F: Fn(ChannelEvent),
{
    let mut stream = match open.await {
        Ok(stream) => stream,
        Err(e) => {
            fail(guard, e, sink);
            return;
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(snapshot) => {
                let terminal = snapshot.is_terminal();
                sink(ChannelEvent::Snapshot(snapshot));
                if terminal {
                    guard.close(CloseReason::Terminal);
                    return;
                }
            }
            Err(e) => {
                fail(guard, e, sink);
                return;
            }
        }
    }

    fail(
        guard,
        IngestError::Channel("progress stream ended before the batch finished".to_string()),
        sink,
    );
}

fn fail<F: Fn(ChannelEvent)>(guard: &ChannelGuard, error: IngestError, sink: &F) {
    warn!(
        "[CHANNEL] batch {} failed: {}",
        guard.batch_id.redacted(),
        error
    );
    if guard.close(CloseReason::ChannelError) {
        sink(ChannelEvent::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::AggregateStatus;
    use futures_util::stream;
    use tokio::sync::mpsc;

    fn snap(completed: u32, status: AggregateStatus) -> Snapshot {
        Snapshot {
            batch_id: Some(BatchId("b1".into())),
            total_files: 2,
            completed_files: completed,
            failed_files: 0,
            status,
            items: Vec::new(),
        }
    }

    fn open_with(items: Vec<Result<Snapshot, IngestError>>) -> impl Future<Output = Result<SnapshotStream, IngestError>> {
        async move { Ok(stream::iter(items).boxed()) }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn stops_after_terminal_snapshot() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = subscribe(
            &Handle::current(),
            BatchId("b1".into()),
            open_with(vec![
                Ok(snap(1, AggregateStatus::Processing)),
                Ok(snap(2, AggregateStatus::Completed)),
                Ok(snap(2, AggregateStatus::Completed)),
            ]),
            move |event| {
                let _ = tx.send(event);
            },
        );

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(sub.is_closed());
        assert_eq!(sub.close_reason(), Some(CloseReason::Terminal));
        assert!(!sub.close(CloseReason::Cancelled), "second close must be a no-op");
    }

    #[tokio::test]
    async fn stream_end_without_terminal_is_an_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = subscribe(
            &Handle::current(),
            BatchId("b1".into()),
            open_with(vec![Ok(snap(1, AggregateStatus::Processing))]),
            move |event| {
                let _ = tx.send(event);
            },
        );

        let events = drain(rx).await;
        assert!(matches!(events.as_slice(), [ChannelEvent::Snapshot(_), ChannelEvent::Error(_)]));
        assert_eq!(sub.close_reason(), Some(CloseReason::ChannelError));
    }

    #[tokio::test]
    async fn open_failure_is_reported_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = subscribe(
            &Handle::current(),
            BatchId("b1".into()),
            async { Err(IngestError::Connection("refused".into())) },
            move |event| {
                let _ = tx.send(event);
            },
        );

        let events = drain(rx).await;
        assert!(matches!(events.as_slice(), [ChannelEvent::Error(IngestError::Connection(_))]));
        assert_eq!(sub.close_reason(), Some(CloseReason::ChannelError));
    }

    #[tokio::test]
    async fn explicit_close_stops_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (feed_tx, feed_rx) = mpsc::unbounded_channel::<Result<Snapshot, IngestError>>();
        let feed = tokio_stream_from(feed_rx);

        let sub = subscribe(
            &Handle::current(),
            BatchId("b1".into()),
            async move { Ok(feed) },
            move |event| {
                let _ = tx.send(event);
            },
        );

        feed_tx.send(Ok(snap(1, AggregateStatus::Processing))).unwrap();
        assert!(matches!(rx.recv().await, Some(ChannelEvent::Snapshot(_))));

        assert!(sub.close(CloseReason::Cancelled));
        let _ = feed_tx.send(Ok(snap(2, AggregateStatus::Completed)));

        // The listener task drops its sink once cancelled, ending the channel.
        assert!(rx.recv().await.is_none());
        assert_eq!(sub.close_reason(), Some(CloseReason::Cancelled));
    }

    #[tokio::test]
    async fn drop_closes_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_feed_tx, feed_rx) = mpsc::unbounded_channel::<Result<Snapshot, IngestError>>();
        let feed = tokio_stream_from(feed_rx);

        let sub = subscribe(
            &Handle::current(),
            BatchId("b1".into()),
            async move { Ok(feed) },
            move |event| {
                let _ = tx.send(event);
            },
        );
        drop(sub);
        assert!(rx.recv().await.is_none());
    }

    fn tokio_stream_from(
        mut rx: mpsc::UnboundedReceiver<Result<Snapshot, IngestError>>,
    ) -> SnapshotStream {
        stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }
}
