//! Wires the coordinator to the async world.
//!
//! Submissions and progress listeners run as tasks on a tokio runtime and
//! report back through one unbounded queue. The owner of the session (the
//! UI thread) drains that queue with [`IngestSession::pump`], so every
//! state change is applied on a single thread in arrival order.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;

use super::cancellation::CancelOutcome;
use super::channel::{self, ChannelEvent};
use super::client::IngestApi;
use super::coordinator::{AdmissionReport, BatchCoordinator, SubmissionRequest, Ticket};
use super::retry::RetryCoordinator;
use super::snapshot::Snapshot;
use super::submitter::Submitter;
use super::types::{BatchHandle, BatchId, CandidateFile, FileId};
use super::validator::UploadLimits;
use crate::error::IngestError;
use crate::notify::{DismissPolicy, Notification};

/// Whether the hosting application has a signed-in user.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    token: Option<String>,
}

impl AuthContext {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

#[derive(Debug)]
pub enum IngestEvent {
    Retrying {
        ticket: Ticket,
        attempt: u32,
        max_attempts: u32,
        reason: String,
    },
    Submitted {
        ticket: Ticket,
        handle: BatchHandle,
        retries: u32,
    },
    SubmissionFailed {
        ticket: Ticket,
        error: IngestError,
    },
    Snapshot {
        batch_id: BatchId,
        snapshot: Snapshot,
    },
    ChannelError {
        batch_id: BatchId,
        error: IngestError,
    },
}

pub struct IngestSession {
    coordinator: BatchCoordinator,
    api: Arc<dyn IngestApi>,
    submitter: Submitter,
    runtime: Handle,
    events_tx: UnboundedSender<IngestEvent>,
    events_rx: UnboundedReceiver<IngestEvent>,
}

impl IngestSession {
    /// Builds a session, or `None` when nobody is signed in.
    pub fn mount(
        auth: &AuthContext,
        api: Arc<dyn IngestApi>,
        retry: RetryCoordinator,
        limits: UploadLimits,
        dismiss: DismissPolicy,
        runtime: Handle,
    ) -> Option<Self> {
        if !auth.is_authenticated() {
            info!("[SESSION] not authenticated, ingestion disabled");
            return None;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Some(Self {
            coordinator: BatchCoordinator::new(limits, dismiss),
            submitter: Submitter::new(api.clone(), retry),
            api,
            runtime,
            events_tx,
            events_rx,
        })
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    pub fn add_files(&mut self, candidates: Vec<CandidateFile>) -> AdmissionReport {
        self.coordinator.add_candidates(candidates)
    }

    pub fn remove_file(&mut self, id: FileId) -> bool {
        self.coordinator.remove_file(id)
    }

    pub fn clear(&mut self) {
        self.coordinator.clear();
    }

    pub fn cancel(&mut self) -> CancelOutcome {
        self.coordinator.cancel()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.coordinator.drain_notifications()
    }

    /// Submits every pending file as one batch.
    pub fn submit(&mut self) -> Result<(), IngestError> {
        let request = self.coordinator.begin_submission()?;
        self.spawn_submission(request);
        Ok(())
    }

    /// Re-submits one failed file on its own.
    pub fn retry_file(&mut self, id: FileId) -> Result<(), IngestError> {
        let request = self.coordinator.begin_retry(id)?;
        self.spawn_submission(request);
        Ok(())
    }

    fn spawn_submission(&self, request: SubmissionRequest) {
        let SubmissionRequest { ticket, parts } = request;
        let submitter = self.submitter.clone();
        let events = self.events_tx.clone();
        let max_attempts = submitter.max_attempts();

        self.runtime.spawn(async move {
            let retry_events = events.clone();
            let result = submitter
                .submit(parts, move |attempt, error| {
                    let _ = retry_events.send(IngestEvent::Retrying {
                        ticket,
                        attempt,
                        max_attempts,
                        reason: error.to_string(),
                    });
                })
                .await;

            let event = match result {
                Ok(done) => IngestEvent::Submitted {
                    ticket,
                    handle: done.value,
                    retries: done.retries,
                },
                Err(error) => IngestEvent::SubmissionFailed { ticket, error },
            };
            let _ = events.send(event);
        });
    }

    fn open_channel(&mut self, batch_id: BatchId) {
        let api = self.api.clone();
        let events = self.events_tx.clone();
        let sink_batch = batch_id.clone();
        let open_batch = batch_id.clone();

        let subscription = channel::subscribe(
            &self.runtime,
            batch_id,
            async move { api.progress(open_batch).await },
            move |event| {
                let event = match event {
                    ChannelEvent::Snapshot(snapshot) => IngestEvent::Snapshot {
                        batch_id: sink_batch.clone(),
                        snapshot,
                    },
                    ChannelEvent::Error(error) => IngestEvent::ChannelError {
                        batch_id: sink_batch.clone(),
                        error,
                    },
                };
                let _ = events.send(event);
            },
        );
        self.coordinator.attach_subscription(subscription);
    }

    /// Applies one event to the coordinator.
    pub fn apply(&mut self, event: IngestEvent) {
        match event {
            IngestEvent::Retrying {
                ticket,
                attempt,
                max_attempts,
                reason,
            } => self
                .coordinator
                .on_retrying(ticket, attempt, max_attempts, &reason),
            IngestEvent::Submitted {
                ticket,
                handle,
                retries,
            } => {
                if let Some(batch_id) = self.coordinator.on_submitted(ticket, handle, retries) {
                    self.open_channel(batch_id);
                }
            }
            IngestEvent::SubmissionFailed { ticket, error } => {
                self.coordinator.on_submission_failed(ticket, &error)
            }
            IngestEvent::Snapshot { batch_id, snapshot } => {
                self.coordinator.on_snapshot(&batch_id, &snapshot);
            }
            IngestEvent::ChannelError { batch_id, error } => {
                self.coordinator.on_channel_error(&batch_id, &error)
            }
        }
    }

    /// Applies every event that has already arrived. Never blocks.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Waits for the next event and applies it.
    pub async fn pump_next(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.apply(event);
                true
            }
            None => false,
        }
    }
}
