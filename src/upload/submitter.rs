use std::sync::Arc;

use tracing::{info, warn};

use super::client::IngestApi;
use super::retry::{Retried, RetryCoordinator};
use super::types::{BatchHandle, UploadPart};
use crate::error::IngestError;

/// Packages admitted files into one submission and runs it under the retry
/// coordinator. A single part goes to the single-file endpoint, which is how
/// manual per-file retries re-enter.
#[derive(Clone)]
pub struct Submitter {
    api: Arc<dyn IngestApi>,
    retry: RetryCoordinator,
}

impl Submitter {
    pub fn new(api: Arc<dyn IngestApi>, retry: RetryCoordinator) -> Self {
        Self { api, retry }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry.policy().max_attempts.max(1)
    }

    pub async fn submit<R>(&self, parts: Vec<UploadPart>, on_retry: R) -> Result<Retried<BatchHandle>, IngestError>
    where
        R: FnMut(u32, &IngestError),
    {
        if parts.is_empty() {
            return Err(IngestError::Validation("Nothing to upload".to_string()));
        }

        let count = parts.len();
        let result = self
            .retry
            .run(
                || {
                    let api = self.api.clone();
                    let parts = parts.clone();
                    async move {
                        if parts.len() == 1 {
                            let part = parts.into_iter().next().ok_or_else(|| {
                                IngestError::Validation("Nothing to upload".to_string())
                            })?;
                            api.submit_single(part).await
                        } else {
                            api.submit_batch(parts).await
                        }
                    }
                },
                on_retry,
            )
            .await;

        match &result {
            Ok(done) => info!(
                "[SUBMIT] batch {} accepted {} files after {} retries",
                done.value.id.redacted(),
                count,
                done.retries
            ),
            Err(e) => warn!("[SUBMIT] submission of {} files failed: {}", count, e),
        }
        result
    }
}
