//! Removes every object under the key prefix before a run.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::storage::Storage;
use crate::types::HarnessStatistics;
use crate::types::error::HarnessError;
use crate::types::token::HarnessCancellationToken;

pub struct BucketCleaner {
    storage: Storage,
    max_keys: i32,
    cancellation_token: HarnessCancellationToken,
}

impl BucketCleaner {
    pub fn new(storage: Storage, max_keys: i32, cancellation_token: HarnessCancellationToken) -> Self {
        Self {
            storage,
            max_keys,
            cancellation_token,
        }
    }

    /// Delete every listed object, one page at a time, and return how many
    /// were deleted. Any listing or delete error stops the cleanup.
    pub async fn empty_bucket(&self) -> Result<u64> {
        let mut deleted = 0;
        let mut continuation_token = None;

        loop {
            let page = self
                .storage
                .list_objects(continuation_token.take(), self.max_keys)
                .await
                .context("failed to list objects for cleanup.")?;

            debug!(keys = page.keys.len(), "listed cleanup page.");

            for key in page.keys {
                if self.cancellation_token.is_cancelled() {
                    info!(deleted = deleted, "cleanup cancelled.");
                    return Err(anyhow!(HarnessError::Cancelled));
                }

                self.storage
                    .delete_object(&key)
                    .await
                    .with_context(|| format!("failed to delete {key} during cleanup."))?;
                self.storage
                    .send_stats(HarnessStatistics::CleanupDelete { key })
                    .await;
                deleted += 1;
            }

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        info!(deleted = deleted, "Deleted {} objects", deleted);

        Ok(deleted)
    }
}
