//! One copy-then-delete unit of work.
//!
//! A task starts a copy of its source key to its destination key, waits for
//! the copy to finish while counting progress notifications, then deletes the
//! source. The wait is the task's only interruptible suspension point.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::storage::{CopyProgress, Storage, WaitOutcome};
use crate::types::error::HarnessError;
use crate::types::token::HarnessCancellationToken;
use crate::types::{HarnessStatistics, ProgressCounter};

/// What a task does when the wait for its copy is interrupted.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptPolicy {
    /// Report the interruption and still delete the source.
    #[default]
    ContinueToDelete,
    /// Report the interruption and leave the source in place.
    Abandon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyDeleteTask {
    pub round_index: u64,
    /// Index of the source object in the key namespace.
    pub task_index: u64,
    pub source_key: String,
    pub destination_key: String,
}

/// Outcome of a task that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub round_index: u64,
    pub task_index: u64,
    pub source_key: String,
    pub destination_key: String,
    /// The copy wait was interrupted before the copy finished.
    pub interrupted: bool,
    pub source_deleted: bool,
}

impl CopyDeleteTask {
    pub fn new(
        round_index: u64,
        task_index: u64,
        source_key: impl Into<String>,
        destination_key: impl Into<String>,
    ) -> Self {
        Self {
            round_index,
            task_index,
            source_key: source_key.into(),
            destination_key: destination_key.into(),
        }
    }

    /// Copy, wait, delete.
    ///
    /// Copy and delete failures are returned with context naming the keys.
    /// An interrupted wait is never swallowed: it is reported in the
    /// [`TaskReport`] (`ContinueToDelete`) or as
    /// [`HarnessError::Interrupted`] (`Abandon`).
    pub async fn run(
        self,
        storage: Storage,
        progress: Arc<ProgressCounter>,
        interrupt: HarnessCancellationToken,
        policy: InterruptPolicy,
    ) -> Result<TaskReport> {
        info!(
            round = self.round_index,
            task_index = self.task_index,
            "({}) copy {} -> {}",
            self.task_index,
            self.source_key,
            self.destination_key
        );

        let mut copy = match storage
            .copy_object(&self.source_key, &self.destination_key)
            .await
        {
            Ok(copy) => copy,
            Err(e) => {
                self.report_error(&storage).await;
                return Err(e).with_context(|| {
                    format!(
                        "failed to start copy {} -> {}.",
                        self.source_key, self.destination_key
                    )
                });
            }
        };

        let stats_sender = storage.get_stats_sender();
        let outcome = copy
            .wait_for_completion(&interrupt, |event| {
                progress.increment();
                if let CopyProgress::BytesTransferred(bytes) = event {
                    let _ = stats_sender.try_send(HarnessStatistics::CopyBytes(*bytes));
                }
            })
            .await;

        let interrupted = match outcome {
            WaitOutcome::Completed(Ok(())) => {
                debug!(
                    round = self.round_index,
                    task_index = self.task_index,
                    key = self.destination_key,
                    "copy completed."
                );
                storage
                    .send_stats(HarnessStatistics::CopyComplete {
                        key: self.destination_key.clone(),
                    })
                    .await;
                false
            }
            WaitOutcome::Completed(Err(e)) => {
                self.report_error(&storage).await;
                return Err(e).with_context(|| {
                    format!(
                        "copy {} -> {} failed.",
                        self.source_key, self.destination_key
                    )
                });
            }
            WaitOutcome::Interrupted => {
                warn!(
                    round = self.round_index,
                    task_index = self.task_index,
                    key = self.source_key,
                    "Interrupted."
                );
                if policy == InterruptPolicy::Abandon {
                    self.report_error(&storage).await;
                    return Err(anyhow!(HarnessError::Interrupted {
                        key: self.source_key.clone(),
                    }));
                }
                true
            }
        };

        if let Err(e) = storage.delete_object(&self.source_key).await {
            self.report_error(&storage).await;
            return Err(e).with_context(|| format!("failed to delete {}.", self.source_key));
        }
        storage
            .send_stats(HarnessStatistics::DeleteComplete {
                key: self.source_key.clone(),
            })
            .await;

        info!(
            round = self.round_index,
            task_index = self.task_index,
            "task {} finished.",
            self.task_index
        );

        Ok(TaskReport {
            round_index: self.round_index,
            task_index: self.task_index,
            source_key: self.source_key,
            destination_key: self.destination_key,
            interrupted,
            source_deleted: true,
        })
    }

    async fn report_error(&self, storage: &Storage) {
        storage
            .send_stats(HarnessStatistics::TaskError {
                key: self.source_key.clone(),
            })
            .await;
    }
}
