//! Round-based copy-then-delete orchestration.
//!
//! Round `i` covers the key indices `[i * C, (i + 1) * C)` where `C` is the
//! number of copies per round. Every task of the round copies index `n` to
//! `n + C` and deletes `n`, so the outputs of round `i` are the inputs of
//! round `i + 1`. Rounds run strictly one after another.
//!
//! Within a round, tasks are submitted in index order to a single
//! [`WorkerPool`] owned by the orchestrator and joined in submission order.
//! A slow early task therefore holds back the reporting of later tasks that
//! already finished. The first failed join aborts the round and the run.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::pool::{TaskHandle, WorkerPool};
use crate::storage::Storage;
use crate::task::{CopyDeleteTask, TaskReport};
use crate::types::error::{ErrorAggregator, FailureReport, HarnessError};
use crate::types::token::HarnessCancellationToken;
use crate::types::{HarnessStatistics, ProgressCounter};

/// Object key for `index`: the prefix followed by the decimal index.
pub fn object_key(prefix: &str, index: u64) -> String {
    format!("{prefix}{index}")
}

/// The tasks of round `round_index`, in submission order.
pub fn round_tasks(prefix: &str, round_index: u64, copies_per_round: u64) -> Vec<CopyDeleteTask> {
    let first = round_index * copies_per_round;
    (first..first + copies_per_round)
        .map(|n| {
            CopyDeleteTask::new(
                round_index,
                n,
                object_key(prefix, n),
                object_key(prefix, n + copies_per_round),
            )
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    NotStarted,
    Submitting,
    AwaitingCompletion,
    Done,
    Aborted,
}

/// A round in which every task was joined successfully.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round_index: u64,
    /// Joined task reports, in submission order.
    pub tasks: Vec<TaskReport>,
    pub progress_events: u64,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds_completed: u64,
    pub tasks_completed: u64,
    pub progress_events: u64,
}

/// Drives the configured number of rounds over one worker pool.
pub struct RoundOrchestrator {
    config: Config,
    storage: Storage,
    pool: WorkerPool,
    aggregator: ErrorAggregator,
    cancellation_token: HarnessCancellationToken,
    state: RoundState,
}

impl RoundOrchestrator {
    /// Create the orchestrator and its round pool of `config.worker_size`
    /// workers. Must be called inside a tokio runtime.
    pub fn new(
        config: Config,
        storage: Storage,
        cancellation_token: HarnessCancellationToken,
    ) -> Self {
        let pool = WorkerPool::new("round", config.worker_size, &cancellation_token);

        Self {
            config,
            storage,
            pool,
            aggregator: ErrorAggregator::new(),
            cancellation_token,
            state: RoundState::NotStarted,
        }
    }

    /// State of the current (or last) round.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// Causal chain of the first failed task, if any.
    pub fn failure(&self) -> Option<&FailureReport> {
        self.aggregator.first_failure()
    }

    pub fn take_failure(&mut self) -> Option<FailureReport> {
        self.aggregator.take_first_failure()
    }

    /// Run every round in order, stopping at the first failure.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for round_index in 0..self.config.number_of_rounds {
            if self.cancellation_token.is_cancelled() {
                warn!(round = round_index, "cancelled before round started.");
                return Err(anyhow!(HarnessError::Cancelled));
            }

            let report = self.run_round(round_index).await?;

            summary.rounds_completed += 1;
            summary.tasks_completed += report.tasks.len() as u64;
            summary.progress_events += report.progress_events;
        }

        Ok(summary)
    }

    /// Run one round: submit all of its tasks, then join them in order.
    pub async fn run_round(&mut self, round_index: u64) -> Result<RoundReport> {
        self.state = RoundState::Submitting;

        let started_at = Local::now();
        info!(
            round = round_index,
            "Doing round {} at time {} ({}).",
            round_index,
            started_at.timestamp_millis(),
            started_at.to_rfc3339()
        );
        self.storage
            .send_stats(HarnessStatistics::RoundStart { round: round_index })
            .await;

        let progress = Arc::new(ProgressCounter::new());
        let handles = self.submit_round(round_index, &progress);

        self.state = RoundState::AwaitingCompletion;
        info!(
            round = round_index,
            "Waiting for tasks to finish. Had {} progress events so far.",
            progress.get()
        );

        let mut tasks = Vec::with_capacity(handles.len());
        for (task_index, handle) in handles {
            let joined = tokio::select! {
                biased;
                result = handle.join() => result,
                _ = self.cancellation_token.cancelled() => {
                    Err(anyhow!(HarnessError::Cancelled))
                }
            };

            match joined {
                Ok(report) => tasks.push(report),
                Err(e) => return Err(self.abort_round(round_index, task_index, e).await),
            }
        }

        let interrupted = tasks.iter().filter(|task| task.interrupted).count();
        if interrupted > 0 || self.cancellation_token.is_cancelled() {
            warn!(
                round = round_index,
                interrupted_tasks = interrupted,
                "round interrupted, destinations were not all written."
            );
            self.state = RoundState::Aborted;
            self.storage
                .send_stats(HarnessStatistics::RoundAbort { round: round_index })
                .await;
            self.pool.cancel_all();
            return Err(anyhow!(HarnessError::Cancelled));
        }

        self.state = RoundState::Done;
        let finished_at = Local::now();
        info!(round = round_index, "Round completed.");
        info!(
            round = round_index,
            "Finished round {} at time {} ({}).",
            round_index,
            finished_at.timestamp_millis(),
            finished_at.to_rfc3339()
        );
        self.storage
            .send_stats(HarnessStatistics::RoundComplete { round: round_index })
            .await;

        Ok(RoundReport {
            round_index,
            tasks,
            progress_events: progress.get(),
            started_at,
            finished_at,
        })
    }

    /// Close the round pool and wait for its workers to exit.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }

    fn submit_round(
        &self,
        round_index: u64,
        progress: &Arc<ProgressCounter>,
    ) -> Vec<(u64, TaskHandle<TaskReport>)> {
        let prefix = self.config.target.prefix();
        let policy = self.config.interrupt_policy;

        round_tasks(prefix, round_index, self.config.copies_per_round)
            .into_iter()
            .map(|task| {
                let task_index = task.task_index;
                let storage = self.storage.clone();
                let progress = progress.clone();
                let handle = self
                    .pool
                    .submit(move |interrupt| task.run(storage, progress, interrupt, policy));
                (task_index, handle)
            })
            .collect()
    }

    async fn abort_round(
        &mut self,
        round_index: u64,
        task_index: u64,
        failure: anyhow::Error,
    ) -> anyhow::Error {
        self.state = RoundState::Aborted;
        self.storage
            .send_stats(HarnessStatistics::RoundAbort { round: round_index })
            .await;

        if self.cancellation_token.is_cancelled() {
            debug!(round = round_index, "round cancelled by user.");
            self.pool.cancel_all();
            return anyhow!(HarnessError::Cancelled);
        }

        self.aggregator
            .capture(round_index, task_index, failure, &self.pool)
    }
}
