use std::fmt;

use anyhow::Error;
use thiserror::Error;
use tracing::error;

use crate::pool::WorkerPool;

/// Application-level error types for s3churn-rs.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Cancelled by the user
/// - 1: General errors (Storage, Interrupted, TaskPanicked, RoundAborted)
/// - 2: Configuration errors (InvalidConfig)
#[derive(Error, Debug, PartialEq)]
pub enum HarnessError {
    /// Storage call failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation cancelled by user or by pool cancellation before it started.
    #[error("Operation cancelled")]
    Cancelled,

    /// A copy wait was interrupted and the task abandoned its delete.
    #[error("Interrupted while waiting for copy of {key}")]
    Interrupted { key: String },

    /// A pool job panicked.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// A round was aborted by the first failed task.
    #[error("Round {round} aborted: task {task_index} failed")]
    RoundAborted { round: u64, task_index: u64 },
}

impl HarnessError {
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Cancelled => 0,
            HarnessError::InvalidConfig(_) => 2,
            _ => 1,
        }
    }
}

/// Check if an anyhow::Error wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<HarnessError>() {
        return *err == HarnessError::Cancelled;
    }
    false
}

/// Check if an anyhow::Error is a round abort produced by [`ErrorAggregator`].
pub fn is_round_aborted_error(e: &Error) -> bool {
    matches!(
        e.downcast_ref::<HarnessError>(),
        Some(HarnessError::RoundAborted { .. })
    )
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<HarnessError>() {
        return err.exit_code();
    }
    1
}

/// Returns every link of the causal chain of `e`, outermost first.
pub fn causal_chain(e: &Error) -> Vec<String> {
    e.chain().map(|cause| cause.to_string()).collect()
}

/// The first failure of a run together with its causal chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    pub round_index: u64,
    pub task_index: u64,
    /// Outermost error first, root cause last.
    pub causes: Vec<String>,
}

impl FailureReport {
    pub fn new(round_index: u64, task_index: u64, error: &Error) -> Self {
        Self {
            round_index,
            task_index,
            causes: causal_chain(error),
        }
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.causes.iter().map(String::as_str)
    }

    pub fn root_cause(&self) -> Option<&str> {
        self.causes.last().map(String::as_str)
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} task {} failed",
            self.round_index, self.task_index
        )?;
        for (depth, cause) in self.causes.iter().enumerate() {
            if depth == 0 {
                write!(f, ": {cause}")?;
            } else {
                write!(f, "\n.. cause: {cause}")?;
            }
        }
        Ok(())
    }
}

/// Turns the first failed join of a round into a reportable abort.
///
/// Never retries. Retries belong to the storage client configuration.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    first_failure: Option<FailureReport>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every link of the failure's causal chain, cancel `pool` without
    /// waiting for it, and return the error wrapped as a round abort.
    ///
    /// Only the first captured failure is kept as the run's report.
    pub fn capture(
        &mut self,
        round_index: u64,
        task_index: u64,
        failure: Error,
        pool: &WorkerPool,
    ) -> Error {
        let report = FailureReport::new(round_index, task_index, &failure);

        for (depth, cause) in report.iter().enumerate() {
            if depth == 0 {
                error!(
                    round = round_index,
                    task_index = task_index,
                    "task failed: {}",
                    cause
                );
            } else {
                error!(
                    round = round_index,
                    task_index = task_index,
                    depth = depth,
                    ".. cause: {}",
                    cause
                );
            }
        }

        pool.cancel_all();

        if self.first_failure.is_none() {
            self.first_failure = Some(report);
        }

        failure.context(HarnessError::RoundAborted {
            round: round_index,
            task_index,
        })
    }

    pub fn first_failure(&self) -> Option<&FailureReport> {
        self.first_failure.as_ref()
    }

    pub fn take_first_failure(&mut self) -> Option<FailureReport> {
        self.first_failure.take()
    }
}
