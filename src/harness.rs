//! Top-level stress run driver.
//!
//! Runs the three phases of a stress run against one bucket prefix:
//! cleanup (empty the prefix), seeding (one full block of sources) and the
//! rounds themselves. Errors are recorded rather than returned, the way a
//! CLI wants to consume them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_channel::Receiver;
use tracing::{debug, info};

use crate::cleaner::BucketCleaner;
use crate::config::Config;
use crate::round::{RoundOrchestrator, RunSummary};
use crate::seeder::{SeedReport, Seeder};
use crate::storage::{self, Storage};
use crate::types::HarnessStatistics;
use crate::types::error::FailureReport;
use crate::types::token::HarnessCancellationToken;

/// Drives a complete stress run.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() {
/// # use s3churn_rs::{Config, StressHarness, create_harness_cancellation_token};
/// # let config: Config = todo!();
/// let cancellation_token = create_harness_cancellation_token();
/// let mut harness = StressHarness::new(config, cancellation_token).await;
/// harness.close_stats_sender();
/// harness.run().await;
/// if harness.has_error() {
///     if let Some(report) = harness.get_failure_report() {
///         eprintln!("{report}");
///     }
/// }
/// # }
/// ```
pub struct StressHarness {
    config: Config,
    storage: Storage,
    cancellation_token: HarnessCancellationToken,
    stats_receiver: Receiver<HarnessStatistics>,
    has_error: Arc<AtomicBool>,
    has_warning: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    failure_report: Option<FailureReport>,
    cleanup_deleted: Option<u64>,
    seed_report: Option<SeedReport>,
    run_summary: Option<RunSummary>,
    ready: bool,
}

impl StressHarness {
    /// Create the S3 storage and the statistics channel for a run.
    pub async fn new(config: Config, cancellation_token: HarnessCancellationToken) -> Self {
        let has_warning = Arc::new(AtomicBool::new(false));
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        let storage = storage::create_storage(
            config.clone(),
            cancellation_token.clone(),
            stats_sender,
            has_warning.clone(),
        )
        .await;

        Self::with_storage(
            config,
            storage,
            stats_receiver,
            has_warning,
            cancellation_token,
        )
    }

    fn with_storage(
        config: Config,
        storage: Storage,
        stats_receiver: Receiver<HarnessStatistics>,
        has_warning: Arc<AtomicBool>,
        cancellation_token: HarnessCancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            cancellation_token,
            stats_receiver,
            has_error: Arc::new(AtomicBool::new(false)),
            has_warning,
            errors: Arc::new(Mutex::new(VecDeque::new())),
            failure_report: None,
            cleanup_deleted: None,
            seed_report: None,
            run_summary: None,
            ready: true,
        }
    }

    /// Run cleanup, seeding and every round. Callable once.
    ///
    /// Stops at the first failed phase. The stats sender is closed when the
    /// run ends so that a progress consumer can finish.
    pub async fn run(&mut self) {
        assert!(self.ready, "StressHarness::run() called more than once");
        self.ready = false;

        if let Err(e) = self.execute().await {
            self.record_error(e);
        }

        if self.config.warn_as_error && self.has_warning.load(Ordering::SeqCst) {
            self.record_error(anyhow::anyhow!(
                "warnings promoted to errors (--warn-as-error)"
            ));
        }

        self.close_stats_sender();
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_errors_and_consume(&self) -> Option<Vec<anyhow::Error>> {
        if !self.has_error() {
            return None;
        }
        let mut error_list = self.errors.lock().unwrap();
        Some(error_list.drain(..).collect())
    }

    /// Get error messages without consuming them.
    pub fn get_error_messages(&self) -> Option<Vec<String>> {
        if !self.has_error() {
            return None;
        }
        let error_list = self.errors.lock().unwrap();
        Some(error_list.iter().map(|e| e.to_string()).collect())
    }

    /// Causal chain of the task failure that aborted the run.
    pub fn get_failure_report(&self) -> Option<&FailureReport> {
        self.failure_report.as_ref()
    }

    /// Number of objects removed by the cleanup phase, if it ran.
    pub fn get_cleanup_deleted(&self) -> Option<u64> {
        self.cleanup_deleted
    }

    pub fn get_seed_report(&self) -> Option<SeedReport> {
        self.seed_report
    }

    pub fn get_run_summary(&self) -> Option<&RunSummary> {
        self.run_summary.as_ref()
    }

    pub fn get_stats_receiver(&self) -> Receiver<HarnessStatistics> {
        self.stats_receiver.clone()
    }

    /// Close the stats sender. Call this before `run()` when no progress
    /// consumer reads the stats channel.
    pub fn close_stats_sender(&self) {
        self.storage.get_stats_sender().close();
    }

    async fn execute(&mut self) -> anyhow::Result<()> {
        if self.config.skip_cleanup {
            debug!("cleanup skipped.");
        } else {
            let cleaner = BucketCleaner::new(
                self.storage.clone(),
                self.config.max_keys,
                self.cancellation_token.clone(),
            );
            self.cleanup_deleted = Some(cleaner.empty_bucket().await?);
        }

        if self.config.skip_seed {
            debug!("seeding skipped.");
        } else {
            let seeder = Seeder::new(
                self.config.clone(),
                self.storage.clone(),
                self.cancellation_token.clone(),
            );
            self.seed_report = Some(seeder.seed().await?);
        }

        let mut orchestrator = RoundOrchestrator::new(
            self.config.clone(),
            self.storage.clone(),
            self.cancellation_token.clone(),
        );
        let result = orchestrator.run().await;
        self.failure_report = orchestrator.take_failure();
        orchestrator.shutdown().await;

        let summary = result?;
        info!(
            rounds = summary.rounds_completed,
            tasks = summary.tasks_completed,
            progress_events = summary.progress_events,
            "all rounds completed."
        );
        self.run_summary = Some(summary);

        Ok(())
    }

    fn record_error(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }
}
