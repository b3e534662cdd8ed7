//! Seed upload and fan-out.
//!
//! Uploads the seed object to index 0, then copies it to indices
//! `1..copies_per_round` on a dedicated, smaller worker pool so that the
//! first round finds a full block of sources.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::pool::WorkerPool;
use crate::storage::{Storage, WaitOutcome};
use crate::types::HarnessStatistics;
use crate::types::error::{HarnessError, causal_chain, is_cancelled_error};
use crate::types::token::HarnessCancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub copied: u64,
    pub failed: u64,
}

pub struct Seeder {
    config: Config,
    storage: Storage,
    cancellation_token: HarnessCancellationToken,
}

impl Seeder {
    pub fn new(
        config: Config,
        storage: Storage,
        cancellation_token: HarnessCancellationToken,
    ) -> Self {
        Self {
            config,
            storage,
            cancellation_token,
        }
    }

    /// Upload the seed object and fan it out.
    ///
    /// A failed upload is fatal. A failed fan-out copy is logged, counted and
    /// flagged as a warning; the first round will fail on the missing source.
    pub async fn seed(&self) -> Result<SeedReport> {
        let seed_key = self.config.object_key(0);
        let body = self.load_seed_body().await?;

        info!(
            key = seed_key,
            size = body.len(),
            "Uploading first copy of file.."
        );
        self.storage
            .put_object(&seed_key, body)
            .await
            .with_context(|| format!("failed to upload seed object {seed_key}."))?;
        self.storage
            .send_stats(HarnessStatistics::SeedComplete {
                key: seed_key.clone(),
            })
            .await;

        let pool = WorkerPool::new(
            "seed",
            self.config.seed_worker_size,
            &self.cancellation_token,
        );

        let handles: Vec<_> = (1..self.config.copies_per_round)
            .map(|index| {
                let storage = self.storage.clone();
                let source_key = seed_key.clone();
                let destination_key = self.config.object_key(index);
                let handle = pool.submit(move |interrupt| {
                    copy_seed(storage, source_key, destination_key, interrupt)
                });
                (index, handle)
            })
            .collect();

        let mut report = SeedReport::default();
        for (index, handle) in handles {
            let joined = tokio::select! {
                biased;
                result = handle.join() => result,
                _ = self.cancellation_token.cancelled() => {
                    pool.cancel_all();
                    pool.shutdown().await;
                    return Err(anyhow!(HarnessError::Cancelled));
                }
            };

            match joined {
                Ok(()) => report.copied += 1,
                Err(e) if is_cancelled_error(&e) || self.cancellation_token.is_cancelled() => {
                    debug!(index = index, "seed copy cancelled.");
                    pool.cancel_all();
                    pool.shutdown().await;
                    return Err(anyhow!(HarnessError::Cancelled));
                }
                Err(e) => {
                    for (depth, cause) in causal_chain(&e).iter().enumerate() {
                        warn!(index = index, depth = depth, "seed copy failed: {}", cause);
                    }
                    self.storage.set_warning();
                    report.failed += 1;
                }
            }
        }

        pool.shutdown().await;

        info!(
            copied = report.copied,
            failed = report.failed,
            "Objects copied to S3."
        );

        Ok(report)
    }

    async fn load_seed_body(&self) -> Result<Vec<u8>> {
        match &self.config.seed_file {
            Some(path) => read_seed_file(path).await,
            None => Ok(generate_seed_body(self.config.seed_object_size)),
        }
    }
}

async fn read_seed_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read seed file {}.", path.display()))
}

/// Deterministic filler of `size` bytes.
pub fn generate_seed_body(size: u64) -> Vec<u8> {
    (0..size).map(|offset| (offset % 251) as u8).collect()
}

async fn copy_seed(
    storage: Storage,
    source_key: String,
    destination_key: String,
    interrupt: HarnessCancellationToken,
) -> Result<()> {
    let mut copy = storage
        .copy_object(&source_key, &destination_key)
        .await
        .with_context(|| format!("failed to start copy {source_key} -> {destination_key}."))?;

    match copy.wait_for_completion(&interrupt, |_| {}).await {
        WaitOutcome::Completed(result) => {
            result.with_context(|| format!("copy {source_key} -> {destination_key} failed."))?
        }
        WaitOutcome::Interrupted => return Err(anyhow!(HarnessError::Cancelled)),
    }

    info!(key = destination_key, "Copied to {}", destination_key);
    storage
        .send_stats(HarnessStatistics::SeedComplete {
            key: destination_key,
        })
        .await;

    Ok(())
}
