//! Fixed-capacity worker pool.
//!
//! `K` worker tasks read jobs from one shared unbounded channel (MPMC), so
//! at most `K` jobs run at once and jobs start in submission order. Every
//! job gets a [`TaskHandle`] that is joined later, independently of when the
//! job actually finishes.
//!
//! The pool owns a child of the harness cancellation token. Jobs receive it
//! as their interruption signal: [`WorkerPool::cancel_all`] cancels it, stops
//! accepting jobs and drops every queued job, but never waits for running
//! jobs to stop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::types::error::HarnessError;
use crate::types::token::HarnessCancellationToken;

type Job = Box<
    dyn FnOnce(HarnessCancellationToken) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send,
>;

/// Handle to one submitted job.
///
/// Resolves to the job's own result, to [`HarnessError::Cancelled`] if the
/// job was dropped before it ran, or to [`HarnessError::TaskPanicked`].
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub async fn join(self) -> Result<T> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(HarnessError::Cancelled)),
        }
    }
}

pub struct WorkerPool {
    name: String,
    size: u16,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    cancellation_token: HarnessCancellationToken,
    cancelled: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Must be called inside a tokio runtime.
    pub fn new(name: &str, size: u16, parent_token: &HarnessCancellationToken) -> Self {
        assert!(size > 0, "worker pool size must be at least 1");

        let (sender, receiver) = async_channel::unbounded::<Job>();
        let cancellation_token = parent_token.child_token();

        let workers = (0..size)
            .map(|worker_index| {
                spawn_worker(
                    name.to_string(),
                    worker_index,
                    receiver.clone(),
                    cancellation_token.clone(),
                )
            })
            .collect();

        debug!(pool = name, size = size, "worker pool started.");

        Self {
            name: name.to_string(),
            size,
            sender,
            receiver,
            cancellation_token,
            cancelled: Arc::new(AtomicBool::new(false)),
            workers,
        }
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    /// Queue a job. The closure receives the pool's interruption token.
    ///
    /// Never blocks. If the pool no longer accepts jobs, the returned handle
    /// resolves to [`HarnessError::Cancelled`].
    pub fn submit<T, F, Fut>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(HarnessCancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (result_sender, receiver) = oneshot::channel();

        let job: Job = Box::new(move |interrupt| {
            Box::pin(async move {
                let result = match tokio::spawn(job(interrupt)).await {
                    Ok(result) => result,
                    Err(join_error) => {
                        error!("pool job panicked: {}", join_error);
                        Err(anyhow!(HarnessError::TaskPanicked(join_error.to_string())))
                    }
                };
                let _ = result_sender.send(result);
            })
        });

        if self.sender.try_send(job).is_err() {
            debug!(pool = self.name, "job rejected, pool is not accepting jobs.");
        }

        TaskHandle { receiver }
    }

    /// Interrupt running jobs, reject new ones and drop queued ones.
    ///
    /// Returns immediately. Running jobs observe the interruption at their
    /// next suspension point; whatever they already sent to the backend is
    /// not rolled back.
    pub fn cancel_all(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(pool = self.name, "cancelling all jobs.");

        self.cancellation_token.cancel();
        self.sender.close();

        let mut dropped = 0;
        while let Ok(job) = self.receiver.try_recv() {
            drop(job);
            dropped += 1;
        }

        debug!(pool = self.name, dropped = dropped, "queued jobs dropped.");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.cancellation_token.is_cancelled()
    }

    /// Stop accepting jobs and wait for every worker to exit.
    ///
    /// Queued jobs still run unless the pool was cancelled.
    pub async fn shutdown(mut self) {
        self.sender.close();

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!(pool = self.name, "worker task failed: {}", e);
            }
        }

        debug!(pool = self.name, "worker pool has been shut down.");
    }
}

fn spawn_worker(
    name: String,
    worker_index: u16,
    receiver: Receiver<Job>,
    cancellation_token: HarnessCancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    debug!(pool = name, worker_index, "worker has been cancelled.");
                    break;
                }
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(job) => job(cancellation_token.clone()).await,
                        Err(_) => {
                            debug!(pool = name, worker_index, "worker has been completed.");
                            break;
                        }
                    }
                }
            }
        }
    })
}
