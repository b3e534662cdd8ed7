use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use dyn_clone::DynClone;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::types::HarnessStatistics;
use crate::types::error::HarnessError;
use crate::types::token::HarnessCancellationToken;

pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub next_continuation_token: Option<String>,
}

/// Progress notification emitted by an in-flight copy.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyProgress {
    Started,
    BytesTransferred(u64),
    Completed,
}

/// How a wait on a [`CopyHandle`] ended.
#[derive(Debug)]
pub enum WaitOutcome {
    Completed(Result<()>),
    Interrupted,
}

/// Handle to an asynchronous copy started by [`StorageTrait::copy_object`].
///
/// The copy itself runs in its own tokio task. Dropping the handle does not
/// stop it.
pub struct CopyHandle {
    completion: JoinHandle<Result<()>>,
    progress: Receiver<CopyProgress>,
}

impl CopyHandle {
    pub fn new(completion: JoinHandle<Result<()>>, progress: Receiver<CopyProgress>) -> Self {
        Self {
            completion,
            progress,
        }
    }

    /// Spawn `copy` and return its handle. `copy` reports progress through
    /// the sender it is given; the channel closes when `copy` returns.
    pub fn spawn<F, Fut>(copy: F) -> Self
    where
        F: FnOnce(Sender<CopyProgress>) -> Fut,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let (progress_sender, progress_receiver) = async_channel::unbounded();
        let completion = tokio::spawn(copy(progress_sender));
        Self::new(completion, progress_receiver)
    }

    /// Wait until the copy finishes or `interrupt` is cancelled.
    ///
    /// `on_progress` is called once per progress notification. Notifications
    /// already queued when the copy finishes are delivered before returning.
    pub async fn wait_for_completion<P>(
        &mut self,
        interrupt: &HarnessCancellationToken,
        mut on_progress: P,
    ) -> WaitOutcome
    where
        P: FnMut(&CopyProgress),
    {
        let mut progress_closed = false;

        loop {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => {
                    return WaitOutcome::Interrupted;
                }
                event = self.progress.recv(), if !progress_closed => {
                    match event {
                        Ok(event) => on_progress(&event),
                        Err(_) => progress_closed = true,
                    }
                }
                join_result = &mut self.completion => {
                    while let Ok(event) = self.progress.try_recv() {
                        on_progress(&event);
                    }

                    let result = match join_result {
                        Ok(result) => result,
                        Err(join_error) => Err(anyhow!(HarnessError::TaskPanicked(
                            join_error.to_string()
                        ))
                        .context("copy task failed.")),
                    };
                    return WaitOutcome::Completed(result);
                }
            }
        }
    }
}

/// Storage capability used by the harness: put, copy, delete and list.
///
/// Keys are full object keys (prefix already applied).
#[async_trait]
pub trait StorageTrait: DynClone {
    /// Upload `body` to `key`.
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Start copying `source_key` to `destination_key` in the same bucket.
    ///
    /// Returns as soon as the copy has been started.
    async fn copy_object(&self, source_key: &str, destination_key: &str) -> Result<CopyHandle>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    /// List one page of keys under the configured prefix.
    async fn list_objects(
        &self,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage>;

    /// Get the statistics sender channel.
    fn get_stats_sender(&self) -> Sender<HarnessStatistics>;

    /// Send a statistics event through the channel.
    async fn send_stats(&self, stats: HarnessStatistics);

    /// Set the warning flag to indicate a warning occurred.
    fn set_warning(&self);
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Create the S3 storage for the harness.
pub async fn create_storage(
    config: Config,
    cancellation_token: HarnessCancellationToken,
    stats_sender: Sender<HarnessStatistics>,
    has_warning: Arc<AtomicBool>,
) -> Storage {
    s3::S3StorageFactory::create(config, cancellation_token, stats_sender, has_warning).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::token::create_harness_cancellation_token;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_delivers_every_progress_event() {
        let mut handle = CopyHandle::spawn(|progress| async move {
            progress.send(CopyProgress::Started).await?;
            progress.send(CopyProgress::BytesTransferred(10)).await?;
            progress.send(CopyProgress::Completed).await?;
            Ok(())
        });

        let mut events = Vec::new();
        let outcome = handle
            .wait_for_completion(&create_harness_cancellation_token(), |event| {
                events.push(event.clone())
            })
            .await;

        assert!(matches!(outcome, WaitOutcome::Completed(Ok(()))));
        assert_eq!(
            events,
            vec![
                CopyProgress::Started,
                CopyProgress::BytesTransferred(10),
                CopyProgress::Completed
            ]
        );
    }

    #[tokio::test]
    async fn wait_returns_copy_error() {
        let mut handle = CopyHandle::spawn(|_| async { Err(anyhow!("NoSuchKey")) });

        let outcome = handle
            .wait_for_completion(&create_harness_cancellation_token(), |_| {})
            .await;

        match outcome {
            WaitOutcome::Completed(Err(e)) => assert_eq!(e.to_string(), "NoSuchKey"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_is_interruptible() {
        let mut handle = CopyHandle::spawn(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let interrupt = create_harness_cancellation_token();
        interrupt.cancel();

        let outcome = handle.wait_for_completion(&interrupt, |_| {}).await;

        assert!(matches!(outcome, WaitOutcome::Interrupted));
    }

    #[tokio::test]
    async fn wait_reports_panicked_copy() {
        let mut handle = CopyHandle::spawn(|_| async {
            if true {
                panic!("copy panicked");
            }
            Ok(())
        });

        let outcome = handle
            .wait_for_completion(&create_harness_cancellation_token(), |_| {})
            .await;

        match outcome {
            WaitOutcome::Completed(Err(e)) => {
                assert_eq!(e.to_string(), "copy task failed.");
                assert!(matches!(
                    e.root_cause().downcast_ref::<HarnessError>(),
                    Some(HarnessError::TaskPanicked(_))
                ));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
