//! Shared test utilities for the s3churn library crate.
//!
//! [`MemoryStorage`] is an in-memory [`StorageTrait`] with an operation log,
//! per-key copy delays and failure injection. Clones share their state, so a
//! test can hand a boxed clone to the code under test and inspect the
//! original afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;

use crate::config::Config;
use crate::storage::{CopyHandle, CopyProgress, ListPage, Storage, StorageTrait};
use crate::types::HarnessStatistics;
use crate::types::error::HarnessError;

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// A small [`Config`] for unit tests: bucket `test-bucket`, tiny seed object,
/// pools large enough to run every task of a round at once.
pub(crate) fn make_test_config(prefix: &str, copies_per_round: u64, number_of_rounds: u64) -> Config {
    Config {
        copies_per_round,
        number_of_rounds,
        worker_size: 16,
        seed_worker_size: 4,
        transfer_worker_size: 4,
        seed_object_size: 1024,
        ..Config::for_target("test-bucket", prefix)
    }
}

/// A successful storage call, in the order the fake observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StorageOperation {
    Put(String),
    /// Recorded when the copy is started, not when it finishes.
    Copy { source: String, destination: String },
    Delete(String),
    List(Option<String>),
}

struct MemoryState {
    objects: BTreeMap<String, Vec<u8>>,
    operations: Vec<StorageOperation>,
    copy_delays: HashMap<String, Duration>,
    copy_failures: HashMap<String, Vec<String>>,
    put_failures: HashMap<String, Vec<String>>,
    delete_failures: HashMap<String, Vec<String>>,
    page_size: Option<usize>,
    progress_events: usize,
}

#[derive(Clone)]
pub(crate) struct MemoryStorage {
    prefix: String,
    state: Arc<Mutex<MemoryState>>,
    stats_sender: Sender<HarnessStatistics>,
    has_warning: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new(prefix: &str, stats_sender: Sender<HarnessStatistics>) -> Self {
        Self {
            prefix: prefix.to_string(),
            state: Arc::new(Mutex::new(MemoryState {
                objects: BTreeMap::new(),
                operations: Vec::new(),
                copy_delays: HashMap::new(),
                copy_failures: HashMap::new(),
                put_failures: HashMap::new(),
                delete_failures: HashMap::new(),
                page_size: None,
                progress_events: 1,
            })),
            stats_sender,
            has_warning: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn boxed(&self) -> Storage {
        Box::new(self.clone())
    }

    pub fn has_warning_flag(&self) -> Arc<AtomicBool> {
        self.has_warning.clone()
    }

    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.state.lock().unwrap().objects.insert(key.to_string(), body);
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn operations(&self) -> Vec<StorageOperation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Keys of successful deletes, in completion order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|operation| match operation {
                StorageOperation::Delete(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn list_requests(&self) -> usize {
        self.operations()
            .iter()
            .filter(|operation| matches!(operation, StorageOperation::List(_)))
            .count()
    }

    /// Delay the completion of copies whose source is `source_key`.
    pub fn set_copy_delay(&self, source_key: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .copy_delays
            .insert(source_key.to_string(), delay);
    }

    /// Make copies from `source_key` fail with the given causal chain,
    /// outermost message first.
    pub fn fail_copy(&self, source_key: &str, chain: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .copy_failures
            .insert(source_key.to_string(), to_strings(chain));
    }

    pub fn fail_put(&self, key: &str, chain: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .put_failures
            .insert(key.to_string(), to_strings(chain));
    }

    pub fn fail_delete(&self, key: &str, chain: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(key.to_string(), to_strings(chain));
    }

    /// Cap the number of keys per listing page below `max_keys`.
    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().unwrap().page_size = Some(page_size);
    }

    /// Number of `BytesTransferred` notifications emitted per copy.
    pub fn set_progress_events(&self, progress_events: usize) {
        self.state.lock().unwrap().progress_events = progress_events;
    }
}

fn to_strings(chain: &[&str]) -> Vec<String> {
    chain.iter().map(|cause| cause.to_string()).collect()
}

fn chain_error(chain: &[String]) -> anyhow::Error {
    let mut causes = chain.iter().rev();
    let mut error = match causes.next() {
        Some(root) => anyhow!(root.clone()),
        None => anyhow!("injected failure"),
    };
    for cause in causes {
        error = error.context(cause.clone());
    }
    error
}

#[async_trait]
impl StorageTrait for MemoryStorage {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(chain) = state.put_failures.get(key) {
            return Err(chain_error(chain));
        }
        state.objects.insert(key.to_string(), body);
        state.operations.push(StorageOperation::Put(key.to_string()));
        Ok(())
    }

    async fn copy_object(&self, source_key: &str, destination_key: &str) -> Result<CopyHandle> {
        let (delay, failure, progress_events) = {
            let mut state = self.state.lock().unwrap();
            state.operations.push(StorageOperation::Copy {
                source: source_key.to_string(),
                destination: destination_key.to_string(),
            });
            (
                state.copy_delays.get(source_key).copied(),
                state.copy_failures.get(source_key).cloned(),
                state.progress_events,
            )
        };

        let state = self.state.clone();
        let source_key = source_key.to_string();
        let destination_key = destination_key.to_string();

        Ok(CopyHandle::spawn(move |progress| async move {
            let _ = progress.send(CopyProgress::Started).await;

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(chain) = failure {
                return Err(chain_error(&chain));
            }

            let size = {
                let mut state = state.lock().unwrap();
                let body = state.objects.get(&source_key).cloned().ok_or_else(|| {
                    anyhow!(HarnessError::Storage(format!("NoSuchKey: {source_key}")))
                })?;
                let size = body.len() as u64;
                state.objects.insert(destination_key, body);
                size
            };

            let chunk = size / progress_events.max(1) as u64;
            for event in 0..progress_events {
                let bytes = if event + 1 == progress_events {
                    size - chunk * (progress_events as u64 - 1)
                } else {
                    chunk
                };
                let _ = progress.send(CopyProgress::BytesTransferred(bytes)).await;
            }
            let _ = progress.send(CopyProgress::Completed).await;

            Ok(())
        }))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(chain) = state.delete_failures.get(key) {
            return Err(chain_error(chain));
        }
        state.objects.remove(key);
        state.operations.push(StorageOperation::Delete(key.to_string()));
        Ok(())
    }

    async fn list_objects(
        &self,
        continuation_token: Option<String>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(StorageOperation::List(continuation_token.clone()));

        let page_size = state
            .page_size
            .map_or(max_keys as usize, |size| size.min(max_keys as usize));

        let mut remaining = state
            .objects
            .keys()
            .filter(|key| key.starts_with(&self.prefix))
            .filter(|key| {
                continuation_token
                    .as_ref()
                    .is_none_or(|token| key.as_str() > token.as_str())
            });

        let keys: Vec<String> = remaining.by_ref().take(page_size).cloned().collect();
        let next_continuation_token = if remaining.next().is_some() {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys,
            next_continuation_token,
        })
    }

    fn get_stats_sender(&self) -> Sender<HarnessStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: HarnessStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}
