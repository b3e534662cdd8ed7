//! Shared E2E test infrastructure for s3churn-rs.
//!
//! Provides `TestHelper` for bucket management, object inspection and
//! harness execution against real AWS S3. All helpers use the
//! `s3churn-e2e-test` AWS profile.

#![allow(dead_code)]

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use s3churn_rs::config::args::build_config_from_args;
use s3churn_rs::{Config, FailureReport, RunSummary, StressHarness, create_harness_cancellation_token};
use uuid::Uuid;

/// AWS profile used for all E2E tests.
const AWS_PROFILE: &str = "s3churn-e2e-test";

/// Region used for the location constraint when the profile has none.
const DEFAULT_REGION: &str = "us-east-1";

/// Result of running a stress harness.
#[derive(Debug)]
pub struct HarnessResult {
    pub has_error: bool,
    pub has_warning: bool,
    pub errors: Vec<String>,
    pub failure_report: Option<FailureReport>,
    pub run_summary: Option<RunSummary>,
    pub cleanup_deleted: Option<u64>,
}

/// Deletes all objects and the bucket when dropped, even if the test panics.
pub struct BucketGuard {
    helper: Arc<TestHelper>,
    bucket: String,
}

impl BucketGuard {
    pub async fn cleanup(&self) {
        self.helper.delete_bucket_cascade(&self.bucket).await;
    }
}

impl Drop for BucketGuard {
    fn drop(&mut self) {
        let helper = self.helper.clone();
        let bucket = self.bucket.clone();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async move {
                    helper.delete_bucket_cascade(&bucket).await;
                });
            });
        }));
    }
}

pub struct TestHelper {
    client: Client,
    region: String,
}

impl TestHelper {
    pub async fn new() -> Arc<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(AWS_PROFILE)
            .load()
            .await;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let client = Client::new(&sdk_config);

        Arc::new(Self { client, region })
    }

    pub fn bucket_guard(self: &Arc<Self>, bucket: &str) -> BucketGuard {
        BucketGuard {
            helper: Arc::clone(self),
            bucket: bucket.to_string(),
        }
    }

    /// Returns a name like `s3churn-e2e-<uuid>`.
    pub fn generate_bucket_name(&self) -> String {
        format!("s3churn-e2e-{}", Uuid::new_v4())
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub async fn create_bucket(&self, bucket: &str) {
        let mut builder = self.client.create_bucket().bucket(bucket);

        // us-east-1 must NOT specify a location constraint
        if self.region != "us-east-1" {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let config = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            builder = builder.create_bucket_configuration(config);
        }

        builder
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to create bucket {bucket}: {e}"));
    }

    pub async fn delete_bucket_cascade(&self, bucket: &str) {
        let keys = self.list_objects(bucket, "").await;

        for chunk in keys.chunks(1000) {
            let identifiers: Vec<ObjectIdentifier> = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build().unwrap())
                .collect();
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .unwrap();
            let _ = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await;
        }

        let _ = self.client.delete_bucket().bucket(bucket).send().await;
    }

    pub async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to put object {key}: {e}"));
    }

    pub async fn get_object_size(&self, bucket: &str, key: &str) -> i64 {
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .unwrap_or_else(|e| panic!("Failed to head object {key}: {e}"))
            .content_length()
            .unwrap_or_default()
    }

    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(ref token) = continuation_token {
                req = req.continuation_token(token);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(_) => return keys,
            };

            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }

            if resp.is_truncated() == Some(true) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        keys.sort();
        keys
    }

    /// Build a [`Config`] from CLI-style arguments, adding the E2E profile
    /// unless explicit credentials are given.
    pub fn build_config(args: Vec<&str>) -> Config {
        let mut full_args: Vec<String> = vec!["s3churn".to_string()];
        full_args.extend(args.iter().map(|s| s.to_string()));

        let has_profile = full_args.iter().any(|a| a.starts_with("--target-profile"));
        let has_access_key = full_args
            .iter()
            .any(|a| a.starts_with("--target-access-key"));
        if !has_profile && !has_access_key {
            full_args.push("--target-profile".to_string());
            full_args.push(AWS_PROFILE.to_string());
        }

        build_config_from_args(full_args)
            .unwrap_or_else(|e| panic!("Failed to build config from args: {e}"))
    }

    /// Run a harness with no progress consumer and collect its results.
    pub async fn run_harness(config: Config) -> HarnessResult {
        let token = create_harness_cancellation_token();
        let mut harness = StressHarness::new(config, token).await;

        harness.close_stats_sender();
        harness.run().await;

        let has_error = harness.has_error();
        let errors = harness
            .get_errors_and_consume()
            .unwrap_or_default()
            .into_iter()
            .map(|e| format!("{e:?}"))
            .collect();

        HarnessResult {
            has_error,
            has_warning: harness.has_warning(),
            errors,
            failure_report: harness.get_failure_report().cloned(),
            run_summary: harness.get_run_summary().cloned(),
            cleanup_deleted: harness.get_cleanup_deleted(),
        }
    }
}

/// Default timeout for E2E tests (5 minutes).
pub const E2E_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Wraps an async E2E test body with a timeout.
#[macro_export]
macro_rules! e2e_timeout {
    ($body:expr) => {
        tokio::time::timeout(common::E2E_TIMEOUT, $body)
            .await
            .expect("E2E test timed out")
    };
}
