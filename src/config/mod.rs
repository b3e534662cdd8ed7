pub mod args;

use std::path::PathBuf;

use aws_smithy_types::checksum_config::RequestChecksumCalculation;

use crate::task::InterruptPolicy;
use crate::types::{S3Credentials, StoragePath};

const MIB: u64 = 1024 * 1024;

/// Main configuration for a stress run.
///
/// Holds everything a [`StressHarness`](crate::StressHarness) needs: target
/// bucket and key prefix, round shape (copies per round, number of rounds),
/// pool sizes, copy tuning, seeding and cleanup switches, and the AWS client
/// settings that are passed through to the storage client untouched.
///
/// # Quick Start
///
/// ```
/// use s3churn_rs::Config;
///
/// let mut config = Config::for_target("my-bucket", "145mb-test-file-");
/// assert_eq!(config.copies_per_round, 200);
/// assert_eq!(config.number_of_rounds, 100);
///
/// config.copies_per_round = 10;
/// config.number_of_rounds = 3;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub target: StoragePath,
    pub target_client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    // Round shape
    pub copies_per_round: u64,
    pub number_of_rounds: u64,
    // Pools
    pub worker_size: u16,
    pub seed_worker_size: u16,
    pub transfer_worker_size: u16,
    // Copy tuning
    pub multipart_copy_threshold: u64,
    pub multipart_copy_part_size: u64,
    // Seeding and cleanup
    pub seed_file: Option<PathBuf>,
    pub seed_object_size: u64,
    pub skip_cleanup: bool,
    pub skip_seed: bool,
    pub max_keys: i32,
    pub interrupt_policy: InterruptPolicy,
    pub warn_as_error: bool,
    pub show_no_progress: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with defaults for the given bucket and key prefix.
    pub fn for_target(bucket: &str, prefix: &str) -> Self {
        Config {
            target: StoragePath::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            },
            ..Config::default()
        }
    }

    /// Key of the object with the given index.
    pub fn object_key(&self, index: u64) -> String {
        crate::round::object_key(self.target.prefix(), index)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target: StoragePath::S3 {
                bucket: String::new(),
                prefix: String::new(),
            },
            target_client_config: None,
            tracing_config: None,
            copies_per_round: 200,
            number_of_rounds: 100,
            worker_size: 200,
            seed_worker_size: 20,
            transfer_worker_size: 100,
            multipart_copy_threshold: 16 * MIB,
            multipart_copy_part_size: 8 * MIB,
            seed_file: None,
            seed_object_size: 145 * MIB,
            skip_cleanup: false,
            skip_seed: false,
            max_keys: 1000,
            interrupt_policy: InterruptPolicy::ContinueToDelete,
            warn_as_error: false,
            show_no_progress: false,
            auto_complete_shell: None,
        }
    }
}

/// AWS S3 client configuration.
///
/// Passed through to the storage client; none of it affects orchestration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
    pub disable_stalled_stream_protection: bool,
    pub request_checksum_calculation: RequestChecksumCalculation,
}

/// Retry configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
