use crate::config::{CLITimeoutConfig, ClientConfig, Config, RetryConfig, TracingConfig};
use crate::task::InterruptPolicy;
use crate::types::{AccessKeys, S3Credentials, StoragePath};
use aws_smithy_types::checksum_config::RequestChecksumCalculation;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::ffi::OsString;
use std::path::PathBuf;

use value_parser::file_exist::is_file_exist;
use value_parser::human_bytes::{check_human_bytes, parse_human_bytes};

pub mod value_parser;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_COPIES_PER_ROUND: u64 = 200;
const DEFAULT_NUMBER_OF_ROUNDS: u64 = 100;
const DEFAULT_WORKER_SIZE: u16 = 200;
const DEFAULT_SEED_WORKER_SIZE: u16 = 20;
const DEFAULT_TRANSFER_WORKER_SIZE: u16 = 100;
const DEFAULT_MULTIPART_COPY_THRESHOLD: &str = "16MiB";
const DEFAULT_MULTIPART_COPY_PART_SIZE: &str = "8MiB";
const DEFAULT_SEED_OBJECT_SIZE: &str = "145MiB";
const DEFAULT_SKIP_CLEANUP: bool = false;
const DEFAULT_SKIP_SEED: bool = false;
const DEFAULT_MAX_KEYS: i32 = 1000;
// 20 retries after the first attempt.
const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 21;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_CONNECT_TIMEOUT_MILLISECONDS: u64 = 50 * 1000;
const DEFAULT_READ_TIMEOUT_MILLISECONDS: u64 = 200 * 1000;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_WARN_AS_ERROR: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_DISABLE_STALLED_STREAM_PROTECTION: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;

// S3 rejects UploadPartCopy parts smaller than this (except the last one).
const MIN_MULTIPART_COPY_PART_SIZE: u64 = 5 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_INVALID_TARGET: &str =
    "Target must be an S3 path starting with 's3://' (e.g., s3://bucket/key-prefix-).";
const ERROR_MESSAGE_COPIES_PER_ROUND_ZERO: &str = "Copies per round must be at least 1.";
const ERROR_MESSAGE_NUMBER_OF_ROUNDS_ZERO: &str = "Number of rounds must be at least 1.";
const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "Worker size must be at least 1.";
const ERROR_MESSAGE_SEED_WORKER_SIZE_ZERO: &str = "Seed worker size must be at least 1.";
const ERROR_MESSAGE_TRANSFER_WORKER_SIZE_ZERO: &str = "Transfer worker size must be at least 1.";
const ERROR_MESSAGE_PART_SIZE_TOO_SMALL: &str = "Multipart copy part size must be at least 5MiB.";
const ERROR_MESSAGE_PART_SIZE_OVER_THRESHOLD: &str =
    "Multipart copy part size must not exceed the multipart copy threshold.";
const ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE: &str = "Max keys must be between 1 and 1000.";
const ERROR_MESSAGE_KEY_INDEX_OVERFLOW: &str =
    "Copies per round multiplied by number of rounds plus one must fit in a 64-bit key index.";

fn check_s3_target(s: &str) -> Result<String, String> {
    if s.starts_with("s3://") && s.len() > 5 {
        Ok(s.to_string())
    } else {
        Err(ERROR_MESSAGE_INVALID_TARGET.to_string())
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// s3churn - Round-based parallel copy-then-delete stress harness for Amazon S3.
///
/// Every round copies COPIES objects `<prefix>N` to `<prefix>N+COPIES` in
/// parallel and deletes each source once its copy has completed, so the
/// outputs of one round are the inputs of the next. The first failure aborts
/// the run and prints its full causal chain.
///
/// Example:
///   s3churn s3://my-bucket/145mb-test-file-
///   s3churn s3://my-bucket/churn- --copies-per-round 50 --number-of-rounds 10 -v
#[derive(Parser, Clone, Debug)]
#[command(name = "s3churn", version, about, long_about = None)]
pub struct CLIArgs {
    /// S3 target: s3://<BUCKET_NAME>/<KEY_PREFIX>
    #[arg(
        env,
        help = "s3://<BUCKET_NAME>[/<KEY_PREFIX>]",
        value_parser = check_s3_target,
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "s3://ignored"),
        required = false,
    )]
    pub target: String,

    // -----------------------------------------------------------------------
    // Round options
    // -----------------------------------------------------------------------
    /// Number of copy-then-delete tasks per round.
    #[arg(long, env, default_value_t = DEFAULT_COPIES_PER_ROUND, help_heading = "Round")]
    pub copies_per_round: u64,

    /// Number of rounds to run.
    #[arg(long, env, default_value_t = DEFAULT_NUMBER_OF_ROUNDS, help_heading = "Round")]
    pub number_of_rounds: u64,

    /// What a task does when its copy wait is interrupted.
    #[arg(
        long,
        env,
        value_enum,
        default_value_t = InterruptPolicy::ContinueToDelete,
        help_heading = "Round",
        long_help = r#"What a task does when the wait for its copy is interrupted
(first failure in the round, or Ctrl+C).
continue-to-delete: report the interruption and still delete the source.
abandon: report the interruption and leave the source in place."#
    )]
    pub interrupt_policy: InterruptPolicy,

    // -----------------------------------------------------------------------
    // Seed / cleanup options
    // -----------------------------------------------------------------------
    /// Upload this file as the seed object instead of generated data.
    #[arg(long, env, value_parser = is_file_exist, help_heading = "Seed")]
    pub seed_file: Option<String>,

    /// Size of the generated seed object.
    #[arg(
        long,
        env,
        default_value = DEFAULT_SEED_OBJECT_SIZE,
        value_parser = check_human_bytes,
        help_heading = "Seed",
        long_help = r#"Size of the generated seed object when --seed-file is not given.
Allow suffixes: KB, KiB, MB, MiB, GB, GiB"#
    )]
    pub seed_object_size: String,

    /// Do not upload and fan out the seed objects.
    #[arg(long, env, default_value_t = DEFAULT_SKIP_SEED, help_heading = "Seed")]
    pub skip_seed: bool,

    /// Do not delete existing objects under the key prefix before seeding.
    #[arg(long, env, default_value_t = DEFAULT_SKIP_CLEANUP, help_heading = "Seed")]
    pub skip_cleanup: bool,

    /// Max keys per listing request during cleanup.
    #[arg(long, env, default_value_t = DEFAULT_MAX_KEYS, help_heading = "Seed")]
    pub max_keys: i32,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Number of concurrent round tasks.
    #[arg(long, env, default_value_t = DEFAULT_WORKER_SIZE, help_heading = "Performance")]
    pub worker_size: u16,

    /// Number of concurrent copies while seeding.
    #[arg(long, env, default_value_t = DEFAULT_SEED_WORKER_SIZE, help_heading = "Performance")]
    pub seed_worker_size: u16,

    /// Number of concurrent part copies across all multipart copies.
    #[arg(long, env, default_value_t = DEFAULT_TRANSFER_WORKER_SIZE, help_heading = "Performance")]
    pub transfer_worker_size: u16,

    /// Objects larger than this are copied with multipart copy.
    #[arg(
        long,
        env,
        default_value = DEFAULT_MULTIPART_COPY_THRESHOLD,
        value_parser = check_human_bytes,
        help_heading = "Performance"
    )]
    pub multipart_copy_threshold: String,

    /// Part size for multipart copy (at least 5MiB).
    #[arg(
        long,
        env,
        default_value = DEFAULT_MULTIPART_COPY_PART_SIZE,
        value_parser = check_human_bytes,
        help_heading = "Performance"
    )]
    pub multipart_copy_part_size: String,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (normal), -v, -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Don't show the progress bar.
    #[arg(long, env, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "Logging")]
    pub show_no_progress: bool,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable AWS SDK tracing.
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Maximum attempts for each AWS SDK operation.
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    /// Initial backoff in milliseconds for retries.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Overall operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    /// Per-attempt operation timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, default_value_t = DEFAULT_CONNECT_TIMEOUT_MILLISECONDS, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: u64,

    /// Read (socket) timeout in milliseconds.
    #[arg(long, env, default_value_t = DEFAULT_READ_TIMEOUT_MILLISECONDS, help_heading = "Timeout")]
    pub read_timeout_milliseconds: u64,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    /// AWS profile for the target. If not set, uses the default credential chain.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), conflicts_with_all = ["target_access_key"], help_heading = "AWS")]
    pub target_profile: Option<String>,

    /// AWS access key ID for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), requires = "target_secret_access_key", help_heading = "AWS")]
    pub target_access_key: Option<String>,

    /// AWS secret access key for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), requires = "target_access_key", help_heading = "AWS")]
    pub target_secret_access_key: Option<String>,

    /// AWS session token for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), requires = "target_access_key", help_heading = "AWS")]
    pub target_session_token: Option<String>,

    /// AWS region for the target.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_region: Option<String>,

    /// Custom S3-compatible endpoint URL (e.g. MinIO).
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_endpoint_url: Option<String>,

    /// Force path-style access (required for some S3-compatible services).
    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub target_force_path_style: bool,

    /// Disable stalled stream protection.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_STALLED_STREAM_PROTECTION, help_heading = "AWS")]
    pub disable_stalled_stream_protection: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Treat warnings (failed seed copies) as errors.
    #[arg(long, env, default_value_t = DEFAULT_WARN_AS_ERROR, help_heading = "Advanced")]
    pub warn_as_error: bool,

    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use s3churn_rs::config::args::parse_from_args;
///
/// let args = vec!["s3churn", "s3://my-bucket/file-", "--number-of-rounds", "3"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert_eq!(cli_args.number_of_rounds, 3);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.copies_per_round == 0 {
            return Err(ERROR_MESSAGE_COPIES_PER_ROUND_ZERO.to_string());
        }
        if self.number_of_rounds == 0 {
            return Err(ERROR_MESSAGE_NUMBER_OF_ROUNDS_ZERO.to_string());
        }
        // The last round writes indices up to (rounds + 1) * copies - 1.
        if self
            .number_of_rounds
            .checked_add(1)
            .and_then(|rounds| rounds.checked_mul(self.copies_per_round))
            .is_none()
        {
            return Err(ERROR_MESSAGE_KEY_INDEX_OVERFLOW.to_string());
        }
        if self.worker_size == 0 {
            return Err(ERROR_MESSAGE_WORKER_SIZE_ZERO.to_string());
        }
        if self.seed_worker_size == 0 {
            return Err(ERROR_MESSAGE_SEED_WORKER_SIZE_ZERO.to_string());
        }
        if self.transfer_worker_size == 0 {
            return Err(ERROR_MESSAGE_TRANSFER_WORKER_SIZE_ZERO.to_string());
        }
        if !(1..=1000).contains(&self.max_keys) {
            return Err(ERROR_MESSAGE_MAX_KEYS_OUT_OF_RANGE.to_string());
        }

        let part_size = parse_human_bytes(&self.multipart_copy_part_size)?;
        let threshold = parse_human_bytes(&self.multipart_copy_threshold)?;
        if part_size < MIN_MULTIPART_COPY_PART_SIZE {
            return Err(ERROR_MESSAGE_PART_SIZE_TOO_SMALL.to_string());
        }
        if part_size > threshold {
            return Err(ERROR_MESSAGE_PART_SIZE_OVER_THRESHOLD.to_string());
        }

        Ok(())
    }

    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.target_profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.target_access_key {
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: self.target_secret_access_key.clone().unwrap_or_default(),
                    session_token: self.target_session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        ClientConfig {
            credential,
            region: self.target_region.clone(),
            endpoint_url: self.target_endpoint_url.clone(),
            force_path_style: self.target_force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: Some(self.connect_timeout_milliseconds),
                read_timeout_milliseconds: Some(self.read_timeout_milliseconds),
            },
            disable_stalled_stream_protection: self.disable_stalled_stream_protection,
            request_checksum_calculation: RequestChecksumCalculation::WhenRequired,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }

    fn parse_target(&self) -> Result<StoragePath, String> {
        let without_scheme = self
            .target
            .strip_prefix("s3://")
            .ok_or_else(|| ERROR_MESSAGE_INVALID_TARGET.to_string())?;

        let (bucket, prefix) = match without_scheme.split_once('/') {
            Some((bucket, prefix)) => (bucket.to_string(), prefix.to_string()),
            None => (without_scheme.to_string(), String::new()),
        };

        if bucket.is_empty() {
            return Err(ERROR_MESSAGE_INVALID_TARGET.to_string());
        }

        Ok(StoragePath::S3 { bucket, prefix })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        let target = args.parse_target()?;
        let target_client_config = Some(args.build_client_config());
        let tracing_config = args.build_tracing_config();

        Ok(Config {
            target,
            target_client_config,
            tracing_config,
            copies_per_round: args.copies_per_round,
            number_of_rounds: args.number_of_rounds,
            worker_size: args.worker_size,
            seed_worker_size: args.seed_worker_size,
            transfer_worker_size: args.transfer_worker_size,
            multipart_copy_threshold: parse_human_bytes(&args.multipart_copy_threshold)?,
            multipart_copy_part_size: parse_human_bytes(&args.multipart_copy_part_size)?,
            seed_file: args.seed_file.map(PathBuf::from),
            seed_object_size: parse_human_bytes(&args.seed_object_size)?,
            skip_cleanup: args.skip_cleanup,
            skip_seed: args.skip_seed,
            max_keys: args.max_keys,
            interrupt_policy: args.interrupt_policy,
            warn_as_error: args.warn_as_error,
            show_no_progress: args.show_no_progress,
            auto_complete_shell: args.auto_complete_shell,
        })
    }
}
