/*!
# Overview
s3churn-rs is a round-based parallel copy-then-delete stress harness for
Amazon S3 and S3-compatible storage.

Every round copies a block of objects `<prefix>N` to `<prefix>N+C` in
parallel and deletes each source once its copy has completed, so the outputs
of one round are the inputs of the next. The sustained churn is meant to
surface concurrency and reliability defects in a storage client or backend.

## Features
- **Bounded concurrency**: one fixed-size worker pool shared by every round
- **Ordered joins**: tasks are joined in submission order, round after round
- **Fail-fast**: the first failed task cancels the pool and aborts the run
- **Full causal chains**: every cause of the first failure is reported
- **Multipart copy**: large objects are copied part by part with `UploadPartCopy`
- **Library-First**: the s3churn CLI is a thin wrapper over this library

## As a Library

```toml
[dependencies]
s3churn-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3churn_rs::config::Config;
use s3churn_rs::config::args::parse_from_args;
use s3churn_rs::{StressHarness, create_harness_cancellation_token};

#[tokio::main]
async fn main() {
    let args = vec![
        "s3churn",
        "s3://my-bucket/145mb-test-file-",
        "--copies-per-round",
        "20",
        "--number-of-rounds",
        "5",
    ];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let cancellation_token = create_harness_cancellation_token();
    let mut harness = StressHarness::new(config, cancellation_token).await;
    harness.close_stats_sender();
    harness.run().await;

    if let Some(report) = harness.get_failure_report() {
        eprintln!("{report}");
    }
}
```
*/

#![allow(clippy::collapsible_if)]

pub mod cleaner;
pub mod config;
pub mod harness;
pub mod pool;
pub mod round;
pub mod seeder;
pub mod storage;
pub mod task;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::CLIArgs;
pub use harness::StressHarness;
pub use round::{RoundOrchestrator, RoundState, RunSummary};
pub use task::InterruptPolicy;
pub use types::error::{
    FailureReport, HarnessError, exit_code_from_error, is_cancelled_error,
};
pub use types::token::{HarnessCancellationToken, create_harness_cancellation_token};
