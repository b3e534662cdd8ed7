use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, info, trace};

use s3churn_rs::config::Config;
use s3churn_rs::types::error::causal_chain;
use s3churn_rs::{
    CLIArgs, StressHarness, create_harness_cancellation_token, exit_code_from_error,
    is_cancelled_error,
};

mod ctrl_c_handler;
pub mod indicator;
mod tracing_init;
pub mod ui_config;

const EXIT_CODE_WARNING: i32 = 3;

/// s3churn - Round-based parallel copy-then-delete stress harness for Amazon S3.
///
/// This binary is a thin wrapper over the s3churn-rs library.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "s3churn",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    run(config).await
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run(config: Config) -> Result<()> {
    #[allow(unused_assignments)]
    let mut has_warning = false;

    {
        let cancellation_token = create_harness_cancellation_token();

        ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

        let start_time = tokio::time::Instant::now();
        debug!("stress harness start.");

        let mut harness = StressHarness::new(config.clone(), cancellation_token).await;
        let indicator_join_handle = indicator::show_indicator(
            harness.get_stats_receiver(),
            config.number_of_rounds,
            ui_config::is_progress_indicator_needed(&config),
            ui_config::is_show_result_needed(&config),
        );

        harness.run().await;
        indicator_join_handle.await?;

        let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

        if let Some(errors) = harness.get_errors_and_consume() {
            if errors.iter().any(is_cancelled_error) {
                info!(duration_sec = duration_sec, "stress run cancelled by user.");
                return Ok(());
            }

            if let Some(report) = harness.get_failure_report() {
                error!(
                    round = report.round_index,
                    task = report.task_index,
                    "Round {} task {} failed.",
                    report.round_index,
                    report.task_index
                );
            }
            for err in &errors {
                for (depth, cause) in causal_chain(err).iter().enumerate() {
                    error!(depth = depth, "{}", cause);
                }
            }
            error!(duration_sec = duration_sec, "s3churn failed.");

            let exit_code = errors.first().map_or(1, exit_code_from_error);
            if exit_code != 1 {
                std::process::exit(exit_code);
            }
            return Err(anyhow::anyhow!("s3churn failed."));
        }

        has_warning = harness.has_warning();

        if let Some(summary) = harness.get_run_summary() {
            info!(
                duration_sec = duration_sec,
                rounds = summary.rounds_completed,
                tasks = summary.tasks_completed,
                "s3churn has been completed."
            );
        }
    }

    if has_warning {
        std::process::exit(EXIT_CODE_WARNING);
    }

    Ok(())
}
