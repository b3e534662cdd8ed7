// Installs the global tracing subscriber for the s3churn binary.

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::fmt::format::FmtSpan;

use s3churn_rs::config::TracingConfig;

const EVENT_FILTER_ENV_VAR: &str = "RUST_LOG";

const AWS_SDK_TARGETS: [&str; 3] = ["aws_smithy_runtime", "aws_config", "aws_sigv4"];

/// Event filter and whether event targets are worth printing.
///
/// `--aws-sdk-tracing` wins over `RUST_LOG`; without either, only the
/// harness crates are enabled and targets are hidden.
fn event_filter(config: &TracingConfig, rust_log: Option<String>) -> (String, bool) {
    let level = config.tracing_level;
    let harness_filter = format!("s3churn_rs={level},s3churn={level}");

    if config.aws_sdk_tracing {
        let sdk_filter = AWS_SDK_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(",");
        return (format!("{harness_filter},{sdk_filter}"), true);
    }

    match rust_log {
        Some(filter) => (filter, true),
        None => (harness_filter, false),
    }
}

pub fn init_tracing(config: &TracingConfig) {
    let span_events = if config.span_events_tracing {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let (filter, show_target) = event_filter(config, env::var(EVENT_FILTER_ENV_VAR).ok());

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .compact()
        .with_ansi(!config.disable_color_tracing && std::io::stdout().is_terminal())
        .with_span_events(span_events)
        .with_env_filter(filter)
        .with_target(show_target);

    if config.json_tracing {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_fork::rusty_fork_test;

    fn tracing_config(json: bool, aws_sdk: bool, span_events: bool, no_color: bool) -> TracingConfig {
        TracingConfig {
            tracing_level: log::Level::Info,
            json_tracing: json,
            aws_sdk_tracing: aws_sdk,
            span_events_tracing: span_events,
            disable_color_tracing: no_color,
        }
    }

    #[test]
    fn default_filter_enables_harness_crates_only() {
        let (filter, show_target) = event_filter(&tracing_config(false, false, false, false), None);

        assert_eq!(filter, "s3churn_rs=INFO,s3churn=INFO");
        assert!(!show_target);
    }

    #[test]
    fn aws_sdk_filter_adds_sdk_targets_and_ignores_rust_log() {
        let (filter, show_target) = event_filter(
            &tracing_config(false, true, false, false),
            Some("trace".to_string()),
        );

        assert_eq!(
            filter,
            "s3churn_rs=INFO,s3churn=INFO,aws_smithy_runtime=INFO,aws_config=INFO,aws_sigv4=INFO"
        );
        assert!(show_target);
    }

    #[test]
    fn rust_log_overrides_default_filter() {
        let (filter, show_target) = event_filter(
            &tracing_config(false, false, false, false),
            Some("s3churn_rs=debug".to_string()),
        );

        assert_eq!(filter, "s3churn_rs=debug");
        assert!(show_target);
    }

    rusty_fork_test! {
        #[test]
        fn init_json_tracing() {
            init_tracing(&tracing_config(true, false, false, false));
        }

        #[test]
        fn init_span_events_tracing() {
            init_tracing(&tracing_config(false, true, true, false));
        }

        #[test]
        fn init_plain_tracing_without_color() {
            // Runs in its own process.
            unsafe { env::remove_var(EVENT_FILTER_ENV_VAR) };

            init_tracing(&tracing_config(false, false, false, true));
        }
    }
}
