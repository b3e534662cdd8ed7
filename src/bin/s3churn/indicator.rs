// Live progress for a stress run.
//
// Reads HarnessStatistics from the stats channel and renders a single
// indicatif line with a moving average of completed tasks per second.

use std::io;
use std::io::Write;

use async_channel::Receiver;
use indicatif::{HumanBytes, HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use s3churn_rs::types::HarnessStatistics;
use simple_moving_average::{SMA, SumTreeSMA};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// Totals returned by [`show_indicator`] after the stats channel closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSummary {
    pub rounds_completed: u64,
    pub rounds_aborted: u64,
    pub total_copy_count: u64,
    pub total_copy_bytes: u64,
    pub total_delete_count: u64,
    pub total_error_count: u64,
    pub total_seed_count: u64,
    pub total_cleanup_count: u64,
}

impl IndicatorSummary {
    fn record(&mut self, stats: HarnessStatistics) {
        match stats {
            HarnessStatistics::RoundStart { .. } => {}
            HarnessStatistics::RoundComplete { .. } => self.rounds_completed += 1,
            HarnessStatistics::RoundAbort { .. } => self.rounds_aborted += 1,
            HarnessStatistics::CopyComplete { .. } => self.total_copy_count += 1,
            HarnessStatistics::CopyBytes(size) => self.total_copy_bytes += size,
            HarnessStatistics::DeleteComplete { .. } => self.total_delete_count += 1,
            HarnessStatistics::TaskError { .. } => self.total_error_count += 1,
            HarnessStatistics::SeedComplete { .. } => self.total_seed_count += 1,
            HarnessStatistics::CleanupDelete { .. } => self.total_cleanup_count += 1,
        }
    }
}

/// Moving average window in seconds (samples).
const MOVING_AVERAGE_PERIOD_SECS: usize = 10;

/// How often (in seconds) to refresh the progress display.
const REFRESH_INTERVAL: f32 = 1.0;

/// Spawn a background task that consumes harness statistics and displays
/// progress.
///
/// The task runs until `stats_receiver` is closed, which the harness does
/// at the end of `run()`. Await the returned handle after the run.
pub fn show_indicator(
    stats_receiver: Receiver<HarnessStatistics>,
    number_of_rounds: u64,
    show_progress: bool,
    show_result: bool,
) -> JoinHandle<IndicatorSummary> {
    let progress_text = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::with_template("{wide_msg}") {
        progress_text.set_style(progress_style);
    }

    tokio::spawn(async move {
        let start_time = Instant::now();

        let mut ma_task_count = SumTreeSMA::<_, u64, MOVING_AVERAGE_PERIOD_SECS>::new();
        let mut summary = IndicatorSummary::default();

        loop {
            let deleted_before_period = summary.total_delete_count;

            let period = Instant::now();
            loop {
                while let Ok(stats) = stats_receiver.try_recv() {
                    summary.record(stats);
                }

                if REFRESH_INTERVAL < period.elapsed().as_secs_f32() {
                    break;
                }

                if stats_receiver.is_closed() && stats_receiver.is_empty() {
                    let elapsed = start_time.elapsed();
                    let elapsed_secs_f64 = elapsed.as_secs_f64();

                    let mut tasks_per_sec =
                        (summary.total_delete_count as f64 / elapsed_secs_f64) as u64;
                    if elapsed_secs_f64 < REFRESH_INTERVAL as f64 {
                        tasks_per_sec = summary.total_delete_count;
                    }

                    info!(
                        message = "stress run summary",
                        rounds_completed = summary.rounds_completed,
                        rounds_aborted = summary.rounds_aborted,
                        copied_objects = summary.total_copy_count,
                        copied_bytes = summary.total_copy_bytes,
                        deleted_objects = summary.total_delete_count,
                        tasks_per_sec = tasks_per_sec,
                        error = summary.total_error_count,
                        seeded = summary.total_seed_count,
                        cleaned_up = summary.total_cleanup_count,
                        duration_sec = elapsed_secs_f64,
                    );

                    if show_result {
                        if let Ok(result_style) = ProgressStyle::with_template("{msg}") {
                            progress_text.set_style(result_style);
                        }

                        progress_text.finish_with_message(format!(
                            "round {:>3}/{} | copied {:>3} objects,  deleted {:>3} objects | {:>3} tasks/sec,  error {} tasks,  copied {:>3},  duration {}",
                            summary.rounds_completed,
                            number_of_rounds,
                            summary.total_copy_count,
                            summary.total_delete_count,
                            HumanCount(tasks_per_sec),
                            summary.total_error_count,
                            HumanBytes(summary.total_copy_bytes),
                            HumanDuration(elapsed),
                        ));

                        println!();
                        let _ = io::stdout().flush();
                    }

                    return summary;
                }

                tokio::time::sleep(std::time::Duration::from_secs_f32(0.05)).await;
            }

            ma_task_count.add_sample(summary.total_delete_count - deleted_before_period);

            if show_progress {
                progress_text.set_message(format!(
                    "round {:>3}/{} | copied {:>3} objects,  deleted {:>3} objects | {:>3} tasks/sec,  error {} tasks,  copied {:>3}",
                    summary.rounds_completed,
                    number_of_rounds,
                    summary.total_copy_count,
                    summary.total_delete_count,
                    HumanCount(ma_task_count.get_average()),
                    summary.total_error_count,
                    HumanBytes(summary.total_copy_bytes),
                ));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn show_indicator_empty_channel_completes() {
        let (sender, receiver) = async_channel::unbounded();
        drop(sender);

        let handle = show_indicator(receiver, 10, false, false);
        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("indicator should complete within timeout")
            .expect("indicator task should not panic");

        assert_eq!(summary, IndicatorSummary::default());
    }

    #[tokio::test]
    async fn show_indicator_counts_every_statistic() {
        let (sender, receiver) = async_channel::unbounded();

        let stats = vec![
            HarnessStatistics::CleanupDelete { key: "k9".to_string() },
            HarnessStatistics::SeedComplete { key: "k0".to_string() },
            HarnessStatistics::SeedComplete { key: "k1".to_string() },
            HarnessStatistics::RoundStart { round: 0 },
            HarnessStatistics::CopyComplete { key: "k2".to_string() },
            HarnessStatistics::CopyBytes(1024),
            HarnessStatistics::CopyBytes(512),
            HarnessStatistics::DeleteComplete { key: "k0".to_string() },
            HarnessStatistics::RoundComplete { round: 0 },
            HarnessStatistics::RoundStart { round: 1 },
            HarnessStatistics::TaskError { key: "k2".to_string() },
            HarnessStatistics::RoundAbort { round: 1 },
        ];
        for stat in stats {
            sender.send(stat).await.unwrap();
        }
        drop(sender);

        let handle = show_indicator(receiver, 10, false, false);
        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("indicator should complete within timeout")
            .expect("indicator task should not panic");

        assert_eq!(
            summary,
            IndicatorSummary {
                rounds_completed: 1,
                rounds_aborted: 1,
                total_copy_count: 1,
                total_copy_bytes: 1536,
                total_delete_count: 1,
                total_error_count: 1,
                total_seed_count: 2,
                total_cleanup_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn show_indicator_with_result_display_completes() {
        let (sender, receiver) = async_channel::unbounded();
        sender
            .send(HarnessStatistics::RoundComplete { round: 0 })
            .await
            .unwrap();
        drop(sender);

        let handle = show_indicator(receiver, 1, true, true);
        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("indicator should complete within timeout")
            .expect("indicator task should not panic");

        assert_eq!(summary.rounds_completed, 1);
    }

    #[tokio::test]
    async fn show_indicator_refreshes_while_channel_open() {
        let (sender, receiver) = async_channel::unbounded();

        let handle = show_indicator(receiver, 2, true, false);

        sender
            .send(HarnessStatistics::DeleteComplete { key: "k0".to_string() })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        sender
            .send(HarnessStatistics::DeleteComplete { key: "k1".to_string() })
            .await
            .unwrap();
        drop(sender);

        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("indicator should complete within timeout")
            .expect("indicator task should not panic");

        assert_eq!(summary.total_delete_count, 2);
    }
}
