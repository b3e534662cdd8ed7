// Waits for either harness cancellation or a Ctrl+C signal.

use s3churn_rs::HarnessCancellationToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(cancellation_token: HarnessCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.")
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received, interrupting in-flight copies.");
                cancellation_token.cancel();
            }
        }
    })
}
