/// A cancellation token used to signal harness shutdown.
///
/// This is a type alias for [`tokio_util::sync::CancellationToken`]. Pass the
/// token to [`StressHarness::new`](crate::StressHarness::new) and call
/// [`cancel()`](tokio_util::sync::CancellationToken::cancel) on it to stop a
/// running harness (e.g., in a Ctrl+C handler). Worker pools derive child
/// tokens from it, so cancelling it also interrupts in-flight copy waits.
pub type HarnessCancellationToken = tokio_util::sync::CancellationToken;

/// Create a new [`HarnessCancellationToken`].
///
/// # Example
///
/// ```
/// use s3churn_rs::create_harness_cancellation_token;
///
/// let token = create_harness_cancellation_token();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn create_harness_cancellation_token() -> HarnessCancellationToken {
    tokio_util::sync::CancellationToken::new()
}
