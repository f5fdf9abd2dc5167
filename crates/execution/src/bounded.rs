use depthsync_core::{AdapterError, AdapterResult};
use std::future::Future;
use std::time::Duration;

/// Runs one adapter call under `limit`. An overrun becomes
/// [`AdapterError::Timeout`] for that call only.
///
/// # Errors
/// Returns the call's own error, or a timeout error.
pub async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> AdapterResult<T>
where
    F: Future<Output = AdapterResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            let elapsed_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(operation, elapsed_ms, "External call timed out");
            Err(AdapterError::timeout(operation, elapsed_ms))
        }
    }
}
