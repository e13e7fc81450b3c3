//! Cancellation helpers shared by the fan-out stages.

use std::future::Future;

use strata_core::error::{Result, StrataError};
use tokio_util::sync::CancellationToken;

/// Run `fut` unless `token` fires first.
///
/// On cancellation the future is dropped and `StrataError::Cancelled` is
/// returned. Work already completed by other tasks is unaffected.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(StrataError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(StrataError::Cancelled),
        result = fut => result,
    }
}
