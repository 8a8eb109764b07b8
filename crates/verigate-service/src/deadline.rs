//! Per-operation deadlines for store and bus calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{VerifierError, VerifierResult};

/// Await `fut`, failing with [`VerifierError::Timeout`] once `after`
/// elapses. The in-flight call is dropped; whatever it already committed
/// atomically stays committed.
pub(crate) async fn within<T, E, F>(operation: &'static str, after: Duration, fut: F) -> VerifierResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<VerifierError>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(operation, ?after, "operation deadline exceeded");
            Err(VerifierError::Timeout { operation, after })
        }
    }
}
