//! Storage health check

use fieldseal_core::{SealError, SealResult};
use opendal::Operator;

/// Verify the storage endpoint is reachable by listing the root
pub async fn check_health(op: &Operator) -> SealResult<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| SealError::Storage(format!("storage health check failed: {e}")))
}

/// Non-failing variant for readiness probes
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}
