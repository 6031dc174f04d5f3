//! fieldsealed: trusted-context daemon
//!
//! Holds `KEY_MATERIAL`, issues per-user keys to authenticated callers, and
//! runs the primary backend on behalf of untrusted contexts.

pub mod api;
pub mod daemon;
pub mod metrics;

pub use api::{build_router, AppState};
pub use metrics::{ApiMetrics, HealthState};
