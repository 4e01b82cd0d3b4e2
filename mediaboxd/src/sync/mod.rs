pub mod backoff;
pub mod engine;
pub mod identity;
pub mod index;
pub mod manifest;
pub mod mirror;
pub mod pairs;
pub mod paths;
pub mod progress;

mod audit;
mod dedupe;
mod reconcile;
mod relocate;

pub use audit::{AuditReport, ConsistencyWarning};
pub use dedupe::{DedupeReport, QuarantinedFile};

pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
