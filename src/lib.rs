pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod resolver;

#[cfg(test)]
mod test_support;

pub use cache::ResolutionCache;
pub use error::{GatewayError, ResolveError};
pub use gateway::{EvidenceGateway, EvidenceRow, EvidenceSnapshot};
pub use models::{Activity, ActivityId, ActivityKind, ResolvedStatus, StatusKey, StudentId};
pub use resolver::{resolve, resolve_container, resolve_leaf};
