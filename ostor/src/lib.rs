//! Object store gateway for cluster backups.
//!
//! Wraps an S3-compatible endpoint (MinIO included) behind the store
//! circuit breaker: bucket ensure with auto-create and fallback
//! iteration, document upload, prefix listing and deletion.

mod error;
mod store;

pub use error::StoreError;
pub use store::{ListPage, ObjectMeta, ObjectStore, StoreConfig, CONTENT_TYPE_YAML};
