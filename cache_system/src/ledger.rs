//! Version ledger contract
//!
//! The bulk sweep and the live change stream may deliver the same row in either
//! order. Sinks consult a ledger before writing so that an older row version
//! never overwrites a newer one.

use async_trait::async_trait;

use crate::errors::CacheError;

#[async_trait]
pub trait VersionLedger: Send + Sync {
    /// Record `version` for the document and return `true`, unless a strictly
    /// newer version is already recorded, in which case return `false`.
    ///
    /// Equal versions are admitted so that redeliveries stay idempotent.
    async fn admit(&self, table: &str, id: &str, version: i64) -> Result<bool, CacheError>;
}
