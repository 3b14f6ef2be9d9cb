//! Discovery sources and the per-source snapshot cache.
//!
//! A discovery source is a named location publishing an inventory
//! snapshot. The cache keeps at most one snapshot file per source and
//! refreshes it wholesale; there is no row-level merging.

mod cache;

pub use cache::SnapshotCache;

use serde::{Deserialize, Serialize};

/// One configured discovery source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverySource {
    /// Unique name; doubles as the cache key.
    pub name: String,
    /// Transport-specific location, e.g. the HTTPS URL of the snapshot
    /// document.
    pub location: String,
}

impl DiscoverySource {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        DiscoverySource {
            name: name.into(),
            location: location.into(),
        }
    }
}

/// Fetches the raw snapshot document for a source.
///
/// The returned bytes may be gzip-compressed; the cache decompresses
/// and validates before committing anything locally.
pub trait SnapshotFetcher {
    fn fetch(&self, source: &DiscoverySource) -> anyhow::Result<Vec<u8>>;
}

/// Options controlling cache reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Never hit the network; fail if no snapshot is cached.
    pub local_only: bool,
}
