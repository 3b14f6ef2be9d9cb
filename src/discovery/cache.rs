//! On-disk cache of inventory snapshots, one file per discovery source.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use flate2::read::GzDecoder;

use crate::error::{Error, Result};
use crate::fsutil;
use crate::inventory;

use super::{CacheOptions, DiscoverySource, SnapshotFetcher};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Local snapshot cache rooted at one directory.
pub struct SnapshotCache {
    root: PathBuf,
}

impl SnapshotCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SnapshotCache { root: root.into() }
    }

    /// Path of the cached snapshot for a source, whether or not one
    /// exists yet.
    pub fn snapshot_path(&self, source_name: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", fsutil::sanitize_file_stem(source_name)))
    }

    /// Get the snapshot path for a source, fetching it first if nothing
    /// is cached. With `local_only` set, a missing snapshot is an error
    /// instead of a fetch.
    pub fn get(
        &self,
        source: &DiscoverySource,
        options: CacheOptions,
        fetcher: &dyn SnapshotFetcher,
    ) -> Result<PathBuf> {
        let path = self.snapshot_path(&source.name);
        if path.is_file() {
            return Ok(path);
        }
        if options.local_only {
            return Err(Error::CacheEmpty(source.name.clone()));
        }
        self.refresh(source, fetcher)
    }

    /// Fetch, validate, and atomically replace the cached snapshot for
    /// a source.
    ///
    /// Validation happens before the replace: a failed fetch or a
    /// corrupt payload leaves the previously cached snapshot untouched.
    pub fn refresh(
        &self,
        source: &DiscoverySource,
        fetcher: &dyn SnapshotFetcher,
    ) -> Result<PathBuf> {
        let path = self.snapshot_path(&source.name);

        let raw = fetcher
            .fetch(source)
            .with_context(|| format!("fetching snapshot for discovery source '{}'", source.name))?;
        let data = decompress_if_gzip(raw, &path)?;
        let snapshot = inventory::parse_snapshot(&data, &path)?;

        fsutil::write_atomic(&path, &data)?;
        log::debug!(
            "Refreshed snapshot for '{}' ({} plugin rows, {} group rows)",
            source.name,
            snapshot.plugins.len(),
            snapshot.groups.len()
        );
        Ok(path)
    }
}

fn decompress_if_gzip(raw: Vec<u8>, path: &Path) -> Result<Vec<u8>> {
    if raw.len() < 2 || raw[..2] != GZIP_MAGIC {
        return Ok(raw);
    }
    let mut decoder = GzDecoder::new(raw.as_slice());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: format!("gzip payload: {e}"),
        })?;
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================
