//! Plugin inventory: the relational snapshot a discovery source publishes.
//!
//! A snapshot is a single JSON document with two tables: one row per
//! published plugin binary (per name, target, version, os, arch) and
//! one row per plugin-group member (per group version and member
//! plugin). The [`InventoryStore`] loads a snapshot read-only and
//! answers structured queries over it; it never mutates snapshot
//! content.

mod store;

pub use store::InventoryStore;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::SNAPSHOT_SCHEMA_VERSION;
use crate::error::{Error, Result};
use crate::version::{self, PrereleasePolicy, VersionToken};

/// One published plugin binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginBinaryRecord {
    pub name: String,
    pub target: String,
    pub version: String,
    /// Publisher-designated version that `latest` should resolve to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_version: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub description: String,
    pub publisher: String,
    pub vendor: String,
    pub os: String,
    #[serde(rename = "architecture")]
    pub arch: String,
    /// SHA256 of the binary, `sha256:<hex>`.
    pub digest: String,
    /// Registry address of the binary artifact.
    pub uri: String,
}

/// One member row of a plugin-group version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginGroupRow {
    pub vendor: String,
    pub publisher: String,
    pub group_name: String,
    pub group_version: String,
    #[serde(default)]
    pub description: String,
    pub plugin_name: String,
    pub plugin_target: String,
    pub plugin_version: String,
    #[serde(default = "default_true")]
    pub mandatory: bool,
    #[serde(default)]
    pub deprecated: bool,
}

fn default_true() -> bool {
    true
}

/// The on-disk snapshot document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub plugins: Vec<PluginBinaryRecord>,
    #[serde(default)]
    pub groups: Vec<PluginGroupRow>,
}

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

/// Parse and validate snapshot bytes. `path` is only used in error
/// reporting.
pub(crate) fn parse_snapshot(bytes: &[u8], path: &std::path::Path) -> Result<InventorySnapshot> {
    let snapshot: InventorySnapshot =
        serde_json::from_slice(bytes).map_err(|e| Error::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
        return Err(Error::CorruptSnapshot {
            path: path.to_path_buf(),
            reason: format!(
                "schema_version {} is newer than supported version {}",
                snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION
            ),
        });
    }
    Ok(snapshot)
}

/// Identity of a plugin group: `<vendor>-<publisher>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupId {
    pub vendor: String,
    pub publisher: String,
    pub name: String,
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}/{}", self.vendor, self.publisher, self.name)
    }
}

impl GroupId {
    /// Parse a user-supplied group request, optionally version-qualified:
    /// `<vendor>-<publisher>/<name>[:<version>]`.
    ///
    /// The vendor/publisher split is on the first `-`; vendors with a
    /// dash in their id publish under a dashless alias.
    pub fn parse_request(raw: &str) -> Result<(GroupId, VersionToken)> {
        let (left, name_and_version) = raw
            .split_once('/')
            .ok_or_else(|| bad_group_request(raw, "missing '/'"))?;
        let (vendor, publisher) = left
            .split_once('-')
            .ok_or_else(|| bad_group_request(raw, "missing '-' between vendor and publisher"))?;
        let (name, token) = match name_and_version.rsplit_once(':') {
            Some((name, version)) => (name, VersionToken::parse(version)),
            None => (name_and_version, VersionToken::Latest),
        };
        if vendor.is_empty() || publisher.is_empty() || name.is_empty() {
            return Err(bad_group_request(raw, "empty segment"));
        }
        Ok((
            GroupId {
                vendor: vendor.to_string(),
                publisher: publisher.to_string(),
                name: name.to_string(),
            },
            token,
        ))
    }
}

fn bad_group_request(raw: &str, reason: &str) -> Error {
    Error::Config(format!(
        "invalid group '{raw}': {reason} (expected <vendor>-<publisher>/<name>[:<version>])"
    ))
}

/// One version of a plugin group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupVersion {
    /// Set when any member row of this version carries the flag.
    pub deprecated: bool,
    pub members: Vec<GroupMember>,
}

/// One member plugin pinned by a group version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub name: String,
    pub target: String,
    pub version: String,
    pub mandatory: bool,
}

/// A plugin group aggregated from its member rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginGroup {
    pub vendor: String,
    pub publisher: String,
    pub name: String,
    pub description: String,
    /// Version string to that version's member set.
    pub versions: BTreeMap<String, GroupVersion>,
}

impl PluginGroup {
    pub fn id(&self) -> GroupId {
        GroupId {
            vendor: self.vendor.clone(),
            publisher: self.publisher.clone(),
            name: self.name.clone(),
        }
    }

    /// Highest non-deprecated version, preferring stable releases.
    pub fn recommended_version(&self) -> Option<String> {
        let candidates: Vec<String> = self
            .versions
            .iter()
            .filter(|(_, gv)| !gv.deprecated)
            .map(|(v, _)| v.clone())
            .collect();
        version::latest_of(&self.id().to_string(), &candidates, PrereleasePolicy::StableOnly).ok()
    }

    pub fn version(&self, version: &str) -> Option<&GroupVersion> {
        self.versions.get(version)
    }

    /// Versions published for this group, ascending.
    pub fn sorted_versions(&self) -> Vec<String> {
        let raw: Vec<String> = self.versions.keys().cloned().collect();
        version::sort_versions(&raw)
    }
}

/// Criteria for [`InventoryStore::find_plugins`]. Unset fields match
/// everything; hidden rows are excluded unless `include_hidden` is set.
#[derive(Debug, Clone, Default)]
pub struct PluginQuery {
    pub name: Option<String>,
    pub target: Option<String>,
    pub version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub include_hidden: bool,
}

/// Criteria for [`InventoryStore::find_groups`].
#[derive(Debug, Clone, Default)]
pub struct GroupQuery {
    pub vendor: Option<String>,
    pub publisher: Option<String>,
    pub name: Option<String>,
    /// Restrict to groups that publish this version; the returned
    /// groups still carry their full version map.
    pub version: Option<String>,
}

/// Distinct targets present in a record set, sorted.
pub fn distinct_targets(records: &[PluginBinaryRecord]) -> Vec<String> {
    let mut targets: Vec<String> = records.iter().map(|r| r.target.clone()).collect();
    targets.sort();
    targets.dedup();
    targets
}

// ============================================================================
// Tests
// ============================================================================
