//! Read-only query layer over a cached inventory snapshot.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::version::{self, PrereleasePolicy};

use super::{
    GroupMember, GroupQuery, InventorySnapshot, PluginBinaryRecord, PluginGroup, PluginGroupRow,
    PluginQuery,
};

/// An inventory snapshot loaded into memory.
///
/// The store is a point-in-time view: it holds whatever the snapshot
/// file contained at load time and is unaffected by later refreshes.
#[derive(Debug)]
pub struct InventoryStore {
    path: PathBuf,
    snapshot: InventorySnapshot,
}

impl InventoryStore {
    /// Load a snapshot file.
    ///
    /// A missing file surfaces as an I/O error and a malformed one as a
    /// corrupt-snapshot error; either way the caller should refresh the
    /// source and retry.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot = super::parse_snapshot(&bytes, path)?;
        log::debug!(
            "Loaded snapshot {} ({} plugin rows, {} group rows)",
            path.display(),
            snapshot.plugins.len(),
            snapshot.groups.len()
        );
        Ok(InventoryStore {
            path: path.to_path_buf(),
            snapshot,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.plugins.is_empty() && self.snapshot.groups.is_empty()
    }

    /// Plugin rows matching the query, in deterministic order
    /// (name, target, version ascending, os, arch).
    pub fn find_plugins(&self, query: &PluginQuery) -> Vec<PluginBinaryRecord> {
        let mut rows: Vec<PluginBinaryRecord> = self
            .snapshot
            .plugins
            .iter()
            .filter(|r| matches_plugin(r, query))
            .cloned()
            .collect();
        rows.sort_by(compare_records);
        rows
    }

    /// Groups matching the query, aggregated from their member rows and
    /// ordered by (vendor, publisher, name). Each group carries its
    /// full version map even when the query named one version.
    pub fn find_groups(&self, query: &GroupQuery) -> Vec<PluginGroup> {
        let mut by_id: BTreeMap<(String, String, String), PluginGroup> = BTreeMap::new();

        for row in &self.snapshot.groups {
            if !matches_group_row(row, query) {
                continue;
            }
            let key = (
                row.vendor.clone(),
                row.publisher.clone(),
                row.group_name.clone(),
            );
            let group = by_id.entry(key).or_insert_with(|| PluginGroup {
                vendor: row.vendor.clone(),
                publisher: row.publisher.clone(),
                name: row.group_name.clone(),
                description: String::new(),
                versions: BTreeMap::new(),
            });
            if group.description.is_empty() && !row.description.is_empty() {
                group.description = row.description.clone();
            }
            let gv = group.versions.entry(row.group_version.clone()).or_default();
            gv.deprecated |= row.deprecated;
            gv.members.push(GroupMember {
                name: row.plugin_name.clone(),
                target: row.plugin_target.clone(),
                version: row.plugin_version.clone(),
                mandatory: row.mandatory,
            });
        }

        let mut groups: Vec<PluginGroup> = by_id.into_values().collect();
        if let Some(version) = &query.version {
            groups.retain(|g| g.versions.contains_key(version));
        }
        groups
    }

    /// The version `latest` should resolve to for one plugin family:
    /// the publisher's recommended-version column when present,
    /// otherwise the highest published version under `policy`.
    ///
    /// Returns `None` when the snapshot has no rows for the family.
    pub fn recommended_version(
        &self,
        name: &str,
        target: &str,
        policy: PrereleasePolicy,
    ) -> Option<String> {
        let rows = self.find_plugins(&PluginQuery {
            name: Some(name.to_string()),
            target: Some(target.to_string()),
            include_hidden: true,
            ..Default::default()
        });
        if rows.is_empty() {
            return None;
        }
        if let Some(rec) = rows
            .iter()
            .filter_map(|r| r.recommended_version.as_deref())
            .find(|r| !r.is_empty())
        {
            return Some(rec.to_string());
        }
        let versions: Vec<String> = rows.iter().map(|r| r.version.clone()).collect();
        version::latest_of(&format!("{name}@{target}"), &versions, policy).ok()
    }
}

fn matches_plugin(record: &PluginBinaryRecord, query: &PluginQuery) -> bool {
    if record.hidden && !query.include_hidden {
        return false;
    }
    let field_matches = |want: &Option<String>, have: &str| match want {
        Some(w) => w == have,
        None => true,
    };
    field_matches(&query.name, &record.name)
        && field_matches(&query.target, &record.target)
        && field_matches(&query.version, &record.version)
        && field_matches(&query.os, &record.os)
        && field_matches(&query.arch, &record.arch)
}

fn matches_group_row(row: &PluginGroupRow, query: &GroupQuery) -> bool {
    let field_matches = |want: &Option<String>, have: &str| match want {
        Some(w) => w == have,
        None => true,
    };
    field_matches(&query.vendor, &row.vendor)
        && field_matches(&query.publisher, &row.publisher)
        && field_matches(&query.name, &row.group_name)
}

fn compare_records(a: &PluginBinaryRecord, b: &PluginBinaryRecord) -> Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.target.cmp(&b.target))
        .then_with(|| compare_version_strings(&a.version, &b.version))
        .then_with(|| a.os.cmp(&b.os))
        .then_with(|| a.arch.cmp(&b.arch))
}

fn compare_version_strings(a: &str, b: &str) -> Ordering {
    match (version::parse_version(a), version::parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

// ============================================================================
// Tests
// ============================================================================
