//! Plugin manager: composes discovery, inventory queries, version
//! resolution, and the catalog into the lifecycle operations a CLI
//! exposes (install, upgrade, sync, delete, clean, list, verify).
//!
//! The manager is synchronous and stateless between calls; every
//! operation re-reads the snapshots and catalogs it needs. Transport
//! and context integration come in through the collaborator traits.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;

use crate::artifact::{self, ArtifactDownloader};
use crate::catalog::{CatalogEntry, CatalogScope, LockOptions, PluginCatalog};
use crate::config;
use crate::discovery::{CacheOptions, DiscoverySource, SnapshotCache, SnapshotFetcher};
use crate::error::{BatchError, BatchFailure, Error, Result};
use crate::inventory::{
    self, GroupId, GroupQuery, InventoryStore, PluginBinaryRecord, PluginGroup, PluginQuery,
};
use crate::paths;
use crate::version::{self, PrereleasePolicy, VersionToken};

/// Lists the plugins a context wants installed.
pub trait ContextRecommendations {
    fn recommended(&self, context: &str) -> anyhow::Result<Vec<PluginRecommendation>>;
}

/// One plugin a context recommends.
#[derive(Debug, Clone)]
pub struct PluginRecommendation {
    pub name: String,
    pub target: String,
    pub recommended_version: String,
}

/// Installation state of one plugin family relative to its current
/// recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    NotInstalled,
    /// Installed, but no recommendation to compare against.
    Installed,
    UpdateAvailable,
    UpToDate,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginStatus::NotInstalled => "not installed",
            PluginStatus::Installed => "installed",
            PluginStatus::UpdateAvailable => "update available",
            PluginStatus::UpToDate => "up to date",
        };
        f.write_str(s)
    }
}

/// What `install` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed(String),
    /// The requested version was already recorded; nothing was touched.
    AlreadyInstalled(String),
    Upgraded { from: String, to: String },
}

/// What `upgrade` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    UpToDate(String),
    Upgraded { from: String, to: String },
}

/// Parameters for a single-plugin install.
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub name: String,
    /// Required when the name is published for several targets.
    pub target: Option<String>,
    pub version: VersionToken,
    /// Restrict discovery to one named source.
    pub source: Option<String>,
}

impl InstallRequest {
    /// Request the latest version of `name`, any source.
    pub fn latest(name: impl Into<String>) -> Self {
        InstallRequest {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Parameters for a plugin-group install.
#[derive(Debug, Clone)]
pub struct GroupRequest {
    /// `<vendor>-<publisher>/<name>[:<version>]`.
    pub group: String,
    pub source: Option<String>,
}

/// Successful portion of a batch operation. When any member fails the
/// operation returns [`Error::Batch`] instead, which also names the
/// members that were committed.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub up_to_date: Vec<String>,
}

/// One discovered plugin family with its install status.
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub name: String,
    pub target: String,
    pub description: String,
    pub recommended_version: String,
    pub installed_version: Option<String>,
    pub status: PluginStatus,
    /// Discovery source the family was first seen in.
    pub source: String,
}

/// Discrepancy between the catalog and the binaries on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    MissingBinary {
        name: String,
        target: String,
        path: PathBuf,
    },
    DigestMismatch {
        name: String,
        target: String,
        expected: String,
        actual: String,
    },
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::MissingBinary { name, target, path } => {
                write!(f, "'{name}' ({target}): binary missing at {}", path.display())
            }
            IntegrityViolation::DigestMismatch {
                name,
                target,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "'{name}' ({target}): digest mismatch (expected {expected}, got {actual})"
                )
            }
        }
    }
}

/// Engine configuration; plain data, passed in rather than read from
/// ambient globals.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root of the capstan directory layout.
    pub root: PathBuf,
    /// Host platform used to select binaries, in registry notation.
    pub os: String,
    pub arch: String,
    pub sources: Vec<DiscoverySource>,
    pub prerelease: PrereleasePolicy,
    pub lock: LockOptions,
}

impl ManagerConfig {
    /// Config rooted at an explicit directory, host platform detected.
    pub fn rooted_at(root: impl Into<PathBuf>, sources: Vec<DiscoverySource>) -> Self {
        let (os, arch) = config::host_platform();
        ManagerConfig {
            root: root.into(),
            os,
            arch,
            sources,
            prerelease: PrereleasePolicy::default(),
            lock: LockOptions::default(),
        }
    }

    /// Config rooted at the default capstan home (`CAPSTAN_HOME` or
    /// `~/.capstan`).
    pub fn for_host(sources: Vec<DiscoverySource>) -> Result<Self> {
        Ok(Self::rooted_at(paths::capstan_dir()?, sources))
    }

    fn source(&self, name: &str) -> Result<&DiscoverySource> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::SourceNotFound(name.to_string()))
    }

    fn selected_sources(&self, name: Option<&str>) -> Result<Vec<&DiscoverySource>> {
        match name {
            Some(name) => Ok(vec![self.source(name)?]),
            None => Ok(self.sources.iter().collect()),
        }
    }
}

/// The lifecycle engine.
pub struct PluginManager {
    config: ManagerConfig,
    cache: SnapshotCache,
    fetcher: Box<dyn SnapshotFetcher>,
    downloader: Box<dyn ArtifactDownloader>,
    recommendations: Box<dyn ContextRecommendations>,
}

impl PluginManager {
    pub fn new(
        config: ManagerConfig,
        fetcher: Box<dyn SnapshotFetcher>,
        downloader: Box<dyn ArtifactDownloader>,
        recommendations: Box<dyn ContextRecommendations>,
    ) -> Self {
        let cache = SnapshotCache::new(paths::snapshots_dir(&config.root));
        PluginManager {
            config,
            cache,
            fetcher,
            downloader,
            recommendations,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Install one plugin into the standalone catalog.
    pub fn install(&self, request: &InstallRequest) -> Result<InstallOutcome> {
        log::debug!("Installing '{}' ({})", request.name, request.version);
        let stores = self.load_stores(request.source.as_deref(), CacheOptions::default())?;
        let record = self.resolve_record(
            &stores,
            &request.name,
            request.target.as_deref(),
            &request.version,
        )?;
        self.install_record(&record, &CatalogScope::Standalone, None)
    }

    /// Install the mandatory members of a plugin group into the
    /// standalone catalog. Non-mandatory members are contextual and
    /// never installed through a direct group install.
    ///
    /// Member installs are independent: failures do not roll back the
    /// members already committed, and are aggregated into
    /// [`Error::Batch`].
    pub fn install_group(&self, request: &GroupRequest) -> Result<SyncReport> {
        let (id, token) = GroupId::parse_request(&request.group)?;
        let stores = self.load_stores(request.source.as_deref(), CacheOptions::default())?;

        let group = self
            .find_group(&stores, &id)
            .ok_or_else(|| Error::GroupNotFound(id.to_string()))?;

        let available: Vec<String> = group.versions.keys().cloned().collect();
        let resolved = version::resolve(
            &id.to_string(),
            &token,
            &available,
            group.recommended_version().as_deref(),
            self.config.prerelease,
        )?;
        let members = group
            .versions
            .get(&resolved)
            .ok_or_else(|| Error::VersionNotFound {
                subject: id.to_string(),
                requested: resolved.clone(),
                available: version::sort_versions(&available),
            })?;
        log::debug!(
            "Group {id} resolved to {resolved} ({} members)",
            members.members.len()
        );

        let mut mandatory: Vec<_> = members.members.iter().filter(|m| m.mandatory).collect();
        mandatory.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.target.cmp(&b.target)));

        let group_label = format!("{id}:{resolved}");
        let mut report = SyncReport::default();
        let mut failures = Vec::new();
        for member in mandatory {
            let result = self
                .resolve_record(
                    &stores,
                    &member.name,
                    Some(&member.target),
                    &VersionToken::Exact(member.version.clone()),
                )
                .and_then(|record| {
                    self.install_record(&record, &CatalogScope::Standalone, Some(group_label.as_str()))
                });
            match result {
                Ok(InstallOutcome::AlreadyInstalled(_)) => {
                    report.up_to_date.push(member.name.clone())
                }
                Ok(_) => report.installed.push(member.name.clone()),
                Err(error) => failures.push(BatchFailure {
                    plugin: member.name.clone(),
                    error,
                }),
            }
        }
        finish_batch(report, failures)
    }

    /// Upgrade an installed plugin to its recommended version.
    pub fn upgrade(&self, name: &str, target: Option<&str>) -> Result<UpgradeOutcome> {
        let stores = self.load_stores(None, CacheOptions::default())?;
        let record = self.resolve_record(&stores, name, target, &VersionToken::Latest)?;

        let catalog_root = paths::catalog_dir(&self.config.root);
        let current = PluginCatalog::read(&catalog_root, &CatalogScope::Standalone)?
            .into_iter()
            .find(|e| e.name == record.name && e.target == record.target)
            .ok_or_else(|| Error::NotInstalled {
                name: name.to_string(),
                target: Some(record.target.clone()),
            })?;

        if version::versions_equal(&current.version, &record.version) {
            return Ok(UpgradeOutcome::UpToDate(current.version));
        }
        match self.install_record(&record, &CatalogScope::Standalone, current.group.as_deref())? {
            InstallOutcome::Upgraded { from, to } => Ok(UpgradeOutcome::Upgraded { from, to }),
            InstallOutcome::Installed(to) | InstallOutcome::AlreadyInstalled(to) => {
                Ok(UpgradeOutcome::Upgraded {
                    from: current.version,
                    to,
                })
            }
        }
    }

    /// Install everything a context recommends into that context's
    /// catalog scope.
    ///
    /// Plugins already at their recommended version are skipped. Each
    /// install is independent; failures are aggregated into
    /// [`Error::Batch`] while successes stay committed.
    pub fn sync(&self, context: &str) -> Result<SyncReport> {
        let mut wanted = self
            .recommendations
            .recommended(context)
            .with_context(|| format!("listing plugin recommendations for context '{context}'"))?;
        wanted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.target.cmp(&b.target)));
        log::debug!("Syncing context '{context}' ({} recommendations)", wanted.len());

        let stores = self.load_stores(None, CacheOptions::default())?;
        let catalog_root = paths::catalog_dir(&self.config.root);
        let visible = PluginCatalog::merged_entries(&catalog_root, Some(context))?;
        let scope = CatalogScope::Context(context.to_string());

        let mut report = SyncReport::default();
        let mut failures = Vec::new();
        for rec in wanted {
            let entry = visible
                .iter()
                .find(|e| e.name == rec.name && e.target == rec.target);
            match plugin_status(Some(&rec.recommended_version), entry) {
                PluginStatus::NotInstalled | PluginStatus::UpdateAvailable => {}
                _ => {
                    report.up_to_date.push(rec.name.clone());
                    continue;
                }
            }
            let result = self
                .resolve_record(
                    &stores,
                    &rec.name,
                    Some(&rec.target),
                    &VersionToken::Exact(rec.recommended_version.clone()),
                )
                .and_then(|record| self.install_record(&record, &scope, None));
            match result {
                Ok(_) => report.installed.push(rec.name.clone()),
                Err(error) => failures.push(BatchFailure {
                    plugin: rec.name.clone(),
                    error,
                }),
            }
        }
        finish_batch(report, failures)
    }

    /// Delete an installed plugin: its binary, then its catalog entries
    /// in every scope that records it.
    ///
    /// Without `force`, deleting a plugin that is not installed is an
    /// error; with it, a no-op.
    pub fn delete(&self, name: &str, target: Option<&str>, force: bool) -> Result<()> {
        let catalog_root = paths::catalog_dir(&self.config.root);
        let mut matches: Vec<(CatalogScope, CatalogEntry)> = Vec::new();
        for scope in PluginCatalog::list_scopes(&catalog_root)? {
            for entry in PluginCatalog::read(&catalog_root, &scope)? {
                if entry.name == name && target.map_or(true, |t| entry.target == t) {
                    matches.push((scope.clone(), entry));
                }
            }
        }

        if matches.is_empty() {
            if force {
                log::debug!("Plugin '{name}' is not installed; nothing to delete");
                return Ok(());
            }
            return Err(Error::NotInstalled {
                name: name.to_string(),
                target: target.map(str::to_string),
            });
        }
        if target.is_none() {
            let mut targets: Vec<String> = matches.iter().map(|(_, e)| e.target.clone()).collect();
            targets.sort();
            targets.dedup();
            if targets.len() > 1 {
                return Err(Error::AmbiguousTarget {
                    name: name.to_string(),
                    targets,
                });
            }
        }

        let mut first_error: Option<Error> = None;
        for (scope, entry) in matches {
            match std::fs::remove_file(&entry.installation_path) {
                Ok(()) => prune_empty_dirs(&entry.installation_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Stale entry; the catalog still gets cleaned up.
                    log::warn!(
                        "Binary for '{}' already missing at {}",
                        entry.name,
                        entry.installation_path.display()
                    );
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e.into());
                    }
                    continue;
                }
            }
            let mut writer = PluginCatalog::open(&catalog_root, &scope, &self.config.lock)?;
            writer.delete(&entry.name, &entry.target)?;
            writer.close();
            log::debug!("Deleted '{}' ({}) from {scope}", entry.name, entry.target);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove every installed binary and empty every catalog scope.
    pub fn clean(&self) -> Result<()> {
        let catalog_root = paths::catalog_dir(&self.config.root);
        for scope in PluginCatalog::list_scopes(&catalog_root)? {
            let mut writer = PluginCatalog::open(&catalog_root, &scope, &self.config.lock)?;
            let drained = writer.clear()?;
            writer.close();
            log::debug!("Cleaned {scope} ({} entries)", drained.len());
            for entry in drained {
                match std::fs::remove_file(&entry.installation_path) {
                    Ok(()) => prune_empty_dirs(&entry.installation_path),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => log::warn!(
                        "Could not remove binary {}: {e}",
                        entry.installation_path.display()
                    ),
                }
            }
        }
        Ok(())
    }

    /// Installed plugins visible right now: the standalone catalog,
    /// shadowed by the active context's catalog when one is given.
    pub fn installed_plugins(&self, context: Option<&str>) -> Result<Vec<CatalogEntry>> {
        PluginCatalog::merged_entries(&paths::catalog_dir(&self.config.root), context)
    }

    /// Every (name, target) family published for this host across all
    /// sources, with its install status. Hidden families are omitted.
    pub fn discovered_plugins(&self, context: Option<&str>) -> Result<Vec<DiscoveredPlugin>> {
        let stores = self.load_stores(None, CacheOptions::default())?;
        let installed = self.installed_plugins(context)?;

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for (source, store) in self.config.sources.iter().zip(&stores) {
            let records = store.find_plugins(&PluginQuery {
                os: Some(self.config.os.clone()),
                arch: Some(self.config.arch.clone()),
                ..Default::default()
            });
            for record in records {
                if !seen.insert((record.name.clone(), record.target.clone())) {
                    continue;
                }
                let recommended =
                    store.recommended_version(&record.name, &record.target, self.config.prerelease);
                let entry = installed
                    .iter()
                    .find(|e| e.name == record.name && e.target == record.target);
                found.push(DiscoveredPlugin {
                    status: plugin_status(recommended.as_deref(), entry),
                    installed_version: entry.map(|e| e.version.clone()),
                    recommended_version: recommended.unwrap_or_default(),
                    description: record.description,
                    name: record.name,
                    target: record.target,
                    source: source.name.clone(),
                });
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.target.cmp(&b.target)));
        Ok(found)
    }

    /// Re-verify installed binaries against their catalog records.
    pub fn verify_installed(&self, context: Option<&str>) -> Result<Vec<IntegrityViolation>> {
        let mut violations = Vec::new();
        for entry in self.installed_plugins(context)? {
            if !entry.installation_path.is_file() {
                violations.push(IntegrityViolation::MissingBinary {
                    name: entry.name,
                    target: entry.target,
                    path: entry.installation_path,
                });
                continue;
            }
            // Entries written before digests were recorded have nothing
            // to verify against.
            let Some(expected) = entry.digest else {
                continue;
            };
            let actual = artifact::calculate_digest(&entry.installation_path)?;
            if !artifact::digests_match(&expected, &actual) {
                violations.push(IntegrityViolation::DigestMismatch {
                    name: entry.name,
                    target: entry.target,
                    expected,
                    actual,
                });
            }
        }
        Ok(violations)
    }

    /// Force-refresh the cached snapshot of one source, or of all of
    /// them.
    pub fn refresh_sources(&self, source: Option<&str>) -> Result<()> {
        for source in self.config.selected_sources(source)? {
            self.cache.refresh(source, self.fetcher.as_ref())?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn load_stores(&self, source: Option<&str>, options: CacheOptions) -> Result<Vec<InventoryStore>> {
        let mut stores = Vec::new();
        for source in self.config.selected_sources(source)? {
            let path = self.cache.get(source, options, self.fetcher.as_ref())?;
            let store = match InventoryStore::load(&path) {
                Ok(store) => store,
                Err(Error::CorruptSnapshot { reason, .. }) if !options.local_only => {
                    log::warn!(
                        "Cached snapshot for '{}' is corrupt ({reason}); refreshing",
                        source.name
                    );
                    let fresh = self.cache.refresh(source, self.fetcher.as_ref())?;
                    InventoryStore::load(&fresh)?
                }
                Err(e) => return Err(e),
            };
            stores.push(store);
        }
        Ok(stores)
    }

    /// Query all stores, first source winning on duplicate rows.
    fn find_records(
        &self,
        stores: &[InventoryStore],
        query: &PluginQuery,
    ) -> Vec<PluginBinaryRecord> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for store in stores {
            for record in store.find_plugins(query) {
                let key = (
                    record.name.clone(),
                    record.target.clone(),
                    record.version.clone(),
                    record.os.clone(),
                    record.arch.clone(),
                );
                if seen.insert(key) {
                    records.push(record);
                }
            }
        }
        records
    }

    fn find_group(&self, stores: &[InventoryStore], id: &GroupId) -> Option<PluginGroup> {
        for store in stores {
            let groups = store.find_groups(&GroupQuery {
                vendor: Some(id.vendor.clone()),
                publisher: Some(id.publisher.clone()),
                name: Some(id.name.clone()),
                ..Default::default()
            });
            if let Some(group) = groups.into_iter().next() {
                return Some(group);
            }
        }
        None
    }

    /// Resolve a request down to the one binary record to install.
    fn resolve_record(
        &self,
        stores: &[InventoryStore],
        name: &str,
        target: Option<&str>,
        token: &VersionToken,
    ) -> Result<PluginBinaryRecord> {
        // Hidden plugins stay installable by name; they are only
        // filtered from listings.
        let query = PluginQuery {
            name: Some(name.to_string()),
            target: target.map(str::to_string),
            os: Some(self.config.os.clone()),
            arch: Some(self.config.arch.clone()),
            include_hidden: true,
            ..Default::default()
        };
        let records = self.find_records(stores, &query);
        if records.is_empty() {
            return Err(Error::PluginNotFound {
                name: name.to_string(),
                target: target.map(str::to_string),
            });
        }
        let targets = inventory::distinct_targets(&records);
        if targets.len() > 1 {
            return Err(Error::AmbiguousTarget {
                name: name.to_string(),
                targets,
            });
        }

        let available: Vec<String> = records.iter().map(|r| r.version.clone()).collect();
        let recommended = records
            .iter()
            .filter_map(|r| r.recommended_version.as_deref())
            .find(|r| !r.is_empty())
            .map(str::to_string);
        let subject = format!("{name}@{}", targets[0]);
        let resolved = version::resolve(
            &subject,
            token,
            &available,
            recommended.as_deref(),
            self.config.prerelease,
        )?;

        records
            .into_iter()
            .find(|r| version::versions_equal(&r.version, &resolved))
            .ok_or_else(|| Error::VersionNotFound {
                subject,
                requested: resolved,
                available: version::sort_versions(&available),
            })
    }

    /// Download, verify, place, and record one resolved binary.
    ///
    /// The catalog is only touched after the binary is verified and in
    /// place; a failed download or digest mismatch leaves the scope
    /// exactly as it was. An entry already at the requested version is
    /// not re-downloaded but still takes on this install's group
    /// provenance.
    fn install_record(
        &self,
        record: &PluginBinaryRecord,
        scope: &CatalogScope,
        group: Option<&str>,
    ) -> Result<InstallOutcome> {
        let catalog_root = paths::catalog_dir(&self.config.root);
        let already = PluginCatalog::read(&catalog_root, scope)?
            .into_iter()
            .find(|e| e.name == record.name && e.target == record.target);
        if let Some(existing) = already {
            if version::versions_equal(&existing.version, &record.version) {
                log::debug!(
                    "'{}' ({}) already at {} in {scope}",
                    record.name,
                    record.target,
                    record.version
                );
                let version = existing.version.clone();
                // Refresh provenance so the fast path records the same
                // state a full install would: a group install adopts
                // the entry, a plain reinstall clears the label.
                if existing.group.as_deref() != group {
                    let mut writer = PluginCatalog::open(&catalog_root, scope, &self.config.lock)?;
                    writer.upsert(CatalogEntry {
                        group: group.map(str::to_string),
                        ..existing
                    })?;
                    writer.close();
                }
                return Ok(InstallOutcome::AlreadyInstalled(version));
            }
        }

        let binary_path = self.place_binary(record)?;
        let entry = CatalogEntry {
            name: record.name.clone(),
            target: record.target.clone(),
            version: record.version.clone(),
            description: record.description.clone(),
            installation_path: binary_path,
            hidden: record.hidden,
            aliases: Vec::new(),
            group: group.map(str::to_string),
            digest: Some(record.digest.clone()),
            installed_at: Utc::now(),
        };

        let mut writer = PluginCatalog::open(&catalog_root, scope, &self.config.lock)?;
        let prior = writer.upsert(entry)?;
        writer.close();

        match prior {
            Some(p) if !version::versions_equal(&p.version, &record.version) => {
                Ok(InstallOutcome::Upgraded {
                    from: p.version,
                    to: record.version.clone(),
                })
            }
            Some(_) => Ok(InstallOutcome::AlreadyInstalled(record.version.clone())),
            None => Ok(InstallOutcome::Installed(record.version.clone())),
        }
    }

    fn place_binary(&self, record: &PluginBinaryRecord) -> Result<PathBuf> {
        let dir = paths::plugins_dir(&self.config.root)
            .join(&record.target)
            .join(&record.name)
            .join(&record.version);
        std::fs::create_dir_all(&dir)?;
        let binary_path = dir.join(&record.name);

        // Stage next to the destination so the final rename is atomic
        // and a failed verification never leaves a half-written binary
        // at the recorded path.
        let staging = tempfile::NamedTempFile::new_in(&dir)?;
        self.downloader
            .download(&record.uri, &record.digest, staging.path())
            .with_context(|| format!("downloading '{}'", record.uri))?;
        artifact::verify_file(staging.path(), &record.name, &record.digest)?;
        set_executable(staging.path())?;
        staging.persist(&binary_path).map_err(|e| e.error)?;
        log::debug!("Placed binary {}", binary_path.display());
        Ok(binary_path)
    }
}

/// Status of one plugin family given its current recommendation and
/// catalog entry. Pure; no I/O.
pub fn plugin_status(recommended: Option<&str>, entry: Option<&CatalogEntry>) -> PluginStatus {
    let Some(entry) = entry else {
        return PluginStatus::NotInstalled;
    };
    let Some(recommended) = recommended.filter(|r| !r.is_empty()) else {
        return PluginStatus::Installed;
    };
    match (
        version::parse_version(&entry.version),
        version::parse_version(recommended),
    ) {
        (Some(current), Some(rec)) => {
            if rec > current {
                PluginStatus::UpdateAvailable
            } else {
                PluginStatus::UpToDate
            }
        }
        _ if entry.version == recommended => PluginStatus::UpToDate,
        _ => PluginStatus::Installed,
    }
}

fn finish_batch(report: SyncReport, failures: Vec<BatchFailure>) -> Result<SyncReport> {
    if failures.is_empty() {
        Ok(report)
    } else {
        Err(Error::Batch(BatchError {
            succeeded: report.installed,
            failures,
        }))
    }
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Best-effort removal of the version and name directories a deleted
/// binary leaves behind; stops at the first non-empty one.
fn prune_empty_dirs(binary_path: &Path) {
    let mut dir = binary_path.parent();
    for _ in 0..2 {
        match dir {
            Some(d) => {
                if std::fs::remove_dir(d).is_err() {
                    break;
                }
                dir = d.parent();
            }
            None => break,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str) -> CatalogEntry {
        CatalogEntry {
            name: "secret".to_string(),
            target: "kubernetes".to_string(),
            version: version.to_string(),
            description: String::new(),
            installation_path: PathBuf::from("/tmp/secret"),
            hidden: false,
            aliases: Vec::new(),
            group: None,
            digest: None,
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_not_installed() {
        assert_eq!(
            plugin_status(Some("v1.0.0"), None),
            PluginStatus::NotInstalled
        );
    }

    #[test]
    fn test_status_installed_without_recommendation() {
        let e = entry("v1.0.0");
        assert_eq!(plugin_status(None, Some(&e)), PluginStatus::Installed);
        assert_eq!(plugin_status(Some(""), Some(&e)), PluginStatus::Installed);
    }

    #[test]
    fn test_status_update_available_when_recommendation_newer() {
        let e = entry("v0.0.6");
        assert_eq!(
            plugin_status(Some("v0.3.0"), Some(&e)),
            PluginStatus::UpdateAvailable
        );
    }

    #[test]
    fn test_status_up_to_date_on_match_or_newer_install() {
        let e = entry("v0.3.0");
        assert_eq!(
            plugin_status(Some("v0.3.0"), Some(&e)),
            PluginStatus::UpToDate
        );
        // Installed ahead of the recommendation is not an update.
        let e = entry("v0.4.0");
        assert_eq!(
            plugin_status(Some("v0.3.0"), Some(&e)),
            PluginStatus::UpToDate
        );
    }

    #[test]
    fn test_status_unparseable_versions_compare_literally() {
        let e = entry("dev-build");
        assert_eq!(
            plugin_status(Some("dev-build"), Some(&e)),
            PluginStatus::UpToDate
        );
        assert_eq!(
            plugin_status(Some("v1.0.0"), Some(&e)),
            PluginStatus::Installed
        );
    }

    #[test]
    fn test_config_unknown_source_is_an_error() {
        let config = ManagerConfig::rooted_at(
            "/tmp/capstan-test",
            vec![DiscoverySource::new("default", "https://example.test/inv.json")],
        );
        assert!(config.selected_sources(Some("default")).is_ok());
        assert!(matches!(
            config.selected_sources(Some("other")),
            Err(Error::SourceNotFound(name)) if name == "other"
        ));
        assert_eq!(config.selected_sources(None).unwrap().len(), 1);
    }
}
