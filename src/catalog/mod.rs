//! The local plugin catalog: the authoritative record of installed
//! plugins.
//!
//! There is one catalog file per scope under the catalog root:
//! `standalone.json` for plugins the user installed directly and
//! `context-<name>.json` for plugins installed on behalf of a context.
//! Writers hold a cross-process lock for the whole open-mutate-close
//! window; every mutation rewrites the full document atomically, so
//! lock-free readers always observe a fully written state.

mod lock;

pub use lock::{CatalogLock, LockOptions};

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CATALOG_SCHEMA_VERSION;
use crate::error::{Error, Result};
use crate::fsutil;

const STANDALONE_FILE: &str = "standalone.json";
const CONTEXT_PREFIX: &str = "context-";

/// Which catalog an entry lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CatalogScope {
    /// Plugins the user installed directly.
    Standalone,
    /// Plugins installed because the named context recommended them.
    Context(String),
}

impl fmt::Display for CatalogScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogScope::Standalone => f.write_str("standalone"),
            CatalogScope::Context(name) => write!(f, "context '{name}'"),
        }
    }
}

impl CatalogScope {
    pub fn file_name(&self) -> String {
        match self {
            CatalogScope::Standalone => STANDALONE_FILE.to_string(),
            CatalogScope::Context(name) => format!(
                "{CONTEXT_PREFIX}{}.json",
                fsutil::sanitize_file_stem(name)
            ),
        }
    }

    fn catalog_path(&self, root: &Path) -> PathBuf {
        root.join(self.file_name())
    }

    fn lock_path(&self, root: &Path) -> PathBuf {
        self.catalog_path(root).with_extension("lk")
    }
}

/// One installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub target: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Absolute path of the installed binary.
    pub installation_path: PathBuf,
    #[serde(default)]
    pub hidden: bool,
    /// User-defined invocation aliases; preserved across upgrades.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Plugin group that pulled this plugin in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Digest recorded at install time, `sha256:<hex>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default = "Utc::now")]
    pub installed_at: DateTime<Utc>,
}

impl CatalogEntry {
    fn same_identity(&self, name: &str, target: &str) -> bool {
        self.name == name && self.target == target
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    schema_version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    entries: Vec<CatalogEntry>,
}

impl Default for CatalogDocument {
    fn default() -> Self {
        CatalogDocument {
            schema_version: CATALOG_SCHEMA_VERSION,
            updated_at: Utc::now(),
            entries: Vec::new(),
        }
    }
}

/// Entry points for catalog access.
pub struct PluginCatalog;

impl PluginCatalog {
    /// Open a scope for writing, taking its cross-process lock.
    pub fn open(root: &Path, scope: &CatalogScope, options: &LockOptions) -> Result<CatalogWriter> {
        let lock = CatalogLock::acquire(&scope.lock_path(root), &scope.to_string(), options)?;
        let path = scope.catalog_path(root);
        let doc = load_document(&path)?.unwrap_or_default();
        Ok(CatalogWriter {
            path,
            scope: scope.clone(),
            doc,
            _lock: lock,
        })
    }

    /// Read a scope without locking. Returns the last fully written
    /// state; a scope that was never written reads as empty.
    pub fn read(root: &Path, scope: &CatalogScope) -> Result<Vec<CatalogEntry>> {
        let path = scope.catalog_path(root);
        Ok(load_document(&path)?.map(|d| d.entries).unwrap_or_default())
    }

    /// Merged view: standalone entries plus, when a context is active,
    /// that context's entries. On an identity collision the context
    /// entry shadows the standalone one.
    pub fn merged_entries(root: &Path, context: Option<&str>) -> Result<Vec<CatalogEntry>> {
        let mut entries = Self::read(root, &CatalogScope::Standalone)?;
        if let Some(name) = context {
            for entry in Self::read(root, &CatalogScope::Context(name.to_string()))? {
                match entries
                    .iter_mut()
                    .find(|e| e.same_identity(&entry.name, &entry.target))
                {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.target.cmp(&b.target)));
        Ok(entries)
    }

    /// Every scope with a catalog file under `root`: standalone first,
    /// then contexts by name.
    pub fn list_scopes(root: &Path) -> Result<Vec<CatalogScope>> {
        let mut scopes = Vec::new();
        let dir = match std::fs::read_dir(root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(scopes),
            Err(e) => return Err(e.into()),
        };
        let mut contexts = Vec::new();
        for entry in dir {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name == STANDALONE_FILE {
                scopes.push(CatalogScope::Standalone);
            } else if let Some(context) = name
                .strip_prefix(CONTEXT_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                contexts.push(context.to_string());
            }
        }
        contexts.sort();
        scopes.extend(contexts.into_iter().map(CatalogScope::Context));
        Ok(scopes)
    }
}

fn load_document(path: &Path) -> Result<Option<CatalogDocument>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let doc: CatalogDocument =
        serde_json::from_slice(&bytes).map_err(|e| Error::CorruptCatalog {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if doc.schema_version > CATALOG_SCHEMA_VERSION {
        return Err(Error::CorruptCatalog {
            path: path.to_path_buf(),
            reason: format!(
                "schema_version {} is newer than supported version {}",
                doc.schema_version, CATALOG_SCHEMA_VERSION
            ),
        });
    }
    Ok(Some(doc))
}

/// Exclusive write handle on one catalog scope.
///
/// Every mutation persists the full document before returning. The
/// lock is released when the writer is closed or dropped.
#[derive(Debug)]
pub struct CatalogWriter {
    path: PathBuf,
    scope: CatalogScope,
    doc: CatalogDocument,
    _lock: CatalogLock,
}

impl CatalogWriter {
    pub fn scope(&self) -> &CatalogScope {
        &self.scope
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.doc.entries
    }

    pub fn get(&self, name: &str, target: &str) -> Option<&CatalogEntry> {
        self.doc.entries.iter().find(|e| e.same_identity(name, target))
    }

    /// Insert or replace the entry with the same (name, target)
    /// identity, returning the replaced entry. Aliases from the prior
    /// entry survive unless the new entry brings its own.
    pub fn upsert(&mut self, mut entry: CatalogEntry) -> Result<Option<CatalogEntry>> {
        let prior = match self
            .doc
            .entries
            .iter()
            .position(|e| e.same_identity(&entry.name, &entry.target))
        {
            Some(idx) => {
                if entry.aliases.is_empty() {
                    entry.aliases = self.doc.entries[idx].aliases.clone();
                }
                Some(std::mem::replace(&mut self.doc.entries[idx], entry))
            }
            None => {
                self.doc.entries.push(entry);
                None
            }
        };
        self.persist()?;
        Ok(prior)
    }

    /// Remove the entry with this identity. Removing an absent entry is
    /// a no-op, not an error.
    pub fn delete(&mut self, name: &str, target: &str) -> Result<Option<CatalogEntry>> {
        let removed = self
            .doc
            .entries
            .iter()
            .position(|e| e.same_identity(name, target))
            .map(|idx| self.doc.entries.remove(idx));
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Drop every entry, returning what was recorded.
    pub fn clear(&mut self) -> Result<Vec<CatalogEntry>> {
        let drained = std::mem::take(&mut self.doc.entries);
        self.persist()?;
        Ok(drained)
    }

    /// Release the lock. Equivalent to dropping the writer.
    pub fn close(self) {}

    fn persist(&mut self) -> Result<()> {
        self.doc.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&self.doc).map_err(|e| Error::CorruptCatalog {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        fsutil::write_atomic(&self.path, &bytes)?;
        log::debug!(
            "Persisted catalog for {} ({} entries)",
            self.scope,
            self.doc.entries.len()
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn quick_options() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn entry(name: &str, target: &str, version: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            description: format!("{name} plugin"),
            installation_path: PathBuf::from(format!("/opt/plugins/{target}/{name}/{version}")),
            hidden: false,
            aliases: Vec::new(),
            group: None,
            digest: Some("sha256:0".to_string()),
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_then_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();

        assert!(writer.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap().is_none());
        let got = writer.get("secret", "kubernetes").unwrap();
        assert_eq!(got.version, "v0.3.0");
        writer.close();

        // Lock-free read sees the persisted state.
        let entries = PluginCatalog::read(dir.path(), &CatalogScope::Standalone).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "secret");
    }

    #[test]
    fn test_upsert_replaces_instead_of_duplicating() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();

        writer.upsert(entry("secret", "kubernetes", "v0.0.6")).unwrap();
        let prior = writer.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap();

        assert_eq!(prior.unwrap().version, "v0.0.6");
        assert_eq!(writer.entries().len(), 1);
        assert_eq!(writer.get("secret", "kubernetes").unwrap().version, "v0.3.0");
    }

    #[test]
    fn test_upsert_preserves_aliases_on_upgrade() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();

        let mut old = entry("secret", "kubernetes", "v0.0.6");
        old.aliases = vec!["sec".to_string()];
        writer.upsert(old).unwrap();

        writer.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap();
        assert_eq!(
            writer.get("secret", "kubernetes").unwrap().aliases,
            vec!["sec".to_string()]
        );
    }

    #[test]
    fn test_same_name_different_target_coexist() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();

        writer.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap();
        writer.upsert(entry("secret", "mission-control", "v0.1.0")).unwrap();
        assert_eq!(writer.entries().len(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();

        writer.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap();
        assert!(writer.delete("secret", "kubernetes").unwrap().is_some());
        assert!(writer.delete("secret", "kubernetes").unwrap().is_none());
        assert!(writer.entries().is_empty());
    }

    #[test]
    fn test_clear_returns_drained_entries() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();

        writer.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap();
        writer.upsert(entry("cluster", "kubernetes", "v1.2.0")).unwrap();
        let drained = writer.clear().unwrap();
        assert_eq!(drained.len(), 2);
        assert!(writer.entries().is_empty());

        writer.close();
        assert!(PluginCatalog::read(dir.path(), &CatalogScope::Standalone)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_second_open_blocked_until_close() {
        let dir = TempDir::new().unwrap();
        let scope = CatalogScope::Standalone;

        let first = PluginCatalog::open(dir.path(), &scope, &quick_options()).unwrap();
        let err = PluginCatalog::open(dir.path(), &scope, &quick_options()).unwrap_err();
        assert!(matches!(err, Error::LockContention { .. }));

        first.close();
        PluginCatalog::open(dir.path(), &scope, &quick_options()).unwrap();
    }

    #[test]
    fn test_scopes_are_isolated() {
        let dir = TempDir::new().unwrap();
        let ctx = CatalogScope::Context("dev".to_string());

        let mut standalone =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();
        standalone.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap();

        // Different scope, different file and different lock.
        let mut context = PluginCatalog::open(dir.path(), &ctx, &quick_options()).unwrap();
        context.upsert(entry("cluster", "kubernetes", "v1.2.0")).unwrap();

        assert_eq!(standalone.entries().len(), 1);
        assert_eq!(context.entries().len(), 1);
    }

    #[test]
    fn test_merged_view_context_shadows_standalone() {
        let dir = TempDir::new().unwrap();

        let mut standalone =
            PluginCatalog::open(dir.path(), &CatalogScope::Standalone, &quick_options()).unwrap();
        standalone.upsert(entry("secret", "kubernetes", "v0.0.6")).unwrap();
        standalone.upsert(entry("cluster", "kubernetes", "v1.2.0")).unwrap();
        standalone.close();

        let ctx = CatalogScope::Context("dev".to_string());
        let mut context = PluginCatalog::open(dir.path(), &ctx, &quick_options()).unwrap();
        context.upsert(entry("secret", "kubernetes", "v0.3.0")).unwrap();
        context.close();

        let merged = PluginCatalog::merged_entries(dir.path(), Some("dev")).unwrap();
        assert_eq!(merged.len(), 2);
        let secret = merged.iter().find(|e| e.name == "secret").unwrap();
        assert_eq!(secret.version, "v0.3.0");

        let no_context = PluginCatalog::merged_entries(dir.path(), None).unwrap();
        let secret = no_context.iter().find(|e| e.name == "secret").unwrap();
        assert_eq!(secret.version, "v0.0.6");
    }

    #[test]
    fn test_read_missing_scope_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(PluginCatalog::read(dir.path(), &CatalogScope::Standalone)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_corrupt_catalog_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("standalone.json"), b"{ nope").unwrap();
        assert!(matches!(
            PluginCatalog::read(dir.path(), &CatalogScope::Standalone),
            Err(Error::CorruptCatalog { .. })
        ));
    }

    #[test]
    fn test_list_scopes_orders_standalone_first() {
        let dir = TempDir::new().unwrap();

        for scope in [
            CatalogScope::Context("zeta".to_string()),
            CatalogScope::Standalone,
            CatalogScope::Context("alpha".to_string()),
        ] {
            PluginCatalog::open(dir.path(), &scope, &quick_options())
                .unwrap()
                .clear()
                .unwrap();
        }

        let scopes = PluginCatalog::list_scopes(dir.path()).unwrap();
        assert_eq!(
            scopes,
            vec![
                CatalogScope::Standalone,
                CatalogScope::Context("alpha".to_string()),
                CatalogScope::Context("zeta".to_string()),
            ]
        );
    }

    #[test]
    fn test_list_scopes_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let scopes = PluginCatalog::list_scopes(&dir.path().join("nope")).unwrap();
        assert!(scopes.is_empty());
    }
}
