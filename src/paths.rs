//! Common path utilities for the capstan directory layout.
//!
//! Layout under a capstan root (default `~/.capstan`):
//!
//! ```text
//! <root>/
//! ├── cache/snapshots/   # one inventory snapshot per discovery source
//! ├── catalog/           # standalone.json, context-<name>.json + .lk sidecars
//! └── plugins/           # installed binaries, <target>/<name>/<version>/<name>
//! ```
//!
//! Only [`capstan_dir`] consults the environment; everything else takes
//! the root explicitly so tests and embedders can relocate the whole
//! tree.

use std::path::{Path, PathBuf};

use crate::config;
use crate::error::{Error, Result};

/// Get the user's home directory
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| Error::Config("could not find home directory".to_string()))
}

/// Get the default capstan root, honoring `CAPSTAN_HOME`.
pub fn capstan_dir() -> Result<PathBuf> {
    match std::env::var(config::ENV_CAPSTAN_HOME) {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Ok(home_dir()?.join(config::DEFAULT_HOME_DIR_NAME)),
    }
}

/// Directory holding one cached inventory snapshot per discovery source.
pub fn snapshots_dir(root: &Path) -> PathBuf {
    root.join("cache").join("snapshots")
}

/// Directory holding the per-scope catalog files.
pub fn catalog_dir(root: &Path) -> PathBuf {
    root.join("catalog")
}

/// Root directory for installed plugin binaries.
pub fn plugins_dir(root: &Path) -> PathBuf {
    root.join("plugins")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_hangs_off_root() {
        let root = Path::new("/tmp/capstan-test");
        assert!(snapshots_dir(root).starts_with(root));
        assert!(catalog_dir(root).starts_with(root));
        assert!(plugins_dir(root).starts_with(root));
    }

    #[test]
    fn test_snapshots_dir_nested_under_cache() {
        let dir = snapshots_dir(Path::new("/tmp/capstan-test"));
        assert!(dir.ends_with("cache/snapshots"));
    }

    #[test]
    fn test_default_root_is_under_home() {
        if std::env::var(config::ENV_CAPSTAN_HOME).is_err() {
            let root = capstan_dir().unwrap();
            assert!(root.ends_with(config::DEFAULT_HOME_DIR_NAME));
        }
    }
}
