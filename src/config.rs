//! Centralized defaults and environment overrides.
//!
//! Everything tunable lives here so the rest of the crate never reads
//! the environment directly.

use std::time::Duration;

/// Environment variable that relocates the capstan home directory.
pub const ENV_CAPSTAN_HOME: &str = "CAPSTAN_HOME";

/// Environment variable that overrides the default artifact registry base URL.
pub const ENV_REGISTRY_URL: &str = "CAPSTAN_REGISTRY_URL";

/// Directory under `$HOME` used when [`ENV_CAPSTAN_HOME`] is unset.
pub const DEFAULT_HOME_DIR_NAME: &str = ".capstan";

/// Default artifact registry used by the HTTP downloader.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.capstan.sh";

/// Schema version written into inventory snapshots.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Schema version written into catalog files.
pub const CATALOG_SCHEMA_VERSION: u32 = 1;

/// Version keyword that selects the recommended (or highest) version.
pub const LATEST_VERSION: &str = "latest";

/// How long a catalog writer waits for the advisory lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for a contended catalog lock.
pub const DEFAULT_LOCK_POLL: Duration = Duration::from_millis(100);

/// Request timeout for the built-in HTTP transport.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Get the artifact registry base URL (env override or default)
pub fn registry_url() -> String {
    std::env::var(ENV_REGISTRY_URL).unwrap_or_else(|_| DEFAULT_REGISTRY_URL.to_string())
}

/// Host (os, arch) in the notation discovery sources publish under:
/// `darwin`/`linux`/`windows` and `amd64`/`arm64`.
pub fn host_platform() -> (String, String) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (os.to_string(), arch.to_string())
}

// ============================================================================
// Tests
// ============================================================================
