//! Artifact addressing and integrity digests.
//!
//! Every installable binary is addressed by a structured URI of the form
//! `<vendor>/<publisher>/<os>/<arch>/<target>/<name>:<version>`, e.g.
//! `capstan-infra/core/linux/amd64/kubernetes/secret:v0.3.0`.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Structured address of one plugin binary in an artifact registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactUri {
    pub vendor: String,
    pub publisher: String,
    pub os: String,
    pub arch: String,
    pub target: String,
    pub name: String,
    pub version: String,
}

impl fmt::Display for ArtifactUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}:{}",
            self.vendor, self.publisher, self.os, self.arch, self.target, self.name, self.version
        )
    }
}

impl FromStr for ArtifactUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 6 {
            return Err(Error::Config(format!(
                "invalid artifact URI '{s}': expected 6 '/'-separated segments"
            )));
        }
        let (name, version) = parts[5].rsplit_once(':').ok_or_else(|| {
            Error::Config(format!("invalid artifact URI '{s}': missing ':<version>'"))
        })?;
        if parts.iter().any(|p| p.is_empty()) || name.is_empty() || version.is_empty() {
            return Err(Error::Config(format!(
                "invalid artifact URI '{s}': empty segment"
            )));
        }
        Ok(ArtifactUri {
            vendor: parts[0].to_string(),
            publisher: parts[1].to_string(),
            os: parts[2].to_string(),
            arch: parts[3].to_string(),
            target: parts[4].to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

/// Downloads one artifact to a local path.
///
/// Implementations may verify the digest themselves; the engine always
/// re-verifies the file on disk before committing anything to the
/// catalog.
pub trait ArtifactDownloader {
    fn download(&self, uri: &str, digest: &str, dest: &Path) -> anyhow::Result<()>;
}

/// Calculate the SHA256 digest of a file, in `sha256:<hex>` form.
pub fn calculate_digest(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Compare two digests, tolerating a missing `sha256:` prefix on either side.
pub fn digests_match(expected: &str, actual: &str) -> bool {
    let strip = |d: &str| d.trim_start_matches("sha256:").to_ascii_lowercase();
    strip(expected) == strip(actual)
}

/// Verify a downloaded file against its published digest.
pub fn verify_file(path: &Path, plugin: &str, expected: &str) -> Result<()> {
    let actual = calculate_digest(path)?;
    if digests_match(expected, &actual) {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            plugin: plugin.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
