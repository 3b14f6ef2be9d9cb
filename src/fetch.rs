//! Blocking HTTPS implementations of the transport seams.
//!
//! Compiled behind the `http` feature. These cover discovery sources
//! whose location is a plain HTTP(S) URL and registries that serve
//! artifacts over HTTP(S); OCI-addressed sources need a caller-supplied
//! fetcher.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::artifact::ArtifactDownloader;
use crate::config;
use crate::discovery::{DiscoverySource, SnapshotFetcher};
use crate::error::{Error, Result};

/// Snapshot fetcher for HTTP(S) source locations.
pub struct HttpSnapshotFetcher {
    client: reqwest::blocking::Client,
}

impl HttpSnapshotFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(HttpSnapshotFetcher {
            client: build_client(timeout)?,
        })
    }
}

impl SnapshotFetcher for HttpSnapshotFetcher {
    fn fetch(&self, source: &DiscoverySource) -> anyhow::Result<Vec<u8>> {
        if !is_http(&source.location) {
            bail!(
                "discovery source '{}' has non-HTTP location '{}'",
                source.name,
                source.location
            );
        }
        let response = self
            .client
            .get(&source.location)
            .send()
            .with_context(|| format!("requesting {}", source.location))?
            .error_for_status()
            .with_context(|| format!("fetching snapshot from {}", source.location))?;
        Ok(response.bytes()?.to_vec())
    }
}

/// Artifact downloader resolving URIs against a registry base URL.
pub struct HttpArtifactDownloader {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpArtifactDownloader {
    /// Downloader against the configured registry
    /// ([`config::registry_url`]).
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(config::registry_url(), timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(HttpArtifactDownloader {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl ArtifactDownloader for HttpArtifactDownloader {
    fn download(&self, uri: &str, _digest: &str, dest: &Path) -> anyhow::Result<()> {
        let url = format!("{}/{}", self.base_url, uri);
        let bytes = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("downloading {url}"))?
            .bytes()
            .with_context(|| format!("reading body of {url}"))?;
        // Digest verification happens in the engine, on the staged file.
        std::fs::write(dest, &bytes).with_context(|| format!("writing {}", dest.display()))?;
        Ok(())
    }
}

fn is_http(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn build_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("could not build HTTP client: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_HTTP_TIMEOUT;

    #[test]
    fn test_fetcher_rejects_non_http_locations() {
        let fetcher = HttpSnapshotFetcher::new(DEFAULT_HTTP_TIMEOUT).unwrap();
        let source = DiscoverySource::new("registry", "oci://registry.example/inventory:latest");
        let err = fetcher.fetch(&source).unwrap_err();
        assert!(err.to_string().contains("non-HTTP location"));
    }

    #[test]
    fn test_downloader_normalizes_base_url() {
        let downloader =
            HttpArtifactDownloader::with_base_url("https://registry.example/", DEFAULT_HTTP_TIMEOUT)
                .unwrap();
        assert_eq!(downloader.base_url, "https://registry.example");
    }
}
