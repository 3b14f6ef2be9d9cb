//! Version selection for plugins and plugin groups.
//!
//! Published version strings carry a leading `v` (`v0.3.0`); requests
//! are accepted with or without it. Resolution always returns the
//! string exactly as published so it can be matched back against
//! inventory rows.

use semver::Version;

use crate::config::LATEST_VERSION;
use crate::error::{Error, Result};

/// A user-supplied version request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionToken {
    /// Empty string or `latest`: recommended version, or highest available.
    Latest,
    /// A concrete version that must exist verbatim (modulo `v` prefix).
    Exact(String),
}

impl Default for VersionToken {
    fn default() -> Self {
        VersionToken::Latest
    }
}

impl VersionToken {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(LATEST_VERSION) {
            VersionToken::Latest
        } else {
            VersionToken::Exact(trimmed.to_string())
        }
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionToken::Latest => f.write_str(LATEST_VERSION),
            VersionToken::Exact(v) => f.write_str(v),
        }
    }
}

/// Whether `latest` may ever select a pre-release.
///
/// Under [`PrereleasePolicy::StableOnly`] a pre-release is chosen only
/// when no stable version exists at all. Exact requests always work
/// regardless of policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrereleasePolicy {
    #[default]
    StableOnly,
    Allow,
}

/// Parse a published version string, tolerating a leading `v`.
pub fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.strip_prefix('v').unwrap_or(raw)).ok()
}

/// Whether two version strings denote the same version (`0.3.0` and
/// `v0.3.0` do). Unparseable strings fall back to literal comparison.
pub fn versions_equal(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va == vb,
        _ => a == b,
    }
}

/// Sort version strings ascending by semantic version, dropping
/// unparseable entries with a warning. Duplicates are removed.
pub fn sort_versions(raw: &[String]) -> Vec<String> {
    let mut parsed: Vec<(Version, &String)> = Vec::with_capacity(raw.len());
    for v in raw {
        match parse_version(v) {
            Some(p) => parsed.push((p, v)),
            None => log::warn!("Ignoring unparseable version '{v}'"),
        }
    }
    parsed.sort_by(|a, b| a.0.cmp(&b.0));
    parsed.dedup_by(|a, b| a.0 == b.0);
    parsed.into_iter().map(|(_, v)| v.clone()).collect()
}

/// Resolve a version request against the versions published for
/// `subject`.
///
/// For [`VersionToken::Latest`], a non-empty recommended version wins
/// over the computed maximum. For [`VersionToken::Exact`], the request
/// must match a published version. The resolved string always comes
/// back exactly as published, whatever notation the request or the
/// recommendation used.
pub fn resolve(
    subject: &str,
    token: &VersionToken,
    available: &[String],
    recommended: Option<&str>,
    policy: PrereleasePolicy,
) -> Result<String> {
    match token {
        VersionToken::Latest => {
            if let Some(rec) = recommended.filter(|r| !r.is_empty()) {
                if parse_version(rec).is_some() {
                    // The column may spell the version without the `v`
                    // prefix the rows carry; hand back the published
                    // form so it matches rows verbatim.
                    return match available.iter().find(|v| versions_equal(v, rec)) {
                        Some(published) => {
                            log::debug!("Resolved '{subject}' latest -> recommended {published}");
                            Ok(published.clone())
                        }
                        None => Err(Error::VersionNotFound {
                            subject: subject.to_string(),
                            requested: rec.to_string(),
                            available: sort_versions(available),
                        }),
                    };
                }
                log::warn!(
                    "Recommended version '{rec}' for '{subject}' is not semver; computing latest"
                );
            }
            latest_of(subject, available, policy)
        }
        VersionToken::Exact(requested) => {
            let wanted = parse_version(requested);
            let found = available.iter().find(|v| {
                v.as_str() == requested
                    || matches!((&wanted, parse_version(v)), (Some(w), Some(p)) if *w == p)
            });
            match found {
                Some(v) => Ok(v.clone()),
                None => Err(Error::VersionNotFound {
                    subject: subject.to_string(),
                    requested: requested.clone(),
                    available: sort_versions(available),
                }),
            }
        }
    }
}

/// Highest published version under the pre-release policy.
pub fn latest_of(subject: &str, available: &[String], policy: PrereleasePolicy) -> Result<String> {
    let mut parsed: Vec<(Version, &String)> = available
        .iter()
        .filter_map(|v| parse_version(v).map(|p| (p, v)))
        .collect();
    parsed.sort_by(|a, b| a.0.cmp(&b.0));

    let pick = match policy {
        PrereleasePolicy::Allow => parsed.last(),
        PrereleasePolicy::StableOnly => parsed
            .iter()
            .rev()
            .find(|(v, _)| v.pre.is_empty())
            .or_else(|| parsed.last()),
    };

    match pick {
        Some((v, raw)) => {
            log::debug!("Resolved '{subject}' latest -> {raw} ({v})");
            Ok((*raw).clone())
        }
        None => Err(Error::VersionNotFound {
            subject: subject.to_string(),
            requested: LATEST_VERSION.to_string(),
            available: available.to_vec(),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_token_parse() {
        assert_eq!(VersionToken::parse(""), VersionToken::Latest);
        assert_eq!(VersionToken::parse("latest"), VersionToken::Latest);
        assert_eq!(VersionToken::parse("LATEST"), VersionToken::Latest);
        assert_eq!(
            VersionToken::parse("v1.2.3"),
            VersionToken::Exact("v1.2.3".to_string())
        );
    }

    #[test]
    fn test_recommended_wins_over_computed_max() {
        let available = versions(&["v0.0.6", "v0.3.0", "v2.0.0"]);
        let resolved = resolve(
            "secret",
            &VersionToken::Latest,
            &available,
            Some("v0.3.0"),
            PrereleasePolicy::StableOnly,
        )
        .unwrap();
        assert_eq!(resolved, "v0.3.0");
    }

    #[test]
    fn test_recommended_comes_back_in_published_notation() {
        // Column says 0.3.0, rows say v0.3.0.
        let available = versions(&["v0.0.6", "v0.3.0"]);
        let resolved = resolve(
            "secret",
            &VersionToken::Latest,
            &available,
            Some("0.3.0"),
            PrereleasePolicy::StableOnly,
        )
        .unwrap();
        assert_eq!(resolved, "v0.3.0");
    }

    #[test]
    fn test_unpublished_recommendation_is_an_error() {
        let err = resolve(
            "secret",
            &VersionToken::Latest,
            &versions(&["v0.0.6"]),
            Some("v0.3.0"),
            PrereleasePolicy::StableOnly,
        )
        .unwrap_err();
        assert!(matches!(err, Error::VersionNotFound { .. }));
    }

    #[test]
    fn test_latest_without_recommendation_picks_highest_stable() {
        let available = versions(&["v0.0.6", "v0.3.0"]);
        let resolved = resolve(
            "secret",
            &VersionToken::Latest,
            &available,
            None,
            PrereleasePolicy::StableOnly,
        )
        .unwrap();
        assert_eq!(resolved, "v0.3.0");
    }

    #[test]
    fn test_stable_only_skips_prerelease() {
        let available = versions(&["v1.0.0", "v2.0.0-beta.1"]);
        let resolved = latest_of("demo", &available, PrereleasePolicy::StableOnly).unwrap();
        assert_eq!(resolved, "v1.0.0");

        let resolved = latest_of("demo", &available, PrereleasePolicy::Allow).unwrap();
        assert_eq!(resolved, "v2.0.0-beta.1");
    }

    #[test]
    fn test_prerelease_chosen_when_no_stable_exists() {
        let available = versions(&["v0.1.0-alpha.2", "v0.1.0-alpha.1"]);
        let resolved = latest_of("demo", &available, PrereleasePolicy::StableOnly).unwrap();
        assert_eq!(resolved, "v0.1.0-alpha.2");
    }

    #[test]
    fn test_exact_matches_with_or_without_v_prefix() {
        let available = versions(&["v0.3.0", "v0.4.0"]);
        let resolved = resolve(
            "secret",
            &VersionToken::Exact("0.3.0".to_string()),
            &available,
            None,
            PrereleasePolicy::StableOnly,
        )
        .unwrap();
        // The published string comes back, not the request.
        assert_eq!(resolved, "v0.3.0");
    }

    #[test]
    fn test_exact_miss_lists_available() {
        let available = versions(&["v0.3.0", "v0.0.6"]);
        let err = resolve(
            "secret",
            &VersionToken::Exact("v9.9.9".to_string()),
            &available,
            None,
            PrereleasePolicy::StableOnly,
        )
        .unwrap_err();
        match err {
            Error::VersionNotFound { available, .. } => {
                assert_eq!(available, versions(&["v0.0.6", "v0.3.0"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unparseable_recommendation_falls_back() {
        let available = versions(&["v1.0.0", "v1.1.0"]);
        let resolved = resolve(
            "secret",
            &VersionToken::Latest,
            &available,
            Some("not-a-version"),
            PrereleasePolicy::StableOnly,
        )
        .unwrap();
        assert_eq!(resolved, "v1.1.0");
    }

    #[test]
    fn test_resolution_order_independent() {
        let a = versions(&["v1.0.0", "v1.2.0", "v1.1.0"]);
        let b = versions(&["v1.2.0", "v1.0.0", "v1.1.0"]);
        let ra = latest_of("demo", &a, PrereleasePolicy::StableOnly).unwrap();
        let rb = latest_of("demo", &b, PrereleasePolicy::StableOnly).unwrap();
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_versions_equal_ignores_v_prefix() {
        assert!(versions_equal("v0.3.0", "0.3.0"));
        assert!(versions_equal("v0.3.0", "v0.3.0"));
        assert!(!versions_equal("v0.3.0", "v0.3.1"));
        assert!(versions_equal("weird", "weird"));
    }

    #[test]
    fn test_sort_versions_drops_garbage_and_dedups() {
        let sorted = sort_versions(&versions(&["v1.1.0", "garbage", "v1.0.0", "1.1.0"]));
        assert_eq!(sorted, versions(&["v1.0.0", "v1.1.0"]));
    }

    #[test]
    fn test_nothing_parseable_is_an_error() {
        let err = latest_of("demo", &versions(&["junk"]), PrereleasePolicy::StableOnly);
        assert!(matches!(err, Err(Error::VersionNotFound { .. })));
    }
}
