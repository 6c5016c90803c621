//! Deployment root resolution
//!
//! The real deployment root is not guaranteed in advance on managed
//! hosts, so the engine probes an ordered list of candidate directories
//! and takes the first one that exists.

use async_trait::async_trait;
use std::path::Path;

use capstan_core::error::PathResolutionError;

/// Maximum entries kept in the diagnostic listing when no candidate exists
const DIAG_LISTING_MAX: usize = 20;

/// Read-only existence probes against the remote filesystem.
///
/// Implemented by `Session` over SFTP; tests use recording fakes.
#[async_trait]
pub trait PathProbe: Sync {
    /// Whether `path` exists. Probe failures count as "does not exist".
    async fn exists(&self, path: &str) -> bool;

    /// Best-effort listing of a directory's children; empty on failure.
    async fn list_dir(&self, path: &str) -> Vec<String>;
}

/// A confirmed deployment root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The first candidate that exists
    pub root: String,
    /// Number of probes issued before the hit
    pub probes: usize,
}

/// Probe `candidates` in order and return the first that exists.
///
/// Short-circuits at the first hit; no probe is issued beyond it. If no
/// candidate exists, the error carries a best-effort listing of the first
/// candidate's parent directory for diagnostics. Probing is read-only and
/// causes no remote side effects.
pub async fn resolve_root(
    probe: &impl PathProbe,
    candidates: &[String],
) -> Result<Resolution, PathResolutionError> {
    for (index, candidate) in candidates.iter().enumerate() {
        tracing::debug!("Probing candidate root {}", candidate);
        if probe.exists(candidate).await {
            tracing::info!("Resolved deployment root: {}", candidate);
            return Ok(Resolution {
                root: candidate.clone(),
                probes: index + 1,
            });
        }
    }

    let listing = diagnostic_listing(probe, candidates).await;
    Err(PathResolutionError {
        probed: candidates.to_vec(),
        listing,
    })
}

/// List the first candidate's parent so the operator can see what the
/// host actually looks like.
async fn diagnostic_listing(probe: &impl PathProbe, candidates: &[String]) -> Vec<String> {
    let Some(first) = candidates.first() else {
        return Vec::new();
    };
    let parent = Path::new(first)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string());

    let mut listing = probe.list_dir(&parent).await;
    listing.truncate(DIAG_LISTING_MAX);
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Probe fake that records every path it is asked about
    struct FakeProbe {
        existing: Vec<String>,
        probed: Mutex<Vec<String>>,
        children: Vec<String>,
    }

    impl FakeProbe {
        fn new(existing: &[&str]) -> Self {
            Self {
                existing: existing.iter().map(|s| s.to_string()).collect(),
                probed: Mutex::new(Vec::new()),
                children: Vec::new(),
            }
        }

        fn with_children(mut self, children: &[&str]) -> Self {
            self.children = children.iter().map(|s| s.to_string()).collect();
            self
        }

        fn probe_count(&self) -> usize {
            self.probed.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PathProbe for FakeProbe {
        async fn exists(&self, path: &str) -> bool {
            self.probed.lock().unwrap().push(path.to_string());
            self.existing.iter().any(|p| p == path)
        }

        async fn list_dir(&self, _path: &str) -> Vec<String> {
            self.children.clone()
        }
    }

    fn candidates(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_resolves_first_existing_in_list_order() {
        let probe = FakeProbe::new(&["/b", "/c"]);
        let resolution = resolve_root(&probe, &candidates(&["/a", "/b", "/c"]))
            .await
            .unwrap();
        assert_eq!(resolution.root, "/b");
    }

    #[tokio::test]
    async fn test_short_circuits_after_first_hit() {
        // Only "/b" exists: exactly 2 probes, "/c" never probed
        let probe = FakeProbe::new(&["/b"]);
        let resolution = resolve_root(&probe, &candidates(&["/a", "/b", "/c"]))
            .await
            .unwrap();
        assert_eq!(resolution.probes, 2);
        assert_eq!(probe.probe_count(), 2);
        assert!(!probe.probed.lock().unwrap().contains(&"/c".to_string()));
    }

    #[tokio::test]
    async fn test_first_candidate_hit_probes_once() {
        let probe = FakeProbe::new(&["/a"]);
        let resolution = resolve_root(&probe, &candidates(&["/a", "/b"]))
            .await
            .unwrap();
        assert_eq!(resolution.probes, 1);
        assert_eq!(probe.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_absent_probes_all_and_attaches_listing() {
        let probe = FakeProbe::new(&[]).with_children(&["deployer", "lost+found"]);
        let err = resolve_root(
            &probe,
            &candidates(&["/home/deployer/public_html", "/srv/app"]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.probed.len(), 2);
        assert_eq!(probe.probe_count(), 2);
        assert_eq!(err.listing, vec!["deployer", "lost+found"]);
    }

    #[tokio::test]
    async fn test_empty_candidate_list_is_absent() {
        let probe = FakeProbe::new(&["/a"]);
        let err = resolve_root(&probe, &[]).await.unwrap_err();
        assert!(err.probed.is_empty());
        assert!(err.listing.is_empty());
    }
}
