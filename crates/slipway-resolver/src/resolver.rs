//! Revision → content-addressed artifact reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::info;
use walkdir::WalkDir;

use slipway_core::ArtifactRef;
use slipway_platform::{ImageArtifact, RegistryApi};

use crate::error::{ResolveError, ResolveResult};

/// Resolves source revisions to registry references.
///
/// Expects each revision checked out under `<checkout_root>/<revision>`.
/// Remembers every revision it has resolved and refuses to resolve the
/// same identifier to a different tree.
pub struct Resolver {
    registry: Arc<dyn RegistryApi>,
    checkout_root: PathBuf,
    registry_host: String,
    repository: String,
    resolved: Mutex<HashMap<String, String>>,
}

impl Resolver {
    pub fn new(
        registry: Arc<dyn RegistryApi>,
        checkout_root: impl Into<PathBuf>,
        registry_host: &str,
        repository: &str,
    ) -> Self {
        Self {
            registry,
            checkout_root: checkout_root.into(),
            registry_host: registry_host.to_string(),
            repository: repository.to_string(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Pack, digest, and push the revision's tree. Resolving the same
    /// revision twice is cheap on the registry side: the second push of
    /// identical bytes lands on the existing blob.
    pub async fn resolve(&self, revision: &str) -> ResolveResult<ArtifactRef> {
        validate_revision(revision)?;

        let root = self.checkout_root.join(revision);
        let image = pack_tree(&root)?;
        let digest = hex::encode(Sha256::digest(&image));

        {
            let mut resolved = self.resolved.lock().await;
            if let Some(prior) = resolved.get(revision) {
                if *prior != digest {
                    return Err(ResolveError::RevisionConflict {
                        revision: revision.to_string(),
                        prior_digest: prior.clone(),
                        digest,
                    });
                }
            }
            resolved.insert(revision.to_string(), digest.clone());
        }

        let artifact = ImageArtifact {
            registry: self.registry_host.clone(),
            repository: self.repository.clone(),
            digest,
            bytes: image,
        };
        let reference = self
            .registry
            .push(&artifact)
            .await
            .map_err(|e| ResolveError::Registry(e.to_string()))?;

        info!(revision, digest = %reference.short_digest(), "resolved revision");
        Ok(reference)
    }
}

fn validate_revision(revision: &str) -> ResolveResult<()> {
    if revision.is_empty() {
        return Err(ResolveError::InvalidRevision("empty".to_string()));
    }
    // The identifier becomes a path component under checkout_root.
    if revision.contains('/') || revision.contains('\\') || revision.contains("..") {
        return Err(ResolveError::InvalidRevision(revision.to_string()));
    }
    Ok(())
}

/// Deterministic flat image of a source tree.
///
/// Files are visited depth-first with siblings in file-name order, so the
/// same tree always packs to the same bytes. Each record is the relative
/// path, a NUL, the content length as little-endian u64, then the content.
fn pack_tree(root: &Path) -> ResolveResult<Vec<u8>> {
    let mut image = Vec::new();
    let mut files = 0u64;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry
            .map_err(|e| ResolveError::SourceUnreadable(format!("{}: {e}", root.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ResolveError::SourceUnreadable(e.to_string()))?;
        let content = std::fs::read(entry.path()).map_err(|e| {
            ResolveError::SourceUnreadable(format!("{}: {e}", entry.path().display()))
        })?;

        image.extend_from_slice(rel.to_string_lossy().as_bytes());
        image.push(0);
        image.extend_from_slice(&(content.len() as u64).to_le_bytes());
        image.extend_from_slice(&content);
        files += 1;
    }

    if files == 0 {
        return Err(ResolveError::SourceUnreadable(format!(
            "{}: no files in source tree",
            root.display()
        )));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_platform::FakeRegistry;
    use std::fs;

    fn checkout(trees: &[(&str, &[(&str, &str)])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (revision, files) in trees {
            let root = dir.path().join(revision);
            for (path, content) in *files {
                let full = root.join(path);
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).unwrap();
                }
                fs::write(full, content).unwrap();
            }
        }
        dir
    }

    fn resolver_over(dir: &tempfile::TempDir) -> (Resolver, Arc<FakeRegistry>) {
        let registry = Arc::new(FakeRegistry::new());
        let resolver = Resolver::new(
            registry.clone(),
            dir.path(),
            "registry.example.com",
            "team/checkout",
        );
        (resolver, registry)
    }

    #[tokio::test]
    async fn same_tree_resolves_to_same_reference() {
        let dir = checkout(&[("rev-a", &[("main.go", "package main"), ("go.mod", "module m")])]);
        let (resolver, registry) = resolver_over(&dir);

        let first = resolver.resolve("rev-a").await.unwrap();
        let second = resolver.resolve("rev-a").await.unwrap();

        assert_eq!(first, second);
        // Two pushes, one blob: content addressing deduplicates.
        assert_eq!(registry.push_count().await, 2);
        assert_eq!(registry.blob_count().await, 1);
    }

    #[tokio::test]
    async fn different_content_yields_different_reference() {
        let dir = checkout(&[
            ("rev-a", &[("main.go", "package main")]),
            ("rev-b", &[("main.go", "package main // v2")]),
        ]);
        let (resolver, _) = resolver_over(&dir);

        let a = resolver.resolve("rev-a").await.unwrap();
        let b = resolver.resolve("rev-b").await.unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[tokio::test]
    async fn file_path_participates_in_digest() {
        let dir = checkout(&[
            ("rev-a", &[("main.go", "package main")]),
            ("rev-b", &[("other.go", "package main")]),
        ]);
        let (resolver, _) = resolver_over(&dir);

        let a = resolver.resolve("rev-a").await.unwrap();
        let b = resolver.resolve("rev-b").await.unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[tokio::test]
    async fn nested_directories_are_packed() {
        let dir = checkout(&[(
            "rev-a",
            &[("src/lib.rs", "pub fn f() {}"), ("src/deep/mod.rs", "mod x;")],
        )]);
        let (resolver, _) = resolver_over(&dir);
        assert!(resolver.resolve("rev-a").await.is_ok());
    }

    #[tokio::test]
    async fn reused_revision_with_different_tree_conflicts() {
        let dir = checkout(&[("rev-a", &[("main.go", "package main")])]);
        let (resolver, _) = resolver_over(&dir);

        resolver.resolve("rev-a").await.unwrap();
        fs::write(dir.path().join("rev-a/main.go"), "package main // mutated").unwrap();

        let err = resolver.resolve("rev-a").await.unwrap_err();
        assert!(matches!(err, ResolveError::RevisionConflict { .. }));
    }

    #[tokio::test]
    async fn missing_revision_is_unreadable() {
        let dir = checkout(&[]);
        let (resolver, _) = resolver_over(&dir);

        let err = resolver.resolve("no-such-rev").await.unwrap_err();
        assert!(matches!(err, ResolveError::SourceUnreadable(_)));
    }

    #[tokio::test]
    async fn empty_tree_is_unreadable() {
        let dir = checkout(&[]);
        fs::create_dir_all(dir.path().join("rev-a")).unwrap();
        let (resolver, _) = resolver_over(&dir);

        let err = resolver.resolve("rev-a").await.unwrap_err();
        assert!(matches!(err, ResolveError::SourceUnreadable(_)));
    }

    #[tokio::test]
    async fn path_traversal_revisions_rejected() {
        let dir = checkout(&[]);
        let (resolver, _) = resolver_over(&dir);

        for bad in ["", "../etc", "a/b", "a\\b"] {
            let err = resolver.resolve(bad).await.unwrap_err();
            assert!(matches!(err, ResolveError::InvalidRevision(_)), "{bad}");
        }
    }
}
