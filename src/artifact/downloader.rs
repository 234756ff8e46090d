//! Download and cache resolved builds.

use super::http::HttpClient;
use super::resolver::{ArtifactResolver, Checksum, ResolvedBuild};
use crate::error::{Error, Result};
use crate::instance::Flavor;
use crate::paths::{PathResolver, directory_key};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

type DownloadKey = (String, String);
type LockMap = Mutex<HashMap<DownloadKey, Arc<tokio::sync::Mutex<()>>>>;

/// Shared use of one per-key download lock. The map entry is removed when
/// the last lease for its key drops.
struct KeyLease<'a> {
    locks: &'a LockMap,
    key: DownloadKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> KeyLease<'a> {
    fn acquire(locks: &'a LockMap, key: DownloadKey) -> Self {
        let lock = locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(key.clone())
            .or_default()
            .clone();
        Self { locks, key, lock }
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map plus this lease.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.key);
        }
    }
}

/// Downloads builds into an instance's directory.
///
/// Downloads of the same `(instance, version)` are serialized; a completed
/// artifact only ever appears on disk fully written.
pub struct ArtifactDownloader {
    resolver: Arc<ArtifactResolver>,
    http: Arc<dyn HttpClient>,
    paths: Arc<PathResolver>,
    locks: LockMap,
}

impl ArtifactDownloader {
    pub fn new(
        resolver: Arc<ArtifactResolver>,
        http: Arc<dyn HttpClient>,
        paths: Arc<PathResolver>,
    ) -> Self {
        Self {
            resolver,
            http,
            paths,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<ArtifactResolver> {
        &self.resolver
    }

    /// Make the newest build of `version` available for `instance_name`.
    ///
    /// Canonical releases are looked up on disk first and need no network at
    /// all when cached. Curated builds are resolved to find the newest build
    /// number, and only downloaded when that exact build is not cached.
    #[tracing::instrument(skip(self), fields(instance = %instance_name, flavor = %flavor))]
    pub async fn download(&self, instance_name: &str, flavor: Flavor, version: &str) -> Result<PathBuf> {
        let lease = self.lease(instance_name, version);
        let _guard = lease.lock().await;

        if flavor == Flavor::CanonicalRelease {
            let cached = self.target_path(instance_name, version, flavor, None).await?;
            if cached.is_file() {
                tracing::info!(path = %cached.display(), "Using cached artifact");
                return Ok(cached);
            }
        }

        let resolved = self.resolver.resolve_build(flavor, version).await?;
        self.install_locked(instance_name, &resolved).await
    }

    /// Make a specific curated build available for `instance_name`.
    ///
    /// Performs no network request when that build is already cached.
    #[tracing::instrument(skip(self), fields(instance = %instance_name))]
    pub async fn download_build(&self, instance_name: &str, version: &str, build: u32) -> Result<PathBuf> {
        let lease = self.lease(instance_name, version);
        let _guard = lease.lock().await;

        let cached = self
            .target_path(instance_name, version, Flavor::CuratedBuild, Some(build))
            .await?;
        if cached.is_file() {
            tracing::info!(path = %cached.display(), "Using cached artifact");
            return Ok(cached);
        }

        let resolved = self.resolver.resolve_curated_build(version, build).await?;
        self.install_locked(instance_name, &resolved).await
    }

    /// Download an already resolved build unless it is cached.
    pub async fn install(&self, instance_name: &str, resolved: &ResolvedBuild) -> Result<PathBuf> {
        let lease = self.lease(instance_name, &resolved.version);
        let _guard = lease.lock().await;
        self.install_locked(instance_name, resolved).await
    }

    async fn install_locked(&self, instance_name: &str, resolved: &ResolvedBuild) -> Result<PathBuf> {
        let target = self
            .target_path(instance_name, &resolved.version, resolved.flavor, resolved.build)
            .await?;

        if target.is_file() {
            tracing::info!(path = %target.display(), "Using cached artifact");
        } else {
            self.fetch_to(resolved, &target).await?;
            tracing::info!(path = %target.display(), "Downloaded artifact");
        }

        if let (Flavor::CuratedBuild, Some(build)) = (resolved.flavor, resolved.build) {
            self.prune_other_builds(instance_name, &resolved.version, build)?;
        }

        Ok(target)
    }

    async fn fetch_to(&self, resolved: &ResolvedBuild, target: &Path) -> Result<()> {
        let partial = partial_path(target);
        let result = self.stream_to(resolved, &partial).await;

        match result {
            Ok(()) => {
                if let Err(e) = tokio::fs::rename(&partial, target).await {
                    remove_partial(&partial).await;
                    return Err(e.into());
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(url = %resolved.url, error = %e, "Download failed");
                remove_partial(&partial).await;
                Err(e)
            }
        }
    }

    async fn stream_to(&self, resolved: &ResolvedBuild, partial: &Path) -> Result<()> {
        let mut stream = self.http.get_stream(&resolved.url).await?;
        let mut file = tokio::fs::File::create(partial).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(Checksum::Sha256(expected)) = &resolved.checksum {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        tracing::debug!(bytes = written, "Artifact written");
        Ok(())
    }

    fn prune_other_builds(&self, instance_name: &str, version: &str, keep: u32) -> Result<()> {
        for (build, path) in self.paths.cached_builds(instance_name, version)? {
            if build == keep {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::info!(path = %path.display(), build, "Removed superseded build"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove superseded build"),
            }
        }
        Ok(())
    }

    fn lease(&self, instance_name: &str, version: &str) -> KeyLease<'_> {
        KeyLease::acquire(
            &self.locks,
            (directory_key(instance_name), version.to_string()),
        )
    }

    /// Artifact location, with the instance directory created off the
    /// async workers.
    async fn target_path(
        &self,
        instance_name: &str,
        version: &str,
        flavor: Flavor,
        build: Option<u32>,
    ) -> Result<PathBuf> {
        let paths = Arc::clone(&self.paths);
        let (name, version) = (instance_name.to_string(), version.to_string());
        tokio::task::spawn_blocking(move || paths.artifact_path(&name, &version, flavor, build))
            .await
            .map_err(|e| Error::Other(format!("Directory task failed: {}", e)))?
    }
}

impl std::fmt::Debug for ArtifactDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactDownloader")
            .field("resolver", &self.resolver)
            .field("paths", &self.paths)
            .finish()
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => tracing::debug!(path = %partial.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %partial.display(), error = %e, "Failed to remove partial download"),
    }
}
