//! Filesystem layout of the fleet.
//!
//! All on-disk locations are derived from one base directory:
//!
//! ```text
//! <base>/servers/<instance>/   instance data and cached artifacts
//! <base>/backups/<instance>/   backups
//! <base>/config/servers.json   fleet document
//! <base>/logs/
//! ```
//!
//! Instance names are sanitized before they become path segments, so a name
//! can never escape its parent directory.

use crate::error::Result;
use crate::instance::Flavor;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CURATED_PREFIX: &str = "paper";
const CANONICAL_PREFIX: &str = "minecraft_server";
const ARTIFACT_EXTENSION: &str = "jar";

/// Derives instance, artifact and backup locations from a base directory.
#[derive(Debug)]
pub struct PathResolver {
    base: PathBuf,
    servers: PathBuf,
    backups: PathBuf,
    config: PathBuf,
    logs: PathBuf,
    /// Serializes directory creation
    create_lock: Mutex<()>,
}

impl PathResolver {
    /// Create a resolver rooted at `base`. Nothing is created on disk until a
    /// location is requested or [`ensure_layout`](Self::ensure_layout) is called.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            servers: base.join("servers"),
            backups: base.join("backups"),
            config: base.join("config"),
            logs: base.join("logs"),
            base,
            create_lock: Mutex::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn servers_dir(&self) -> &Path {
        &self.servers
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups
    }

    pub fn config_dir(&self) -> &Path {
        &self.config
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs
    }

    /// Create every top-level directory of the layout.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [&self.base, &self.servers, &self.backups, &self.config, &self.logs] {
            self.ensure_dir(dir)?;
        }
        Ok(())
    }

    /// Path of a file in the config directory. The directory is created.
    pub fn config_file(&self, file_name: &str) -> Result<PathBuf> {
        self.ensure_dir(&self.config)?;
        Ok(self.config.join(file_name))
    }

    /// Directory holding an instance's data, created if missing.
    pub fn instance_directory(&self, name: &str) -> Result<PathBuf> {
        let dir = self.instance_directory_path(name);
        self.ensure_dir(&dir)?;
        Ok(dir)
    }

    /// Directory an instance's data would live in, without touching the disk.
    pub fn instance_directory_path(&self, name: &str) -> PathBuf {
        self.servers.join(sanitize_name(name))
    }

    /// Backup directory of an instance, created if missing.
    pub fn backup_directory(&self, name: &str) -> Result<PathBuf> {
        let dir = self.backup_directory_path(name);
        self.ensure_dir(&dir)?;
        Ok(dir)
    }

    pub fn backup_directory_path(&self, name: &str) -> PathBuf {
        self.backups.join(sanitize_name(name))
    }

    /// Location of the artifact for a version (and build, for curated builds).
    ///
    /// Curated: `paper-<version>-<build>.jar`; canonical:
    /// `minecraft_server.<version>.jar`. The instance directory is created.
    pub fn artifact_path(
        &self,
        name: &str,
        version: &str,
        flavor: Flavor,
        build: Option<u32>,
    ) -> Result<PathBuf> {
        let dir = self.instance_directory(name)?;
        Ok(dir.join(artifact_file_name(version, flavor, build)))
    }

    /// Whether the instance directory exists and holds at least one artifact.
    pub fn is_installed(&self, name: &str) -> bool {
        matches!(self.find_artifact(name), Ok(Some(_)))
    }

    /// Locate an installed artifact for an instance.
    ///
    /// When several curated builds are present the newest one wins.
    pub fn find_artifact(&self, name: &str) -> Result<Option<PathBuf>> {
        let dir = self.instance_directory_path(name);
        let mut found = match list_artifacts(&dir) {
            Ok(found) => found,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        found.sort_by_key(|p| build_number_from_artifact(p));
        Ok(found.pop())
    }

    /// Cached curated builds of one version, as `(build, path)` pairs.
    pub fn cached_builds(&self, name: &str, version: &str) -> Result<Vec<(u32, PathBuf)>> {
        let dir = self.instance_directory_path(name);
        let prefix = format!("{}-{}-", CURATED_PREFIX, sanitize_name(version));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut builds = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            let build = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix(&prefix))
                .and_then(|rest| rest.parse::<u32>().ok());
            if let Some(build) = build {
                builds.push((build, path));
            }
        }
        builds.sort_by_key(|(build, _)| *build);
        Ok(builds)
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        let _guard = self.create_lock.lock().unwrap_or_else(|p| p.into_inner());
        if !dir.is_dir() {
            std::fs::create_dir_all(dir)?;
            tracing::info!(path = %dir.display(), "Created directory");
        }
        Ok(())
    }
}

/// Replace characters that are not valid in a file name.
///
/// Path separators, reserved punctuation and control characters become `_`;
/// names that would resolve to `.`/`..` or to nothing are replaced entirely.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Key under which two names would share a directory on a case-insensitive filesystem.
pub fn directory_key(name: &str) -> String {
    sanitize_name(name).to_lowercase()
}

/// File name of an artifact.
pub fn artifact_file_name(version: &str, flavor: Flavor, build: Option<u32>) -> String {
    let version = sanitize_name(version);
    match (flavor, build) {
        (Flavor::CuratedBuild, Some(build)) => {
            format!("{}-{}-{}.{}", CURATED_PREFIX, version, build, ARTIFACT_EXTENSION)
        }
        (Flavor::CuratedBuild, None) => {
            format!("{}-{}.{}", CURATED_PREFIX, version, ARTIFACT_EXTENSION)
        }
        (Flavor::CanonicalRelease, _) => {
            format!("{}.{}.{}", CANONICAL_PREFIX, version, ARTIFACT_EXTENSION)
        }
    }
}

/// Parse the build number out of a curated artifact name.
///
/// Returns `None` for anything that does not end in `-<number>.jar`.
pub fn build_number_from_artifact(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.split('-');
    let last = parts.next_back()?;
    if parts.count() < 2 {
        return None;
    }
    last.parse().ok()
}

/// Version a cached artifact was downloaded for, or `"unknown"`.
pub fn version_from_artifact(path: &Path) -> String {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return "unknown".to_string();
    };
    if let Some(rest) = stem.strip_prefix(&format!("{}.", CANONICAL_PREFIX)) {
        return rest.to_string();
    }
    if let Some(rest) = stem.strip_prefix(&format!("{}-", CURATED_PREFIX)) {
        return match build_number_from_artifact(path) {
            Some(build) => rest
                .strip_suffix(&format!("-{}", build))
                .unwrap_or(rest)
                .to_string(),
            None => rest.to_string(),
        };
    }
    "unknown".to_string()
}

/// Whether `path` is a directory holding a recognizable server artifact.
pub fn is_valid_instance_directory(path: &Path) -> bool {
    path.is_dir() && list_artifacts(path).is_ok_and(|found| !found.is_empty())
}

fn list_artifacts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_artifact = path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION)
            && path
                .file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|f| f.starts_with(CURATED_PREFIX) || f.starts_with(CANONICAL_PREFIX));
        if is_artifact && path.is_file() {
            found.push(path);
        }
    }
    Ok(found)
}
