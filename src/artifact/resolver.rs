//! Version listing and build resolution against the two upstream catalogs.

use super::catalog::{BuildsResponse, CuratedBuild, ProjectResponse, VersionDetails, VersionManifest};
use super::http::{HttpClient, fetch_json};
use super::version::sort_newest_first;
use crate::config::FleetConfig;
use crate::error::{Error, Result};
use crate::instance::Flavor;
use serde::Serialize;
use std::sync::Arc;

/// Checksum published by a catalog for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "algorithm", content = "value", rename_all = "lowercase")]
pub enum Checksum {
    /// Verified while downloading.
    Sha256(String),
    /// Informational only.
    Sha1(String),
}

/// A concrete, downloadable artifact selected for a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBuild {
    pub flavor: Flavor,
    pub version: String,
    /// Build number, curated builds only.
    pub build: Option<u32>,
    pub url: String,
    pub checksum: Option<Checksum>,
}

/// Resolves versions and builds from the curated and canonical catalogs.
pub struct ArtifactResolver {
    http: Arc<dyn HttpClient>,
    curated_api_base: String,
    curated_project: String,
    canonical_manifest_url: String,
}

impl ArtifactResolver {
    pub fn new(http: Arc<dyn HttpClient>, config: &FleetConfig) -> Self {
        Self {
            http,
            curated_api_base: config.curated_api_base.trim_end_matches('/').to_string(),
            curated_project: config.curated_project.clone(),
            canonical_manifest_url: config.canonical_manifest_url.clone(),
        }
    }

    /// Installable versions of a flavor, newest first.
    #[tracing::instrument(skip(self), fields(flavor = %flavor))]
    pub async fn list_versions(&self, flavor: Flavor) -> Result<Vec<String>> {
        let versions = match flavor {
            Flavor::CuratedBuild => {
                let project: ProjectResponse =
                    fetch_json(self.http.as_ref(), &self.project_url()).await?;
                let mut versions = project.versions;
                sort_newest_first(&mut versions);
                versions
            }
            Flavor::CanonicalRelease => {
                let manifest = self.fetch_manifest().await?;
                let mut releases: Vec<_> =
                    manifest.versions.into_iter().filter(|v| v.is_release()).collect();
                releases.sort_by(|a, b| b.release_time.cmp(&a.release_time));
                releases.into_iter().map(|v| v.id).collect()
            }
        };

        tracing::debug!(count = versions.len(), "Fetched version list");
        Ok(versions)
    }

    /// Resolve `version` to its newest installable build.
    #[tracing::instrument(skip(self), fields(flavor = %flavor, version = %version))]
    pub async fn resolve_build(&self, flavor: Flavor, version: &str) -> Result<ResolvedBuild> {
        let resolved = match flavor {
            Flavor::CuratedBuild => {
                let builds = self.fetch_builds(version).await?;
                let latest = builds
                    .builds
                    .iter()
                    .filter(|b| b.is_installable())
                    .max_by_key(|b| b.build)
                    .ok_or_else(|| Error::NoInstallableBuild {
                        version: version.to_string(),
                    })?;
                self.curated_build(version, latest)?
            }
            Flavor::CanonicalRelease => self.resolve_canonical(version).await?,
        };

        tracing::info!(build = ?resolved.build, url = %resolved.url, "Resolved build");
        Ok(resolved)
    }

    /// Resolve one specific curated build of `version`.
    ///
    /// Fails with [`Error::NoInstallableBuild`] when that build is missing or
    /// not on the stable channel.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_curated_build(&self, version: &str, build: u32) -> Result<ResolvedBuild> {
        let builds = self.fetch_builds(version).await?;
        let selected = builds
            .builds
            .iter()
            .find(|b| b.build == build && b.is_installable())
            .ok_or_else(|| Error::NoInstallableBuild {
                version: format!("{} (build {})", version, build),
            })?;
        self.curated_build(version, selected)
    }

    /// Whether `version` is listed for `flavor`.
    pub async fn is_version_valid(&self, flavor: Flavor, version: &str) -> Result<bool> {
        let versions = self.list_versions(flavor).await?;
        Ok(versions.iter().any(|v| v == version))
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.curated_api_base, self.curated_project)
    }

    async fn fetch_builds(&self, version: &str) -> Result<BuildsResponse> {
        let url = format!("{}/versions/{}/builds", self.project_url(), version);
        match fetch_json(self.http.as_ref(), &url).await {
            Err(Error::HttpStatus { status: 404, .. }) => Err(Error::VersionNotFound {
                flavor: Flavor::CuratedBuild.to_string(),
                version: version.to_string(),
            }),
            other => other,
        }
    }

    fn curated_build(&self, version: &str, build: &CuratedBuild) -> Result<ResolvedBuild> {
        let download = build.primary_download().ok_or_else(|| Error::NoInstallableBuild {
            version: version.to_string(),
        })?;
        let url = format!(
            "{}/versions/{}/builds/{}/downloads/{}",
            self.project_url(),
            version,
            build.build,
            download.name
        );

        Ok(ResolvedBuild {
            flavor: Flavor::CuratedBuild,
            version: version.to_string(),
            build: Some(build.build),
            url,
            checksum: download.sha256.clone().map(Checksum::Sha256),
        })
    }

    async fn fetch_manifest(&self) -> Result<VersionManifest> {
        fetch_json(self.http.as_ref(), &self.canonical_manifest_url).await
    }

    async fn resolve_canonical(&self, version: &str) -> Result<ResolvedBuild> {
        let manifest = self.fetch_manifest().await?;
        let entry = manifest
            .versions
            .into_iter()
            .find(|v| v.id == version)
            .ok_or_else(|| Error::VersionNotFound {
                flavor: Flavor::CanonicalRelease.to_string(),
                version: version.to_string(),
            })?;

        let details: VersionDetails = fetch_json(self.http.as_ref(), &entry.url).await?;
        let server = details.downloads.server.ok_or_else(|| Error::NoInstallableBuild {
            version: version.to_string(),
        })?;

        Ok(ResolvedBuild {
            flavor: Flavor::CanonicalRelease,
            version: version.to_string(),
            build: None,
            url: server.url,
            checksum: server.sha1.map(Checksum::Sha1),
        })
    }
}

impl std::fmt::Debug for ArtifactResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactResolver")
            .field("curated_api_base", &self.curated_api_base)
            .field("curated_project", &self.curated_project)
            .field("canonical_manifest_url", &self.canonical_manifest_url)
            .finish()
    }
}
