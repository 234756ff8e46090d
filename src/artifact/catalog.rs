//! Wire formats of the two upstream catalogs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Download role of the server artifact in the curated catalog.
pub const PRIMARY_DOWNLOAD: &str = "application";
/// Channel of builds considered stable in the curated catalog.
pub const STABLE_CHANNEL: &str = "default";
/// Manifest type of canonical stable releases.
pub const RELEASE_TYPE: &str = "release";

/// `GET /projects/{project}`
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectResponse {
    pub project_id: String,
    pub project_name: String,
    #[serde(default)]
    pub version_groups: Vec<String>,
    #[serde(default)]
    pub versions: Vec<String>,
}

/// `GET /projects/{project}/versions/{version}/builds`
#[derive(Debug, Clone, Deserialize)]
pub struct BuildsResponse {
    pub project_id: String,
    pub version: String,
    #[serde(default)]
    pub builds: Vec<CuratedBuild>,
}

/// One build in the curated catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CuratedBuild {
    pub build: u32,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub promoted: bool,
    #[serde(default)]
    pub downloads: HashMap<String, CuratedDownload>,
}

impl CuratedBuild {
    /// Whether this build is on the stable channel and ships a server artifact.
    pub fn is_installable(&self) -> bool {
        self.channel.eq_ignore_ascii_case(STABLE_CHANNEL)
            && self.downloads.contains_key(PRIMARY_DOWNLOAD)
    }

    pub fn primary_download(&self) -> Option<&CuratedDownload> {
        self.downloads.get(PRIMARY_DOWNLOAD)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CuratedDownload {
    pub name: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// `GET /version_manifest_v2.json`
#[derive(Debug, Clone, Deserialize)]
pub struct VersionManifest {
    #[serde(default)]
    pub latest: Option<LatestVersions>,
    #[serde(default)]
    pub versions: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    pub release_time: DateTime<Utc>,
    #[serde(default)]
    pub sha1: Option<String>,
}

impl ManifestEntry {
    pub fn is_release(&self) -> bool {
        self.kind.eq_ignore_ascii_case(RELEASE_TYPE)
    }
}

/// Per-version document referenced by a [`ManifestEntry`].
#[derive(Debug, Clone, Deserialize)]
pub struct VersionDetails {
    pub id: String,
    #[serde(default)]
    pub downloads: VersionDownloads,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionDownloads {
    #[serde(default)]
    pub server: Option<DownloadArtifact>,
    #[serde(default)]
    pub client: Option<DownloadArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadArtifact {
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}
