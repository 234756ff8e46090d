//! Instance data model.

use crate::config::DeclaredConfig;
use crate::server::{InstanceState, LiveStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an instance.
///
/// Generated once at creation and never reused; independent of the display
/// name, which may be edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Upstream catalog an instance's artifact comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flavor {
    /// Curated builds with a per-version build sequence (Paper).
    CuratedBuild,
    /// Canonical vanilla releases.
    CanonicalRelease,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::CuratedBuild => "curated-build",
            Flavor::CanonicalRelease => "canonical-release",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered server instance as it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Stable identity
    pub id: InstanceId,
    /// Display name, unique case-insensitively within the fleet
    pub name: String,
    /// Catalog the artifact is resolved from
    pub flavor: Flavor,
    /// Selected version id
    pub version: String,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the instance was last started successfully
    #[serde(default)]
    pub last_started: Option<DateTime<Utc>>,
    /// Last known lifecycle state
    #[serde(default)]
    pub state: InstanceState,
    /// Declared configuration
    #[serde(default)]
    pub config: DeclaredConfig,
}

impl Instance {
    pub(crate) fn new(name: &str, version: &str, flavor: Flavor) -> Self {
        Self {
            id: InstanceId::new(),
            name: name.to_string(),
            flavor,
            version: version.to_string(),
            created_at: Utc::now(),
            last_started: None,
            state: InstanceState::Stopped,
            config: DeclaredConfig::for_instance(name),
        }
    }
}

/// Declared and derived state of one instance at a point in time.
///
/// This is what fleet events carry and what listing operations return.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSnapshot {
    /// Persisted record
    pub instance: Instance,
    /// Live counters from the supervisor
    pub live: LiveStatus,
}

impl InstanceSnapshot {
    pub fn id(&self) -> InstanceId {
        self.instance.id
    }

    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn state(&self) -> InstanceState {
        self.instance.state
    }
}
