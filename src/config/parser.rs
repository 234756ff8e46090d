use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default curated-build catalog base URL.
pub const DEFAULT_CURATED_API_BASE: &str = "https://api.papermc.io/v2";
/// Default curated-build project.
pub const DEFAULT_CURATED_PROJECT: &str = "paper";
/// Default canonical-release manifest URL.
pub const DEFAULT_CANONICAL_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Game difficulty written to the generated properties file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// No hostile mobs.
    Peaceful,
    /// Easy.
    Easy,
    /// Normal, the engine default.
    #[default]
    Normal,
    /// Hard.
    Hard,
}

impl Difficulty {
    /// Value used in the properties file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Peaceful => "peaceful",
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "peaceful" | "0" => Ok(Difficulty::Peaceful),
            "easy" | "1" => Ok(Difficulty::Easy),
            "normal" | "2" => Ok(Difficulty::Normal),
            "hard" | "3" => Ok(Difficulty::Hard),
            other => Err(Error::ConfigInvalid(format!("Unknown difficulty '{}'", other))),
        }
    }
}

/// Declared (persisted) configuration of a single server instance.
///
/// This is the user's intent for an instance. It is only changed through
/// [`FleetRegistry::update_config`](crate::FleetRegistry::update_config) and
/// takes effect on the next start; live, process-derived values live in
/// [`LiveStatus`](crate::server::LiveStatus) instead.
///
/// # Examples
///
/// ```
/// use mc_fleet::config::{DeclaredConfig, Difficulty};
///
/// let mut config = DeclaredConfig::for_instance("survival");
/// config.max_players = 8;
/// config.difficulty = Difficulty::Hard;
/// assert_eq!(config.motd, "A Minecraft Server - survival");
/// assert!(config.memory_min_mb <= config.memory_max_mb);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeclaredConfig {
    /// Initial heap size in megabytes (`-Xms`).
    pub memory_min_mb: u32,
    /// Maximum heap size in megabytes (`-Xmx`).
    pub memory_max_mb: u32,
    /// Game port.
    pub port: u16,
    /// Address the server binds to.
    pub bind_address: String,
    /// Name of the world directory.
    pub world_name: String,
    /// Player cap.
    pub max_players: u32,
    /// Game difficulty.
    pub difficulty: Difficulty,
    /// Whether command blocks are enabled.
    pub enable_command_block: bool,
    /// Whether players are authenticated against the account service.
    pub online_mode: bool,
    /// Message of the day.
    pub motd: String,
    /// Whether the query protocol is enabled.
    pub enable_query: bool,
    /// Port of the query protocol.
    pub query_port: u16,
    /// Runtime executable override; resolved through the runtime collaborator when unset.
    pub runtime_path: Option<PathBuf>,
    /// Resolved server artifact.
    pub artifact_path: Option<PathBuf>,
}

impl Default for DeclaredConfig {
    fn default() -> Self {
        Self {
            memory_min_mb: 1024,
            memory_max_mb: 2048,
            port: 25565,
            bind_address: "0.0.0.0".to_string(),
            world_name: "world".to_string(),
            max_players: 20,
            difficulty: Difficulty::Normal,
            enable_command_block: false,
            online_mode: true,
            motd: "A Minecraft Server".to_string(),
            enable_query: true,
            query_port: 25565,
            runtime_path: None,
            artifact_path: None,
        }
    }
}

impl DeclaredConfig {
    /// Defaults for a freshly created instance.
    pub fn for_instance(name: &str) -> Self {
        Self {
            motd: format!("A Minecraft Server - {}", name),
            ..Default::default()
        }
    }
}

/// Fleet-wide settings.
///
/// Every field has a default, so an empty document (or no document at all)
/// is a valid configuration.
///
/// # JSON Schema
///
/// ```json
/// {
///   "baseDirectory": "/srv/mc-fleet",
///   "curatedApiBase": "https://api.papermc.io/v2",
///   "curatedProject": "paper",
///   "canonicalManifestUrl": "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json",
///   "httpTimeoutSecs": 30,
///   "stopTimeoutSecs": 10,
///   "sampleIntervalMs": 1000,
///   "consoleHistory": 1000
/// }
/// ```
///
/// # Examples
///
/// ```
/// use mc_fleet::config::FleetConfig;
///
/// let config = FleetConfig::parse_from_str(r#"{ "stopTimeoutSecs": 5 }"#).unwrap();
/// assert_eq!(config.stop_timeout_secs, 5);
/// assert_eq!(config.curated_project, "paper");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetConfig {
    /// Root of all on-disk state.
    pub base_directory: PathBuf,
    /// Base URL of the curated-build catalog.
    pub curated_api_base: String,
    /// Project name in the curated-build catalog.
    pub curated_project: String,
    /// URL of the canonical-release manifest.
    pub canonical_manifest_url: String,
    /// Timeout applied to every HTTP request.
    pub http_timeout_secs: u64,
    /// User-Agent header sent to both catalogs.
    pub user_agent: String,
    /// Bounded wait for a graceful stop before the process is killed.
    pub stop_timeout_secs: u64,
    /// Period of the per-instance sampler.
    pub sample_interval_ms: u64,
    /// Number of console lines kept per instance.
    pub console_history: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let base_directory = dirs::data_dir()
            .map(|d| d.join("mc-fleet"))
            .unwrap_or_else(|| PathBuf::from("mc-fleet"));
        Self {
            base_directory,
            curated_api_base: DEFAULT_CURATED_API_BASE.to_string(),
            curated_project: DEFAULT_CURATED_PROJECT.to_string(),
            canonical_manifest_url: DEFAULT_CANONICAL_MANIFEST_URL.to_string(),
            http_timeout_secs: 30,
            user_agent: concat!("mc-fleet/", env!("CARGO_PKG_VERSION")).to_string(),
            stop_timeout_secs: 10,
            sample_interval_ms: 1000,
            console_history: 1000,
        }
    }
}

impl FleetConfig {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else
    /// as JSON. A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file exists but cannot be read
    /// * The file contents do not match the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No fleet config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
        } else {
            Self::parse_from_str(&content)
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Use `base` as the root directory.
    pub fn with_base_directory(mut self, base: impl Into<PathBuf>) -> Self {
        self.base_directory = base.into();
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}
