//! Durable storage of the fleet document.

use crate::error::{Error, Result};
use crate::instance::Instance;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the fleet document inside the config directory.
pub const FLEET_DOCUMENT: &str = "servers.json";

/// Persistence collaborator of the registry.
///
/// `save` always receives the whole fleet; implementations replace the
/// previous document rather than patching it.
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// Read all instances. A store that was never written is an empty fleet.
    async fn load(&self) -> Result<Vec<Instance>>;

    /// Replace the stored fleet with `instances`.
    async fn save(&self, instances: &[Instance]) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FleetDocument {
    #[serde(default)]
    instances: Vec<Instance>,
}

/// [`FleetStore`] writing a pretty-printed JSON document.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the document, so a reader never sees a torn file. Concurrent saves
/// are serialized.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    save_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FleetStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Instance>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No fleet document, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let document: FleetDocument = serde_json::from_str(&contents).map_err(|e| {
            Error::ConfigParse(format!(
                "Failed to parse fleet document {}: {}",
                self.path.display(),
                e
            ))
        })?;
        tracing::debug!(count = document.instances.len(), "Loaded fleet document");
        Ok(document.instances)
    }

    async fn save(&self, instances: &[Instance]) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        let document = FleetDocument {
            instances: instances.to_vec(),
        };
        let content = serde_json::to_string_pretty(&document)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&path, content.as_bytes()))
            .await
            .map_err(|e| Error::Other(format!("Save task failed: {}", e)))??;

        tracing::debug!(path = %self.path.display(), count = instances.len(), "Saved fleet document");
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(bytes)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
