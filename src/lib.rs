/*!
 # mc-fleet

 A Rust library for supervising a fleet of Minecraft server instances on a
 single host.

 ## Overview

 mc-fleet provides functionality to:
 - Create instances from a curated (Paper) or canonical (vanilla) release
 - Resolve, download and cache the matching server artifact
 - Start, stop and monitor each instance's server process
 - Derive live status (readiness, players, memory) from console output
 - Persist the declared fleet and publish fleet events to observers

 ## Basic Usage

 ```no_run
 use mc_fleet::{FleetRegistry, Flavor, Result};
 use mc_fleet::config::FleetConfig;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Create a registry and load the persisted fleet
     let registry = FleetRegistry::from_config_file("fleet.json").await?;

     // Watch what happens to the fleet
     let mut events = registry.subscribe();
     tokio::spawn(async move {
         while let Ok(event) = events.recv().await {
             println!("{}: {}", event.kind(), event.snapshot().name());
         }
     });

     // Pick the newest curated version and create an instance from it
     let versions = registry.available_versions(Flavor::CuratedBuild).await?;
     let survival = registry.create("survival", &versions[0], Flavor::CuratedBuild).await?;

     // Start it and read its live status
     registry.start(survival.id()).await?;
     println!("{:?}", registry.status(survival.id()));

     // Stop everything before exiting
     registry.stop_all().await?;
     Ok(())
 }
 ```

 ## Features

 - **Artifact cache**: idempotent, checksum-verified downloads, one build per version
 - **Process supervision**: graceful stop with bounded wait, then forced kill
 - **Crash detection**: unexpected exits are persisted and published
 - **Persistence**: atomic full-document rewrites of the fleet
 - **Events**: broadcast channel of instance added/removed/status changed
*/

pub mod artifact;
pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod paths;
pub mod runtime;
pub mod server;
pub mod store;

pub use config::{DeclaredConfig, FleetConfig};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventManager, FleetEvent};
pub use instance::{Flavor, Instance, InstanceId, InstanceSnapshot};
pub use server::{InstanceState, InstanceSupervisor, LiveStatus};

use artifact::{ArtifactDownloader, ArtifactResolver, HttpClient, ReqwestClient};
use chrono::Utc;
use config::{
    validate_declared_config, validate_fleet_config, validate_instance_name, validate_version,
};
use paths::{PathResolver, directory_key};
use runtime::{JavaRuntime, RuntimeResolver};
use server::{ConsoleLine, LifecycleRecord, SupervisorSettings};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, Weak};
use store::{FLEET_DOCUMENT, FleetStore, JsonFileStore};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// One registered instance and its supervisor.
struct Slot {
    id: InstanceId,
    record: Mutex<Instance>,
    supervisor: Arc<InstanceSupervisor>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Slot {
    fn record(&self) -> Instance {
        self.record.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn update<T>(&self, f: impl FnOnce(&mut Instance) -> T) -> T {
        let mut record = self.record.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut record)
    }

    fn name(&self) -> String {
        self.update(|r| r.name.clone())
    }

    fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance: self.record(),
            live: self.supervisor.status(),
        }
    }

    fn stop_watcher(&self) {
        let watcher = self.watcher.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
    }
}

/// Names held by in-flight creations, released on drop.
struct Reservation<'a> {
    pending: &'a Mutex<HashSet<String>>,
    keys: Vec<String>,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        for key in &self.keys {
            pending.remove(key);
        }
    }
}

fn name_keys(name: &str) -> Vec<String> {
    let mut keys = vec![name.trim().to_lowercase(), directory_key(name)];
    keys.dedup();
    keys
}

struct RegistryInner {
    paths: Arc<PathResolver>,
    downloader: ArtifactDownloader,
    runtime: Arc<dyn RuntimeResolver>,
    store: Arc<dyn FleetStore>,
    events: EventManager,
    settings: SupervisorSettings,
    slots: RwLock<Vec<Arc<Slot>>>,
    pending: Mutex<HashSet<String>>,
    save_lock: tokio::sync::Mutex<()>,
}

impl RegistryInner {
    fn slots(&self) -> Vec<Arc<Slot>> {
        self.slots.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn find_slot(&self, id: InstanceId) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    fn slot(&self, id: InstanceId) -> Result<Arc<Slot>> {
        self.find_slot(id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// Reserve `name` for a creation, failing if it collides with a
    /// registered instance or another creation in flight.
    fn reserve(&self, name: &str) -> Result<Reservation<'_>> {
        let keys = name_keys(name);
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());

        let taken = keys.iter().any(|k| pending.contains(k))
            || self
                .slots()
                .iter()
                .any(|slot| name_keys(&slot.name()).iter().any(|k| keys.contains(k)));
        if taken {
            tracing::warn!(instance = %name, "Instance name already in use");
            return Err(Error::DuplicateName(name.to_string()));
        }

        pending.extend(keys.iter().cloned());
        Ok(Reservation {
            pending: &self.pending,
            keys,
        })
    }

    fn register(self: &Arc<Self>, instance: Instance) -> Arc<Slot> {
        let directory = self.paths.instance_directory_path(&instance.name);
        let supervisor = Arc::new(InstanceSupervisor::new(
            instance.name.clone(),
            directory,
            Arc::clone(&self.runtime),
            self.settings.clone(),
        ));
        let slot = Arc::new(Slot {
            id: instance.id,
            record: Mutex::new(instance),
            supervisor,
            watcher: Mutex::new(None),
        });

        let watcher = self.spawn_watcher(&slot);
        *slot.watcher.lock().unwrap_or_else(|p| p.into_inner()) = Some(watcher);
        self.slots
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(Arc::clone(&slot));
        slot
    }

    /// Unregister an instance while keeping its name reserved until the
    /// returned guard drops, so its files can be removed before the name is
    /// reused.
    fn retire(&self, id: InstanceId) -> Option<(Arc<Slot>, Reservation<'_>)> {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let slot = self.unregister(id)?;
        let keys = name_keys(&slot.name());
        pending.extend(keys.iter().cloned());
        Some((
            slot,
            Reservation {
                pending: &self.pending,
                keys,
            },
        ))
    }

    fn unregister(&self, id: InstanceId) -> Option<Arc<Slot>> {
        let mut slots = self.slots.write().unwrap_or_else(|p| p.into_inner());
        let index = slots.iter().position(|s| s.id == id)?;
        let slot = slots.remove(index);
        slot.stop_watcher();
        Some(slot)
    }

    /// Propagate crashes detected by the supervisor into the registry.
    fn spawn_watcher(self: &Arc<Self>, slot: &Arc<Slot>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let weak_slot = Arc::downgrade(slot);
        let mut states = slot.supervisor.subscribe_state();

        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                if *states.borrow_and_update() != InstanceState::Crashed {
                    continue;
                }
                let (Some(registry), Some(slot)) = (registry.upgrade(), weak_slot.upgrade()) else {
                    break;
                };

                // Start failures are recorded by the start path itself.
                let crashed = slot.update(|r| {
                    if r.state == InstanceState::Running {
                        r.state = InstanceState::Crashed;
                        true
                    } else {
                        false
                    }
                });
                if !crashed {
                    continue;
                }

                tracing::warn!(instance = %slot.name(), instance_id = %slot.id, "Instance crashed");
                if let Err(e) = registry.persist().await {
                    tracing::error!(error = %e, "Failed to persist crashed state");
                }
                registry.events.send(FleetEvent::StatusChanged(slot.snapshot()));
            }
        })
    }

    /// Rewrite the whole fleet document.
    async fn persist(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let records: Vec<Instance> = self.slots().iter().map(|s| s.record()).collect();
        self.store.save(&records).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to save fleet document");
            e
        })
    }

    async fn remove_instance_files(&self, name: &str) {
        remove_dir_best_effort(&self.paths.instance_directory_path(name)).await;
        remove_dir_best_effort(&self.paths.backup_directory_path(name)).await;
    }
}

async fn remove_dir_best_effort(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => tracing::info!(path = %path.display(), "Removed directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove directory"),
    }
}

/// The fleet of server instances.
///
/// This struct is the main entry point: the only component that changes the
/// durable list of instances. It owns one [`InstanceSupervisor`] per
/// registered instance and keeps both collections in lock-step. Every
/// mutating operation ends with a full rewrite of the fleet document.
///
/// The registry is cheap to clone; clones share the same fleet. All public
/// async methods are instrumented with `tracing` spans.
#[derive(Clone)]
pub struct FleetRegistry {
    inner: Arc<RegistryInner>,
}

impl FleetRegistry {
    /// Create an empty registry with the default collaborators: a `reqwest`
    /// HTTP client, the Java runtime from `JAVA_HOME`/`PATH`, and the JSON
    /// fleet document in the config directory.
    ///
    /// Call [`load`](Self::load) to read the persisted fleet.
    pub fn new(config: FleetConfig) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&config)?);
        let paths = PathResolver::new(&config.base_directory);
        let store = Arc::new(JsonFileStore::new(paths.config_file(FLEET_DOCUMENT)?));
        Self::with_collaborators(config, http, Arc::new(JavaRuntime::new()), store)
    }

    /// Create an empty registry with explicit collaborators.
    #[tracing::instrument(skip_all, fields(base = %config.base_directory.display()))]
    pub fn with_collaborators(
        config: FleetConfig,
        http: Arc<dyn HttpClient>,
        runtime: Arc<dyn RuntimeResolver>,
        store: Arc<dyn FleetStore>,
    ) -> Result<Self> {
        validate_fleet_config(&config)?;

        let paths = Arc::new(PathResolver::new(&config.base_directory));
        paths.ensure_layout()?;

        let resolver = Arc::new(ArtifactResolver::new(Arc::clone(&http), &config));
        let downloader = ArtifactDownloader::new(resolver, http, Arc::clone(&paths));

        tracing::info!("Creating fleet registry");
        Ok(Self {
            inner: Arc::new(RegistryInner {
                paths,
                downloader,
                runtime,
                store,
                events: EventManager::default(),
                settings: SupervisorSettings::from_config(&config),
                slots: RwLock::new(Vec::new()),
                pending: Mutex::new(HashSet::new()),
                save_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Create a registry from a settings file and load the persisted fleet.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading fleet configuration from file");
        let config = FleetConfig::from_file(path)?;
        let registry = Self::new(config)?;
        registry.load().await?;
        Ok(registry)
    }

    /// Register the instances in the fleet document.
    ///
    /// Instances persisted while starting, running or stopping come back as
    /// `Stopped`; live status is never reconstructed. Entries whose id or name
    /// is already registered are skipped. Returns the number registered.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self) -> Result<usize> {
        let mut instances = self.inner.store.load().await?;
        instances.sort_by_key(|i| i.created_at);

        let mut registered = 0;
        let mut normalized = false;
        for mut instance in instances {
            if self.inner.find_slot(instance.id).is_some() {
                tracing::warn!(instance_id = %instance.id, "Skipping already registered instance");
                continue;
            }
            let Ok(_reservation) = self.inner.reserve(&instance.name) else {
                tracing::warn!(instance = %instance.name, "Skipping instance with duplicate name");
                continue;
            };

            if instance.state.is_active() {
                instance.state = InstanceState::Stopped;
                normalized = true;
            }
            self.inner.register(instance);
            registered += 1;
        }

        if normalized {
            self.inner.persist().await?;
        }
        tracing::info!(count = registered, "Loaded fleet");
        Ok(registered)
    }

    /// Create an instance and download its artifact.
    ///
    /// All-or-nothing: on any failure the instance is not registered and an
    /// instance directory created by this call is removed.
    ///
    /// # Errors
    ///
    /// * [`Error::DuplicateName`] if the name collides case-insensitively
    /// * [`Error::ConfigInvalid`] for an empty or overlong name, or a version
    ///   that is empty or not a plain path segment
    /// * Resolution, network and I/O errors from the download
    #[tracing::instrument(skip(self), fields(instance = %name, flavor = %flavor, version = %version))]
    pub async fn create(&self, name: &str, version: &str, flavor: Flavor) -> Result<InstanceSnapshot> {
        let name = name.trim();
        let version = version.trim();
        validate_instance_name(name)?;
        validate_version(version)?;

        let _reservation = self.inner.reserve(name)?;

        // Only a directory this call created may be removed on failure.
        let directory = self.inner.paths.instance_directory_path(name);
        let existed = directory.exists();

        tracing::info!("Creating instance");
        let artifact = match self.inner.downloader.download(name, flavor, version).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch artifact, discarding instance");
                if !existed {
                    remove_dir_best_effort(&directory).await;
                }
                return Err(e);
            }
        };

        let mut instance = Instance::new(name, version, flavor);
        instance.config.artifact_path = Some(artifact);
        let slot = self.inner.register(instance);

        if let Err(e) = self.inner.persist().await {
            self.inner.unregister(slot.id);
            if !existed {
                remove_dir_best_effort(&directory).await;
            }
            return Err(e);
        }

        let snapshot = slot.snapshot();
        tracing::info!(instance_id = %snapshot.id(), "Instance created");
        self.inner.events.send(FleetEvent::InstanceAdded(snapshot.clone()));
        Ok(snapshot)
    }

    /// Delete an instance, stopping it first.
    ///
    /// Unknown ids are a no-op. File removal is best effort; the instance is
    /// unregistered even when some files could not be deleted. The name
    /// cannot be reused until file removal has finished.
    #[tracing::instrument(skip(self), fields(instance_id = %id))]
    pub async fn delete(&self, id: InstanceId) -> Result<()> {
        let Some(slot) = self.inner.find_slot(id) else {
            tracing::debug!("Delete of unknown instance ignored");
            return Ok(());
        };

        if slot.supervisor.state().is_active() {
            if let Err(e) = self.stop(id).await {
                tracing::warn!(error = %e, "Failed to stop instance before deletion");
            }
        }

        let Some((slot, reservation)) = self.inner.retire(id) else {
            return Ok(());
        };
        let name = slot.name();
        self.inner.remove_instance_files(&name).await;
        drop(reservation);

        let saved = self.inner.persist().await;
        tracing::info!(instance = %name, "Instance deleted");
        self.inner.events.send(FleetEvent::InstanceRemoved(slot.snapshot()));
        saved
    }

    /// Start an instance's server process.
    ///
    /// The instance passes through `Starting` (published immediately) and ends
    /// `Running`, or `Crashed` when the process could not be started. The end
    /// state is persisted and published in both cases.
    #[tracing::instrument(skip(self), fields(instance_id = %id))]
    pub async fn start(&self, id: InstanceId) -> Result<InstanceSnapshot> {
        let slot = self.inner.slot(id)?;
        if slot.supervisor.state().is_active() {
            return Err(Error::AlreadyRunning);
        }

        let config = slot.update(|r| {
            r.state = InstanceState::Starting;
            r.config.clone()
        });
        self.inner.events.send(FleetEvent::StatusChanged(slot.snapshot()));

        let result = slot.supervisor.start(&config).await;

        slot.update(|r| {
            r.state = match &result {
                Ok(()) | Err(Error::AlreadyRunning) => slot.supervisor.state(),
                Err(_) => InstanceState::Crashed,
            };
            if result.is_ok() && r.state == InstanceState::Running {
                r.last_started = Some(Utc::now());
            }
        });

        let saved = self.inner.persist().await;
        let snapshot = slot.snapshot();
        self.inner.events.send(FleetEvent::StatusChanged(snapshot.clone()));

        result?;
        saved?;
        Ok(snapshot)
    }

    /// Stop an instance's server process.
    ///
    /// A no-op for instances that are not running. Otherwise the instance
    /// passes through `Stopping` and ends `Stopped`, whether the process
    /// exited gracefully or had to be killed.
    #[tracing::instrument(skip(self), fields(instance_id = %id))]
    pub async fn stop(&self, id: InstanceId) -> Result<InstanceSnapshot> {
        let slot = self.inner.slot(id)?;
        if !slot.supervisor.state().is_active() {
            return Ok(slot.snapshot());
        }

        slot.update(|r| r.state = InstanceState::Stopping);
        self.inner.events.send(FleetEvent::StatusChanged(slot.snapshot()));

        let result = slot.supervisor.stop().await;

        slot.update(|r| {
            r.state = match &result {
                Ok(_) => InstanceState::Stopped,
                Err(_) => InstanceState::Crashed,
            }
        });

        let saved = self.inner.persist().await;
        let snapshot = slot.snapshot();
        self.inner.events.send(FleetEvent::StatusChanged(snapshot.clone()));

        result?;
        saved?;
        Ok(snapshot)
    }

    /// Stop every active instance concurrently.
    ///
    /// All instances are attempted; the first error is returned.
    #[tracing::instrument(skip(self))]
    pub async fn stop_all(&self) -> Result<()> {
        let active: Vec<InstanceId> = self
            .inner
            .slots()
            .iter()
            .filter(|s| s.supervisor.state().is_active())
            .map(|s| s.id)
            .collect();

        tracing::info!(count = active.len(), "Stopping all instances");
        let results = futures::future::join_all(active.into_iter().map(|id| self.stop(id))).await;

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to stop instance");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Replace an instance's declared configuration.
    ///
    /// Takes effect on the next start. The previous configuration is kept if
    /// the fleet document cannot be written.
    #[tracing::instrument(skip(self, config), fields(instance_id = %id))]
    pub async fn update_config(&self, id: InstanceId, config: DeclaredConfig) -> Result<InstanceSnapshot> {
        validate_declared_config(&config)?;
        let slot = self.inner.slot(id)?;

        let previous = slot.update(|r| std::mem::replace(&mut r.config, config));
        if let Err(e) = self.inner.persist().await {
            slot.update(|r| r.config = previous);
            return Err(e);
        }

        tracing::info!("Instance configuration updated");
        Ok(slot.snapshot())
    }

    /// Send a console command to a running instance.
    #[tracing::instrument(skip(self), fields(instance_id = %id))]
    pub async fn send_command(&self, id: InstanceId, command: &str) -> Result<()> {
        let slot = self.inner.slot(id)?;
        slot.supervisor.send_command(command).await
    }

    /// All instances, in creation order.
    pub fn list(&self) -> Vec<InstanceSnapshot> {
        self.inner.slots().iter().map(|s| s.snapshot()).collect()
    }

    pub fn get(&self, id: InstanceId) -> Option<InstanceSnapshot> {
        self.inner.find_slot(id).map(|s| s.snapshot())
    }

    /// Look up an instance by name, case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Option<InstanceSnapshot> {
        let wanted = name.trim().to_lowercase();
        self.inner
            .slots()
            .iter()
            .find(|s| s.name().to_lowercase() == wanted)
            .map(|s| s.snapshot())
    }

    pub fn is_running(&self, id: InstanceId) -> bool {
        self.inner
            .find_slot(id)
            .is_some_and(|s| s.supervisor.status().running)
    }

    /// Live status of an instance. Never blocks on the process.
    pub fn status(&self, id: InstanceId) -> Option<LiveStatus> {
        self.inner.find_slot(id).map(|s| s.supervisor.status())
    }

    /// The last `limit` console lines of an instance, oldest first.
    pub fn console(&self, id: InstanceId, limit: usize) -> Option<Vec<ConsoleLine>> {
        self.inner
            .find_slot(id)
            .map(|s| s.supervisor.recent_output(limit))
    }

    /// Lifecycle history of an instance, newest first.
    pub fn lifecycle_events(&self, id: InstanceId, limit: Option<usize>) -> Result<Vec<LifecycleRecord>> {
        self.inner.slot(id)?.supervisor.lifecycle_events(limit)
    }

    /// Installable versions of a flavor, newest first.
    pub async fn available_versions(&self, flavor: Flavor) -> Result<Vec<String>> {
        self.inner.downloader.resolver().list_versions(flavor).await
    }

    pub async fn is_version_valid(&self, flavor: Flavor, version: &str) -> Result<bool> {
        self.inner
            .downloader
            .resolver()
            .is_version_valid(flavor, version)
            .await
    }

    /// Subscribe to fleet events.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.inner.events.subscribe()
    }

    pub fn paths(&self) -> &PathResolver {
        &self.inner.paths
    }

    pub fn len(&self) -> usize {
        self.inner.slots.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FleetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetRegistry")
            .field("base", &self.inner.paths.base_dir())
            .field("instances", &self.len())
            .finish()
    }
}
