#![cfg(unix)]

mod common;

use common::*;
use mc_fleet::config::DeclaredConfig;
use mc_fleet::error::{Error, Result};
use mc_fleet::store::{FLEET_DOCUMENT, JsonFileStore};
use mc_fleet::{FleetEvent, FleetRegistry, Flavor, InstanceState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

static BUILDS: [(u32, &str); 2] = [(3, "default"), (4, "default")];

fn document_path(base: &Path) -> PathBuf {
    base.join("config").join(FLEET_DOCUMENT)
}

fn registry_with_runtime(temp: &TempDir, runtime: MockRuntime) -> Result<FleetRegistry> {
    FleetRegistry::with_collaborators(
        test_config(temp.path()),
        Arc::new(curated_catalog("1.20.4", &BUILDS)),
        Arc::new(runtime),
        Arc::new(JsonFileStore::new(document_path(temp.path()))),
    )
}

fn registry(temp: &TempDir) -> Result<FleetRegistry> {
    let engine = write_script(temp.path(), "engine.sh", ENGINE);
    registry_with_runtime(temp, runtime_at(engine))
}

fn read_document(base: &Path) -> serde_json::Value {
    let contents = std::fs::read_to_string(document_path(base)).unwrap();
    serde_json::from_str(&contents).unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<FleetEvent>) -> FleetEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("no fleet event")
        .expect("event channel closed")
}

async fn next_status(events: &mut broadcast::Receiver<FleetEvent>) -> InstanceState {
    match next_event(events).await {
        FleetEvent::StatusChanged(snapshot) => snapshot.state(),
        other => panic!("expected a status change, got {}", other.kind()),
    }
}

#[tokio::test]
async fn test_create_downloads_and_persists() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;
    let mut events = registry.subscribe();

    let created = registry.create("Survival", "1.20.4", Flavor::CuratedBuild).await?;

    assert_eq!(created.name(), "Survival");
    assert_eq!(created.state(), InstanceState::Stopped);
    let artifact = created.instance.config.artifact_path.clone().unwrap();
    assert!(artifact.ends_with("paper-1.20.4-4.jar"));
    assert_eq!(std::fs::read(&artifact)?, jar_content("1.20.4", 4));

    match next_event(&mut events).await {
        FleetEvent::InstanceAdded(snapshot) => assert_eq!(snapshot.id(), created.id()),
        other => panic!("unexpected event {}", other.kind()),
    }

    let document = read_document(temp.path());
    let instances = document["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["id"], created.id().to_string());
    assert_eq!(instances[0]["name"], "Survival");
    assert_eq!(instances[0]["flavor"], "curated-build");
    assert_eq!(instances[0]["state"], "stopped");

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.find_by_name("survival").map(|s| s.id()), Some(created.id()));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_creates_with_same_name() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;

    let (first, second) = tokio::join!(
        registry.create("Survival", "1.20.4", Flavor::CuratedBuild),
        registry.create("survival", "1.20.4", Flavor::CuratedBuild),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::DuplicateName(_))))
            .count(),
        1
    );
    assert_eq!(registry.len(), 1);

    let again = registry.create("  SURVIVAL ", "1.20.4", Flavor::CuratedBuild).await;
    assert!(matches!(again, Err(Error::DuplicateName(_))));
    assert_eq!(read_document(temp.path())["instances"].as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_create_leaves_nothing_behind() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;

    let err = registry
        .create("beta", "9.9.9", Flavor::CuratedBuild)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::VersionNotFound { .. }));
    assert!(registry.is_empty());
    assert!(!registry.paths().instance_directory_path("beta").exists());
    assert!(!document_path(temp.path()).exists());

    // The name is free again.
    registry.create("beta", "1.20.4", Flavor::CuratedBuild).await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_names_are_rejected() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;

    let long = "x".repeat(65);
    for name in ["", "   ", long.as_str()] {
        let result = registry.create(name, "1.20.4", Flavor::CuratedBuild).await;
        assert!(matches!(result, Err(Error::ConfigInvalid(_))), "accepted {:?}", name);
    }
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_versions_outside_one_path_segment_are_rejected() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;

    for version in ["", "1.20.4/../../1.8", "1.20.4?build=1", "1.20.4#x"] {
        let result = registry.create("alpha", version, Flavor::CuratedBuild).await;
        assert!(matches!(result, Err(Error::ConfigInvalid(_))), "accepted {:?}", version);
    }
    assert!(registry.is_empty());
    assert!(!registry.paths().instance_directory_path("alpha").exists());
    Ok(())
}

#[tokio::test]
async fn test_recreate_while_deleting_keeps_new_artifact() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;
    let mut current = registry.create("phoenix", "1.20.4", Flavor::CuratedBuild).await?;

    for _ in 0..20 {
        let recreate = async {
            loop {
                match registry.create("phoenix", "1.20.4", Flavor::CuratedBuild).await {
                    Err(Error::DuplicateName(_)) => tokio::task::yield_now().await,
                    other => break other,
                }
            }
        };
        let (deleted, recreated) = tokio::join!(registry.delete(current.id()), recreate);
        deleted?;
        current = recreated?;

        let artifact = current.instance.config.artifact_path.clone().unwrap();
        assert!(artifact.is_file(), "{} was removed", artifact.display());
        assert_eq!(registry.len(), 1);
    }

    let document = read_document(temp.path());
    let instances = document["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["id"], current.id().to_string());
    Ok(())
}

#[tokio::test]
async fn test_start_and_stop_publish_transitions() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;
    let created = registry.create("lobby", "1.20.4", Flavor::CuratedBuild).await?;
    let id = created.id();
    let mut events = registry.subscribe();

    let started = registry.start(id).await?;
    assert_eq!(started.state(), InstanceState::Running);
    assert!(started.instance.last_started.is_some());
    assert!(registry.is_running(id));
    assert_eq!(next_status(&mut events).await, InstanceState::Starting);
    assert_eq!(next_status(&mut events).await, InstanceState::Running);
    assert_eq!(read_document(temp.path())["instances"][0]["state"], "running");

    assert!(matches!(registry.start(id).await, Err(Error::AlreadyRunning)));

    assert!(wait_until(|| registry.status(id).is_some_and(|s| s.ready)).await);
    registry.send_command(id, "join").await?;
    assert!(wait_until(|| registry.status(id).is_some_and(|s| s.players == 1)).await);

    let stopped = registry.stop(id).await?;
    assert_eq!(stopped.state(), InstanceState::Stopped);
    assert_eq!(next_status(&mut events).await, InstanceState::Stopping);
    assert_eq!(next_status(&mut events).await, InstanceState::Stopped);
    assert_eq!(read_document(temp.path())["instances"][0]["state"], "stopped");
    assert!(!registry.is_running(id));
    assert_eq!(registry.status(id).unwrap().players, 0);

    // Stopping again is a no-op.
    assert_eq!(registry.stop(id).await?.state(), InstanceState::Stopped);
    assert!(events.try_recv().is_err());

    let history = registry.lifecycle_events(id, None)?;
    assert!(history.len() >= 3);
    assert!(!registry.console(id, 100).unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_start_failure_is_persisted_as_crashed() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let mut runtime = MockRuntime::new();
    runtime
        .expect_default_path()
        .returning(|| PathBuf::from("/nonexistent/java"));
    runtime.expect_is_valid().returning(|_| false);
    let registry = registry_with_runtime(&temp, runtime)?;
    let created = registry.create("broken", "1.20.4", Flavor::CuratedBuild).await?;
    let mut events = registry.subscribe();

    let err = registry.start(created.id()).await.unwrap_err();

    assert!(matches!(err, Error::InvalidRuntime(_)));
    assert_eq!(next_status(&mut events).await, InstanceState::Starting);
    assert_eq!(next_status(&mut events).await, InstanceState::Crashed);
    let snapshot = registry.get(created.id()).unwrap();
    assert_eq!(snapshot.state(), InstanceState::Crashed);
    assert!(!snapshot.live.running);
    assert_eq!(read_document(temp.path())["instances"][0]["state"], "crashed");
    Ok(())
}

#[tokio::test]
async fn test_crash_is_propagated_and_persisted() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;
    let id = registry.create("flaky", "1.20.4", Flavor::CuratedBuild).await?.id();
    registry.start(id).await?;
    assert!(wait_until(|| registry.status(id).is_some_and(|s| s.ready)).await);
    let mut events = registry.subscribe();

    registry.send_command(id, "crash").await?;

    assert_eq!(next_status(&mut events).await, InstanceState::Crashed);
    assert_eq!(registry.get(id).unwrap().state(), InstanceState::Crashed);
    assert!(!registry.is_running(id));
    assert_eq!(read_document(temp.path())["instances"][0]["state"], "crashed");

    let restarted = registry.start(id).await?;
    assert_eq!(restarted.state(), InstanceState::Running);
    registry.stop_all().await?;
    assert_eq!(registry.get(id).unwrap().state(), InstanceState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_delete_running_instance() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;
    let keep = registry.create("keep", "1.20.4", Flavor::CuratedBuild).await?;
    let doomed = registry.create("doomed", "1.20.4", Flavor::CuratedBuild).await?;
    let directory = registry.paths().instance_directory_path("doomed");
    registry.start(doomed.id()).await?;
    let mut events = registry.subscribe();

    registry.delete(doomed.id()).await?;

    assert_eq!(next_status(&mut events).await, InstanceState::Stopping);
    assert_eq!(next_status(&mut events).await, InstanceState::Stopped);
    match next_event(&mut events).await {
        FleetEvent::InstanceRemoved(snapshot) => assert_eq!(snapshot.id(), doomed.id()),
        other => panic!("unexpected event {}", other.kind()),
    }

    assert!(!directory.exists());
    assert!(registry.get(doomed.id()).is_none());
    assert!(registry.get(keep.id()).is_some());
    let document = read_document(temp.path());
    let instances = document["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["name"], "keep");

    // Deleting again is a no-op.
    registry.delete(doomed.id()).await?;
    assert!(events.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_update_config() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;
    let created = registry.create("tuned", "1.20.4", Flavor::CuratedBuild).await?;

    let mut config = created.instance.config.clone();
    config.memory_max_mb = 4096;
    config.port = 25600;
    let updated = registry.update_config(created.id(), config).await?;
    assert_eq!(updated.instance.config.memory_max_mb, 4096);

    let document = read_document(temp.path());
    assert_eq!(document["instances"][0]["config"]["memoryMaxMb"], 4096);
    assert_eq!(document["instances"][0]["config"]["port"], 25600);

    let invalid = DeclaredConfig {
        memory_min_mb: 8192,
        memory_max_mb: 1024,
        ..updated.instance.config.clone()
    };
    let err = registry.update_config(created.id(), invalid).await.unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid(_)));
    assert_eq!(
        registry.get(created.id()).unwrap().instance.config.memory_max_mb,
        4096
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_config_does_not_wait_for_another_start() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let engine = write_script(temp.path(), "engine.sh", ENGINE);
    let mut runtime = MockRuntime::new();
    runtime.expect_default_path().returning(move || engine.clone());
    runtime.expect_is_valid().returning(|_| {
        std::thread::sleep(Duration::from_millis(1500));
        true
    });
    let registry = registry_with_runtime(&temp, runtime)?;
    let slow = registry.create("slow", "1.20.4", Flavor::CuratedBuild).await?.id();
    let other = registry.create("other", "1.20.4", Flavor::CuratedBuild).await?;

    let starting = tokio::spawn({
        let registry = registry.clone();
        async move { registry.start(slow).await }
    });
    assert!(
        wait_until(|| registry
            .get(slow)
            .is_some_and(|s| s.state() == InstanceState::Starting))
        .await
    );

    let mut config = other.instance.config.clone();
    config.motd = "Still responsive".to_string();
    let updated = tokio::time::timeout(
        Duration::from_millis(1000),
        registry.update_config(other.id(), config),
    )
    .await
    .expect("update_config waited for another instance's start")?;

    assert_eq!(updated.instance.config.motd, "Still responsive");
    assert!(!starting.is_finished());

    let started = starting.await.unwrap()?;
    assert_eq!(started.state(), InstanceState::Running);
    assert_eq!(
        read_document(temp.path())["instances"][1]["config"]["motd"],
        "Still responsive"
    );
    registry.stop_all().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_ids() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let registry = registry(&temp)?;
    let other = tempfile::tempdir()?;
    let stranger = registry_with_runtime(&other, MockRuntime::new())?;
    let id = stranger.create("elsewhere", "1.20.4", Flavor::CuratedBuild).await?.id();

    assert!(matches!(registry.start(id).await, Err(Error::InstanceNotFound(_))));
    assert!(matches!(registry.stop(id).await, Err(Error::InstanceNotFound(_))));
    assert!(matches!(
        registry.send_command(id, "list").await,
        Err(Error::InstanceNotFound(_))
    ));
    assert!(registry.get(id).is_none());
    registry.delete(id).await?;
    Ok(())
}

#[tokio::test]
async fn test_load_normalizes_active_states() -> Result<()> {
    init_tracing();
    let temp = tempfile::tempdir()?;
    let id = {
        let registry = registry(&temp)?;
        let id = registry.create("persisted", "1.20.4", Flavor::CuratedBuild).await?.id();
        registry.create("idle", "1.20.4", Flavor::CuratedBuild).await?;
        id
    };

    // Simulate a host that went down while the instance was running.
    let mut document = read_document(temp.path());
    document["instances"][0]["state"] = serde_json::json!("running");
    std::fs::write(document_path(temp.path()), document.to_string())?;

    let registry = registry(&temp)?;
    assert_eq!(registry.load().await?, 2);

    let loaded = registry.get(id).unwrap();
    assert_eq!(loaded.name(), "persisted");
    assert_eq!(loaded.state(), InstanceState::Stopped);
    assert!(!loaded.live.running);
    assert_eq!(read_document(temp.path())["instances"][0]["state"], "stopped");

    let names: Vec<String> = registry.list().iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["persisted", "idle"]);

    // Loading twice registers nothing new.
    assert_eq!(registry.load().await?, 0);
    assert_eq!(registry.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_available_versions() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let mut http = MockHttp::new();
    http.expect_get_text()
        .returning(|_| Ok(project_json(&["1.19.4", "1.20.4", "1.20"])));
    let engine = write_script(temp.path(), "engine.sh", ENGINE);
    let registry = FleetRegistry::with_collaborators(
        test_config(temp.path()),
        Arc::new(http),
        Arc::new(runtime_at(engine)),
        Arc::new(JsonFileStore::new(document_path(temp.path()))),
    )?;

    let versions = registry.available_versions(Flavor::CuratedBuild).await?;
    assert_eq!(versions, vec!["1.20.4", "1.20", "1.19.4"]);
    assert!(registry.is_version_valid(Flavor::CuratedBuild, "1.20").await?);
    assert!(!registry.is_version_valid(Flavor::CuratedBuild, "1.21").await?);
    Ok(())
}
