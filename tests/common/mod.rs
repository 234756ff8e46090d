#![allow(dead_code)]

use async_trait::async_trait;
use mc_fleet::artifact::{ByteStream, HttpClient};
use mc_fleet::config::FleetConfig;
use mc_fleet::error::Result;
use mc_fleet::runtime::RuntimeResolver;
use mockall::mock;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_BASE: &str = "https://api.test/v2";
pub const MANIFEST_URL: &str = "https://meta.test/mc/game/version_manifest_v2.json";

mock! {
    pub Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn get_text(&self, url: &str) -> Result<String>;
        async fn get_stream(&self, url: &str) -> Result<ByteStream>;
    }
}

mock! {
    pub Runtime {}

    #[async_trait]
    impl RuntimeResolver for Runtime {
        fn default_path(&self) -> PathBuf;
        async fn is_valid(&self, path: &Path) -> bool;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config(base: &Path) -> FleetConfig {
    let mut config = FleetConfig::default().with_base_directory(base);
    config.curated_api_base = API_BASE.to_string();
    config.canonical_manifest_url = MANIFEST_URL.to_string();
    config.stop_timeout_secs = 2;
    config.sample_interval_ms = 50;
    config
}

pub fn byte_stream(chunks: Vec<Result<Vec<u8>>>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks))
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn project_json(versions: &[&str]) -> String {
    serde_json::json!({
        "project_id": "paper",
        "project_name": "Paper",
        "version_groups": ["1.20"],
        "versions": versions,
    })
    .to_string()
}

/// Builds list where every `(build, channel)` pair ships an application jar
/// whose checksum matches `jar_content(version, build)`.
pub fn builds_json(version: &str, builds: &[(u32, &str)]) -> String {
    let builds: Vec<_> = builds
        .iter()
        .map(|(build, channel)| {
            serde_json::json!({
                "build": build,
                "time": "2024-01-01T00:00:00.000Z",
                "channel": channel,
                "promoted": false,
                "changes": [],
                "downloads": {
                    "application": {
                        "name": format!("paper-{}-{}.jar", version, build),
                        "sha256": sha256_hex(&jar_content(version, *build)),
                    }
                }
            })
        })
        .collect();

    serde_json::json!({
        "project_id": "paper",
        "project_name": "Paper",
        "version": version,
        "builds": builds,
    })
    .to_string()
}

pub fn jar_content(version: &str, build: u32) -> Vec<u8> {
    format!("jar {} {}", version, build).into_bytes()
}

pub fn builds_url(version: &str) -> String {
    format!("{}/projects/paper/versions/{}/builds", API_BASE, version)
}

pub fn download_url(version: &str, build: u32) -> String {
    format!(
        "{}/projects/paper/versions/{}/builds/{}/downloads/paper-{}-{}.jar",
        API_BASE, version, build, version, build
    )
}

/// Mock serving a curated catalog where `version` has the given builds.
pub fn curated_catalog(version: &'static str, builds: &'static [(u32, &'static str)]) -> MockHttp {
    let mut http = MockHttp::new();
    http.expect_get_text()
        .returning(move |url| {
            if url == builds_url(version) {
                Ok(builds_json(version, builds))
            } else {
                Err(mc_fleet::Error::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                })
            }
        });
    http.expect_get_stream().returning(move |url| {
        let build = builds
            .iter()
            .map(|(b, _)| *b)
            .find(|b| url == download_url(version, *b));
        match build {
            Some(build) => Ok(byte_stream(vec![Ok(jar_content(version, build))])),
            None => Err(mc_fleet::Error::HttpStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    });
    http
}

/// Write an executable `/bin/sh` script standing in for the server runtime.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Engine that becomes ready, reacts to a few console commands and exits on `stop`.
pub const ENGINE: &str = r#"
echo "$@" > launch-args.txt
echo "[12:00:00] [Server thread/INFO]: Starting minecraft server"
echo '[12:00:01] [Server thread/INFO]: Done (1.234s)! For help, type "help"'
while read -r line; do
  case "$line" in
    stop) echo "[12:00:02] [Server thread/INFO]: Stopping the server"; exit 0 ;;
    join) echo "[12:00:02] [Server thread/INFO]: Steve joined the game" ;;
    leave) echo "[12:00:02] [Server thread/INFO]: Steve left the game" ;;
    mem) echo "[12:00:02] [Server thread/INFO]: * 768 MB" ;;
    crash) echo "boom" >&2; exit 3 ;;
  esac
done
"#;

/// Engine that clamps the player cap on start-up.
pub const CLAMPING_ENGINE: &str = r#"
sed 's/^max-players=.*/max-players=5/' server.properties > server.properties.tmp && mv server.properties.tmp server.properties
echo '[12:00:01] [Server thread/INFO]: Done (0.5s)! For help, type "help"'
while read -r line; do
  case "$line" in
    stop) exit 0 ;;
  esac
done
"#;

/// Engine that ignores the stop command.
pub const STUBBORN_ENGINE: &str = r#"
echo '[12:00:01] [Server thread/INFO]: Done (0.5s)! For help, type "help"'
while read -r line; do
  :
done
"#;

pub fn runtime_at(path: PathBuf) -> MockRuntime {
    let mut runtime = MockRuntime::new();
    runtime.expect_default_path().returning(move || path.clone());
    runtime.expect_is_valid().returning(|_| true);
    runtime
}

/// Poll `condition` until it holds or ten seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
