//! Runtime (JVM) resolution.

use async_process::{Command, Stdio};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Marker printed by `java -version` on every vendor's JVM.
const VERSION_MARKER: &str = "version \"";

/// Locates and validates the runtime that executes server artifacts.
#[async_trait]
pub trait RuntimeResolver: Send + Sync {
    /// Runtime used when an instance does not declare one.
    fn default_path(&self) -> PathBuf;

    /// Whether `path` is a usable runtime.
    async fn is_valid(&self, path: &Path) -> bool;
}

/// Java runtime discovered through `JAVA_HOME` or `PATH`.
#[derive(Debug, Clone, Default)]
pub struct JavaRuntime;

impl JavaRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuntimeResolver for JavaRuntime {
    fn default_path(&self) -> PathBuf {
        if let Some(home) = std::env::var_os("JAVA_HOME") {
            let executable = if cfg!(windows) { "java.exe" } else { "java" };
            let candidate = PathBuf::from(home).join("bin").join(executable);
            if candidate.is_file() {
                return candidate;
            }
        }
        PathBuf::from("java")
    }

    async fn is_valid(&self, path: &Path) -> bool {
        let output = Command::new(path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) => {
                // The version banner goes to stderr.
                let text = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stderr),
                    String::from_utf8_lossy(&output.stdout)
                );
                let valid = text.contains(VERSION_MARKER);
                if !valid {
                    tracing::warn!(path = %path.display(), "Runtime did not report a version");
                }
                valid
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to probe runtime");
                false
            }
        }
    }
}
