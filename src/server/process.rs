use crate::config::{DeclaredConfig, FleetConfig};
use crate::error::{Error, Result};
use crate::runtime::RuntimeResolver;
use crate::server::classifier::{LineClassifier, LineSignal, VanillaLogClassifier};
use crate::server::lifecycle::{InstanceState, LifecycleEvent, LifecycleHistory, LifecycleRecord};
use crate::server::monitor::ProcessSampler;
use crate::server::properties;
use async_process::{ChildStdin, Command, Stdio};
use chrono::{DateTime, Utc};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Console command that asks the engine to save and exit.
const STOP_COMMAND: &str = "stop";

/// Ephemeral, process-derived status of an instance. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    /// A process is alive
    pub running: bool,
    /// The engine reported that initialization completed
    pub ready: bool,
    /// Players online, derived from console output
    pub players: u32,
    /// Effective player cap
    pub max_players: u32,
    /// Last memory figure the engine reported on its console, in megabytes
    pub memory_mb: u64,
    /// Resident set size of the process from the periodic sampler, in megabytes
    pub rss_mb: u64,
    /// OS process id
    pub pid: Option<u32>,
    /// When the current process was spawned
    pub started_at: Option<DateTime<Utc>>,
}

/// Which stream a console line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleStream {
    Stdout,
    Stderr,
}

/// One line of console output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    pub timestamp: DateTime<Utc>,
    pub stream: ConsoleStream,
    pub text: String,
}

/// How a [`InstanceSupervisor::stop`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The process exited after the stop command.
    Graceful,
    /// The process had to be killed.
    Forced,
}

/// Supervisor settings shared by all instances.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Bounded wait for a graceful stop
    pub stop_timeout: Duration,
    /// Memory sampling period
    pub sample_interval: Duration,
    /// Console lines kept
    pub console_history: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            sample_interval: Duration::from_secs(1),
            console_history: 1000,
        }
    }
}

impl SupervisorSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            stop_timeout: config.stop_timeout(),
            sample_interval: config.sample_interval(),
            console_history: config.console_history,
        }
    }
}

/// State touched by the reader tasks, the sampler, the exit watcher and callers.
struct Shared {
    name: String,
    directory: PathBuf,
    live: Arc<Mutex<LiveStatus>>,
    state: watch::Sender<InstanceState>,
    history: LifecycleHistory,
    console: Mutex<VecDeque<ConsoleLine>>,
    console_capacity: usize,
    classifier: Arc<dyn LineClassifier>,
    stop_requested: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: InstanceState) {
        self.state.send_replace(state);
    }

    fn record(&self, event: LifecycleEvent, details: Option<String>) {
        if let Err(e) = self.history.record_event(event, details) {
            tracing::warn!(instance = %self.name, error = %e, "Failed to record lifecycle event");
        }
    }

    fn update_live(&self, f: impl FnOnce(&mut LiveStatus)) {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut live);
    }

    fn push_console(&self, stream: ConsoleStream, text: String) {
        let mut console = self.console.lock().unwrap_or_else(|p| p.into_inner());
        console.push_back(ConsoleLine {
            timestamp: Utc::now(),
            stream,
            text,
        });
        while console.len() > self.console_capacity {
            console.pop_front();
        }
    }

    /// Apply one console line to the live status.
    fn process_line(self: &Arc<Self>, stream: ConsoleStream, line: &str) {
        match stream {
            ConsoleStream::Stdout => {
                tracing::debug!(target: "mc_fleet::console", instance = %self.name, "{}", line)
            }
            ConsoleStream::Stderr => {
                tracing::warn!(target: "mc_fleet::console", instance = %self.name, "{}", line)
            }
        }
        self.push_console(stream, line.to_string());

        match self.classifier.classify(line) {
            LineSignal::Ready => {
                let first = {
                    let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
                    !std::mem::replace(&mut live.ready, true)
                };
                if first {
                    tracing::info!(instance = %self.name, "Server is ready");
                    self.record(LifecycleEvent::Ready, None);
                    self.refresh_max_players();
                }
            }
            LineSignal::Memory(mb) => self.update_live(|live| live.memory_mb = mb),
            LineSignal::PlayerJoined => self.update_live(|live| live.players += 1),
            LineSignal::PlayerLeft => {
                self.update_live(|live| live.players = live.players.saturating_sub(1))
            }
            LineSignal::None => {}
        }
    }

    /// Read the effective player cap back once the engine has started.
    fn refresh_max_players(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            match properties::read_max_players(&shared.directory).await {
                Some(max_players) => {
                    tracing::debug!(instance = %shared.name, max_players, "Refreshed player cap");
                    shared.update_live(|live| live.max_players = max_players);
                }
                None => {
                    tracing::warn!(instance = %shared.name, "Could not read player cap from properties")
                }
            }
        });
    }

    /// Called by the exit watcher once the child has been reaped.
    fn on_exit(&self, code: Option<i32>) {
        self.update_live(|live| {
            live.running = false;
            live.ready = false;
            live.players = 0;
            live.pid = None;
        });

        if self.stop_requested.load(Ordering::SeqCst) {
            tracing::debug!(instance = %self.name, code = ?code, "Process exited after stop request");
            return;
        }

        tracing::error!(instance = %self.name, code = ?code, "Server process exited unexpectedly");
        self.record(
            LifecycleEvent::Crashed,
            Some(match code {
                Some(code) => format!("Exited with code {}", code),
                None => "Terminated by signal".to_string(),
            }),
        );
        self.set_state(InstanceState::Crashed);
    }
}

/// Handles of a spawned child process.
struct RunningProcess {
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<Option<i32>>>,
    readers: Vec<JoinHandle<()>>,
    watcher: JoinHandle<()>,
}

impl RunningProcess {
    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    fn abort_tasks(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Owns the child process of one instance and derives its live status.
///
/// All methods take `&self`; the supervisor is shared through an `Arc` by
/// the registry and its watcher task.
///
/// # Examples
///
/// ```no_run
/// use mc_fleet::config::DeclaredConfig;
/// use mc_fleet::runtime::JavaRuntime;
/// use mc_fleet::server::{InstanceSupervisor, SupervisorSettings};
/// use std::sync::Arc;
///
/// # async fn run() -> mc_fleet::error::Result<()> {
/// let supervisor = InstanceSupervisor::new(
///     "survival",
///     "/srv/mc-fleet/servers/survival",
///     Arc::new(JavaRuntime::new()),
///     SupervisorSettings::default(),
/// );
///
/// let mut config = DeclaredConfig::for_instance("survival");
/// config.artifact_path = Some("/srv/mc-fleet/servers/survival/paper-1.20.4-496.jar".into());
/// supervisor.start(&config).await?;
/// println!("{:?}", supervisor.status());
/// supervisor.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct InstanceSupervisor {
    shared: Arc<Shared>,
    runtime: Arc<dyn RuntimeResolver>,
    settings: SupervisorSettings,
    process: tokio::sync::Mutex<Option<RunningProcess>>,
}

impl InstanceSupervisor {
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        runtime: Arc<dyn RuntimeResolver>,
        settings: SupervisorSettings,
    ) -> Self {
        Self::with_classifier(name, directory, runtime, settings, Arc::new(VanillaLogClassifier))
    }

    /// Create a supervisor that interprets console output with `classifier`.
    pub fn with_classifier(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        runtime: Arc<dyn RuntimeResolver>,
        settings: SupervisorSettings,
        classifier: Arc<dyn LineClassifier>,
    ) -> Self {
        let (state, _) = watch::channel(InstanceState::Stopped);
        let shared = Arc::new(Shared {
            name: name.into(),
            directory: directory.into(),
            live: Arc::new(Mutex::new(LiveStatus::default())),
            state,
            history: LifecycleHistory::new(),
            console: Mutex::new(VecDeque::new()),
            console_capacity: settings.console_history,
            classifier,
            stop_requested: AtomicBool::new(false),
        });

        Self {
            shared,
            runtime,
            settings,
            process: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn directory(&self) -> &std::path::Path {
        &self.shared.directory
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<InstanceState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of the live counters. Never touches the process.
    pub fn status(&self) -> LiveStatus {
        self.shared
            .live
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Recent lifecycle events, newest first.
    pub fn lifecycle_events(&self, limit: Option<usize>) -> Result<Vec<LifecycleRecord>> {
        self.shared.history.events(limit)
    }

    /// The last `limit` console lines, oldest first.
    pub fn recent_output(&self, limit: usize) -> Vec<ConsoleLine> {
        let console = self.shared.console.lock().unwrap_or_else(|p| p.into_inner());
        let skip = console.len().saturating_sub(limit);
        console.iter().skip(skip).cloned().collect()
    }

    /// Launch the server process.
    ///
    /// Fails with [`Error::AlreadyRunning`] when a process is alive. Any other
    /// failure leaves the supervisor in [`InstanceState::Crashed`] with no
    /// process and no sampler.
    #[tracing::instrument(skip(self, config), fields(instance = %self.shared.name))]
    pub async fn start(&self, config: &DeclaredConfig) -> Result<()> {
        let mut process = self.process.lock().await;

        if process.as_ref().is_some_and(|p| !p.has_exited()) {
            return Err(Error::AlreadyRunning);
        }
        *process = None;

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.set_state(InstanceState::Starting);
        tracing::info!("Starting server");

        match self.launch(config).await {
            Ok(running) => {
                *process = Some(running);
                // The watcher may already have marked a crash.
                self.shared.state.send_if_modified(|state| {
                    if *state == InstanceState::Starting {
                        *state = InstanceState::Running;
                        true
                    } else {
                        false
                    }
                });
                self.shared.record(LifecycleEvent::Started, None);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start server");
                self.shared.record(LifecycleEvent::StartFailed, Some(e.to_string()));
                self.shared.set_state(InstanceState::Crashed);
                Err(e)
            }
        }
    }

    async fn launch(&self, config: &DeclaredConfig) -> Result<RunningProcess> {
        let artifact = config
            .artifact_path
            .clone()
            .ok_or_else(|| Error::ConfigInvalid("No server artifact declared".to_string()))?;
        if !artifact.is_file() {
            return Err(Error::ArtifactMissing(artifact));
        }

        let runtime = config
            .runtime_path
            .clone()
            .unwrap_or_else(|| self.runtime.default_path());
        if !self.runtime.is_valid(&runtime).await {
            return Err(Error::InvalidRuntime(runtime));
        }

        let directory = &self.shared.directory;
        tokio::fs::create_dir_all(directory).await?;
        properties::write_eula(directory).await?;
        properties::write_properties(directory, config).await?;

        let mut command = Command::new(&runtime);
        command
            .arg(format!("-Xmx{}M", config.memory_max_mb))
            .arg(format!("-Xms{}M", config.memory_min_mb))
            .arg("-jar")
            .arg(&artifact)
            .arg("nogui")
            .current_dir(directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start process: {}", e)))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tracing::info!(pid, runtime = %runtime.display(), artifact = %artifact.display(), "Process spawned");

        self.shared.update_live(|live| {
            *live = LiveStatus {
                running: true,
                ready: false,
                players: 0,
                max_players: config.max_players,
                memory_mb: 0,
                rss_mb: 0,
                pid: Some(pid),
                started_at: Some(Utc::now()),
            }
        });

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            readers.push(spawn_reader(Arc::clone(&self.shared), ConsoleStream::Stdout, stdout));
        }
        if let Some(stderr) = stderr {
            readers.push(spawn_reader(Arc::clone(&self.shared), ConsoleStream::Stderr, stderr));
        }

        let mut sampler = ProcessSampler::start(
            pid,
            self.settings.sample_interval,
            Arc::clone(&self.shared.live),
        );

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let shared = Arc::clone(&self.shared);
        let watcher = tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.status() => Some(status),
                _ = kill_rx => None,
            };
            let status = match outcome {
                Some(status) => status,
                None => {
                    if let Err(e) = child.kill() {
                        tracing::warn!(instance = %shared.name, error = %e, "Failed to kill process");
                    }
                    child.status().await
                }
            };
            sampler.stop();

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(instance = %shared.name, error = %e, "Failed to wait for process");
                    None
                }
            };
            exit_tx.send_replace(Some(code));
            shared.on_exit(code);
        });

        Ok(RunningProcess {
            stdin,
            kill: Some(kill_tx),
            exit: exit_rx,
            readers,
            watcher,
        })
    }

    /// Stop the server process.
    ///
    /// Sends the stop command and waits for the configured timeout before
    /// killing the process. A no-op when nothing is running.
    #[tracing::instrument(skip(self), fields(instance = %self.shared.name))]
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut guard = self.process.lock().await;
        let Some(mut running) = guard.take() else {
            return Ok(StopOutcome::NotRunning);
        };
        if running.has_exited() {
            return Ok(StopOutcome::NotRunning);
        }

        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.set_state(InstanceState::Stopping);
        tracing::info!("Stopping server");

        if let Err(e) = write_line(running.stdin.as_mut(), STOP_COMMAND).await {
            tracing::warn!(error = %e, "Failed to send stop command");
        }

        let graceful = tokio::time::timeout(
            self.settings.stop_timeout,
            running.exit.wait_for(|exit| exit.is_some()),
        )
        .await
        .is_ok();

        let outcome = if graceful {
            tracing::info!("Server stopped gracefully");
            StopOutcome::Graceful
        } else {
            tracing::warn!(
                timeout_secs = self.settings.stop_timeout.as_secs_f64(),
                "Server did not stop in time, killing process"
            );
            if let Some(kill) = running.kill.take() {
                let _ = kill.send(());
            }
            if running.exit.wait_for(|exit| exit.is_some()).await.is_err() {
                tracing::warn!("Exit watcher ended without reporting");
            }
            StopOutcome::Forced
        };

        running.abort_tasks();
        if let Err(e) = (&mut running.watcher).await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "Exit watcher failed");
            }
        }

        self.shared.record(
            LifecycleEvent::Stopped {
                forced: outcome == StopOutcome::Forced,
            },
            None,
        );
        self.shared.set_state(InstanceState::Stopped);
        Ok(outcome)
    }

    /// Write a console command to the process.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let mut guard = self.process.lock().await;
        let running = match guard.as_mut() {
            Some(running) if !running.has_exited() => running,
            _ => return Err(Error::NotRunning),
        };
        write_line(running.stdin.as_mut(), command).await
    }

    /// Whether a live process exists.
    pub async fn is_running(&self) -> bool {
        self.process
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| !p.has_exited())
    }

    #[cfg(test)]
    fn feed_line(&self, stream: ConsoleStream, line: &str) {
        self.shared.process_line(stream, line);
    }
}

impl std::fmt::Debug for InstanceSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceSupervisor")
            .field("name", &self.shared.name)
            .field("directory", &self.shared.directory)
            .field("state", &self.state())
            .finish()
    }
}

async fn write_line(stdin: Option<&mut ChildStdin>, line: &str) -> Result<()> {
    let stdin = stdin.ok_or_else(|| Error::Process("Process has no stdin".to_string()))?;
    let mut data = line.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
    data.push(b'\n');
    stdin
        .write_all(&data)
        .await
        .map_err(|e| Error::Process(format!("Failed to write to stdin: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| Error::Process(format!("Failed to flush stdin: {}", e)))
}

fn spawn_reader<R>(shared: Arc<Shared>, stream: ConsoleStream, reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let line = line.trim_end_matches(['\r', '\n']);
                    if !line.is_empty() {
                        shared.process_line(stream, line);
                    }
                }
                Err(e) => {
                    tracing::warn!(instance = %shared.name, error = %e, "Console reader failed");
                    break;
                }
            }
        }
    })
}
