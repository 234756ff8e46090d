/// Instance supervision.
///
/// This module owns the child process of each instance: launching it,
/// deriving live status from its console, sampling memory, and stopping it
/// gracefully or by force. All public entry points are instrumented with
/// `tracing` spans.
///
/// # Components
///
/// * `process` - [`InstanceSupervisor`], one per registered instance
/// * `lifecycle` - State machine and bounded lifecycle history
/// * `monitor` - Periodic memory sampler bound to the process lifetime
/// * `classifier` - Maps console lines to status signals
/// * `properties` - Generated `server.properties` and license marker
///
/// # Examples
///
/// Swapping the console classifier:
///
/// ```no_run
/// use mc_fleet::runtime::JavaRuntime;
/// use mc_fleet::server::{InstanceSupervisor, LineClassifier, LineSignal, SupervisorSettings};
/// use std::sync::Arc;
///
/// struct Quiet;
///
/// impl LineClassifier for Quiet {
///     fn classify(&self, line: &str) -> LineSignal {
///         if line.starts_with("READY") { LineSignal::Ready } else { LineSignal::None }
///     }
/// }
///
/// let supervisor = InstanceSupervisor::with_classifier(
///     "lobby",
///     "/srv/mc-fleet/servers/lobby",
///     Arc::new(JavaRuntime::new()),
///     SupervisorSettings::default(),
///     Arc::new(Quiet),
/// );
/// assert!(!supervisor.status().ready);
/// ```
pub mod classifier;
pub mod lifecycle;
pub mod monitor;
mod process;
pub mod properties;

pub use classifier::{LineClassifier, LineSignal, VanillaLogClassifier};
pub use lifecycle::{InstanceState, LifecycleEvent, LifecycleHistory, LifecycleRecord};
pub use monitor::ProcessSampler;
pub use process::{
    ConsoleLine, ConsoleStream, InstanceSupervisor, LiveStatus, StopOutcome, SupervisorSettings,
};
