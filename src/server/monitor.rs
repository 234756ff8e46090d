use crate::server::LiveStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Periodic resident-memory sampler for one process.
///
/// The task lives exactly as long as the process: the exit watcher aborts it
/// through [`ProcessSampler::stop`] as soon as the child is reaped.
#[derive(Debug)]
pub struct ProcessSampler {
    task: Option<JoinHandle<()>>,
}

impl ProcessSampler {
    /// Start sampling the resident memory of `pid` every `interval` into `live`.
    pub fn start(pid: u32, interval: Duration, live: Arc<Mutex<LiveStatus>>) -> Self {
        let task = tokio::spawn(async move {
            let pid = Pid::from_u32(pid);
            let mut system = System::new();
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::new().with_memory(),
                );
                let Some(process) = system.process(pid) else {
                    tracing::trace!(pid = %pid, "Process not visible to sampler");
                    continue;
                };

                let rss_mb = process.memory() / BYTES_PER_MB;
                if let Ok(mut live) = live.lock() {
                    live.rss_mb = rss_mb;
                }
            }
        });

        Self { task: Some(task) }
    }

    /// Cancel the sampling task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ProcessSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sampler_updates_memory_of_own_process() {
        let live = Arc::new(Mutex::new(LiveStatus::default()));
        let mut sampler =
            ProcessSampler::start(std::process::id(), Duration::from_millis(10), live.clone());

        for _ in 0..100 {
            if live.lock().unwrap().rss_mb > 0 {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        assert!(live.lock().unwrap().rss_mb > 0);
        assert_eq!(live.lock().unwrap().memory_mb, 0);

        sampler.stop();
        assert!(!sampler.is_running());
    }
}
