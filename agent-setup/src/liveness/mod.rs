use crate::runtime::Sleeper;
use std::time::Duration;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub use win32::WindowsServiceQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
  Running,
  StartPending,
  StopPending,
  Paused,
  Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceObservation {
  pub name: String,
  pub state: ServiceState,
}

/// Looks up every service whose name starts with `prefix`.
pub trait ServiceStatusQuery {
  fn query_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ServiceObservation>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
  Healthy,
  Degraded(u32),
  Dead,
}

/// Failure counter for the watched service.
///
/// Without `reset_on_running` a Running observation leaves the counter where it
/// is, so any `threshold + 1` failures end the watch.
#[derive(Debug, Clone, Copy)]
pub struct ServiceHealthState {
  pub consecutive_non_running_checks: u32,
  pub threshold: u32,
  pub reset_on_running: bool,
}

impl ServiceHealthState {
  pub fn new(threshold: u32, reset_on_running: bool) -> Self {
    Self {
      consecutive_non_running_checks: 0,
      threshold,
      reset_on_running,
    }
  }

  pub fn observe(&mut self, running: bool) -> Health {
    if running {
      if self.reset_on_running {
        self.consecutive_non_running_checks = 0;
      }
      return Health::Healthy;
    }

    self.consecutive_non_running_checks += 1;
    if self.consecutive_non_running_checks > self.threshold {
      Health::Dead
    } else {
      Health::Degraded(self.consecutive_non_running_checks)
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOutcome {
  pub polls: u32,
  pub failures: u32,
}

pub struct Watcher<'a> {
  pub query: &'a dyn ServiceStatusQuery,
  pub sleeper: &'a dyn Sleeper,
  pub service_prefix: String,
  pub interval: Duration,
  pub state: ServiceHealthState,
}

impl Watcher<'_> {
  /// Blocks until the service is considered dead.
  pub fn watch(&mut self) -> WatchOutcome {
    tracing::info!(
      prefix = %self.service_prefix,
      interval_seconds = self.interval.as_secs(),
      threshold = self.state.threshold,
      "watching agent service"
    );

    let mut polls = 0u32;
    loop {
      polls += 1;
      let running = self.poll_once();
      match self.state.observe(running) {
        Health::Healthy => {
          tracing::debug!(polls, "agent service running");
        }
        Health::Degraded(n) => {
          tracing::warn!(failures = n, threshold = self.state.threshold, "agent service not running");
        }
        Health::Dead => {
          tracing::info!(
            polls,
            failures = self.state.consecutive_non_running_checks,
            "agent service stayed down; exiting"
          );
          return WatchOutcome {
            polls,
            failures: self.state.consecutive_non_running_checks,
          };
        }
      }
      self.sleeper.sleep(self.interval);
    }
  }

  fn poll_once(&self) -> bool {
    match self.query.query_by_prefix(&self.service_prefix) {
      Ok(services) => {
        if services.is_empty() {
          tracing::debug!(prefix = %self.service_prefix, "no matching service");
        }
        services.iter().any(|s| s.state == ServiceState::Running)
      }
      Err(e) => {
        tracing::warn!(error = %format!("{e:#}"), "service status query failed");
        false
      }
    }
  }
}

/// Probes each named service; one that cannot be read is logged and left out so the
/// others still count.
pub(crate) fn observe_each(
  names: Vec<String>,
  probe: impl Fn(&str) -> anyhow::Result<ServiceState>,
) -> Vec<ServiceObservation> {
  names
    .into_iter()
    .filter_map(|name| match probe(&name) {
      Ok(state) => Some(ServiceObservation { name, state }),
      Err(e) => {
        tracing::debug!(service = %name, error = %format!("{e:#}"), "service skipped");
        None
      }
    })
    .collect()
}

/// Service query for platforms without a service control manager.
pub struct UnsupportedServiceQuery;

impl ServiceStatusQuery for UnsupportedServiceQuery {
  fn query_by_prefix(&self, _prefix: &str) -> anyhow::Result<Vec<ServiceObservation>> {
    anyhow::bail!("service status is only available on Windows")
  }
}
