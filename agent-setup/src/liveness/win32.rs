use super::{observe_each, ServiceObservation, ServiceState, ServiceStatusQuery};
use crate::registry::{RegKey, HKEY_LOCAL_MACHINE};
use anyhow::Context;
use windows_service::service::{ServiceAccess, ServiceState as ScmState};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

const SERVICES_KEY: &str = "SYSTEM\\CurrentControlSet\\Services";

/// Finds services by name prefix in the SCM registry database, then asks the
/// service control manager for their live state.
pub struct WindowsServiceQuery;

impl ServiceStatusQuery for WindowsServiceQuery {
  fn query_by_prefix(&self, prefix: &str) -> anyhow::Result<Vec<ServiceObservation>> {
    let services = RegKey::open(HKEY_LOCAL_MACHINE, SERVICES_KEY)?
      .ok_or_else(|| anyhow::anyhow!("service database key missing"))?;
    let prefix_lower = prefix.to_ascii_lowercase();
    let names: Vec<String> = services
      .subkey_names()?
      .into_iter()
      .filter(|n| n.to_ascii_lowercase().starts_with(&prefix_lower))
      .collect();
    if names.is_empty() {
      return Ok(Vec::new());
    }

    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
      .context("connect to service control manager")?;

    // Subkeys under Services also include drivers and leftovers that SCM cannot open.
    Ok(observe_each(names, |name| {
      let service = manager
        .open_service(name, ServiceAccess::QUERY_STATUS)
        .with_context(|| format!("open service {name}"))?;
      let status = service
        .query_status()
        .with_context(|| format!("query status of {name}"))?;
      Ok(map_state(status.current_state))
    }))
  }
}

fn map_state(state: ScmState) -> ServiceState {
  match state {
    ScmState::Running => ServiceState::Running,
    ScmState::StartPending | ScmState::ContinuePending => ServiceState::StartPending,
    ScmState::StopPending => ServiceState::StopPending,
    ScmState::Paused | ScmState::PausePending => ServiceState::Paused,
    ScmState::Stopped => ServiceState::Stopped,
  }
}
