use crate::autologon::{self, AutologonHost, AutologonPolicy};
use crate::error::{AutologonError, ProvisionError};
use crate::launch::{self, AgentLaunchConfig, InstallerRunner};
use crate::package::{self, PackageSource, RetryPolicy};
use crate::runtime::Sleeper;
use crate::types::{InstallLayout, ProvisioningRequest};
use std::fs;
use std::path::{Path, PathBuf};

const LEGACY_DOMAIN: &str = "visualstudio.com";
const INVALID_PATH_CHARS: [char; 6] = ['<', '>', '"', '|', '?', '*'];

pub fn validate(req: &ProvisioningRequest) -> Result<(), ProvisionError> {
  validate_account(&req.account_name)?;
  if req.run_interactive_logon && req.supplied_password().is_none() {
    return Err(AutologonError::MissingLogonPassword.into());
  }
  if let Some(work) = req.supplied_work_directory() {
    validate_work_directory(work)?;
  }
  Ok(())
}

pub fn validate_account(account: &str) -> Result<(), ProvisionError> {
  let lower = account.to_ascii_lowercase();
  if lower.contains("http://") || lower.contains("https://") || lower.contains(LEGACY_DOMAIN) {
    return Err(ProvisionError::InvalidAccountFormat(account.to_string()));
  }
  Ok(())
}

/// Accepts `X:\...` absolute paths and relative paths (resolved by the agent
/// against its install directory).
pub fn validate_work_directory(path: &str) -> Result<(), ProvisionError> {
  let invalid = |reason: &str| ProvisionError::InvalidWorkDirectory {
    path: path.to_string(),
    reason: reason.to_string(),
  };

  if path.chars().any(|c| c.is_control() || INVALID_PATH_CHARS.contains(&c)) {
    return Err(invalid("contains characters not allowed in a path"));
  }

  let bytes = path.as_bytes();
  let drive_qualified = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
  if drive_qualified && !matches!(bytes.get(2), Some(b'\\') | Some(b'/')) {
    return Err(invalid("drive-relative paths are not supported"));
  }

  let rest = if drive_qualified { &path[2..] } else { path };
  if rest.contains(':') {
    return Err(invalid("`:` is only allowed after the drive letter"));
  }
  if rest.starts_with("\\\\") || rest.starts_with("//") {
    return Err(invalid("network paths are not available in the container"));
  }
  Ok(())
}

/// What a provisioning run would do, without touching the network or the installer.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
  pub layout: InstallLayout,
  pub launch: AgentLaunchConfig,
}

pub fn plan(req: &ProvisioningRequest, install_root: &Path) -> Result<ProvisionPlan, ProvisionError> {
  validate(req)?;
  let layout = InstallLayout::new(install_root, &req.agent_name);
  if layout.is_configured() {
    return Err(ProvisionError::AgentAlreadyConfigured {
      marker: layout.marker_file_path,
    });
  }
  Ok(ProvisionPlan {
    launch: AgentLaunchConfig::build(req),
    layout,
  })
}

pub struct Provisioner<'a> {
  pub install_root: PathBuf,
  pub scratch_dir: PathBuf,
  pub source: &'a dyn PackageSource,
  pub runner: &'a dyn InstallerRunner,
  pub autologon_host: &'a dyn AutologonHost,
  pub sleeper: &'a dyn Sleeper,
  pub retry: RetryPolicy,
  pub autologon: AutologonPolicy,
}

impl Provisioner<'_> {
  pub fn provision(&self, req: &ProvisioningRequest) -> Result<(), ProvisionError> {
    validate(req)?;

    let layout = InstallLayout::new(&self.install_root, &req.agent_name);
    fs::create_dir_all(&layout.install_path).map_err(|source| {
      ProvisionError::InstallPathCreationFailed {
        path: layout.install_path.clone(),
        source,
      }
    })?;

    if layout.is_configured() {
      return Err(ProvisionError::AgentAlreadyConfigured {
        marker: layout.marker_file_path,
      });
    }

    let fetched = self.fetch_package(&layout);
    if let Err(e) = fs::remove_dir_all(&self.scratch_dir) {
      tracing::debug!(error = %e, dir = %self.scratch_dir.display(), "download directory not removed");
    }
    let entries = fetched?;
    tracing::info!(
      entries,
      install_path = %layout.install_path.display(),
      "agent package extracted"
    );

    let installer = launch::installer_path(&layout.install_path);
    if !installer.is_file() {
      return Err(ProvisionError::InstallerNotFound { path: installer });
    }

    let launch = AgentLaunchConfig::build(req);

    if req.run_interactive_logon {
      let account = req.effective_logon_account();
      let password = req.logon_password.clone().unwrap_or_default();
      autologon::prepare_autologon(
        self.autologon_host,
        &account,
        &password,
        self.autologon,
        self.sleeper,
      )?;
    }

    tracing::info!(
      agent = %req.agent_name,
      pool = %req.pool_name,
      args = %launch,
      "running agent configuration"
    );
    match self.runner.run(&installer, &layout.install_path, &launch)? {
      Some(0) => {
        tracing::info!(agent = %req.agent_name, "agent configured");
        Ok(())
      }
      code => Err(ProvisionError::AgentConfigurationFailed(code)),
    }
  }

  /// Downloads into the scratch dir and unpacks into the install path; the caller owns cleanup.
  fn fetch_package(&self, layout: &InstallLayout) -> Result<usize, ProvisionError> {
    let pkg = package::acquire(self.source, &self.scratch_dir, self.retry, self.sleeper)?;
    package::extract(&pkg.local_archive_path, &layout.install_path).map_err(|source| {
      ProvisionError::PackageExtractionFailed {
        path: layout.install_path.clone(),
        source,
      }
    })
  }
}
