use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Validation,
  StateConflict,
  Io,
  Network,
  ChildProcess,
  Autologon,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
  #[error("invalid account `{0}`: expected the bare account name, not a URL")]
  InvalidAccountFormat(String),

  #[error("invalid work directory `{path}`: {reason}")]
  InvalidWorkDirectory { path: String, reason: String },

  #[error("cannot create install path {}", .path.display())]
  InstallPathCreationFailed {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("agent already configured: {} exists", .marker.display())]
  AgentAlreadyConfigured { marker: PathBuf },

  #[error("agent package download failed after {attempts} attempts")]
  PackageDownloadFailed {
    attempts: u32,
    #[source]
    source: anyhow::Error,
  },

  #[error("agent package extraction into {} failed", .path.display())]
  PackageExtractionFailed {
    path: PathBuf,
    #[source]
    source: anyhow::Error,
  },

  #[error("agent configuration entry point not found at {}", .path.display())]
  InstallerNotFound { path: PathBuf },

  #[error("failed to launch {}", .path.display())]
  InstallerLaunchFailed {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("agent configuration exited with {}", exit_label(.0))]
  AgentConfigurationFailed(Option<i32>),

  #[error(transparent)]
  Autologon(#[from] AutologonError),
}

fn exit_label(code: &Option<i32>) -> String {
  match code {
    Some(c) => format!("exit code {c}"),
    None => "no exit code (terminated by signal)".to_string(),
  }
}

impl ProvisionError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InvalidAccountFormat(_) | Self::InvalidWorkDirectory { .. } => ErrorKind::Validation,
      Self::AgentAlreadyConfigured { .. } => ErrorKind::StateConflict,
      Self::InstallPathCreationFailed { .. }
      | Self::PackageExtractionFailed { .. }
      | Self::InstallerNotFound { .. } => ErrorKind::Io,
      Self::PackageDownloadFailed { .. } => ErrorKind::Network,
      Self::InstallerLaunchFailed { .. } | Self::AgentConfigurationFailed(_) => {
        ErrorKind::ChildProcess
      }
      Self::Autologon(_) => ErrorKind::Autologon,
    }
  }
}

#[derive(Debug, Error)]
pub enum AutologonError {
  #[error("interactive logon requires a logon password")]
  MissingLogonPassword,

  #[error("cannot resolve account `{account}` to a security identifier")]
  AccountResolutionFailed {
    account: String,
    #[source]
    source: anyhow::Error,
  },

  #[error("logon as `{account}` failed")]
  LogonFailed {
    account: String,
    #[source]
    source: anyhow::Error,
  },
}

#[derive(Debug, Error)]
#[error("tool `{tool}` could not be installed")]
pub struct ToolInstallFailed {
  pub tool: String,
  #[source]
  pub source: anyhow::Error,
}

/// Exit code for the top-level error boundary.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
  if let Some(p) = err.downcast_ref::<ProvisionError>() {
    return match p.kind() {
      ErrorKind::Validation => 2,
      ErrorKind::StateConflict => 3,
      ErrorKind::Io => 4,
      ErrorKind::Network => 5,
      ErrorKind::ChildProcess => 6,
      ErrorKind::Autologon => 7,
    };
  }
  if err.downcast_ref::<AutologonError>().is_some() {
    return 7;
  }
  if err.downcast_ref::<ToolInstallFailed>().is_some() {
    return 8;
  }
  1
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exit_codes_follow_error_kind() {
    let e = anyhow::Error::new(ProvisionError::InvalidAccountFormat("x".into()));
    assert_eq!(exit_code_for(&e), 2);

    let e = anyhow::Error::new(ProvisionError::AgentAlreadyConfigured {
      marker: PathBuf::from("C:\\a\\.agent"),
    });
    assert_eq!(exit_code_for(&e), 3);

    let e = anyhow::Error::new(ProvisionError::AgentConfigurationFailed(Some(1)));
    assert_eq!(exit_code_for(&e), 6);

    let e = anyhow::Error::new(ProvisionError::from(AutologonError::MissingLogonPassword));
    assert_eq!(exit_code_for(&e), 7);

    let e = anyhow::anyhow!("bad config");
    assert_eq!(exit_code_for(&e), 1);
  }

  #[test]
  fn context_does_not_hide_the_kind() {
    let e = anyhow::Error::new(ProvisionError::PackageDownloadFailed {
      attempts: 4,
      source: anyhow::anyhow!("timeout"),
    })
    .context("provision agent");
    assert_eq!(exit_code_for(&e), 5);
  }

  #[test]
  fn signal_exit_is_described() {
    let e = ProvisionError::AgentConfigurationFailed(None);
    assert!(e.to_string().contains("terminated by signal"));
  }
}
