use crate::error::ProvisionError;
use crate::types::ProvisioningRequest;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Configuration entry point shipped at the root of the agent package.
pub const INSTALLER_FILE_NAME: &str = "config.cmd";

const SECRET_FLAGS: [&str; 2] = ["--token", "--windowslogonpassword"];

/// Ordered argument list for the agent's own configuration script.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentLaunchConfig {
  args: Vec<String>,
}

impl AgentLaunchConfig {
  pub fn build(req: &ProvisioningRequest) -> Self {
    let mut args: Vec<String> = vec!["--unattended".to_string()];
    push_pair(&mut args, "--url", &req.server_url());
    push_pair(&mut args, "--auth", "PAT");
    push_pair(&mut args, "--token", req.auth_token.expose());
    push_pair(&mut args, "--pool", &req.pool_name);
    push_pair(&mut args, "--agent", &req.agent_name);

    let account = req.effective_logon_account();
    if req.run_interactive_logon {
      args.push("--runAsAutoLogon".to_string());
      args.push("--overwriteAutoLogon".to_string());
      push_pair(&mut args, "--windowsLogonAccount", &account);
    } else {
      args.push("--runasservice".to_string());
      push_pair(&mut args, "--windowslogonaccount", &account);
    }

    if let Some(pw) = req.supplied_password() {
      push_pair(&mut args, "--windowslogonpassword", pw.expose());
    }
    if let Some(work) = req.supplied_work_directory() {
      push_pair(&mut args, "--work", work);
    }

    Self { args }
  }

  pub fn args(&self) -> &[String] {
    &self.args
  }

  pub fn contains(&self, flag: &str) -> bool {
    self.args.iter().any(|a| a == flag)
  }

  pub fn value_of(&self, flag: &str) -> Option<&str> {
    self
      .args
      .iter()
      .position(|a| a == flag)
      .and_then(|i| self.args.get(i + 1))
      .map(String::as_str)
  }
}

/// Renders the arguments with secret values masked.
impl fmt::Display for AgentLaunchConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut mask_next = false;
    for (i, a) in self.args.iter().enumerate() {
      if i > 0 {
        f.write_str(" ")?;
      }
      if mask_next {
        f.write_str("***")?;
      } else {
        f.write_str(a)?;
      }
      mask_next = SECRET_FLAGS.iter().any(|s| a.eq_ignore_ascii_case(s));
    }
    Ok(())
  }
}

impl fmt::Debug for AgentLaunchConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "AgentLaunchConfig({self})")
  }
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: &str) {
  args.push(flag.to_string());
  args.push(value.to_string());
}

pub fn installer_path(install_path: &Path) -> PathBuf {
  install_path.join(INSTALLER_FILE_NAME)
}

/// Runs the agent configuration script and reports its exit code.
pub trait InstallerRunner {
  fn run(
    &self,
    program: &Path,
    working_dir: &Path,
    launch: &AgentLaunchConfig,
  ) -> Result<Option<i32>, ProvisionError>;
}

pub struct ProcessRunner {
  path_var: Option<OsString>,
}

impl ProcessRunner {
  /// `path_var` replaces the child's `PATH` when set.
  pub fn new(path_var: Option<OsString>) -> Self {
    Self { path_var }
  }
}

impl InstallerRunner for ProcessRunner {
  fn run(
    &self,
    program: &Path,
    working_dir: &Path,
    launch: &AgentLaunchConfig,
  ) -> Result<Option<i32>, ProvisionError> {
    let mut cmd = Command::new(program);
    cmd.args(launch.args()).current_dir(working_dir);
    if let Some(p) = &self.path_var {
      cmd.env("PATH", p);
    }

    let status = cmd
      .status()
      .map_err(|source| ProvisionError::InstallerLaunchFailed {
        path: program.to_path_buf(),
        source,
      })?;
    Ok(status.code())
  }
}

#[cfg(test)]
pub(crate) mod fake {
  use super::{AgentLaunchConfig, InstallerRunner};
  use crate::error::ProvisionError;
  use std::cell::RefCell;
  use std::path::{Path, PathBuf};

  pub struct RecordingRunner {
    pub exit_code: Option<i32>,
    pub calls: RefCell<Vec<(PathBuf, AgentLaunchConfig)>>,
  }

  impl RecordingRunner {
    pub fn exiting_with(exit_code: i32) -> Self {
      Self {
        exit_code: Some(exit_code),
        calls: RefCell::new(Vec::new()),
      }
    }
  }

  impl InstallerRunner for RecordingRunner {
    fn run(
      &self,
      program: &Path,
      _working_dir: &Path,
      launch: &AgentLaunchConfig,
    ) -> Result<Option<i32>, ProvisionError> {
      self
        .calls
        .borrow_mut()
        .push((program.to_path_buf(), launch.clone()));
      Ok(self.exit_code)
    }
  }
}
