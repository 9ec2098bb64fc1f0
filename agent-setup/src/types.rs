use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const MARKER_FILE_NAME: &str = ".agent";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "NT AUTHORITY\\NETWORK SERVICE";

/// A credential that must never end up in logs or error messages.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub fn expose(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("***")
  }
}

impl From<&str> for Secret {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}

#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
  pub account_name: String,
  pub auth_token: Secret,
  pub agent_name: String,
  pub pool_name: String,
  pub install_drive_letter: char,
  pub work_directory: Option<String>,
  pub run_interactive_logon: bool,
  pub logon_account: Option<String>,
  pub logon_password: Option<Secret>,
}

impl ProvisioningRequest {
  pub fn server_url(&self) -> String {
    format!("https://{}.visualstudio.com", self.account_name)
  }

  /// Account the agent runs as; service mode falls back to the built-in identity.
  pub fn effective_logon_account(&self) -> String {
    match self.logon_account.as_deref().map(str::trim) {
      Some(a) if !a.is_empty() => a.to_string(),
      _ => DEFAULT_SERVICE_ACCOUNT.to_string(),
    }
  }

  pub fn supplied_password(&self) -> Option<&Secret> {
    self.logon_password.as_ref().filter(|p| !p.is_empty())
  }

  pub fn supplied_work_directory(&self) -> Option<&str> {
    self
      .work_directory
      .as_deref()
      .map(str::trim)
      .filter(|w| !w.is_empty())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
  pub install_path: PathBuf,
  pub marker_file_path: PathBuf,
}

impl InstallLayout {
  pub fn new(root: &Path, agent_name: &str) -> Self {
    let install_path = root.join(agent_name);
    let marker_file_path = install_path.join(MARKER_FILE_NAME);
    Self {
      install_path,
      marker_file_path,
    }
  }

  pub fn is_configured(&self) -> bool {
    self.marker_file_path.exists()
  }
}

pub fn drive_root(letter: char) -> PathBuf {
  PathBuf::from(format!("{}:\\", letter.to_ascii_uppercase()))
}

#[derive(Debug, Clone)]
pub struct AgentPackageReference {
  pub download_url: String,
  pub local_archive_path: PathBuf,
}

pub fn host_name() -> String {
  ["COMPUTERNAME", "HOSTNAME"]
    .iter()
    .filter_map(|k| std::env::var(k).ok())
    .map(|v| v.trim().to_string())
    .find(|v| !v.is_empty())
    .unwrap_or_else(|| "localhost".to_string())
}

pub fn default_agent_name(suffix: Option<&str>) -> String {
  let host = host_name();
  match suffix.map(str::trim) {
    Some(s) if !s.is_empty() => format!("{host}-{s}"),
    _ => host,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn secret_debug_is_redacted() {
    let s = Secret::new("abc");
    assert_eq!(format!("{s:?}"), "***");
    assert_eq!(s.expose(), "abc");
  }

  #[test]
  fn layout_places_marker_under_install_path() {
    let layout = InstallLayout::new(Path::new("/drive"), "agent1");
    assert_eq!(layout.install_path, Path::new("/drive").join("agent1"));
    assert_eq!(
      layout.marker_file_path,
      Path::new("/drive").join("agent1").join(".agent")
    );
  }

  #[test]
  fn drive_root_is_uppercased() {
    assert_eq!(drive_root('c'), PathBuf::from("C:\\"));
  }

  #[test]
  fn blank_logon_account_falls_back_to_service_identity() {
    let req = ProvisioningRequest {
      account_name: "contoso".to_string(),
      auth_token: Secret::new("abc"),
      agent_name: "agent1".to_string(),
      pool_name: "Default".to_string(),
      install_drive_letter: 'C',
      work_directory: Some("  ".to_string()),
      run_interactive_logon: false,
      logon_account: Some(" ".to_string()),
      logon_password: Some(Secret::default()),
    };
    assert_eq!(req.effective_logon_account(), DEFAULT_SERVICE_ACCOUNT);
    assert!(req.supplied_password().is_none());
    assert!(req.supplied_work_directory().is_none());
    assert_eq!(req.server_url(), "https://contoso.visualstudio.com");
  }
}
