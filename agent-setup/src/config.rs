use crate::types::{default_agent_name, ProvisioningRequest, Secret};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub agent: AgentConfig,
  pub logon: LogonConfig,
  pub download: DownloadConfig,
  pub autologon: AutologonConfig,
  pub liveness: LivenessConfig,
  pub logging: LoggingConfig,
  pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
  #[serde(default)]
  pub account: String,

  #[serde(default)]
  pub token: Secret,

  #[serde(default = "default_pool")]
  pub pool: String,

  #[serde(default)]
  pub name: Option<String>,

  #[serde(default)]
  pub name_suffix: Option<String>,

  #[serde(default = "default_drive_letter")]
  pub drive_letter: char,

  #[serde(default)]
  pub work_directory: Option<String>,

  #[serde(default = "default_service_prefix")]
  pub service_prefix: String,
}

impl Default for AgentConfig {
  fn default() -> Self {
    Self {
      account: String::new(),
      token: Secret::default(),
      pool: default_pool(),
      name: None,
      name_suffix: None,
      drive_letter: default_drive_letter(),
      work_directory: None,
      service_prefix: default_service_prefix(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogonConfig {
  #[serde(default)]
  pub interactive: bool,

  #[serde(default)]
  pub account: Option<String>,

  #[serde(default)]
  pub password: Option<Secret>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
  #[serde(default = "default_download_timeout_seconds")]
  pub timeout_seconds: u64,

  #[serde(default = "default_download_retries")]
  pub retries: u32,

  #[serde(default = "default_retry_delay_seconds")]
  pub retry_delay_seconds: u64,
}

impl Default for DownloadConfig {
  fn default() -> Self {
    Self {
      timeout_seconds: default_download_timeout_seconds(),
      retries: default_download_retries(),
      retry_delay_seconds: default_retry_delay_seconds(),
    }
  }
}

impl DownloadConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_seconds)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_seconds)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutologonConfig {
  #[serde(default = "default_autologon_wait_seconds")]
  pub wait_seconds: u64,

  #[serde(default = "default_autologon_poll_seconds")]
  pub poll_seconds: u64,
}

impl Default for AutologonConfig {
  fn default() -> Self {
    Self {
      wait_seconds: default_autologon_wait_seconds(),
      poll_seconds: default_autologon_poll_seconds(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
  #[serde(default = "default_liveness_interval_seconds")]
  pub interval_seconds: u64,

  #[serde(default = "default_liveness_threshold")]
  pub threshold: u32,

  #[serde(default)]
  pub reset_on_running: bool,
}

impl Default for LivenessConfig {
  fn default() -> Self {
    Self {
      interval_seconds: default_liveness_interval_seconds(),
      threshold: default_liveness_threshold(),
      reset_on_running: false,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
  pub name: String,
  pub url: String,

  /// Directory under the tool root that holds its executables.
  #[serde(default)]
  pub bin_subdir: Option<String>,
}

fn default_pool() -> String {
  "Default".to_string()
}

fn default_drive_letter() -> char {
  'C'
}

fn default_service_prefix() -> String {
  "vstsagent".to_string()
}

fn default_download_timeout_seconds() -> u64 {
  300
}

fn default_download_retries() -> u32 {
  3
}

fn default_retry_delay_seconds() -> u64 {
  1
}

fn default_autologon_wait_seconds() -> u64 {
  120
}

fn default_autologon_poll_seconds() -> u64 {
  10
}

fn default_liveness_interval_seconds() -> u64 {
  60
}

fn default_liveness_threshold() -> u32 {
  3
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub agent: Option<AgentConfig>,

  #[serde(default)]
  pub logon: Option<LogonConfig>,

  #[serde(default)]
  pub download: Option<DownloadConfig>,

  #[serde(default)]
  pub autologon: Option<AutologonConfig>,

  #[serde(default)]
  pub liveness: Option<LivenessConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub tools: Vec<ToolSpec>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config {
      agent: self.agent.unwrap_or_default(),
      logon: self.logon.unwrap_or_default(),
      download: self.download.unwrap_or_default(),
      autologon: self.autologon.unwrap_or_default(),
      liveness: self.liveness.unwrap_or_default(),
      logging: self.logging.unwrap_or_default(),
      tools: self.tools,
    };

    if cfg.download.timeout_seconds == 0 {
      tracing::warn!("download.timeout_seconds must be > 0; using default");
      cfg.download.timeout_seconds = default_download_timeout_seconds();
    }
    if cfg.autologon.poll_seconds == 0 {
      tracing::warn!("autologon.poll_seconds must be > 0; using default");
      cfg.autologon.poll_seconds = default_autologon_poll_seconds();
    }
    if cfg.liveness.interval_seconds == 0 {
      tracing::warn!("liveness.interval_seconds must be > 0; using default");
      cfg.liveness.interval_seconds = default_liveness_interval_seconds();
    }
    if cfg.liveness.threshold == 0 {
      tracing::warn!("liveness.threshold must be > 0; using default");
      cfg.liveness.threshold = default_liveness_threshold();
    }
    if !cfg.agent.drive_letter.is_ascii_alphabetic() {
      tracing::warn!(
        drive_letter = %cfg.agent.drive_letter,
        "agent.drive_letter is not a drive letter; using default"
      );
      cfg.agent.drive_letter = default_drive_letter();
    }

    cfg
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  if !path.exists() {
    let cfg = Config::default();
    if allow_writes {
      let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
      fs::create_dir_all(parent)?;
      write_atomic(path, &toml::to_string_pretty(&to_config_file(&cfg))?)?;
      eprintln!("Agent Setup: default config written to {}", path.display());
    }
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  let file: ConfigFile = toml::from_str(&raw)
    .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;
  Ok(file.normalize())
}

fn to_config_file(cfg: &Config) -> ConfigFile {
  ConfigFile {
    agent: Some(cfg.agent.clone()),
    logon: Some(cfg.logon.clone()),
    download: Some(cfg.download.clone()),
    autologon: Some(cfg.autologon.clone()),
    liveness: Some(cfg.liveness.clone()),
    logging: Some(cfg.logging.clone()),
    tools: cfg.tools.clone(),
  }
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

/// Applies `AGENT_SETUP_*` overrides from the given lookup (normally the process environment).
pub fn apply_env_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
  let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

  if let Some(v) = get("AGENT_SETUP_ACCOUNT") {
    cfg.agent.account = v;
  }
  if let Some(v) = get("AGENT_SETUP_TOKEN") {
    cfg.agent.token = Secret::new(v);
  }
  if let Some(v) = get("AGENT_SETUP_POOL") {
    cfg.agent.pool = v;
  }
  if let Some(v) = get("AGENT_SETUP_AGENT_NAME") {
    cfg.agent.name = Some(v);
  }
  if let Some(v) = get("AGENT_SETUP_WORK") {
    cfg.agent.work_directory = Some(v);
  }
  if let Some(v) = get("AGENT_SETUP_LOGON_ACCOUNT") {
    cfg.logon.account = Some(v);
  }
  if let Some(v) = get("AGENT_SETUP_LOGON_PASSWORD") {
    cfg.logon.password = Some(Secret::new(v));
  }
  if let Some(v) = get("AGENT_SETUP_INTERACTIVE") {
    match parse_bool(&v) {
      Some(b) => cfg.logon.interactive = b,
      None => tracing::warn!(value = %v, "AGENT_SETUP_INTERACTIVE is not a boolean; ignored"),
    }
  }
}

fn parse_bool(s: &str) -> Option<bool> {
  match s.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Some(true),
    "0" | "false" | "no" | "off" => Some(false),
    _ => None,
  }
}

impl Config {
  pub fn provisioning_request(&self) -> anyhow::Result<ProvisioningRequest> {
    let account_name = self.agent.account.trim().to_string();
    if account_name.is_empty() {
      anyhow::bail!("agent.account is required (or set AGENT_SETUP_ACCOUNT)");
    }
    if self.agent.token.expose().trim().is_empty() {
      anyhow::bail!("agent.token is required (or set AGENT_SETUP_TOKEN)");
    }

    let agent_name = match self.agent.name.as_deref().map(str::trim) {
      Some(n) if !n.is_empty() => n.to_string(),
      _ => default_agent_name(self.agent.name_suffix.as_deref()),
    };

    Ok(ProvisioningRequest {
      account_name,
      auth_token: Secret::new(self.agent.token.expose().trim()),
      agent_name,
      pool_name: self.agent.pool.clone(),
      install_drive_letter: self.agent.drive_letter,
      work_directory: self.agent.work_directory.clone(),
      run_interactive_logon: self.logon.interactive,
      logon_account: self.logon.account.clone(),
      logon_password: self.logon.password.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn partial_file_keeps_defaults() {
    let raw = r#"
[agent]
account = "contoso"
token = "abc"

[liveness]
reset_on_running = true
"#;
    let cfg = toml::from_str::<ConfigFile>(raw).unwrap().normalize();
    assert_eq!(cfg.agent.account, "contoso");
    assert_eq!(cfg.agent.pool, "Default");
    assert_eq!(cfg.agent.drive_letter, 'C');
    assert_eq!(cfg.download.retries, 3);
    assert_eq!(cfg.autologon.wait_seconds, 120);
    assert_eq!(cfg.liveness.interval_seconds, 60);
    assert_eq!(cfg.liveness.threshold, 3);
    assert!(cfg.liveness.reset_on_running);
  }

  #[test]
  fn zero_intervals_fall_back_to_defaults() {
    let raw = r#"
[liveness]
interval_seconds = 0
threshold = 0

[autologon]
poll_seconds = 0
"#;
    let cfg = toml::from_str::<ConfigFile>(raw).unwrap().normalize();
    assert_eq!(cfg.liveness.interval_seconds, 60);
    assert_eq!(cfg.liveness.threshold, 3);
    assert_eq!(cfg.autologon.poll_seconds, 10);
  }

  #[test]
  fn tools_are_read_in_order() {
    let raw = r#"
[[tools]]
name = "terraform"
url = "https://example.invalid/terraform.zip"

[[tools]]
name = "pwsh"
url = "https://example.invalid/pwsh.zip"
bin_subdir = "bin"
"#;
    let cfg = toml::from_str::<ConfigFile>(raw).unwrap().normalize();
    let names: Vec<_> = cfg.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["terraform", "pwsh"]);
    assert_eq!(cfg.tools[1].bin_subdir.as_deref(), Some("bin"));
  }

  #[test]
  fn missing_file_is_created_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let cfg = load_or_create_default(&path).unwrap();
    assert!(path.exists());
    assert_eq!(cfg.agent.pool, "Default");

    let again = load_or_default_readonly(&path).unwrap();
    assert_eq!(again.liveness.threshold, 3);
  }

  #[test]
  fn readonly_load_does_not_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    load_or_default_readonly(&path).unwrap();
    assert!(!path.exists());
  }

  #[test]
  fn invalid_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[agent\naccount = ").unwrap();
    assert!(load_or_default_readonly(&path).is_err());
  }

  #[test]
  fn env_overrides_win_over_file() {
    let env: HashMap<&str, &str> = [
      ("AGENT_SETUP_ACCOUNT", "fabrikam"),
      ("AGENT_SETUP_TOKEN", "secret"),
      ("AGENT_SETUP_INTERACTIVE", "true"),
      ("AGENT_SETUP_LOGON_PASSWORD", "pw"),
      ("AGENT_SETUP_POOL", "  "),
    ]
    .into_iter()
    .collect();

    let mut cfg = Config::default();
    cfg.agent.account = "contoso".to_string();
    apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

    assert_eq!(cfg.agent.account, "fabrikam");
    assert_eq!(cfg.agent.token.expose(), "secret");
    assert_eq!(cfg.agent.pool, "Default");
    assert!(cfg.logon.interactive);
    assert_eq!(cfg.logon.password.as_ref().map(Secret::expose), Some("pw"));
  }

  #[test]
  fn credentials_load_from_file_but_never_print() {
    let raw = r#"
[agent]
account = "contoso"
token = "pat-value"

[logon]
interactive = true
password = "hunter2"
"#;
    let cfg = toml::from_str::<ConfigFile>(raw).unwrap().normalize();
    assert_eq!(cfg.agent.token.expose(), "pat-value");
    assert_eq!(cfg.logon.password.as_ref().map(Secret::expose), Some("hunter2"));

    let shown = format!("{cfg:?}");
    assert!(!shown.contains("pat-value"));
    assert!(!shown.contains("hunter2"));

    let written = toml::to_string_pretty(&to_config_file(&cfg)).unwrap();
    assert!(written.contains("token = \"pat-value\""));
  }

  #[test]
  fn request_requires_account_and_token() {
    let mut cfg = Config::default();
    assert!(cfg.provisioning_request().is_err());
    cfg.agent.account = "contoso".to_string();
    assert!(cfg.provisioning_request().is_err());
    cfg.agent.token = Secret::new("abc");
    cfg.agent.name = Some("agent1".to_string());

    let req = cfg.provisioning_request().unwrap();
    assert_eq!(req.account_name, "contoso");
    assert_eq!(req.agent_name, "agent1");
    assert_eq!(req.auth_token.expose(), "abc");
    assert!(!req.run_interactive_logon);
  }
}
