use crate::error::AutologonError;
use crate::runtime::Sleeper;
use crate::types::Secret;
use std::fmt;
use std::time::Duration;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub use win32::WindowsHost;

/// Startup key the agent's autologon mode writes into the user's hive.
pub const RUN_KEY_PATH: &str = "SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonAccount {
  pub domain: String,
  pub user: String,
}

impl LogonAccount {
  /// `DOMAIN\user` splits on the separator; a bare name belongs to `local_host`.
  pub fn parse(account: &str, local_host: &str) -> Self {
    match account.split_once('\\') {
      Some((domain, user)) => Self {
        domain: domain.to_string(),
        user: user.to_string(),
      },
      None => Self {
        domain: local_host.to_string(),
        user: account.to_string(),
      },
    }
  }
}

impl fmt::Display for LogonAccount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}\\{}", self.domain, self.user)
  }
}

/// OS operations needed to get a user's registry hive in place.
pub trait AutologonHost {
  fn resolve_sid(&self, account: &LogonAccount) -> anyhow::Result<String>;

  /// Logs on as the account and tears the session down again.
  fn materialize_profile(&self, account: &LogonAccount, password: &Secret) -> anyhow::Result<()>;

  /// Fails when per-user hives cannot be inspected at all.
  fn open_user_hives(&self) -> anyhow::Result<()>;

  fn hive_present(&self, sid: &str) -> anyhow::Result<bool>;

  /// Returns `true` when the key had to be created.
  fn ensure_key(&self, sid: &str, path: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy)]
pub struct AutologonPolicy {
  pub wait: Duration,
  pub poll: Duration,
}

impl Default for AutologonPolicy {
  fn default() -> Self {
    Self {
      wait: Duration::from_secs(120),
      poll: Duration::from_secs(10),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutologonOutcome {
  RunKeyReady { created: bool },
  HivesUnavailable,
  HiveNotLoaded,
  RunKeyFailed,
}

pub fn prepare_autologon(
  host: &dyn AutologonHost,
  account: &str,
  password: &Secret,
  policy: AutologonPolicy,
  sleeper: &dyn Sleeper,
) -> Result<AutologonOutcome, AutologonError> {
  if password.is_empty() {
    return Err(AutologonError::MissingLogonPassword);
  }

  let logon = LogonAccount::parse(account, &crate::types::host_name());
  let sid = host
    .resolve_sid(&logon)
    .map_err(|source| AutologonError::AccountResolutionFailed {
      account: logon.to_string(),
      source,
    })?;
  tracing::info!(account = %logon, sid = %sid, "autologon account resolved");

  host
    .materialize_profile(&logon, password)
    .map_err(|source| AutologonError::LogonFailed {
      account: logon.to_string(),
      source,
    })?;

  if let Err(e) = host.open_user_hives() {
    tracing::warn!(
      error = %format!("{e:#}"),
      "cannot inspect user registry hives; skipping autologon registry preparation"
    );
    return Ok(AutologonOutcome::HivesUnavailable);
  }

  let mut waited = Duration::ZERO;
  loop {
    match host.hive_present(&sid) {
      Ok(true) => return Ok(ensure_run_key(host, &sid)),
      Ok(false) => {}
      Err(e) => tracing::debug!(error = %format!("{e:#}"), sid = %sid, "hive check failed"),
    }

    if waited >= policy.wait {
      tracing::warn!(
        sid = %sid,
        waited_seconds = waited.as_secs(),
        "user registry hive did not load; continuing without autologon registry preparation"
      );
      return Ok(AutologonOutcome::HiveNotLoaded);
    }
    sleeper.sleep(policy.poll);
    waited += policy.poll;
  }
}

fn ensure_run_key(host: &dyn AutologonHost, sid: &str) -> AutologonOutcome {
  match host.ensure_key(sid, RUN_KEY_PATH) {
    Ok(created) => {
      tracing::info!(sid = %sid, created, "autologon run key ready");
      AutologonOutcome::RunKeyReady { created }
    }
    Err(e) => {
      tracing::warn!(error = %format!("{e:#}"), sid = %sid, "cannot create autologon run key");
      AutologonOutcome::RunKeyFailed
    }
  }
}

/// Host for platforms without per-user registry hives.
pub struct UnsupportedHost;

impl AutologonHost for UnsupportedHost {
  fn resolve_sid(&self, _account: &LogonAccount) -> anyhow::Result<String> {
    anyhow::bail!("interactive logon is only supported on Windows")
  }

  fn materialize_profile(&self, _account: &LogonAccount, _password: &Secret) -> anyhow::Result<()> {
    anyhow::bail!("interactive logon is only supported on Windows")
  }

  fn open_user_hives(&self) -> anyhow::Result<()> {
    anyhow::bail!("registry hives are only available on Windows")
  }

  fn hive_present(&self, _sid: &str) -> anyhow::Result<bool> {
    Ok(false)
  }

  fn ensure_key(&self, _sid: &str, _path: &str) -> anyhow::Result<bool> {
    anyhow::bail!("registry hives are only available on Windows")
  }
}


#[cfg(test)]
mod tests {
  use super::fake::FakeHost;
  use super::*;
  use crate::runtime::fake::RecordingSleeper;

  fn pw() -> Secret {
    Secret::new("pw")
  }

  #[test]
  fn account_split_on_domain_separator() {
    assert_eq!(
      LogonAccount::parse("CONTOSO\\builder", "HOST"),
      LogonAccount {
        domain: "CONTOSO".to_string(),
        user: "builder".to_string()
      }
    );
    let local = LogonAccount::parse("builder", "HOST");
    assert_eq!(local.domain, "HOST");
    assert_eq!(local.to_string(), "HOST\\builder");
  }

  #[test]
  fn empty_password_is_rejected_before_any_os_call() {
    let host = FakeHost::with_hive_after(0);
    let sleeper = RecordingSleeper::new();
    let err = prepare_autologon(&host, "builder", &Secret::default(), AutologonPolicy::default(), &sleeper)
      .unwrap_err();
    assert!(matches!(err, AutologonError::MissingLogonPassword));
    assert_eq!(host.logons.get(), 0);
  }

  #[test]
  fn creates_run_key_once_hive_appears() {
    let host = FakeHost::with_hive_after(2);
    let sleeper = RecordingSleeper::new();
    let out = prepare_autologon(&host, "builder", &pw(), AutologonPolicy::default(), &sleeper).unwrap();

    assert_eq!(out, AutologonOutcome::RunKeyReady { created: true });
    assert_eq!(host.checks.get(), 3);
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(10); 2]);
    assert_eq!(
      host.created.borrow().as_slice(),
      [("S-1-5-21-1000".to_string(), RUN_KEY_PATH.to_string())]
    );
  }

  #[test]
  fn existing_run_key_is_left_alone() {
    let mut host = FakeHost::with_hive_after(0);
    host.key_exists = true;
    let sleeper = RecordingSleeper::new();
    let out = prepare_autologon(&host, "builder", &pw(), AutologonPolicy::default(), &sleeper).unwrap();
    assert_eq!(out, AutologonOutcome::RunKeyReady { created: false });
    assert!(sleeper.calls().is_empty());
  }

  #[test]
  fn missing_hive_is_a_warning_after_the_budget() {
    let host = FakeHost::never_loading();
    let sleeper = RecordingSleeper::new();
    let out = prepare_autologon(&host, "builder", &pw(), AutologonPolicy::default(), &sleeper).unwrap();

    assert_eq!(out, AutologonOutcome::HiveNotLoaded);
    assert_eq!(sleeper.total(), Duration::from_secs(120));
    assert_eq!(sleeper.calls().len(), 12);
    assert!(host.created.borrow().is_empty());
  }

  #[test]
  fn unavailable_hives_do_not_fail() {
    let mut host = FakeHost::with_hive_after(0);
    host.hives_available = false;
    let sleeper = RecordingSleeper::new();
    let out = prepare_autologon(&host, "builder", &pw(), AutologonPolicy::default(), &sleeper).unwrap();
    assert_eq!(out, AutologonOutcome::HivesUnavailable);
    assert_eq!(host.checks.get(), 0);
  }

  #[test]
  fn resolution_and_logon_failures_are_errors() {
    let host = FakeHost::with_hive_after(0);
    let sleeper = RecordingSleeper::new();

    let err = prepare_autologon(&host, "CONTOSO\\ghost", &pw(), AutologonPolicy::default(), &sleeper)
      .unwrap_err();
    assert!(matches!(err, AutologonError::AccountResolutionFailed { .. }));

    let err = prepare_autologon(
      &host,
      "builder",
      &Secret::new("wrong"),
      AutologonPolicy::default(),
      &sleeper,
    )
    .unwrap_err();
    assert!(matches!(err, AutologonError::LogonFailed { .. }));
  }
}
