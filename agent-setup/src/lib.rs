pub mod autologon;
pub mod config;
pub mod console;
pub mod error;
pub mod launch;
pub mod liveness;
pub mod logging;
pub mod package;
pub mod paths;
pub mod provision;
#[cfg(windows)]
mod registry;
pub mod runtime;
pub mod tools;
pub mod types;

use anyhow::Context;
use config::Config;
use console::ConsoleAction;
use std::path::PathBuf;
use std::time::Duration;

pub fn run(args: &[String]) -> anyhow::Result<()> {
  let inv = match console::parse_command_line(args)? {
    ConsoleAction::ExitOk => return Ok(()),
    ConsoleAction::Run(inv) => inv,
  };

  let base = paths::base_dir()?;
  let config_path = inv
    .config_path
    .clone()
    .unwrap_or_else(|| paths::config_path(&base));
  let mut cfg = if inv.options.dry_run {
    config::load_or_default_readonly(&config_path)?
  } else {
    config::load_or_create_default(&config_path)?
  };

  if inv.options.dry_run {
    logging::init_stderr_only(&cfg.logging.level)?;
  } else {
    logging::init_file_and_stderr(
      &paths::logs_dir(&base),
      &cfg.logging.level,
      cfg.logging.retention_days,
    )
    .context("initialize logging")?;
  }
  config::apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());

  tracing::info!(
    version = env!("CARGO_PKG_VERSION"),
    config = %config_path.display(),
    dry_run = inv.options.dry_run,
    "agent setup starting"
  );

  let req = cfg.provisioning_request()?;
  let install_root = types::drive_root(req.install_drive_letter);

  if inv.options.dry_run {
    let plan = provision::plan(&req, &install_root)?;
    tracing::info!(
      install_path = %plan.layout.install_path.display(),
      configured = plan.layout.is_configured(),
      tools = cfg.tools.len(),
      args = %plan.launch,
      "DRY-RUN: would download the agent package and run the installer"
    );
    return Ok(());
  }

  let mut ctx = tools::ToolContext::new(paths::tools_dir(&base), std::env::var_os("PATH"));
  if inv.options.skip_tools {
    tracing::info!(tools = cfg.tools.len(), "tool installs skipped");
  } else {
    let installer = tools::DirectDownloadInstaller::new(cfg.download.timeout())?;
    tools::install_all(&installer, &cfg.tools, &mut ctx)?;
  }

  provision_agent(&cfg, &req, install_root, &ctx)?;

  if inv.options.no_watch {
    tracing::info!("service watch disabled; exiting");
    return Ok(());
  }
  watch_agent(&cfg);
  Ok(())
}

fn provision_agent(
  cfg: &Config,
  req: &types::ProvisioningRequest,
  install_root: PathBuf,
  ctx: &tools::ToolContext,
) -> anyhow::Result<()> {
  let source = package::fetch::HttpPackageSource::new(
    &req.server_url(),
    req.auth_token.clone(),
    cfg.download.timeout(),
  )?;
  let runner = launch::ProcessRunner::new(Some(ctx.path_var()?));
  let sleeper = runtime::ThreadSleeper;

  #[cfg(windows)]
  let host = autologon::WindowsHost;
  #[cfg(not(windows))]
  let host = autologon::UnsupportedHost;

  let provisioner = provision::Provisioner {
    install_root,
    scratch_dir: paths::download_dir(),
    source: &source,
    runner: &runner,
    autologon_host: &host,
    sleeper: &sleeper,
    retry: package::RetryPolicy {
      retries: cfg.download.retries,
      delay: cfg.download.retry_delay(),
    },
    autologon: autologon::AutologonPolicy {
      wait: Duration::from_secs(cfg.autologon.wait_seconds),
      poll: Duration::from_secs(cfg.autologon.poll_seconds),
    },
  };

  provisioner.provision(req)?;
  Ok(())
}

fn watch_agent(cfg: &Config) {
  #[cfg(windows)]
  let query = liveness::WindowsServiceQuery;
  #[cfg(not(windows))]
  let query = liveness::UnsupportedServiceQuery;

  let outcome = liveness::Watcher {
    query: &query,
    sleeper: &runtime::ThreadSleeper,
    service_prefix: cfg.agent.service_prefix.clone(),
    interval: Duration::from_secs(cfg.liveness.interval_seconds),
    state: liveness::ServiceHealthState::new(cfg.liveness.threshold, cfg.liveness.reset_on_running),
  }
  .watch();
  tracing::info!(polls = outcome.polls, failures = outcome.failures, "watch finished");
}
