use crate::runtime::{self, RunOptions};
use std::path::PathBuf;

const KNOWN_FLAGS: &[&str] = &["--dry-run", "--skip-tools", "--no-watch", "--version"];

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleAction {
  Run(Invocation),
  ExitOk,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Invocation {
  pub config_path: Option<PathBuf>,
  pub options: RunOptions,
}

pub fn parse_command_line(args: &[String]) -> anyhow::Result<ConsoleAction> {
  let args = args.get(1..).unwrap_or_default();

  if args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(ConsoleAction::ExitOk);
  }

  let mut config_path = None;
  let mut i = 0;
  while i < args.len() {
    let arg = args[i].as_str();
    if arg == "--config" {
      let value = args
        .get(i + 1)
        .filter(|v| !v.starts_with("--"))
        .ok_or_else(|| anyhow::anyhow!("`--config` expects a path"))?;
      config_path = Some(PathBuf::from(value));
      i += 2;
      continue;
    }
    if !KNOWN_FLAGS.contains(&arg) {
      anyhow::bail!("unknown argument `{arg}` (see --help)");
    }
    i += 1;
  }

  Ok(ConsoleAction::Run(Invocation {
    config_path,
    options: runtime::configure_from_args(args),
  }))
}

fn print_help() {
  println!("Agent Setup v{}", env!("CARGO_PKG_VERSION"));
  println!("Installs tools, registers the build agent and watches its service.");
  println!("Options:");
  println!("  --config <path>  (default %ProgramData%\\Agent Setup\\config.toml)");
  println!("  --dry-run        validate and log the installer arguments only");
  println!("  --skip-tools     do not run the configured tool installs");
  println!("  --no-watch       exit after provisioning instead of watching the service");
  println!("  --version");
  println!("Environment:");
  println!("  AGENT_SETUP_ACCOUNT, AGENT_SETUP_TOKEN, AGENT_SETUP_POOL, AGENT_SETUP_AGENT_NAME");
  println!("  AGENT_SETUP_WORK, AGENT_SETUP_LOGON_ACCOUNT, AGENT_SETUP_LOGON_PASSWORD");
  println!("  AGENT_SETUP_INTERACTIVE");
}
