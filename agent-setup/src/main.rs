use std::process::ExitCode;

fn main() -> ExitCode {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return ExitCode::SUCCESS;
  }

  match agent_setup::run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      tracing::error!(error = %format!("{e:#}"), "agent setup failed");
      eprintln!("agent-setup: {e:#}");
      ExitCode::from(agent_setup::error::exit_code_for(&e))
    }
  }
}
