use std::path::{Path, PathBuf};

pub fn base_dir() -> anyhow::Result<PathBuf> {
  let program_data = std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".into());
  Ok(PathBuf::from(program_data).join("Agent Setup"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn tools_dir(base: &Path) -> PathBuf {
  base.join("tools")
}

/// Fresh scratch directory for one package download.
pub fn download_dir() -> PathBuf {
  std::env::temp_dir().join(format!("agent-setup-{}", uuid::Uuid::new_v4()))
}
