use crate::config::ToolSpec;
use crate::error::ToolInstallFailed;
use crate::package;
use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Executable search path built up by tool installs and handed to child processes,
/// instead of mutating the process environment.
#[derive(Debug, Clone)]
pub struct ToolContext {
  pub tools_dir: PathBuf,
  search_path: Vec<PathBuf>,
  inherited: Option<OsString>,
}

impl ToolContext {
  pub fn new(tools_dir: PathBuf, inherited: Option<OsString>) -> Self {
    Self {
      tools_dir,
      search_path: Vec::new(),
      inherited,
    }
  }

  pub fn prepend(&mut self, dir: PathBuf) {
    self.search_path.retain(|p| p != &dir);
    self.search_path.insert(0, dir);
  }

  pub fn search_path(&self) -> &[PathBuf] {
    &self.search_path
  }

  /// `PATH` value for children: installed tool dirs first, then the inherited entries.
  pub fn path_var(&self) -> anyhow::Result<OsString> {
    let inherited: Vec<PathBuf> = self
      .inherited
      .as_ref()
      .map(|p| std::env::split_paths(p).collect())
      .unwrap_or_default();
    let all = self
      .search_path
      .iter()
      .cloned()
      .chain(inherited.into_iter().filter(|p| !self.search_path.contains(p)));
    std::env::join_paths(all).context("build PATH for child processes")
  }
}

pub trait ToolInstaller {
  fn install(&self, tool: &ToolSpec, ctx: &mut ToolContext) -> anyhow::Result<()>;
}

/// Installs every tool in order; the first failure stops the run.
pub fn install_all(
  installer: &dyn ToolInstaller,
  tools: &[ToolSpec],
  ctx: &mut ToolContext,
) -> Result<(), ToolInstallFailed> {
  for tool in tools {
    tracing::info!(tool = %tool.name, "installing tool");
    installer
      .install(tool, ctx)
      .map_err(|source| ToolInstallFailed {
        tool: tool.name.clone(),
        source,
      })?;
  }
  Ok(())
}

/// Downloads a fixed artifact URL into `<tools_dir>\<name>`.
pub struct DirectDownloadInstaller {
  client: Client,
}

impl DirectDownloadInstaller {
  pub fn new(timeout: Duration) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .context("build HTTP client")?;
    Ok(Self { client })
  }
}

impl ToolInstaller for DirectDownloadInstaller {
  fn install(&self, tool: &ToolSpec, ctx: &mut ToolContext) -> anyhow::Result<()> {
    let url = Url::parse(&tool.url).with_context(|| format!("invalid URL for {}", tool.name))?;
    let tool_dir = ctx.tools_dir.join(&tool.name);
    fs::create_dir_all(&tool_dir).with_context(|| format!("create {}", tool_dir.display()))?;

    let file_name = artifact_file_name(&url, &tool.name);
    let artifact = tool_dir.join(&file_name);

    let mut response = self
      .client
      .get(url.clone())
      .header(
        USER_AGENT,
        format!("agent-setup/{}", env!("CARGO_PKG_VERSION")),
      )
      .send()
      .with_context(|| format!("GET {}", package::fetch::safe_url_label(&url)))?
      .error_for_status()
      .with_context(|| format!("GET {}", package::fetch::safe_url_label(&url)))?;
    let mut file = File::create(&artifact).with_context(|| format!("create {}", artifact.display()))?;
    response
      .copy_to(&mut file)
      .with_context(|| format!("write {}", artifact.display()))?;
    drop(file);

    place_artifact(&artifact, &tool_dir)?;
    let bin_dir = match tool.bin_subdir.as_deref() {
      Some(sub) if !sub.trim().is_empty() => tool_dir.join(sub),
      _ => tool_dir,
    };
    tracing::info!(tool = %tool.name, dir = %bin_dir.display(), "tool installed");
    ctx.prepend(bin_dir);
    Ok(())
  }
}

fn artifact_file_name(url: &Url, fallback: &str) -> String {
  url
    .path_segments()
    .and_then(|mut s| s.next_back())
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .unwrap_or_else(|| fallback.to_string())
}

/// Zip artifacts are unpacked next to themselves and removed; anything else stays as is.
fn place_artifact(artifact: &Path, tool_dir: &Path) -> anyhow::Result<()> {
  let is_zip = artifact
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
  if !is_zip {
    return Ok(());
  }
  package::extract(artifact, tool_dir)?;
  fs::remove_file(artifact).with_context(|| format!("remove {}", artifact.display()))?;
  Ok(())
}
