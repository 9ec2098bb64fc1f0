use crate::error::ProvisionError;
use crate::runtime::Sleeper;
use crate::types::AgentPackageReference;
use anyhow::Context;
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

pub mod fetch;
pub mod schema;

pub const ARCHIVE_FILE_NAME: &str = "agent.zip";

/// Where the agent package comes from.
pub trait PackageSource {
  fn latest_package_url(&self) -> anyhow::Result<String>;
  fn download(&self, download_url: &str, dest: &Path) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub retries: u32,
  pub delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retries: 3,
      delay: Duration::from_secs(1),
    }
  }
}

impl RetryPolicy {
  pub fn max_attempts(&self) -> u32 {
    self.retries.saturating_add(1)
  }
}

/// Resolves and downloads the latest package into `scratch_dir`, retrying the whole
/// listing + download sequence on any failure.
pub fn acquire(
  source: &dyn PackageSource,
  scratch_dir: &Path,
  policy: RetryPolicy,
  sleeper: &dyn Sleeper,
) -> Result<AgentPackageReference, ProvisionError> {
  let local_archive_path = scratch_dir.join(ARCHIVE_FILE_NAME);
  let max_attempts = policy.max_attempts();
  let mut attempt = 0;

  loop {
    attempt += 1;
    match try_acquire_once(source, scratch_dir, &local_archive_path) {
      Ok(download_url) => {
        return Ok(AgentPackageReference {
          download_url,
          local_archive_path,
        });
      }
      Err(e) if attempt < max_attempts => {
        tracing::warn!(
          attempt,
          max_attempts,
          error = %format!("{e:#}"),
          "agent package download failed; retrying"
        );
        sleeper.sleep(policy.delay);
      }
      Err(e) => {
        return Err(ProvisionError::PackageDownloadFailed {
          attempts: attempt,
          source: e,
        });
      }
    }
  }
}

fn try_acquire_once(
  source: &dyn PackageSource,
  scratch_dir: &Path,
  archive: &Path,
) -> anyhow::Result<String> {
  fs::create_dir_all(scratch_dir)
    .with_context(|| format!("create download directory {}", scratch_dir.display()))?;
  let url = source.latest_package_url()?;
  source.download(&url, archive)?;
  Ok(url)
}

pub fn extract(archive: &Path, dest: &Path) -> anyhow::Result<usize> {
  let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
  let mut zip = zip::ZipArchive::new(file).context("read agent package archive")?;
  let entries = zip.len();
  zip
    .extract(dest)
    .with_context(|| format!("extract into {}", dest.display()))?;
  Ok(entries)
}
