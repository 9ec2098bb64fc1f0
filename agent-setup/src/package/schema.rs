use serde::Deserialize;

/// Response of the agent package listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageListing {
  pub value: OneOrMany<AgentPackage>,
}

/// The listing returns a bare object for `$top=1` on some server versions.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
  One(T),
  Many(Vec<T>),
}

impl<T> OneOrMany<T> {
  pub fn first(&self) -> Option<&T> {
    match self {
      Self::One(t) => Some(t),
      Self::Many(v) => v.first(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPackage {
  pub download_url: String,

  #[serde(default)]
  pub filename: Option<String>,

  #[serde(default)]
  pub platform: Option<String>,

  #[serde(default)]
  pub version: Option<PackageVersion>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PackageVersion {
  pub major: u32,
  pub minor: u32,
  pub patch: u32,
}

impl std::fmt::Display for PackageVersion {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
  }
}
