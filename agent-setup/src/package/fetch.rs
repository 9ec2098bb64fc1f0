use super::schema::PackageListing;
use super::PackageSource;
use crate::types::Secret;
use anyhow::Context;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::USER_AGENT;
use reqwest::Url;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// The service ignores the Basic auth user name; only the PAT is checked.
pub const BASIC_AUTH_USER: &str = "user";

const LISTING_PATH: &str = "_apis/distributedtask/packages/agent/win-x64";
const LISTING_QUERY: &str = "$top=1&api-version=3.0";
const MAX_LISTING_BYTES: usize = 1024 * 1024;

pub struct HttpPackageSource {
  client: Client,
  server_url: String,
  token: Secret,
}

impl HttpPackageSource {
  pub fn new(server_url: &str, token: Secret, timeout: Duration) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .context("build HTTP client")?;
    Ok(Self {
      client,
      server_url: server_url.trim_end_matches('/').to_string(),
      token,
    })
  }

  fn authed_get(&self, url: Url) -> RequestBuilder {
    self
      .client
      .get(url)
      .header(
        USER_AGENT,
        format!("agent-setup/{}", env!("CARGO_PKG_VERSION")),
      )
      .basic_auth(BASIC_AUTH_USER, Some(self.token.expose()))
  }
}

pub fn listing_url(server_url: &str) -> anyhow::Result<Url> {
  let raw = format!(
    "{}/{LISTING_PATH}?{LISTING_QUERY}",
    server_url.trim_end_matches('/')
  );
  Url::parse(&raw).with_context(|| format!("invalid package listing URL: {raw}"))
}

impl PackageSource for HttpPackageSource {
  fn latest_package_url(&self) -> anyhow::Result<String> {
    let url = listing_url(&self.server_url)?;
    let response = self
      .authed_get(url.clone())
      .send()
      .with_context(|| format!("GET {}", safe_url_label(&url)))?;
    let response = check_status(response, &url)?;

    let body = read_response_with_limit(response, MAX_LISTING_BYTES)?;
    let listing: PackageListing =
      serde_json::from_slice(&body).context("parse agent package listing")?;
    let package = listing
      .value
      .first()
      .ok_or_else(|| anyhow::anyhow!("agent package listing is empty"))?;

    tracing::debug!(
      version = %package.version.map(|v| v.to_string()).unwrap_or_default(),
      filename = package.filename.as_deref().unwrap_or(""),
      "latest agent package resolved"
    );
    Ok(package.download_url.clone())
  }

  fn download(&self, download_url: &str, dest: &Path) -> anyhow::Result<()> {
    let url =
      Url::parse(download_url).with_context(|| format!("invalid download URL: {download_url}"))?;
    let response = self
      .authed_get(url.clone())
      .send()
      .with_context(|| format!("GET {}", safe_url_label(&url)))?;
    let mut response = check_status(response, &url)?;

    let mut file = File::create(dest).with_context(|| format!("create {}", dest.display()))?;
    let bytes = response
      .copy_to(&mut file)
      .with_context(|| format!("write {}", dest.display()))?;
    tracing::info!(bytes, url = %safe_url_label(&url), "agent package downloaded");
    Ok(())
  }
}

fn check_status(response: Response, url: &Url) -> anyhow::Result<Response> {
  let status = response.status();
  if !status.is_success() {
    anyhow::bail!(
      "unexpected HTTP status {} for {}",
      status.as_u16(),
      safe_url_label(url)
    );
  }
  Ok(response)
}

fn read_response_with_limit(response: Response, max_bytes: usize) -> anyhow::Result<Vec<u8>> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited
    .read_to_end(&mut out)
    .context("read response body")?;

  if out.len() > max_bytes {
    anyhow::bail!("response exceeds max size {} bytes", max_bytes);
  }

  Ok(out)
}

pub(crate) fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use std::net::TcpListener;
  use std::sync::mpsc;

  /// Answers with `responses` in order, one connection each, and hands back each request head.
  fn serve(listener: TcpListener, responses: Vec<(u16, String)>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
      for (status, body) in responses {
        let Ok((mut stream, _)) = listener.accept() else {
          return;
        };
        let mut head: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
          match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
          }
        }
        let _ = tx.send(String::from_utf8_lossy(&head).to_ascii_lowercase());
        let reply = format!(
          "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
          body.len()
        );
        let _ = stream.write_all(reply.as_bytes());
      }
    });
    rx
  }

  fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
  }

  fn source(base: &str) -> HttpPackageSource {
    HttpPackageSource::new(base, Secret::new("abc"), Duration::from_secs(10)).unwrap()
  }

  // base64("user:abc")
  const EXPECTED_AUTH: &str = "authorization: basic dxnlcjphymm=";

  #[test]
  fn listing_and_download_use_pat_basic_auth() {
    let (listener, base) = bind();
    let listing = format!(
      r#"{{"count":1,"value":[{{"downloadUrl":"{base}/pkg/vsts-agent-win-x64.zip","filename":"vsts-agent-win-x64.zip","version":{{"major":2,"minor":150,"patch":0}}}}]}}"#
    );
    let requests = serve(
      listener,
      vec![(200, listing), (200, "zip-bytes".to_string())],
    );
    let src = source(&base);

    let url = src.latest_package_url().unwrap();
    assert_eq!(url, format!("{base}/pkg/vsts-agent-win-x64.zip"));
    let head = requests.recv().unwrap();
    assert!(head.starts_with(
      "get /_apis/distributedtask/packages/agent/win-x64?$top=1&api-version=3.0 http/1.1"
    ));
    assert!(head.contains(EXPECTED_AUTH));
    assert!(head.contains("user-agent: agent-setup/"));

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("agent.zip");
    src.download(&url, &dest).unwrap();
    let head = requests.recv().unwrap();
    assert!(head.starts_with("get /pkg/vsts-agent-win-x64.zip http/1.1"));
    assert!(head.contains(EXPECTED_AUTH));
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "zip-bytes");
  }

  #[test]
  fn single_object_listing_is_accepted() {
    let (listener, base) = bind();
    let listing = r#"{"value":{"downloadUrl":"https://cdn.example/agent.zip"}}"#.to_string();
    let _requests = serve(listener, vec![(200, listing)]);
    assert_eq!(
      source(&base).latest_package_url().unwrap(),
      "https://cdn.example/agent.zip"
    );
  }

  #[test]
  fn empty_listing_is_an_error() {
    let (listener, base) = bind();
    let _requests = serve(listener, vec![(200, r#"{"count":0,"value":[]}"#.to_string())]);
    let err = source(&base).latest_package_url().unwrap_err();
    assert!(err.to_string().contains("empty"));
  }

  #[test]
  fn unauthorized_listing_fails_with_status() {
    let (listener, base) = bind();
    let _requests = serve(listener, vec![(401, String::new())]);
    let err = source(&base).latest_package_url().unwrap_err();
    assert!(format!("{err:#}").contains("401"));
  }

  #[test]
  fn listing_url_targets_win_x64_top_one() {
    let url = listing_url("https://contoso.visualstudio.com/").unwrap();
    assert_eq!(
      url.as_str(),
      "https://contoso.visualstudio.com/_apis/distributedtask/packages/agent/win-x64?$top=1&api-version=3.0"
    );
  }

  #[test]
  fn url_label_drops_query() {
    let url = Url::parse("https://cdn.example/agent/pkg.zip?sig=secret").unwrap();
    assert_eq!(safe_url_label(&url), "cdn.example/agent/pkg.zip");
  }
}
