// csk-net/src/http.rs
use std::time::Duration;

use async_trait::async_trait;
use csk_common::error::{CskError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::validation::validate_url;

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;
const USER_AGENT_STRING: &str = "csk package-manifest interpreter (Rust; +https://github.com/alexykn/csk)";

/// Download collaborator: turns a URL into artifact bytes.
///
/// No transport is mandated. Failures are reported as
/// [`CskError::DownloadError`] and are never retried here.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher for https sources.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
        })
    }
}

fn file_name_of(url: &str) -> String {
    url.split('/')
        .next_back()
        .filter(|s| !s.is_empty())
        .unwrap_or("artifact")
        .to_string()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let name = file_name_of(url);
        validate_url(url)
            .map_err(|e| CskError::DownloadError(name.clone(), url.to_string(), e.to_string()))?;

        debug!("Downloading {}", url);
        let response = self.client.get(url).send().await.map_err(|e| {
            debug!("HTTP request failed for {url}: {e}");
            CskError::DownloadError(name.clone(), url.to_string(), format!("HTTP request failed: {e}"))
        })?;
        let status = response.status();
        debug!("Received HTTP status: {} for {}", status, url);

        if !status.is_success() {
            let reason = match status {
                StatusCode::NOT_FOUND => "Resource not found (404)".to_string(),
                StatusCode::FORBIDDEN => "Access forbidden (403)".to_string(),
                other => format!("HTTP error {other}"),
            };
            tracing::error!("Download of {} failed: {}", url, reason);
            return Err(CskError::DownloadError(name, url.to_string(), reason));
        }

        let content = response.bytes().await.map_err(|e| {
            CskError::DownloadError(
                name.clone(),
                url.to_string(),
                format!("Failed to read response body bytes: {e}"),
            )
        })?;
        debug!("Downloaded {} bytes from {}", content.len(), url);
        Ok(content.to_vec())
    }
}

/// Redirects must stay on https and within [`MAX_REDIRECTS`] hops.
fn check_redirect(next: &Url, previous_hops: usize) -> std::result::Result<(), String> {
    if previous_hops >= MAX_REDIRECTS {
        return Err(format!("too many redirects (more than {MAX_REDIRECTS})"));
    }
    if next.scheme() != "https" {
        return Err(format!("refusing redirect to non-https URL {next}"));
    }
    Ok(())
}

fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(Policy::custom(|attempt| {
            match check_redirect(attempt.url(), attempt.previous().len()) {
                Ok(()) => attempt.follow(),
                Err(reason) => {
                    debug!("Stopping redirect: {}", reason);
                    attempt.error(reason)
                }
            }
        }))
        .build()
        .map_err(|e| CskError::HttpError(format!("Failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of("https://example.com/a/cuda.dmg"), "cuda.dmg");
        assert_eq!(file_name_of("https://example.com/a/"), "artifact");
    }

    #[test]
    fn test_redirects_stay_on_https() {
        let https = Url::parse("https://cdn.example.com/cuda.dmg").unwrap();
        let http = Url::parse("http://cdn.example.com/cuda.dmg").unwrap();
        assert!(check_redirect(&https, 0).is_ok());
        assert!(check_redirect(&https, MAX_REDIRECTS - 1).is_ok());
        assert!(check_redirect(&https, MAX_REDIRECTS).is_err());
        let err = check_redirect(&http, 1).unwrap_err();
        assert!(err.contains("non-https"), "{err}");
    }

    #[tokio::test]
    async fn test_rejects_plain_http_without_network() {
        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher.fetch("http://example.com/x.pkg").await.unwrap_err();
        match err {
            CskError::DownloadError(name, url, _) => {
                assert_eq!(name, "x.pkg");
                assert_eq!(url, "http://example.com/x.pkg");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
