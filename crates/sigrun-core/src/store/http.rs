//! Read-only chain access over HTTP.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{archive_path, check_position, ChainReader, CURRENT_FILE};
use crate::config::HttpOptions;
use crate::error::{TrustError, TrustResult};
use crate::trust::TrustConfig;

/// Chain published under a base URL.
#[derive(Debug, Clone)]
pub struct HttpChainReader {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChainReader {
    /// Reader for the chain at `url`. A URL ending in `sigrun-repo.json` is accepted too.
    pub fn new(url: &str, options: &HttpOptions) -> TrustResult<Self> {
        let trimmed = url.trim_end_matches('/');
        let base_url = trimmed
            .strip_suffix(CURRENT_FILE)
            .unwrap_or(trimmed)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: options.build_client()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_optional(&self, relative: &str) -> TrustResult<Option<TrustConfig>> {
        let url = format!("{}/{}", self.base_url, relative);
        debug!(url = %url, "fetching chain record");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await?;
                let record = serde_json::from_slice(&body)
                    .map_err(|e| TrustError::decode(format!("failed to parse {}: {}", url, e)))?;
                Ok(Some(record))
            }
            status => Err(TrustError::fetch(format!("GET {} returned HTTP {}", url, status))),
        }
    }
}

#[async_trait]
impl ChainReader for HttpChainReader {
    async fn get(&self, position: i64) -> TrustResult<Option<TrustConfig>> {
        check_position(position)?;
        self.fetch_optional(&archive_path(position)).await
    }

    async fn current(&self) -> TrustResult<Option<TrustConfig>> {
        self.fetch_optional(CURRENT_FILE).await
    }

    fn location(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_strips_current_file() {
        let options = HttpOptions::default();
        for url in [
            "https://example.com/chains/acme",
            "https://example.com/chains/acme/",
            "https://example.com/chains/acme/sigrun-repo.json",
        ] {
            let reader = HttpChainReader::new(url, &options).unwrap();
            assert_eq!(reader.base_url(), "https://example.com/chains/acme");
        }
    }
}
