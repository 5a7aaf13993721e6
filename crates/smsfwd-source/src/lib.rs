//! SMS inbox adapter (HTTP).
//!
//! Implements the `smsfwd-core` [`SourceClient`] port over `GET <base>?token=…`.
//!
//! TLS certificate verification is disabled: the inbox is served from an
//! internal endpoint without a verifiable certificate, and that endpoint is
//! the trust boundary. System proxy settings are ignored for the same host.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT},
    StatusCode,
};

use smsfwd_core::{
    errors::Error,
    source::{parse_message_list, SourceClient, SourceMessage},
    Result,
};

const MAX_RETRIES: usize = 1;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

#[derive(Clone, Debug)]
pub struct HttpSourceClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSourceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .default_headers(default_headers())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    async fn get_body(&self, token: &str) -> Result<String> {
        let mut attempts = 0usize;
        loop {
            let resp = self
                .http
                .get(&self.base_url)
                .query(&[("token", token)])
                .send()
                .await
                .map_err(|e| Error::SourceUnavailable(format!("request failed: {e}")))?;

            let status = resp.status();
            if is_retryable(status) && attempts < MAX_RETRIES {
                attempts += 1;
                tracing::debug!(%status, attempts, "retrying SMS fetch");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::SourceUnavailable(format!(
                    "HTTP {status} {}",
                    body.chars().take(200).collect::<String>()
                )));
            }

            return resp
                .text()
                .await
                .map_err(|e| Error::SourceUnavailable(format!("failed to read body: {e}")));
        }
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch(&self, token: &str) -> Result<Vec<SourceMessage>> {
        let body = self.get_body(token).await?;
        parse_message_list(&body)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    RETRY_STATUSES.contains(&status.as_u16())
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en-US;q=0.7,en;q=0.6"),
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36",
        ),
    );
    headers
}
