use super::TransferSource;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Plain HTTP GET source for media files.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher").finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("tumblr-archiver/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TransferSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, String> {
        debug!(url, "fetching media");
        let res = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("request failed: {}", e)
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            return Err(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ));
        }
        res.bytes()
            .await
            .map_err(|e| format!("failed to read body: {}", e))
    }
}
