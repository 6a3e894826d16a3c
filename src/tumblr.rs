use crate::accumulator::{FetchError, PostSource};
use crate::model::{PostPage, RawPost, ResponseMeta};
use crate::pagination::PageRequest;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const TUMBLR_API_BASE: &str = "https://api.tumblr.com/";

/// Which listing of a blog to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Listing {
    #[default]
    Likes,
    Posts,
}

impl Listing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Listing::Likes => "likes",
            Listing::Posts => "posts",
        }
    }
}

/// Backoff for HTTP 429 responses: exponential from `base_delay`, capped at
/// `max_delay`, with a server-sent `Retry-After` taking precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RateLimitPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.min(16)));
        retry_after.unwrap_or(backoff).min(self.max_delay)
    }
}

#[derive(Clone)]
pub struct TumblrClient {
    http: Client,
    base_url: Url,
    api_key: String,
    listing: Listing,
    rate_limit: RateLimitPolicy,
}

impl fmt::Debug for TumblrClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TumblrClient")
            .field("base_url", &self.base_url)
            .field("listing", &self.listing)
            .finish_non_exhaustive()
    }
}

impl TumblrClient {
    pub fn new(api_key: String) -> Result<Self, FetchError> {
        let base_url = Url::parse(TUMBLR_API_BASE)
            .map_err(|e| FetchError::Transport(format!("invalid base URL: {}", e)))?;
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: String, base_url: Url) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("tumblr-archiver/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key,
            listing: Listing::default(),
            rate_limit: RateLimitPolicy::default(),
        })
    }

    pub fn listing(mut self, listing: Listing) -> Self {
        self.listing = listing;
        self
    }

    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    pub fn build_request(
        &self,
        blog: &str,
        request: &PageRequest,
    ) -> Result<reqwest::Request, FetchError> {
        let endpoint = self
            .base_url
            .join(&format!("v2/blog/{}/{}", blog_identifier(blog), self.listing.as_str()))
            .map_err(|e| FetchError::Transport(format!("invalid listing URL: {}", e)))?;
        let mut query = vec![("api_key", self.api_key.clone())];
        query.extend(request.query_params());
        self.http
            .get(endpoint)
            .query(&query)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))
    }

    async fn fetch_once(&self, blog: &str, request: &PageRequest) -> Result<PostPage, FetchError> {
        let req = self.build_request(blog, request)?;
        debug!(url = %redacted(req.url()), "requesting listing page");
        let res = self
            .http
            .execute(req)
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = res.status();
        let retry_after = res
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = res
            .text()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = error_message(&body, status);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    FetchError::Authorization { message }
                }
                StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
                    retry_after,
                    message,
                },
                _ => FetchError::Upstream {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        parse_page(&body, self.listing)
    }
}

#[async_trait]
impl PostSource for TumblrClient {
    async fn fetch_page(
        &self,
        identifier: &str,
        request: &PageRequest,
    ) -> Result<PostPage, FetchError> {
        let mut retry = 0;
        loop {
            match self.fetch_once(identifier, request).await {
                Err(FetchError::RateLimited {
                    retry_after,
                    message,
                }) if retry < self.rate_limit.max_retries => {
                    let delay = self.rate_limit.delay_for(retry, retry_after);
                    warn!(
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        %message,
                        "rate limited; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }
}

/// Bare blog names are expanded to their `.tumblr.com` host.
pub fn blog_identifier(blog: &str) -> String {
    let blog = blog.trim().trim_end_matches('/');
    let blog = blog
        .strip_prefix("https://")
        .or_else(|| blog.strip_prefix("http://"))
        .unwrap_or(blog);
    if blog.contains('.') {
        blog.to_string()
    } else {
        format!("{}.tumblr.com", blog)
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    meta: ResponseMeta,
    #[serde(default)]
    response: Value,
}

#[derive(Deserialize, Default)]
struct LikesResponse {
    #[serde(default)]
    liked_posts: Vec<RawPost>,
    #[serde(default)]
    liked_count: Option<u64>,
}

#[derive(Deserialize, Default)]
struct PostsResponse {
    #[serde(default)]
    posts: Vec<RawPost>,
    #[serde(default)]
    total_posts: Option<u64>,
}

fn parse_page(body: &str, listing: Listing) -> Result<PostPage, FetchError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    let (posts, total_count) = match listing {
        Listing::Likes => {
            let r: LikesResponse = serde_json::from_value(envelope.response)
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            (r.liked_posts, r.liked_count)
        }
        Listing::Posts => {
            let r: PostsResponse = serde_json::from_value(envelope.response)
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            (r.posts, r.total_posts)
        }
    };
    Ok(PostPage {
        posts,
        total_count,
        meta: envelope.meta,
    })
}

fn error_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<Envelope>(body)
        .ok()
        .map(|e| e.meta.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string())
}

fn redacted(url: &Url) -> Url {
    let mut url = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "api_key" { "[REDACTED]".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url
}
