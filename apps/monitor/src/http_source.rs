//! REST pull source.

use anyhow::Context;
use serde::de::DeserializeOwned;

use telesync_sync::FeedSource;

/// Pulls a feed with `GET url`, decoding the JSON body.
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    http: reqwest::Client,
    url: String,
}

impl HttpJsonSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl<T> FeedSource<T> for HttpJsonSource
where
    T: DeserializeOwned + Send + 'static,
{
    fn pull(&self) -> impl Future<Output = anyhow::Result<T>> + Send {
        let request = self.http.get(&self.url);
        let url = self.url.clone();

        async move {
            let resp = request
                .send()
                .await
                .with_context(|| format!("GET {url}"))?;
            let status = resp.status();

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("GET {url}: {status} {}", body.trim());
            }

            resp.json::<T>()
                .await
                .with_context(|| format!("GET {url}: invalid JSON body"))
        }
    }
}

/// Source for feeds configured without a pull endpoint. Every pull fails, so
/// the feed reports an error while the stream is down.
#[derive(Debug, Clone)]
pub struct NoPullSource {
    feed: String,
}

impl NoPullSource {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }
}

impl<T: Send + 'static> FeedSource<T> for NoPullSource {
    fn pull(&self) -> impl Future<Output = anyhow::Result<T>> + Send {
        let feed = self.feed.clone();
        async move {
            Err::<T, _>(anyhow::anyhow!(
                "feed {feed} has no pull_url and the stream is down"
            ))
        }
    }
}
