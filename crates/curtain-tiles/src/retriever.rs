//! HTTP tile retrieval with per-host backoff

use curtain_tiles_lib::services::{BoxFuture, RetrievalError, Retriever};
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Fetches tiles over HTTP(S)
///
/// A host that fails to connect or times out is reported unavailable for `backoff`, so the
/// loader marks its tiles absent instead of queueing more doomed requests.
#[derive(Debug)]
pub struct HttpRetriever {
    client: reqwest::Client,
    backoff: Duration,
    unavailable_until: DashMap<String, Instant>,
}

impl HttpRetriever {
    pub fn new(timeout: Duration, backoff: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("curtain-tiles/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            backoff,
            unavailable_until: DashMap::new(),
        })
    }

    fn mark_unavailable(&self, host: String) {
        tracing::warn!(
            %host,
            backoff_secs = self.backoff.as_secs(),
            "Host unavailable, backing off"
        );
        self.unavailable_until.insert(host, Instant::now() + self.backoff);
    }

    fn host_available_at(&self, host: &str, now: Instant) -> bool {
        match self.unavailable_until.get(host).map(|until| *until) {
            Some(until) if now < until => false,
            Some(_) => {
                self.unavailable_until.remove(host);
                true
            }
            None => true,
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, RetrievalError> {
        let response = self.client.get(url).send().await.map_err(|e| self.classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(url, e))?;
        tracing::trace!(url, bytes = bytes.len(), "Fetched tile");
        Ok(bytes.to_vec())
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> RetrievalError {
        if err.is_connect() || err.is_timeout() {
            if let Some(host) = host_of(url) {
                self.mark_unavailable(host);
            }
        }
        if err.is_timeout() {
            RetrievalError::Timeout(url.to_string())
        } else if err.is_connect() {
            RetrievalError::HostUnavailable(url.to_string())
        } else {
            RetrievalError::Transport(err.to_string())
        }
    }
}

impl Retriever for HttpRetriever {
    fn is_available(&self, url: &str) -> bool {
        match host_of(url) {
            Some(host) => self.host_available_at(&host, Instant::now()),
            None => false,
        }
    }

    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, RetrievalError>> {
        Box::pin(self.get(url))
    }
}

/// Host and port of `url`, None when it is not a valid URL
fn host_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
