use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::document::HtmlDocument;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Wait before the next attempt, after `failed` attempts so far (1-based).
    pub fn delay(&self, failed: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.min_wait,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(failed.saturating_sub(1));
                self.min_wait.saturating_mul(factor).min(self.max_wait)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: StatusCode },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

pub enum FetchOutcome {
    Page(HtmlDocument),
    /// URL does not look like a catalog page; nothing was requested.
    Skipped,
}

/// Blocking HTTP client with a URL precondition and bounded retries.
pub struct FetchClient {
    http: Client,
    policy: RetryPolicy,
    path_pattern: String,
}

impl FetchClient {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.request_timeout())
            .connect_timeout(settings.request_timeout())
            .build()
            .map_err(FetchError::Client)?;
        Ok(FetchClient {
            http,
            policy: settings.retry_policy(),
            path_pattern: settings.title_path_pattern.clone(),
        })
    }

    pub fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        self.fetch_with_query(url, &[])
    }

    pub fn fetch_with_query(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<FetchOutcome, FetchError> {
        if !url.contains(&self.path_pattern) {
            debug!(url, pattern = %self.path_pattern, "URL outside the catalog, not fetched");
            return Ok(FetchOutcome::Skipped);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(url, query) {
                Ok(body) => return Ok(FetchOutcome::Page(HtmlDocument::parse(&body))),
                Err(e) if attempt >= max_attempts => {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let backoff = self.policy.delay(attempt);
                    debug!(
                        url,
                        attempt,
                        max_attempts,
                        error = %e,
                        "fetch failed, backing off {:.1}s",
                        backoff.as_secs_f64()
                    );
                    thread::sleep(backoff);
                }
            }
        }
    }

    fn get_once(&self, url: &str, query: &[(&str, &str)]) -> Result<String, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self.http.get(url).query(query).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = response.text().map_err(transport)?;
        debug!(url, bytes = body.len(), "fetched");
        Ok(body)
    }
}
