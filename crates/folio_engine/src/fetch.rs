use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use folio_logging::{folio_debug, folio_warn};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::decode::decode_html;
use crate::{Document, FailureKind, FetchError};

/// Pattern that matches every host; always the last admission rule.
pub const CATCH_ALL: &str = "*";

/// Admission limits for hosts matching `pattern` (`*` matches any run of characters).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostRule {
    pub pattern: String,
    pub max_concurrent: usize,
    pub per_second: u32,
}

impl HostRule {
    pub fn new(pattern: impl Into<String>, max_concurrent: usize, per_second: u32) -> Self {
        Self {
            pattern: pattern.into(),
            max_concurrent,
            per_second,
        }
    }

    pub fn catch_all() -> Self {
        Self::new(CATCH_ALL, 50, 10)
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Whole-request deadline. Unset by default since large images can take a while.
    pub request_timeout: Option<Duration>,
    pub redirect_limit: usize,
    pub user_agent: String,
    /// First match wins; a catch-all is appended when missing.
    pub rules: Vec<HostRule>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            redirect_limit: 5,
            user_agent: concat!("folio/", env!("CARGO_PKG_VERSION")).to_string(),
            rules: vec![HostRule::catch_all()],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("host rule `{0}` must allow at least one concurrent request")]
    ZeroConcurrency(String),
    #[error("host rule `{0}` must allow at least one request per second")]
    ZeroRate(String),
    #[error("host rule `{pattern}` is not a valid pattern: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("cannot build http client: {0}")]
    Client(String),
}

/// Rate- and concurrency-limited retrieval, cancellable at every suspension point.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, cancel: &CancellationToken, url: &Url) -> Result<FetchResponse, FetchError>;

    async fn get_document(
        &self,
        cancel: &CancellationToken,
        url: &Url,
    ) -> Result<Document, FetchError> {
        let response = self.get(cancel, url).await?;
        let final_url = response.url().clone();
        let content_type = response.content_type().map(str::to_string);
        let bytes = response.read_all(cancel).await?;
        let decoded = decode_html(&bytes, content_type.as_deref())
            .map_err(|err| FetchError::new(FailureKind::Decode, &final_url, err.to_string()))?;
        Ok(Document {
            url: final_url,
            html: decoded.html,
            encoding: decoded.encoding_label,
        })
    }
}

/// Successful response whose body has not been read yet.
pub struct FetchResponse {
    url: Url,
    content_length: Option<u64>,
    content_type: Option<String>,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
}

impl FetchResponse {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Next body chunk, or `None` at the end. Aborts the transfer on cancellation.
    pub async fn next_chunk(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::cancelled(&self.url)),
            chunk = self.body.next() => match chunk {
                None => Ok(None),
                Some(Ok(bytes)) => Ok(Some(bytes)),
                Some(Err(err)) => Err(map_reqwest_error(err, &self.url)),
            },
        }
    }

    pub async fn read_all(mut self, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
        let mut bytes = Vec::with_capacity(self.content_length.unwrap_or(0) as usize);
        while let Some(chunk) = self.next_chunk(cancel).await? {
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

struct Admission {
    pattern: String,
    matcher: Regex,
    slots: Arc<Semaphore>,
    period: Duration,
    // Created on first use so the fetcher can be built outside a runtime.
    ticker: Mutex<Option<Interval>>,
}

impl Admission {
    fn new(rule: &HostRule) -> Result<Self, SettingsError> {
        if rule.max_concurrent == 0 {
            return Err(SettingsError::ZeroConcurrency(rule.pattern.clone()));
        }
        if rule.per_second == 0 {
            return Err(SettingsError::ZeroRate(rule.pattern.clone()));
        }
        Ok(Self {
            pattern: rule.pattern.clone(),
            matcher: glob_to_regex(&rule.pattern)?,
            slots: Arc::new(Semaphore::new(rule.max_concurrent)),
            period: Duration::from_secs(1) / rule.per_second,
            ticker: Mutex::new(None),
        })
    }

    fn matches(&self, host: &str) -> bool {
        self.matcher.is_match(host)
    }

    /// Takes a concurrency slot, then waits for the next rate tick.
    async fn admit(
        &self,
        cancel: &CancellationToken,
        url: &Url,
    ) -> Result<OwnedSemaphorePermit, FetchError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::cancelled(url)),
            permit = self.slots.clone().acquire_owned() => {
                permit.map_err(|_| FetchError::cancelled(url))?
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::cancelled(url)),
            _ = self.wait_tick() => {}
        }
        Ok(permit)
    }

    async fn wait_tick(&self) {
        let mut ticker = self.ticker.lock().await;
        let ticker = ticker.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        ticker.tick().await;
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex, SettingsError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?i)^{body}$")).map_err(|err| SettingsError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

/// Shared connection pool plus per-host admission control.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    admissions: Vec<Admission>,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, SettingsError> {
        let mut rules = settings.rules.clone();
        if rules.last().map(|r| r.pattern.as_str()) != Some(CATCH_ALL) {
            folio_warn!("host rules do not end in a catch-all; appending the default one");
            rules.push(HostRule::catch_all());
        }
        let admissions = rules
            .iter()
            .map(Admission::new)
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .user_agent(settings.user_agent.clone());
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| SettingsError::Client(err.to_string()))?;

        Ok(Self { client, admissions })
    }

    /// Rule patterns in match order.
    pub fn patterns(&self) -> Vec<&str> {
        self.admissions.iter().map(|a| a.pattern.as_str()).collect()
    }

    fn admission_for(&self, url: &Url) -> Option<&Admission> {
        let host = url.host_str().unwrap_or_default();
        self.admissions.iter().find(|a| a.matches(host))
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn get(&self, cancel: &CancellationToken, url: &Url) -> Result<FetchResponse, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled(url));
        }
        // Held until the response headers are in; the body is read unthrottled.
        let _permit = match self.admission_for(url) {
            Some(admission) => Some(admission.admit(cancel, url).await?),
            None => None,
        };

        folio_debug!("GET {}", url);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::cancelled(url)),
            response = self.client.get(url.clone()).send() => {
                response.map_err(|err| map_reqwest_error(err, url))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                url,
                status.to_string(),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        Ok(FetchResponse {
            url: response.url().clone(),
            content_length: response.content_length(),
            content_type,
            body: response.bytes_stream().boxed(),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error, url: &Url) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, url, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, url, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidUrl, url, err.to_string());
    }
    FetchError::new(FailureKind::Network, url, err.to_string())
}
