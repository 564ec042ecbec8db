use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Request, Response, Url};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::model::{DataRecord, DateKey, TriggerResponse};

const USER_AGENT: &str = "limitless-digest/0.1";

/// Network seam used by the fetcher. Implemented over HTTP by [`LimitlessClient`]
/// and by in-memory doubles in tests.
#[async_trait]
pub trait DigestApi: Send + Sync {
    /// Read every record stored for `date`. Any non-2xx status is an error.
    async fn fetch_records(&self, date: &DateKey) -> Result<Vec<DataRecord>>;

    /// Ask the ingestion service to populate `date`.
    async fn trigger_ingestion(&self, date: &DateKey) -> Result<TriggerResponse>;
}

pub struct LimitlessClient {
    http: Client,
    base_url: Url,
    namespace: String,
    last_buster: AtomicI64,
}

impl fmt::Debug for LimitlessClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitlessClient")
            .field("base_url", &self.base_url)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl LimitlessClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(cfg.api.base_url.trim()).context("invalid api.base_url")?;
        Self::with_base_url(base_url, cfg.api.namespace.clone(), cfg.api.timeout())
    }

    pub fn with_base_url(mut base_url: Url, namespace: String, timeout: Duration) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            namespace,
            last_buster: AtomicI64::new(0),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Strictly increasing per client, seeded from the wall clock in milliseconds.
    fn next_cache_buster(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last_buster.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self.last_buster.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn build_read_request(&self, date: &DateKey, cache_buster: i64) -> Result<Request> {
        let mut endpoint = self
            .base_url
            .join(&format!("calendar/data_items/{}", date))
            .context("invalid calendar base URL")?;
        endpoint
            .query_pairs_mut()
            .append_pair("namespaces", &self.namespace)
            .append_pair("_t", &cache_buster.to_string());
        self.http
            .get(endpoint)
            .header("Cache-Control", "no-cache, no-store, must-revalidate")
            .header("Pragma", "no-cache")
            .header("Expires", "0")
            .build()
            .context("failed to build read request")
    }

    pub fn build_trigger_request(&self, date: &DateKey) -> Result<Request> {
        let endpoint = self
            .base_url
            .join(&format!("calendar/limitless/fetch/{}", date))
            .context("invalid calendar base URL")?;
        self.http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .build()
            .context("failed to build trigger request")
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        debug!(method=%request.method(), url=%request.url(), "sending calendar request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach calendar API")?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status"),
                body
            ));
        }
        Ok(res)
    }
}

#[async_trait]
impl DigestApi for LimitlessClient {
    async fn fetch_records(&self, date: &DateKey) -> Result<Vec<DataRecord>> {
        let request = self.build_read_request(date, self.next_cache_buster())?;
        let res = self.execute(request).await?;
        res.json::<Vec<DataRecord>>()
            .await
            .context("invalid data items response")
    }

    async fn trigger_ingestion(&self, date: &DateKey) -> Result<TriggerResponse> {
        let request = self.build_trigger_request(date)?;
        let res = self.execute(request).await?;
        res.json::<TriggerResponse>()
            .await
            .context("invalid fetch trigger response")
    }
}
