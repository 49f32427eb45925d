//! Remote tier over a plain HTTP key-value service.
//!
//! `GET {base}/{key}` returns the entry document or 404, `PUT {base}/{key}?ttl=<secs>`
//! stores it, `DELETE {base}/{key}` removes it.

use super::backend::CacheBackend;
use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::env;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct HttpRemoteStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid remote cache url: {}", e),
                ErrorContext::new().with_field_path("remote_cache_url"),
            )
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let timeout_secs = env::var("LLM_EXEC_REMOTE_CACHE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(5);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| Error::configuration(format!("remote cache client: {}", e)))?;

        Ok(Self {
            client,
            base,
            token: env::var("LLM_EXEC_REMOTE_CACHE_TOKEN").ok(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url_for(&self, key: &CacheKey) -> Result<Url> {
        self.base
            .join(&key.hash)
            .map_err(|e| Error::Cache(format!("remote cache url for '{}': {}", key, e)))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn remote_error(e: reqwest::Error) -> Error {
    Error::Cache(format!("remote cache: {}", e))
}

#[async_trait]
impl CacheBackend for HttpRemoteStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let resp = self
            .request(reqwest::Method::GET, self.url_for(key)?)
            .send()
            .await
            .map_err(remote_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let entry = resp.json::<CacheEntry>().await.map_err(remote_error)?;
                Ok(Some(entry))
            }
            s => Err(Error::Cache(format!("remote cache GET returned {}", s))),
        }
    }

    async fn set(&self, key: &CacheKey, entry: &CacheEntry, ttl: Option<Duration>) -> Result<()> {
        let mut url = self.url_for(key)?;
        if let Some(ttl) = ttl {
            url.query_pairs_mut()
                .append_pair("ttl", &ttl.as_secs().to_string());
        }
        let resp = self
            .request(reqwest::Method::PUT, url)
            .json(entry)
            .send()
            .await
            .map_err(remote_error)?;
        if !resp.status().is_success() {
            return Err(Error::Cache(format!(
                "remote cache PUT returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let resp = self
            .request(reqwest::Method::DELETE, self.url_for(key)?)
            .send()
            .await
            .map_err(remote_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(Error::Cache(format!("remote cache DELETE returned {}", s))),
        }
    }

    async fn clear(&self) -> Result<()> {
        // Remote entries age out through their TTL.
        debug!(base = %self.base, "bulk clear not supported by remote cache, skipping");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
