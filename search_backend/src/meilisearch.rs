//! Meilisearch sink client

use async_trait::async_trait;
use config::MeilisearchConfig;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::SearchClient;
use crate::errors::SearchError;
use crate::http::{build_http_client, endpoint, parse_base};

const BACKEND: &str = "meilisearch";

pub struct MeilisearchClient {
    http: reqwest::Client,
    server_url: Url,
    master_key: Option<String>,
}

impl std::fmt::Debug for MeilisearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeilisearchClient")
            .field("server_url", &self.server_url.as_str())
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Deserialize)]
struct Health {
    status: String,
}

impl MeilisearchClient {
    pub fn new(config: &MeilisearchConfig) -> Result<Self, SearchError> {
        Ok(Self {
            http: build_http_client()?,
            server_url: parse_base(&config.server_url)?,
            master_key: config.master_key.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        endpoint(&self.server_url, segments)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, SearchError> {
        let request = match &self.master_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        Ok(request.send().await?)
    }
}

#[async_trait]
impl SearchClient for MeilisearchClient {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn health(&self) -> Result<(), SearchError> {
        let response = self.send(self.http.get(self.url(&["health"])?)).await?;
        if !response.status().is_success() {
            return Err(SearchError::from_response(BACKEND, response).await);
        }

        let health: Health = response.json().await?;
        if health.status != "available" {
            return Err(SearchError::Unhealthy {
                backend: BACKEND,
                reason: format!("status is {}", health.status),
            });
        }
        Ok(())
    }

    async fn ensure_indexes(&self, indexes: &[&str]) -> Result<(), SearchError> {
        for &uid in indexes {
            let existing = self.send(self.http.get(self.url(&["indexes", uid])?)).await?;
            if existing.status().is_success() {
                continue;
            }
            if existing.status() != StatusCode::NOT_FOUND {
                return Err(SearchError::from_response(BACKEND, existing).await);
            }

            // Index creation is an asynchronous task; 202 means it was enqueued
            let created = self
                .send(
                    self.http
                        .post(self.url(&["indexes"])?)
                        .json(&json!({ "uid": uid, "primaryKey": "id" })),
                )
                .await?;
            if !created.status().is_success() {
                return Err(SearchError::from_response(BACKEND, created).await);
            }
            tracing::info!(backend = BACKEND, index = uid, "enqueued search index creation");
        }
        Ok(())
    }

    /// Meilisearch has no external versioning; ordering relies on the ledger
    async fn upsert(
        &self,
        index: &str,
        _id: &str,
        document: &Value,
        _version: Option<i64>,
    ) -> Result<(), SearchError> {
        let mut url = self.url(&["indexes", index, "documents"])?;
        url.query_pairs_mut().append_pair("primaryKey", "id");

        let response = self
            .send(self.http.post(url).json(&[document]))
            .await?;
        if !response.status().is_success() {
            return Err(SearchError::from_response(BACKEND, response).await);
        }
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str, _version: Option<i64>) -> Result<(), SearchError> {
        let response = self
            .send(self.http.delete(self.url(&["indexes", index, "documents", id])?))
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(SearchError::from_response(BACKEND, response).await)
    }
}
