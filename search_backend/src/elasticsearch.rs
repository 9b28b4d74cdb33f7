//! Elasticsearch sink client
//!
//! Talks to the document REST API directly. Requests rotate across the
//! configured nodes so a single unreachable node only fails its share of calls.

use async_trait::async_trait;
use config::{ElasticsearchAuth, ElasticsearchConfig};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::SearchClient;
use crate::errors::SearchError;
use crate::http::{build_http_client, endpoint, parse_base};

const BACKEND: &str = "elasticsearch";

pub struct ElasticsearchClient {
    http: reqwest::Client,
    nodes: Vec<Url>,
    auth: Option<ElasticsearchAuth>,
    next_node: AtomicUsize,
}

impl std::fmt::Debug for ElasticsearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<&str> = self.nodes.iter().map(Url::as_str).collect();
        f.debug_struct("ElasticsearchClient")
            .field("nodes", &nodes)
            .field("auth", &self.auth)
            .finish()
    }
}

#[derive(Deserialize)]
struct ClusterHealth {
    status: String,
}

impl ElasticsearchClient {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self, SearchError> {
        let nodes = config
            .nodes
            .iter()
            .map(|node| parse_base(node))
            .collect::<Result<Vec<_>, _>>()?;

        if nodes.is_empty() {
            return Err(SearchError::InvalidEndpoint(
                "elasticsearch requires at least one node".to_string(),
            ));
        }

        Ok(Self {
            http: build_http_client()?,
            nodes,
            auth: config.auth.clone(),
            next_node: AtomicUsize::new(0),
        })
    }

    fn node(&self) -> &Url {
        let index = self.next_node.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        &self.nodes[index]
    }

    fn url(&self, segments: &[&str]) -> Result<Url, SearchError> {
        endpoint(self.node(), segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(ElasticsearchAuth::ApiKey { key }) => {
                request.header(reqwest::header::AUTHORIZATION, format!("ApiKey {key}"))
            }
            Some(ElasticsearchAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, SearchError> {
        Ok(self.authorize(request).send().await?)
    }

    /// Document URL, carrying `version` as an external version when known
    fn document_url(&self, index: &str, id: &str, version: Option<i64>) -> Result<Url, SearchError> {
        let mut url = self.url(&[index, "_doc", id])?;
        if let Some(version) = version {
            url.query_pairs_mut()
                .append_pair("version", &version.to_string())
                .append_pair("version_type", "external_gte");
        }
        Ok(url)
    }
}

fn conflict(index: &str, id: &str) -> SearchError {
    SearchError::VersionConflict {
        backend: BACKEND,
        index: index.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn health(&self) -> Result<(), SearchError> {
        let response = self
            .send(self.http.get(self.url(&["_cluster", "health"])?))
            .await?;
        if !response.status().is_success() {
            return Err(SearchError::from_response(BACKEND, response).await);
        }

        let health: ClusterHealth = response.json().await?;
        if health.status == "red" {
            return Err(SearchError::Unhealthy {
                backend: BACKEND,
                reason: "cluster status is red".to_string(),
            });
        }
        Ok(())
    }

    async fn ensure_indexes(&self, indexes: &[&str]) -> Result<(), SearchError> {
        for &index in indexes {
            let exists = self.send(self.http.head(self.url(&[index])?)).await?;
            if exists.status().is_success() {
                continue;
            }
            if exists.status() != StatusCode::NOT_FOUND {
                return Err(SearchError::from_response(BACKEND, exists).await);
            }

            let created = self.send(self.http.put(self.url(&[index])?)).await?;
            match created.status() {
                status if status.is_success() => {
                    tracing::info!(backend = BACKEND, index, "created search index");
                }
                // Another indexer created it between our HEAD and PUT
                StatusCode::BAD_REQUEST => {
                    let err = SearchError::from_response(BACKEND, created).await;
                    if !err.to_string().contains("resource_already_exists_exception") {
                        return Err(err);
                    }
                }
                _ => return Err(SearchError::from_response(BACKEND, created).await),
            }
        }
        Ok(())
    }

    async fn upsert(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        version: Option<i64>,
    ) -> Result<(), SearchError> {
        let request = self
            .http
            .put(self.document_url(index, id, version)?)
            .json(document);
        let response = self.send(request).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(conflict(index, id)),
            _ => Err(SearchError::from_response(BACKEND, response).await),
        }
    }

    async fn delete(&self, index: &str, id: &str, version: Option<i64>) -> Result<(), SearchError> {
        let response = self
            .send(self.http.delete(self.document_url(index, id, version)?))
            .await?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            StatusCode::CONFLICT => Err(conflict(index, id)),
            _ => Err(SearchError::from_response(BACKEND, response).await),
        }
    }
}
