//! Search backend configuration
//!
//! Both backends are optional blocks in the file; [`SearchConfig::backend`]
//! collapses them into a single [`SearchBackend`] and rejects files that
//! configure more than one.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<ElasticsearchConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meilisearch: Option<MeilisearchConfig>,
}

/// The search backend resolved at startup
#[derive(Debug, Clone)]
pub enum SearchBackend {
    Elasticsearch(ElasticsearchConfig),
    Meilisearch(MeilisearchConfig),
    /// No backend configured; only diagnostic listeners run
    Disabled,
}

impl SearchConfig {
    pub fn backend(&self) -> Result<SearchBackend, ConfigError> {
        match (&self.elasticsearch, &self.meilisearch) {
            (Some(_), Some(_)) => Err(ConfigError::MultipleSearchBackends(
                "elasticsearch, meilisearch".to_string(),
            )),
            (Some(es), None) => Ok(SearchBackend::Elasticsearch(es.clone())),
            (None, Some(meili)) => Ok(SearchBackend::Meilisearch(meili.clone())),
            (None, None) => Ok(SearchBackend::Disabled),
        }
    }
}

/// Elasticsearch cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_es_nodes")]
    pub nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ElasticsearchAuth>,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            nodes: default_es_nodes(),
            auth: None,
        }
    }
}

fn default_es_nodes() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

/// Authentication applied to every Elasticsearch node
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElasticsearchAuth {
    ApiKey { key: String },
    Basic { username: String, password: String },
}

impl std::fmt::Debug for ElasticsearchAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElasticsearchAuth::ApiKey { .. } => f.write_str("ApiKey(<redacted>)"),
            ElasticsearchAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Meilisearch server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct MeilisearchConfig {
    #[serde(default = "default_meilisearch_url")]
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
}

impl Default for MeilisearchConfig {
    fn default() -> Self {
        Self {
            server_url: default_meilisearch_url(),
            master_key: None,
        }
    }
}

impl std::fmt::Debug for MeilisearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeilisearchConfig")
            .field("server_url", &self.server_url)
            .field("master_key", &self.master_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_meilisearch_url() -> String {
    "http://localhost:7700".to_string()
}
