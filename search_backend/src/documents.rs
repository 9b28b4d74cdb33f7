//! Typed search documents
//!
//! The dispatcher hands rows over as opaque JSON objects. This module is the
//! boundary where a row is coerced into the document shape of its table, with
//! unknown columns (password hashes, emails, ...) left behind.

use chrono::{DateTime, NaiveDateTime};
use event_system::{RowSnapshot, TableName};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("row has no usable `id` column")]
    MissingId,

    #[error("row does not match the {table} document shape: {source}")]
    Shape {
        table: TableName,
        #[source]
        source: serde_json::Error,
    },
}

/// Search index that receives documents of `table`
pub fn index_name(table: TableName) -> &'static str {
    match table {
        TableName::Users => "charted-users",
        TableName::Repositories => "charted-repositories",
        TableName::Organizations => "charted-organizations",
        TableName::RepositoryReleases => "charted-repository-releases",
    }
}

/// Every index the indexer writes to
pub fn all_indexes() -> Vec<&'static str> {
    TableName::ALL.into_iter().map(index_name).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar_hash: Option<String>,
    #[serde(default)]
    pub verified_publisher: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryDocument {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "id_string")]
    pub owner: String,
    #[serde(default, deserialize_with = "optional_id_string")]
    pub creator: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(rename = "type", default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationDocument {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "id_string")]
    pub owner: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub verified_publisher: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseDocument {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub repository: String,
    pub tag: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub update_text: Option<String>,
    #[serde(default)]
    pub yanked: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// A row coerced into the document shape of its table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchDocument {
    User(UserDocument),
    Repository(RepositoryDocument),
    Organization(OrganizationDocument),
    Release(ReleaseDocument),
}

impl SearchDocument {
    pub fn from_row(table: TableName, row: &RowSnapshot) -> Result<Self, DocumentError> {
        if event_system::row_id(row).is_none() {
            return Err(DocumentError::MissingId);
        }

        let value = serde_json::Value::Object(row.clone());
        let shape = |source: serde_json::Error| DocumentError::Shape { table, source };
        Ok(match table {
            TableName::Users => SearchDocument::User(serde_json::from_value(value).map_err(shape)?),
            TableName::Repositories => {
                SearchDocument::Repository(serde_json::from_value(value).map_err(shape)?)
            }
            TableName::Organizations => {
                SearchDocument::Organization(serde_json::from_value(value).map_err(shape)?)
            }
            TableName::RepositoryReleases => {
                SearchDocument::Release(serde_json::from_value(value).map_err(shape)?)
            }
        })
    }

    pub fn id(&self) -> &str {
        match self {
            SearchDocument::User(doc) => &doc.id,
            SearchDocument::Repository(doc) => &doc.id,
            SearchDocument::Organization(doc) => &doc.id,
            SearchDocument::Release(doc) => &doc.id,
        }
    }

    pub fn table(&self) -> TableName {
        match self {
            SearchDocument::User(_) => TableName::Users,
            SearchDocument::Repository(_) => TableName::Repositories,
            SearchDocument::Organization(_) => TableName::Organizations,
            SearchDocument::Release(_) => TableName::RepositoryReleases,
        }
    }

    pub fn index(&self) -> &'static str {
        index_name(self.table())
    }

    /// Monotonic version derived from `updated_at`, in microseconds
    pub fn version(&self) -> Option<i64> {
        let updated_at = match self {
            SearchDocument::User(doc) => doc.updated_at.as_deref(),
            SearchDocument::Repository(doc) => doc.updated_at.as_deref(),
            SearchDocument::Organization(doc) => doc.updated_at.as_deref(),
            SearchDocument::Release(doc) => doc.updated_at.as_deref(),
        };
        updated_at.and_then(parse_version)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Version of a raw row, read from its `updated_at` column
pub fn row_version(row: &RowSnapshot) -> Option<i64> {
    row.get("updated_at")?.as_str().and_then(parse_version)
}

/// Parse a `row_to_json` timestamp (`timestamptz` or `timestamp`) into microseconds
pub fn parse_version(timestamp: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(parsed.timestamp_micros());
    }

    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_micros())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
}
