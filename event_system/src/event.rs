//! Change event types and the notification wire format
//!
//! The installed trigger publishes `{"table", "action", "data"}` objects on the
//! notification channel. This module decodes them into [`ChangeEvent`]s and
//! filters out tables the indexer does not track.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Full row as published by the trigger (the new row, or the old one for deletes)
pub type RowSnapshot = serde_json::Map<String, serde_json::Value>;

/// Tables that carry the indexing trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Users,
    Repositories,
    Organizations,
    RepositoryReleases,
}

impl TableName {
    /// Every tracked table, in installation order
    pub const ALL: [TableName; 4] = [
        TableName::Users,
        TableName::Repositories,
        TableName::Organizations,
        TableName::RepositoryReleases,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Users => "users",
            TableName::Repositories => "repositories",
            TableName::Organizations => "organizations",
            TableName::RepositoryReleases => "repository_releases",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a table name is not part of the tracked set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("table `{0}` is not tracked by the indexer")]
pub struct UntrackedTable(pub String);

impl FromStr for TableName {
    type Err = UntrackedTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| UntrackedTable(s.to_string()))
    }
}

/// Row operation reported by the trigger (`TG_OP`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        })
    }
}

/// A decoded row change on a tracked table
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: TableName,
    pub action: Action,
    pub data: RowSnapshot,
}

/// Payload could not be decoded into a change event
#[derive(Debug, Error)]
#[error("malformed change notification: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Result of decoding a notification payload
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Tracked(ChangeEvent),
    /// Well-formed payload for a table outside [`TableName::ALL`]
    Untracked(String),
}

#[derive(Deserialize)]
struct WirePayload {
    table: String,
    action: Action,
    data: RowSnapshot,
}

impl ChangeEvent {
    pub fn new(table: TableName, action: Action, data: RowSnapshot) -> Self {
        Self {
            table,
            action,
            data,
        }
    }

    /// Decode a raw notification payload
    pub fn decode(payload: &str) -> Result<Decoded, DecodeError> {
        let wire: WirePayload = serde_json::from_str(payload)?;
        Ok(match wire.table.parse::<TableName>() {
            Ok(table) => Decoded::Tracked(ChangeEvent::new(table, wire.action, wire.data)),
            Err(UntrackedTable(name)) => Decoded::Untracked(name),
        })
    }

    /// Identifier of the affected row, if the row carries one
    pub fn row_id(&self) -> Option<String> {
        row_id(&self.data)
    }
}

/// Read the `id` column of a row as a string (ULIDs and snowflakes alike)
pub fn row_id(data: &RowSnapshot) -> Option<String> {
    match data.get("id")? {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(table: &str, action: &str) -> String {
        json!({
            "table": table,
            "action": action,
            "data": { "id": "01HQ3D5X0000000000000000AB", "name": "noel" }
        })
        .to_string()
    }

    #[test]
    fn test_every_table_and_action_decodes() {
        for table in TableName::ALL {
            for (action, expected) in [
                ("INSERT", Action::Insert),
                ("UPDATE", Action::Update),
                ("DELETE", Action::Delete),
            ] {
                let decoded = ChangeEvent::decode(&wire(table.as_str(), action)).unwrap();
                match decoded {
                    Decoded::Tracked(event) => {
                        assert_eq!(event.table, table);
                        assert_eq!(event.action, expected);
                        assert_eq!(
                            event.row_id().as_deref(),
                            Some("01HQ3D5X0000000000000000AB")
                        );
                    }
                    Decoded::Untracked(name) => panic!("{name} should be tracked"),
                }
            }
        }
    }

    #[test]
    fn test_untracked_table() {
        let decoded = ChangeEvent::decode(&wire("api_keys", "INSERT")).unwrap();
        assert_eq!(decoded, Decoded::Untracked("api_keys".to_string()));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(ChangeEvent::decode("not json").is_err());
        assert!(ChangeEvent::decode(r#"{"table":"users"}"#).is_err());
        assert!(ChangeEvent::decode(&wire("users", "TRUNCATE")).is_err());
        assert!(ChangeEvent::decode(r#"{"table":"users","action":"INSERT","data":null}"#).is_err());
    }

    #[test]
    fn test_numeric_row_id() {
        let data = json!({ "id": 1234567890123_i64 });
        let data = data.as_object().unwrap();
        assert_eq!(row_id(data).as_deref(), Some("1234567890123"));
        assert_eq!(row_id(&RowSnapshot::new()), None);
    }

    #[test]
    fn test_table_name_round_trip() {
        for table in TableName::ALL {
            assert_eq!(table.as_str().parse::<TableName>().unwrap(), table);
        }
        assert!("Users".parse::<TableName>().is_err());
    }
}
