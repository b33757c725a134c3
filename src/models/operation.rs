use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of deferred mutation recorded against a remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(format!(
                "Invalid operation kind '{}'. Valid options: create, update, delete",
                s
            )),
        }
    }
}

/// Remote entity an operation targets. Each variant maps to one collection
/// in the remote document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Announcement,
    User,
    DailyRecord,
    Attachment,
}

impl EntityKind {
    /// Collection name in the remote document store.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Announcement => "announcements",
            EntityKind::User => "users",
            EntityKind::DailyRecord => "daily_records",
            EntityKind::Attachment => "attachments",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Announcement => write!(f, "announcement"),
            EntityKind::User => write!(f, "user"),
            EntityKind::DailyRecord => write!(f, "daily_record"),
            EntityKind::Attachment => write!(f, "attachment"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "announcement" => Ok(EntityKind::Announcement),
            "user" => Ok(EntityKind::User),
            "daily_record" => Ok(EntityKind::DailyRecord),
            "attachment" => Ok(EntityKind::Attachment),
            _ => Err(format!(
                "Invalid entity kind '{}'. Valid options: announcement, user, daily_record, attachment",
                s
            )),
        }
    }
}

/// A locally recorded mutation not yet confirmed applied to the remote store.
///
/// Once persisted, an operation is immutable except for its retry counter
/// and last error message, which the sync engine updates on failed attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub entity: EntityKind,
    /// Remote document id within the entity's collection
    pub entity_id: String,
    /// Document body sent to the remote store; `Null` for deletes
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: i32,
    /// Message from the most recent failed attempt
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(
        kind: OperationKind,
        entity: EntityKind,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity,
            entity_id: entity_id.into(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}",
            self.kind,
            self.entity.collection(),
            self.entity_id
        )
    }
}
