//! Database models mapping directly onto the Postgres schema owned by
//! [`crate::db`]. Kept deliberately plain-data: conversions to wire/view
//! types live next to the handlers that need them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_master_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RefreshFamily {
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub sanctum_id: Option<Uuid>,
    #[sqlx(rename = "kind")]
    pub kind: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn kind(&self) -> ConversationKind {
        match self.kind.as_str() {
            "direct" => ConversationKind::Direct,
            _ => ConversationKind::Group,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub unread_count: i64,
    pub last_read_message_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Sanctum {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctumRole {
    Member,
    Moderator,
    Owner,
}

#[derive(Debug, Clone, FromRow)]
pub struct SanctumMembership {
    pub sanctum_id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "role")]
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl SanctumMembership {
    pub fn role(&self) -> SanctumRole {
        match self.role.as_str() {
            "owner" => SanctumRole::Owner,
            "moderator" => SanctumRole::Moderator,
            _ => SanctumRole::Member,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatroomModerator {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Uuid,
}

#[derive(Debug, Clone, FromRow)]
pub struct Block {
    pub blocker_id: Uuid,
    pub blocked_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// In-memory view of a presence key read back from Redis; not persisted in
/// Postgres.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}
