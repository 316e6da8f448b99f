//! Postgres pool bootstrap and the Message Store (C8) operations: durable
//! conversations, participants, messages, unread maintenance and read
//! markers, plus the supporting user/sanctum/block lookups authorization and
//! the handlers need.

use std::time::Duration;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Block, ChatroomModerator, Conversation, Message, Participant, Sanctum, SanctumMembership, User,
};

pub type DbPool = PgPool;

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/sanctum".to_string()),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

pub async fn init_db(config: DbConfig) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

pub async fn init_db_default() -> anyhow::Result<DbPool> {
    init_db(DbConfig::default()).await
}

/// Default page size and hard cap for message/conversation listing, per the
/// paging contract in §6 of the spec.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

pub fn clamp_page_size(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}

// --- users -----------------------------------------------------------

pub async fn create_user(
    pool: &DbPool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> AppResult<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, username, email, password_hash, is_master_admin, created_at)
        VALUES ($1, $2, $3, $4, false, $5)
        RETURNING id, username, email, password_hash, is_master_admin, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict("username or email already in use".into())
        }
        other => other.into(),
    })?;

    Ok(user)
}

pub async fn find_user_by_username(pool: &DbPool, username: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, is_master_admin, created_at FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &DbPool, user_id: Uuid) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, is_master_admin, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

// --- conversations -----------------------------------------------------

/// Creates a conversation and inserts the initiating participant in one
/// transaction. For direct conversations, deduplicates against any existing
/// direct conversation between the same pair of users.
pub async fn create_conversation(
    pool: &DbPool,
    creator_id: Uuid,
    other_participant_ids: &[Uuid],
    sanctum_id: Option<Uuid>,
    title: Option<&str>,
) -> AppResult<Conversation> {
    let is_direct = sanctum_id.is_none() && other_participant_ids.len() == 1;

    if is_direct {
        if let Some(existing) =
            find_direct_conversation(pool, creator_id, other_participant_ids[0]).await?
        {
            return Ok(existing);
        }
    } else if let Some(sid) = sanctum_id {
        if let Some(existing) = find_sanctum_conversation(pool, sid).await? {
            return Ok(existing);
        }
    }

    let mut tx = pool.begin().await?;
    let kind = if is_direct { "direct" } else { "group" };
    let now = Utc::now();

    let convo = sqlx::query_as::<_, Conversation>(
        r#"
        INSERT INTO conversations (id, sanctum_id, kind, title, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, sanctum_id, kind, title, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(sanctum_id)
    .bind(kind)
    .bind(title)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict("a conversation already exists for this sanctum".into())
        }
        other => other.into(),
    })?;

    let mut participant_ids = vec![creator_id];
    participant_ids.extend(other_participant_ids.iter().copied());
    participant_ids.sort();
    participant_ids.dedup();

    for participant_id in participant_ids {
        sqlx::query(
            r#"
            INSERT INTO participants (conversation_id, user_id, joined_at, unread_count, last_read_message_id)
            VALUES ($1, $2, $3, 0, NULL)
            "#,
        )
        .bind(convo.id)
        .bind(participant_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(convo)
}

/// Backs the partial unique index on `conversations(sanctum_id)`: a sanctum
/// may have at most one linked conversation.
async fn find_sanctum_conversation(pool: &DbPool, sanctum_id: Uuid) -> AppResult<Option<Conversation>> {
    let convo = sqlx::query_as::<_, Conversation>(
        "SELECT id, sanctum_id, kind, title, created_at FROM conversations WHERE sanctum_id = $1 LIMIT 1",
    )
    .bind(sanctum_id)
    .fetch_optional(pool)
    .await?;
    Ok(convo)
}

async fn find_direct_conversation(
    pool: &DbPool,
    user_a: Uuid,
    user_b: Uuid,
) -> AppResult<Option<Conversation>> {
    let convo = sqlx::query_as::<_, Conversation>(
        r#"
        SELECT c.id, c.sanctum_id, c.kind, c.title, c.created_at
        FROM conversations c
        WHERE c.kind = 'direct'
          AND EXISTS (SELECT 1 FROM participants p WHERE p.conversation_id = c.id AND p.user_id = $1)
          AND EXISTS (SELECT 1 FROM participants p WHERE p.conversation_id = c.id AND p.user_id = $2)
          AND (SELECT count(*) FROM participants p WHERE p.conversation_id = c.id) = 2
        LIMIT 1
        "#,
    )
    .bind(user_a)
    .bind(user_b)
    .fetch_optional(pool)
    .await?;
    Ok(convo)
}

pub async fn is_participant(pool: &DbPool, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM participants WHERE conversation_id = $1 AND user_id = $2)",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

#[derive(FromRow)]
struct ConversationParticipantRow {
    id: Uuid,
    sanctum_id: Option<Uuid>,
    kind: String,
    title: Option<String>,
    created_at: chrono::DateTime<Utc>,
    p_conversation_id: Uuid,
    p_user_id: Uuid,
    p_joined_at: chrono::DateTime<Utc>,
    p_unread_count: i64,
    p_last_read_message_id: Option<i64>,
}

pub async fn list_conversations(
    pool: &DbPool,
    user_id: Uuid,
) -> AppResult<Vec<(Conversation, Participant)>> {
    let rows = sqlx::query_as::<_, ConversationParticipantRow>(
        r#"
        SELECT
            c.id, c.sanctum_id, c.kind, c.title, c.created_at,
            p.conversation_id AS p_conversation_id,
            p.user_id AS p_user_id,
            p.joined_at AS p_joined_at,
            p.unread_count AS p_unread_count,
            p.last_read_message_id AS p_last_read_message_id
        FROM conversations c
        JOIN participants p ON p.conversation_id = c.id
        WHERE p.user_id = $1
        ORDER BY c.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                Conversation {
                    id: row.id,
                    sanctum_id: row.sanctum_id,
                    kind: row.kind,
                    title: row.title,
                    created_at: row.created_at,
                },
                Participant {
                    conversation_id: row.p_conversation_id,
                    user_id: row.p_user_id,
                    joined_at: row.p_joined_at,
                    unread_count: row.p_unread_count,
                    last_read_message_id: row.p_last_read_message_id,
                },
            )
        })
        .collect())
}

/// Sends a message: inserts the row, bumps every other participant's unread
/// counter, and records an outbox entry for the publisher — all in one
/// transaction, per the send invariant in §4.8. The caller publishes to
/// Redis only after this commits.
pub async fn send_message(
    pool: &DbPool,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: &str,
    metadata: Option<serde_json::Value>,
) -> AppResult<Message> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let message = sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (id, conversation_id, sender_id, content, metadata, created_at)
        VALUES (nextval('messages_id_seq'), $1, $2, $3, $4, $5)
        RETURNING id, conversation_id, sender_id, content, metadata, created_at
        "#,
    )
    .bind(conversation_id)
    .bind(sender_id)
    .bind(content)
    .bind(metadata)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE participants
        SET unread_count = unread_count + 1
        WHERE conversation_id = $1 AND user_id <> $2
        "#,
    )
    .bind(conversation_id)
    .bind(sender_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO message_outbox (id, message_id, conversation_id, published, created_at)
        VALUES ($1, $2, $3, false, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(message.id)
    .bind(conversation_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(message)
}

pub async fn list_messages(
    pool: &DbPool,
    conversation_id: Uuid,
    before_id: Option<i64>,
    limit: Option<i64>,
) -> AppResult<Vec<Message>> {
    let limit = clamp_page_size(limit);
    let messages = sqlx::query_as::<_, Message>(
        r#"
        SELECT id, conversation_id, sender_id, content, metadata, created_at
        FROM messages
        WHERE conversation_id = $1 AND ($2::bigint IS NULL OR id < $2)
        ORDER BY id DESC
        LIMIT $3
        "#,
    )
    .bind(conversation_id)
    .bind(before_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(messages)
}

/// Highest message id in a conversation, used to resolve `mark_read`'s
/// optional `up_to_message_id` to "everything so far".
pub async fn latest_message_id(pool: &DbPool, conversation_id: Uuid) -> AppResult<Option<i64>> {
    let id = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT max(id) FROM messages WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Marks everything up to and including `up_to_message_id` as read.
/// Idempotent: calling it again with the same or an older id is a no-op.
pub async fn mark_read(
    pool: &DbPool,
    conversation_id: Uuid,
    user_id: Uuid,
    up_to_message_id: i64,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE participants
        SET
            unread_count = GREATEST(
                0,
                (SELECT count(*) FROM messages m
                 WHERE m.conversation_id = $1 AND m.id > $3 AND m.sender_id <> $2)
            ),
            last_read_message_id = GREATEST(COALESCE(last_read_message_id, 0), $3)
        WHERE conversation_id = $1 AND user_id = $2
        "#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(up_to_message_id)
    .execute(pool)
    .await?;
    Ok(())
}

// --- message outbox -----------------------------------------------------

#[derive(FromRow)]
pub struct OutboxEntry {
    pub outbox_id: Uuid,
    pub message_id: i64,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

/// Rows whose inline publish (right after `send_message`'s commit) failed or
/// was never attempted, oldest first, for the sweeper to retry.
pub async fn fetch_unpublished_outbox(pool: &DbPool, limit: i64) -> AppResult<Vec<OutboxEntry>> {
    let rows = sqlx::query_as::<_, OutboxEntry>(
        r#"
        SELECT
            o.id AS outbox_id,
            o.message_id,
            o.conversation_id,
            m.sender_id,
            m.content
        FROM message_outbox o
        JOIN messages m ON m.id = o.message_id
        WHERE o.published = false
        ORDER BY o.created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Marks the outbox row for `message_id` published — called both by a
/// handler right after its own inline publish succeeds, and by the sweeper
/// after a retried publish, so a message is never republished twice.
pub async fn mark_outbox_published(pool: &DbPool, message_id: i64) -> AppResult<()> {
    sqlx::query("UPDATE message_outbox SET published = true WHERE message_id = $1")
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes outbox rows older than `retention_days`, published or not —
/// unpublished rows past retention have already had their message delivered
/// by whichever path first succeeded (inline publish or a prior sweep) and
/// are kept only for the sweeper's own retry window.
pub async fn delete_old_outbox_rows(pool: &DbPool, retention_days: i64) -> AppResult<u64> {
    let result = sqlx::query(
        "DELETE FROM message_outbox WHERE created_at < now() - ($1 || ' days')::interval",
    )
    .bind(retention_days.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// --- sanctums, moderators, blocks --------------------------------------

pub async fn sanctum_membership(
    pool: &DbPool,
    sanctum_id: Uuid,
    user_id: Uuid,
) -> AppResult<Option<SanctumMembership>> {
    let membership = sqlx::query_as::<_, SanctumMembership>(
        "SELECT sanctum_id, user_id, role, joined_at FROM sanctum_memberships WHERE sanctum_id = $1 AND user_id = $2",
    )
    .bind(sanctum_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(membership)
}

pub async fn chatroom_moderator(
    pool: &DbPool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<Option<ChatroomModerator>> {
    let moderator = sqlx::query_as::<_, ChatroomModerator>(
        "SELECT conversation_id, user_id, granted_at, granted_by FROM chatroom_moderators WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(moderator)
}

pub async fn list_chatroom_moderators(
    pool: &DbPool,
    conversation_id: Uuid,
) -> AppResult<Vec<ChatroomModerator>> {
    let rows = sqlx::query_as::<_, ChatroomModerator>(
        "SELECT conversation_id, user_id, granted_at, granted_by FROM chatroom_moderators WHERE conversation_id = $1 ORDER BY granted_at ASC",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn revoke_chatroom_moderator(
    pool: &DbPool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    sqlx::query("DELETE FROM chatroom_moderators WHERE conversation_id = $1 AND user_id = $2")
        .bind(conversation_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn grant_chatroom_moderator(
    pool: &DbPool,
    conversation_id: Uuid,
    user_id: Uuid,
    granted_by: Uuid,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO chatroom_moderators (conversation_id, user_id, granted_at, granted_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (conversation_id, user_id) DO NOTHING
        "#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(Utc::now())
    .bind(granted_by)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_participant(
    pool: &DbPool,
    conversation_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    sqlx::query("DELETE FROM participants WHERE conversation_id = $1 AND user_id = $2")
        .bind(conversation_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn is_blocked(pool: &DbPool, a: Uuid, b: Uuid) -> AppResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM blocks
            WHERE (blocker_id = $1 AND blocked_id = $2)
               OR (blocker_id = $2 AND blocked_id = $1)
        )
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn sanctum_by_id(pool: &DbPool, sanctum_id: Uuid) -> AppResult<Option<Sanctum>> {
    let sanctum = sqlx::query_as::<_, Sanctum>(
        "SELECT id, name, owner_id, created_at FROM sanctums WHERE id = $1",
    )
    .bind(sanctum_id)
    .fetch_optional(pool)
    .await?;
    Ok(sanctum)
}

#[allow(dead_code)]
pub async fn block(pool: &DbPool, blocker_id: Uuid, blocked_id: Uuid) -> AppResult<Block> {
    let row = sqlx::query_as::<_, Block>(
        r#"
        INSERT INTO blocks (blocker_id, blocked_id, created_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (blocker_id, blocked_id) DO UPDATE SET created_at = blocks.created_at
        RETURNING blocker_id, blocked_id, created_at
        "#,
    )
    .bind(blocker_id)
    .bind(blocked_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_page_size_respects_bounds() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), 1);
        assert_eq!(clamp_page_size(Some(500)), MAX_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(10)), 10);
    }
}
