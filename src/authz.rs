//! Authorization (C9): a single hierarchical resolver consulted by every WS
//! action and HTTP moderation handler, rather than ad-hoc boolean checks
//! scattered per handler as in the teacher's `is_admin`/`is_moderator`
//! column checks on `Membership`.

use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::error::AppResult;
use crate::models::SanctumRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReadMessages,
    SendMessage,
    ManageModerators,
    RemoveParticipant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Resolves whether `user_id` may perform `action` in `conversation_id`,
/// walking the hierarchy: master admin > sanctum owner/moderator > chatroom
/// moderator > participant > deny.
pub async fn authorize(
    pool: &DbPool,
    user_id: Uuid,
    conversation_id: Uuid,
    action: Action,
) -> AppResult<Decision> {
    let Some(user) = db::find_user_by_id(pool, user_id).await? else {
        return Ok(Decision::Deny);
    };
    if user.is_master_admin {
        return Ok(Decision::Allow);
    }

    let is_participant = db::is_participant(pool, conversation_id, user_id).await?;

    // A conversation's sanctum owner/moderator outranks chatroom-local
    // moderators, which outrank plain participants. Only an owner gets a
    // blanket allow here: `can_manage_moderators` requires level 1 or
    // (level 2 with role owner), so a plain sanctum moderator falls through
    // to the chatroom-moderator/participant checks below for
    // ManageModerators/RemoveParticipant.
    if let Some(convo) = sqlx_fetch_conversation(pool, conversation_id).await? {
        if let Some(sanctum_id) = convo.sanctum_id {
            if let Some(membership) = db::sanctum_membership(pool, sanctum_id, user_id).await? {
                let manage_action = matches!(action, Action::ManageModerators | Action::RemoveParticipant);
                match membership.role() {
                    SanctumRole::Owner => return Ok(Decision::Allow),
                    SanctumRole::Moderator if !manage_action => return Ok(Decision::Allow),
                    SanctumRole::Moderator | SanctumRole::Member => {}
                }
            }
        }
    }

    let is_chatroom_moderator = db::chatroom_moderator(pool, conversation_id, user_id)
        .await?
        .is_some();

    match action {
        Action::ManageModerators | Action::RemoveParticipant => {
            if is_chatroom_moderator {
                Ok(Decision::Allow)
            } else {
                Ok(Decision::Deny)
            }
        }
        Action::ReadMessages | Action::SendMessage => {
            if is_participant || is_chatroom_moderator {
                Ok(Decision::Allow)
            } else {
                Ok(Decision::Deny)
            }
        }
    }
}

async fn sqlx_fetch_conversation(
    pool: &DbPool,
    conversation_id: Uuid,
) -> AppResult<Option<crate::models::Conversation>> {
    let convo = sqlx::query_as::<_, crate::models::Conversation>(
        "SELECT id, sanctum_id, kind, title, created_at FROM conversations WHERE id = $1",
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?;
    Ok(convo)
}

/// Gate for moderator-management actions specifically: only a chatroom
/// moderator, sanctum owner/moderator, or master admin may grant/revoke
/// chatroom moderator status.
pub async fn can_manage_moderators(
    pool: &DbPool,
    user_id: Uuid,
    conversation_id: Uuid,
) -> AppResult<bool> {
    Ok(authorize(pool, user_id, conversation_id, Action::ManageModerators)
        .await?
        .is_allowed())
}
