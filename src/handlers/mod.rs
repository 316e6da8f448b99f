// Handler modules for API endpoints

mod auth;
mod chat;
mod moderation;

pub use auth::{login, logout, mint_ws_ticket, refresh, signup};
pub use chat::{
    create_conversation, list_conversations, list_messages, mark_read, send_message,
};
pub use moderation::{grant_moderator, list_moderators, remove_participant, revoke_moderator};
