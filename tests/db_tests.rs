use sanctum_realtime::db::{self, DbConfig};
use std::time::Duration;
use uuid::Uuid;

async fn setup_test_db() -> sqlx::PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/sanctum_test".to_string());

    let config = DbConfig {
        database_url,
        max_connections: 10,
        min_connections: 2,
        acquire_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(600),
    };

    db::init_db(config)
        .await
        .expect("failed to initialize test database")
}

async fn cleanup_test_data(pool: &sqlx::PgPool) {
    sqlx::query("TRUNCATE TABLE messages, message_outbox, participants, chatroom_moderators, blocks, conversations, sanctum_memberships, sanctums, users CASCADE")
        .execute(pool)
        .await
        .expect("failed to clean up test data");
}

async fn make_user(pool: &sqlx::PgPool, username: &str) -> Uuid {
    let password_hash = sanctum_realtime::crypto::hash_password("Passw0rd!Passw0rd!").unwrap();
    let user = db::create_user(pool, username, &format!("{username}@example.com"), &password_hash)
        .await
        .expect("failed to create user");
    user.id
}

#[tokio::test]
#[ignore]
async fn conversation_create_is_idempotent_for_direct_pairs() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;

    let first = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("first create_conversation failed");
    let second = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("second create_conversation failed");

    assert_eq!(first.id, second.id, "duplicate DM must resolve to the same conversation");
    assert_eq!(first.kind(), sanctum_realtime::models::ConversationKind::Direct);
}

#[tokio::test]
#[ignore]
async fn send_message_bumps_unread_for_other_participants_only() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;

    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("create_conversation failed");

    db::send_message(&pool, convo.id, alice, "hello bob", None)
        .await
        .expect("send_message failed");

    let conversations = db::list_conversations(&pool, bob)
        .await
        .expect("list_conversations failed");
    let (_, bob_participant) = conversations
        .into_iter()
        .find(|(c, _)| c.id == convo.id)
        .expect("bob should see the conversation");
    assert_eq!(bob_participant.unread_count, 1);

    let conversations = db::list_conversations(&pool, alice)
        .await
        .expect("list_conversations failed");
    let (_, alice_participant) = conversations
        .into_iter()
        .find(|(c, _)| c.id == convo.id)
        .expect("alice should see the conversation");
    assert_eq!(alice_participant.unread_count, 0, "sender's own unread count must not increase");
}

#[tokio::test]
#[ignore]
async fn mark_read_is_idempotent_and_honors_newer_messages() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("create_conversation failed");

    let m1 = db::send_message(&pool, convo.id, alice, "one", None).await.unwrap();
    db::send_message(&pool, convo.id, alice, "two", None).await.unwrap();

    db::mark_read(&pool, convo.id, bob, m1.id).await.unwrap();
    let (_, participant) = db::list_conversations(&pool, bob)
        .await
        .unwrap()
        .into_iter()
        .find(|(c, _)| c.id == convo.id)
        .unwrap();
    assert_eq!(participant.unread_count, 1, "one message still unread after marking only m1");

    // Re-marking the same id must be a no-op, not a regression.
    db::mark_read(&pool, convo.id, bob, m1.id).await.unwrap();
    let (_, participant) = db::list_conversations(&pool, bob)
        .await
        .unwrap()
        .into_iter()
        .find(|(c, _)| c.id == convo.id)
        .unwrap();
    assert_eq!(participant.unread_count, 1);
}

#[tokio::test]
#[ignore]
async fn list_messages_paginates_newest_first() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .unwrap();

    for i in 0..5 {
        db::send_message(&pool, convo.id, alice, &format!("msg {i}"), None)
            .await
            .unwrap();
    }

    let page = db::list_messages(&pool, convo.id, None, Some(3)).await.unwrap();
    assert_eq!(page.len(), 3);
    assert!(page[0].id > page[1].id && page[1].id > page[2].id, "expected descending id order");

    let next_page = db::list_messages(&pool, convo.id, Some(page[2].id), Some(3))
        .await
        .unwrap();
    assert_eq!(next_page.len(), 2);
}

#[tokio::test]
#[ignore]
async fn remove_participant_drops_membership_but_keeps_history() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .unwrap();
    db::send_message(&pool, convo.id, bob, "hi", None).await.unwrap();

    db::remove_participant(&pool, convo.id, bob).await.unwrap();

    assert!(!db::is_participant(&pool, convo.id, bob).await.unwrap());
    let messages = db::list_messages(&pool, convo.id, None, None).await.unwrap();
    assert_eq!(messages.len(), 1, "removing a participant must not delete prior messages");
}

#[cfg(test)]
mod unit {
    use sanctum_realtime::db::clamp_page_size;

    #[test]
    fn page_size_defaults_and_clamps() {
        assert_eq!(clamp_page_size(None), 50);
        assert_eq!(clamp_page_size(Some(1000)), 100);
    }
}
