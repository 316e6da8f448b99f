use std::sync::Arc;
use std::time::Duration;

use sanctum_realtime::db::{self, DbConfig};
use sanctum_realtime::realtime::chat_hub::{ChatHubHandle, RegisterOutcome};
use sanctum_realtime::realtime::connection::ConnectionHandle;
use tokio::sync::Barrier;
use uuid::Uuid;

async fn setup_test_db() -> sqlx::PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/sanctum_test".to_string());

    let config = DbConfig {
        database_url,
        max_connections: 20,
        min_connections: 5,
        acquire_timeout: Duration::from_secs(10),
        idle_timeout: Duration::from_secs(60),
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
    db::create_user(pool, username, &format!("{username}@example.com"), &password_hash)
        .await
        .expect("failed to create user")
        .id
}

/// Property 5: per-user connection cap. Opening N > cap connections for the
/// same user concurrently must settle at exactly `cap` live registrations.
#[tokio::test]
async fn per_user_connection_cap_evicts_down_to_exactly_cap() {
    const CAP: usize = 3;
    let hub = ChatHubHandle::spawn(CAP, 1_000).await.expect("hub spawn failed");
    let user_id = Uuid::new_v4();
    let barrier = Arc::new(Barrier::new(CAP * 2));

    let mut joins = Vec::new();
    for _ in 0..CAP * 2 {
        let hub = hub.clone();
        let barrier = barrier.clone();
        joins.push(tokio::spawn(async move {
            barrier.wait().await;
            let (handle, _rx) = ConnectionHandle::new(Uuid::new_v4(), user_id, 8);
            hub.register(handle).await.expect("register call failed")
        }));
    }

    let mut accepted = 0;
    for join in joins {
        if join.await.expect("join task panicked") == RegisterOutcome::Accepted {
            accepted += 1;
        }
    }

    // Every register is accepted (the hub evicts, it never rejects on the
    // per-user path); what matters is how many are still live afterward.
    assert_eq!(accepted, CAP * 2);
    let live = hub.connection_count().await.expect("connection_count failed");
    assert_eq!(live, CAP, "hub must hold exactly cap live connections after eviction settles");
}

/// Property 7 (unread invariant) under concurrency: N sends from Bob racing
/// against a `mark_read` from Alice must never let Alice's unread count
/// exceed the number of Bob's messages still unread at the end.
#[tokio::test]
#[ignore]
async fn concurrent_sends_and_mark_read_keep_unread_invariant() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("create_conversation failed");

    const MESSAGE_COUNT: usize = 20;
    let barrier = Arc::new(Barrier::new(MESSAGE_COUNT));
    let mut senders = Vec::new();
    for i in 0..MESSAGE_COUNT {
        let pool = pool.clone();
        let barrier = barrier.clone();
        senders.push(tokio::spawn(async move {
            barrier.wait().await;
            db::send_message(&pool, convo.id, bob, &format!("msg {i}"), None)
                .await
                .expect("send_message failed")
        }));
    }

    let mut sent = Vec::new();
    for sender in senders {
        sent.push(sender.await.expect("sender task panicked"));
    }
    sent.sort_by_key(|m| m.id);
    let midpoint = sent[MESSAGE_COUNT / 2 - 1].id;

    db::mark_read(&pool, convo.id, alice, midpoint)
        .await
        .expect("mark_read failed");

    let (_, participant) = db::list_conversations(&pool, alice)
        .await
        .expect("list_conversations failed")
        .into_iter()
        .find(|(c, _)| c.id == convo.id)
        .expect("alice must still be a participant");

    let expected_unread = sent.iter().filter(|m| m.id > midpoint).count() as i64;
    assert_eq!(participant.unread_count, expected_unread);
}

/// Property 8: read-your-writes. Immediately after a send commits, the
/// sender's next listing must contain it without retry, even racing other
/// senders in the same conversation.
#[tokio::test]
#[ignore]
async fn read_your_writes_holds_under_concurrent_senders() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("create_conversation failed");

    let barrier = Arc::new(Barrier::new(2));
    let pool_a = pool.clone();
    let barrier_a = barrier.clone();
    let convo_id = convo.id;
    let alice_send = tokio::spawn(async move {
        barrier_a.wait().await;
        db::send_message(&pool_a, convo_id, alice, "from alice", None).await
    });
    let pool_b = pool.clone();
    let barrier_b = barrier.clone();
    let bob_send = tokio::spawn(async move {
        barrier_b.wait().await;
        db::send_message(&pool_b, convo_id, bob, "from bob", None).await
    });

    let alice_message = alice_send.await.unwrap().expect("alice send failed");
    bob_send.await.unwrap().expect("bob send failed");

    let page = db::list_messages(&pool, convo.id, None, None)
        .await
        .expect("list_messages failed");
    assert!(
        page.iter().any(|m| m.id == alice_message.id),
        "sender's own write must be visible without retry"
    );
}
