use std::time::Duration;

use sanctum_realtime::authz::{self, Action};
use sanctum_realtime::db::{self, DbConfig};
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
    db::create_user(pool, username, &format!("{username}@example.com"), &password_hash)
        .await
        .expect("failed to create user")
        .id
}

/// Property 9: authorization closure. A non-participant has no path to
/// ReadMessages/SendMessage, and a plain participant has no path to
/// moderator-only actions, regardless of how the decision is reached.
#[tokio::test]
#[ignore]
async fn non_participant_is_denied_every_action() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let carol = make_user(&pool, "carol").await;
    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("create_conversation failed");

    for action in [Action::ReadMessages, Action::SendMessage, Action::RemoveParticipant] {
        let decision = authz::authorize(&pool, carol, convo.id, action)
            .await
            .expect("authorize failed");
        assert!(!decision.is_allowed(), "carol is not a participant, expected deny for {action:?}");
    }
}

#[tokio::test]
#[ignore]
async fn plain_participant_cannot_manage_moderators() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let convo = db::create_conversation(&pool, alice, &[bob], None, None)
        .await
        .expect("create_conversation failed");

    let decision = authz::authorize(&pool, bob, convo.id, Action::RemoveParticipant)
        .await
        .expect("authorize failed");
    assert!(!decision.is_allowed());
    assert!(!authz::can_manage_moderators(&pool, bob, convo.id).await.unwrap());

    let decision = authz::authorize(&pool, bob, convo.id, Action::SendMessage)
        .await
        .expect("authorize failed");
    assert!(decision.is_allowed(), "a participant may still send messages");
}

#[tokio::test]
#[ignore]
async fn chatroom_moderator_can_remove_participants() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let alice = make_user(&pool, "alice").await;
    let bob = make_user(&pool, "bob").await;
    let carol = make_user(&pool, "carol").await;
    let convo = db::create_conversation(&pool, alice, &[bob, carol], None, Some("room"))
        .await
        .expect("create_conversation failed");

    db::grant_chatroom_moderator(&pool, convo.id, bob, alice)
        .await
        .expect("grant_chatroom_moderator failed");

    let decision = authz::authorize(&pool, bob, convo.id, Action::RemoveParticipant)
        .await
        .expect("authorize failed");
    assert!(decision.is_allowed());

    let decision = authz::authorize(&pool, carol, convo.id, Action::RemoveParticipant)
        .await
        .expect("authorize failed");
    assert!(!decision.is_allowed(), "a plain participant is not a chatroom moderator");
}

async fn insert_sanctum_membership(pool: &sqlx::PgPool, user_id: Uuid, role: &str) -> Uuid {
    let sanctum_id = Uuid::new_v4();
    sqlx::query("INSERT INTO sanctums (id, name, owner_id) VALUES ($1, $2, $3)")
        .bind(sanctum_id)
        .bind(format!("sanctum-{sanctum_id}"))
        .bind(user_id)
        .execute(pool)
        .await
        .expect("insert sanctum failed");
    sqlx::query(
        "INSERT INTO sanctum_memberships (sanctum_id, user_id, role) VALUES ($1, $2, $3)",
    )
    .bind(sanctum_id)
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await
    .expect("insert sanctum_membership failed");
    sanctum_id
}

/// A sanctum moderator (not owner) must not be able to grant/revoke other
/// moderators on a sanctum-linked conversation; only the owner or a master
/// admin may.
#[tokio::test]
#[ignore]
async fn sanctum_moderator_cannot_manage_moderators_only_owner_can() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let owner = make_user(&pool, "owner").await;
    let moderator = make_user(&pool, "moderator").await;
    let member = make_user(&pool, "member").await;

    let sanctum_id = insert_sanctum_membership(&pool, owner, "owner").await;
    sqlx::query("INSERT INTO sanctum_memberships (sanctum_id, user_id, role) VALUES ($1, $2, 'moderator')")
        .bind(sanctum_id)
        .bind(moderator)
        .execute(&pool)
        .await
        .expect("insert moderator membership failed");

    let convo = db::create_conversation(&pool, owner, &[moderator, member], Some(sanctum_id), Some("room"))
        .await
        .expect("create_conversation failed");

    assert!(authz::can_manage_moderators(&pool, owner, convo.id).await.unwrap());
    assert!(
        !authz::can_manage_moderators(&pool, moderator, convo.id)
            .await
            .unwrap(),
        "a sanctum moderator (not owner) must not manage moderators"
    );

    // A sanctum moderator can still read/send, just not manage moderators.
    let decision = authz::authorize(&pool, moderator, convo.id, Action::SendMessage)
        .await
        .expect("authorize failed");
    assert!(decision.is_allowed());
}
