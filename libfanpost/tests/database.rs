//! SQLite backend tests: accounts, secret rotation and dispatch history

use anyhow::Result;
use libfanpost::credentials::CredentialStore;
use libfanpost::db::Database;
use libfanpost::error::{CredentialError, FanpostError};
use libfanpost::platforms::mock::{MockPlatform, REFRESHED_ACCESS, REFRESHED_REFRESH};
use libfanpost::platforms::PlatformRegistry;
use libfanpost::tracker::{PostTracker, TrackedPost};
use libfanpost::types::{
    Account, AggregateResult, ConnectionState, Delivery, Provider, PublishOutcome, PublishRequest,
    Published,
};
use libfanpost::Dispatcher;
use std::sync::Arc;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("nested").join("fanpost.db");
    let db_path_str = db_path.to_string_lossy().to_string();

    let db = Database::new(&db_path_str).await?;
    Ok((temp_dir, db))
}

fn reddit_account() -> Account {
    Account::new("acc-r", "alice", Provider::Reddit, "alice_r", "access-1")
        .with_refresh_secret("refresh-1")
        .with_display_name("Alice on Reddit")
        .with_metadata("subreddit", "rust")
}

#[tokio::test]
async fn test_upsert_and_get_account() -> Result<()> {
    let (_dir, db) = create_test_db().await?;
    db.upsert_account(&reddit_account()).await?;

    let stored = db.get_account("acc-r").await?.expect("account stored");
    assert_eq!(stored.user_id, "alice");
    assert_eq!(stored.provider, Provider::Reddit);
    assert_eq!(stored.access_token(), "access-1");
    assert_eq!(stored.refresh_token(), Some("refresh-1"));
    assert_eq!(stored.label(), "Alice on Reddit");
    assert_eq!(stored.metadata.get("subreddit").map(String::as_str), Some("rust"));
    assert!(stored.is_connected());

    assert!(db.get_account("missing").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_connected_accounts_filters_owner_and_state() -> Result<()> {
    let (_dir, db) = create_test_db().await?;
    db.upsert_account(&reddit_account()).await?;
    db.upsert_account(&Account::new("acc-t", "alice", Provider::Twitter, "alice_t", "t"))
        .await?;
    db.upsert_account(&Account::new("acc-b", "bob", Provider::Reddit, "bob_r", "b"))
        .await?;

    db.set_connection_state("acc-t", ConnectionState::Disconnected)
        .await?;

    let accounts = db.get_connected_accounts("alice").await?;
    let ids: Vec<&str> = accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["acc-r"]);
    Ok(())
}

#[tokio::test]
async fn test_update_secrets_rotates_and_keeps_refresh() -> Result<()> {
    let (_dir, db) = create_test_db().await?;
    db.upsert_account(&reddit_account()).await?;

    db.update_secrets("acc-r", "alice", "access-2", None).await?;
    let stored = db.get_account("acc-r").await?.unwrap();
    assert_eq!(stored.access_token(), "access-2");
    assert_eq!(stored.refresh_token(), Some("refresh-1"));

    db.update_secrets("acc-r", "alice", "access-3", Some("refresh-3"))
        .await?;
    let stored = db.get_account("acc-r").await?.unwrap();
    assert_eq!(stored.access_token(), "access-3");
    assert_eq!(stored.refresh_token(), Some("refresh-3"));
    Ok(())
}

#[tokio::test]
async fn test_update_secrets_requires_matching_owner() -> Result<()> {
    let (_dir, db) = create_test_db().await?;
    db.upsert_account(&reddit_account()).await?;

    let err = db
        .update_secrets("acc-r", "mallory", "stolen", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FanpostError::Credential(CredentialError::NotFound { .. })
    ));

    let stored = db.get_account("acc-r").await?.unwrap();
    assert_eq!(stored.access_token(), "access-1");
    Ok(())
}

#[tokio::test]
async fn test_record_and_read_history() -> Result<()> {
    let (_dir, db) = create_test_db().await?;
    let account = reddit_account();

    let ok = PublishOutcome::published(
        &account,
        Published::new("t3_1", Delivery::TextReference)
            .with_url("https://reddit.com/r/rust/comments/1")
            .with_channel("rust")
            .with_note("Media 'clip.mp4' could not be uploaded"),
    )
    .with_attempts(2, true);
    let result = AggregateResult::from_outcomes(vec![ok.clone()]);
    let post = TrackedPost::new("hello", 1, result);

    db.record("alice", &post).await?;

    let dispatches = db.recent_dispatches("alice", 10).await?;
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].id, post.dispatch_id);
    assert_eq!(dispatches[0].content, "hello");
    assert_eq!(dispatches[0].media_count, 1);
    assert_eq!(dispatches[0].successful, 1);
    assert_eq!(dispatches[0].message, "Post published to 1 account.");

    let outcomes = db.dispatch_outcomes(&post.dispatch_id).await?;
    assert_eq!(outcomes, vec![ok]);

    assert!(db.recent_dispatches("bob", 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_channel_stats_accumulate() -> Result<()> {
    let (_dir, db) = create_test_db().await?;
    let account = reddit_account();

    let success = PublishOutcome::published(
        &account,
        Published::new("t3_1", Delivery::Text).with_channel("rust"),
    );
    let mut failure = PublishOutcome::failed(
        &account,
        &libfanpost::PlatformError::Rejected("SUBREDDIT_NOTALLOWED".to_string()),
    );
    failure.channel = Some("rust".to_string());
    let mut other = success.clone();
    other.channel = Some("programming".to_string());

    for outcome in [success.clone(), success, failure, other] {
        let post = TrackedPost::new("x", 0, AggregateResult::from_outcomes(vec![outcome]));
        db.record("alice", &post).await?;
    }

    let stats = db.channel_stats(Provider::Reddit).await?;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].channel, "rust");
    assert_eq!(stats[0].successes, 2);
    assert_eq!(stats[0].failures, 1);
    assert!(stats[0].last_posted_at.is_some());
    assert_eq!(stats[1].channel, "programming");

    assert!(db.channel_stats(Provider::Twitter).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_dispatch_with_database_persists_refreshed_tokens() -> Result<()> {
    let (_dir, db) = create_test_db().await?;
    db.upsert_account(
        &Account::new("acc-t", "alice", Provider::Twitter, "alice_t", "expired")
            .with_refresh_secret("refresh-1"),
    )
    .await?;

    let twitter = MockPlatform::expired_token(Provider::Twitter);
    let mut registry = PlatformRegistry::new();
    registry.register(Arc::new(twitter.clone()));

    let db = Arc::new(db);
    let dispatcher = Dispatcher::new(db.clone(), db.clone(), registry);

    let result = dispatcher
        .dispatch("alice", PublishRequest::new("hello").to_accounts(["acc-t"]))
        .await?;
    assert!(result.success);
    assert_eq!(twitter.refresh_call_count(), 1);

    let stored = db.get_account("acc-t").await?.unwrap();
    assert_eq!(stored.access_token(), REFRESHED_ACCESS);
    assert_eq!(stored.refresh_token(), Some(REFRESHED_REFRESH));

    let history = db.recent_dispatches("alice", 5).await?;
    assert_eq!(history.len(), 1);
    let outcomes = db.dispatch_outcomes(&history[0].id).await?;
    assert_eq!(outcomes[0].attempts, 2);
    assert!(outcomes[0].refreshed);
    Ok(())
}
