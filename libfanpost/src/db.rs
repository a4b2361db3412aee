//! SQLite storage for accounts and dispatch history
//!
//! [`Database`] is the persistent backend for both collaborator interfaces:
//! it implements [`CredentialStore`] over the `accounts` table and
//! [`PostTracker`] over `dispatches`, `dispatch_outcomes` and `channel_stats`.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::credentials::CredentialStore;
use crate::error::{CredentialError, DbError, Result};
use crate::tracker::{PostTracker, TrackedPost};
use crate::types::{Account, ConnectionState, Delivery, FailureKind, Provider, PublishOutcome};

/// Summary row for one tracked dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub media_count: i64,
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub message: String,
    pub created_at: i64,
}

/// Success/failure counters for one provider sub-channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub provider: String,
    pub channel: String,
    pub successes: i64,
    pub failures: i64,
    pub last_posted_at: Option<i64>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Insert or replace an account row
    ///
    /// Used by the account-linking flow; the dispatch engine itself only
    /// reads accounts and rotates secrets.
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        let metadata =
            serde_json::to_string(&account.metadata).unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, provider, username, display_name,
                                  access_secret, refresh_secret, connection_state, metadata, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                provider = excluded.provider,
                username = excluded.username,
                display_name = excluded.display_name,
                access_secret = excluded.access_secret,
                refresh_secret = excluded.refresh_secret,
                connection_state = excluded.connection_state,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(account.provider.as_str())
        .bind(&account.username)
        .bind(&account.display_name)
        .bind(account.access_token())
        .bind(account.refresh_token())
        .bind(account.connection_state.as_str())
        .bind(metadata)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Change an account's connection state
    pub async fn set_connection_state(
        &self,
        account_id: &str,
        state: ConnectionState,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET connection_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// Get an account by id regardless of state
    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, provider, username, display_name, access_secret,
                   refresh_secret, connection_state, metadata
            FROM accounts WHERE id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.and_then(|r| account_from_row(&r)))
    }

    /// Most recent dispatches for a user, newest first
    pub async fn recent_dispatches(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<DispatchRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, content, media_count, total, successful, failed, message, created_at
            FROM dispatches
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| DispatchRecord {
                id: r.get("id"),
                user_id: r.get("user_id"),
                content: r.get("content"),
                media_count: r.get("media_count"),
                total: r.get("total"),
                successful: r.get("successful"),
                failed: r.get("failed"),
                message: r.get("message"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    /// Outcomes stored for one dispatch
    pub async fn dispatch_outcomes(&self, dispatch_id: &str) -> Result<Vec<PublishOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, provider, account_name, success, post_id, url, delivery,
                   channel, message, error_kind, error, requires_reconnect, attempts, refreshed
            FROM dispatch_outcomes
            WHERE dispatch_id = ?
            ORDER BY account_id
            "#,
        )
        .bind(dispatch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().filter_map(outcome_from_row).collect())
    }

    /// Channel counters for one provider, busiest first
    pub async fn channel_stats(&self, provider: Provider) -> Result<Vec<ChannelStats>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, channel, successes, failures, last_posted_at
            FROM channel_stats
            WHERE provider = ?
            ORDER BY successes + failures DESC, channel
            "#,
        )
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ChannelStats {
                provider: r.get("provider"),
                channel: r.get("channel"),
                successes: r.get("successes"),
                failures: r.get("failures"),
                last_posted_at: r.get("last_posted_at"),
            })
            .collect())
    }

    async fn bump_channel(&self, outcome: &PublishOutcome, channel: &str, now: i64) -> Result<()> {
        let (successes, failures) = if outcome.success { (1, 0) } else { (0, 1) };
        let posted_at = if outcome.success { Some(now) } else { None };

        sqlx::query(
            r#"
            INSERT INTO channel_stats (provider, channel, successes, failures, last_posted_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(provider, channel) DO UPDATE SET
                successes = successes + excluded.successes,
                failures = failures + excluded.failures,
                last_posted_at = COALESCE(excluded.last_posted_at, last_posted_at)
            "#,
        )
        .bind(outcome.provider.as_str())
        .bind(channel)
        .bind(successes)
        .bind(failures)
        .bind(posted_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for Database {
    async fn get_connected_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, provider, username, display_name, access_secret,
                   refresh_secret, connection_state, metadata
            FROM accounts
            WHERE user_id = ? AND connection_state = 'connected'
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().filter_map(account_from_row).collect())
    }

    async fn update_secrets(
        &self,
        account_id: &str,
        user_id: &str,
        new_access: &str,
        new_refresh: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET access_secret = ?, refresh_secret = COALESCE(?, refresh_secret), updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(new_access)
        .bind(new_refresh)
        .bind(chrono::Utc::now().timestamp())
        .bind(account_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound {
                account_id: account_id.to_string(),
                user_id: user_id.to_string(),
            }
            .into());
        }

        Ok(())
    }

    fn backend_name(&self) -> &str {
        "sqlite"
    }
}

#[async_trait]
impl PostTracker for Database {
    async fn record(&self, user_id: &str, post: &TrackedPost) -> Result<()> {
        let result = &post.result;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO dispatches (id, user_id, content, media_count, total, successful, failed, message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.dispatch_id)
        .bind(user_id)
        .bind(&post.content)
        .bind(post.media_count as i64)
        .bind(result.total as i64)
        .bind(result.successful as i64)
        .bind(result.failed as i64)
        .bind(&result.message)
        .bind(post.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        for outcome in result.outcomes.values() {
            sqlx::query(
                r#"
                INSERT INTO dispatch_outcomes (dispatch_id, account_id, provider, account_name, success,
                    post_id, url, delivery, channel, message, error_kind, error,
                    requires_reconnect, attempts, refreshed)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&post.dispatch_id)
            .bind(&outcome.account_id)
            .bind(outcome.provider.as_str())
            .bind(&outcome.account_name)
            .bind(outcome.success as i64)
            .bind(&outcome.post_id)
            .bind(&outcome.url)
            .bind(outcome.delivery.map(delivery_to_db))
            .bind(&outcome.channel)
            .bind(&outcome.message)
            .bind(outcome.error_kind.map(|k| k.to_string()))
            .bind(&outcome.error)
            .bind(outcome.requires_reconnect as i64)
            .bind(outcome.attempts as i64)
            .bind(outcome.refreshed as i64)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;

        // Channel counters are best-effort and may be lost
        for outcome in result.outcomes.values() {
            if let Some(channel) = &outcome.channel {
                if let Err(e) = self.bump_channel(outcome, channel, post.created_at).await {
                    tracing::warn!(
                        "Failed to update {} stats for channel {}: {}",
                        outcome.provider,
                        channel,
                        e
                    );
                }
            }
        }

        Ok(())
    }
}

fn account_from_row(r: &sqlx::sqlite::SqliteRow) -> Option<Account> {
    let provider_str: String = r.get("provider");
    let provider: Provider = match provider_str.parse() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Skipping account with unknown provider: {}", e);
            return None;
        }
    };

    let metadata: HashMap<String, String> =
        serde_json::from_str(&r.get::<String, _>("metadata")).unwrap_or_default();

    let mut account = Account::new(
        r.get::<String, _>("id"),
        r.get::<String, _>("user_id"),
        provider,
        r.get::<String, _>("username"),
        r.get::<String, _>("access_secret"),
    );
    account.display_name = r.get("display_name");
    if let Some(refresh) = r.get::<Option<String>, _>("refresh_secret") {
        account = account.with_refresh_secret(refresh);
    }
    account.connection_state = ConnectionState::from_db(&r.get::<String, _>("connection_state"));
    account.metadata = metadata;
    Some(account)
}

fn outcome_from_row(r: &sqlx::sqlite::SqliteRow) -> Option<PublishOutcome> {
    let provider: Provider = r.get::<String, _>("provider").parse().ok()?;
    Some(PublishOutcome {
        account_id: r.get("account_id"),
        provider,
        account_name: r.get("account_name"),
        success: r.get::<i64, _>("success") != 0,
        post_id: r.get("post_id"),
        url: r.get("url"),
        delivery: r
            .get::<Option<String>, _>("delivery")
            .and_then(|d| delivery_from_db(&d)),
        channel: r.get("channel"),
        message: r.get("message"),
        error_kind: r
            .get::<Option<String>, _>("error_kind")
            .and_then(|k| failure_kind_from_db(&k)),
        error: r.get("error"),
        requires_reconnect: r.get::<i64, _>("requires_reconnect") != 0,
        attempts: u8::try_from(r.get::<i64, _>("attempts")).unwrap_or(u8::MAX),
        refreshed: r.get::<i64, _>("refreshed") != 0,
    })
}

fn delivery_to_db(delivery: Delivery) -> &'static str {
    match delivery {
        Delivery::Text => "text",
        Delivery::Native => "native",
        Delivery::ExternalLink => "external_link",
        Delivery::TextReference => "text_reference",
    }
}

fn delivery_from_db(s: &str) -> Option<Delivery> {
    match s {
        "text" => Some(Delivery::Text),
        "native" => Some(Delivery::Native),
        "external_link" => Some(Delivery::ExternalLink),
        "text_reference" => Some(Delivery::TextReference),
        _ => None,
    }
}

fn failure_kind_from_db(s: &str) -> Option<FailureKind> {
    match s {
        "validation" => Some(FailureKind::Validation),
        "content_rejected" => Some(FailureKind::ContentRejected),
        "transient" => Some(FailureKind::Transient),
        "reconnect" => Some(FailureKind::Reconnect),
        "unsupported" => Some(FailureKind::Unsupported),
        "internal" => Some(FailureKind::Internal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_codes_round_trip() {
        for delivery in [
            Delivery::Text,
            Delivery::Native,
            Delivery::ExternalLink,
            Delivery::TextReference,
        ] {
            assert_eq!(delivery_from_db(delivery_to_db(delivery)), Some(delivery));
        }
        assert_eq!(delivery_from_db("carrier-pigeon"), None);
    }

    #[test]
    fn test_failure_kind_codes_match_display() {
        for kind in [
            FailureKind::Validation,
            FailureKind::ContentRejected,
            FailureKind::Transient,
            FailureKind::Reconnect,
            FailureKind::Unsupported,
            FailureKind::Internal,
        ] {
            assert_eq!(failure_kind_from_db(&kind.to_string()), Some(kind));
        }
    }
}
