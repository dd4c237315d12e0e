mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{migrate::MigrateDatabase, sqlite::{SqlitePool, SqlitePoolOptions}, Sqlite, Row};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{SectionVotes, Session, SessionKey, SessionStatus, VoterId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt session record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Durable per-(ballot, voter) session records.
///
/// Callers read the whole session, change it and write the whole session
/// back. The store recomputes the `fulfilled` counts on every write so they
/// always agree with the votes being written.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Never fails for a missing key: an absent record is a fresh,
    /// not-started session.
    async fn get(&self, key: &SessionKey) -> Result<Session, StoreError>;

    async fn replace(&self, key: &SessionKey, session: &Session) -> Result<(), StoreError>;
}

/// Set of voters that completed a ballot.
#[async_trait]
pub trait CompletedVoters: Send + Sync {
    /// Returns `true` if the voter was not in the set before.
    async fn add_completed(&self, ballot: &str, voter: &VoterId) -> Result<bool, StoreError>;

    async fn completed_count(&self, ballot: &str) -> Result<usize, StoreError>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self, StoreError> {
        // Every connection to an in-memory database gets its own copy
        let in_memory = db_url.contains(":memory:");

        // Create database if it doesn't exist
        if !in_memory && !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            // Closing the only connection would drop the database
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                ballot_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                status TEXT NOT NULL,
                votes TEXT NOT NULL,
                fulfilled TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (ballot_id, voter_id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS completed_voters (
                ballot_id TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (ballot_id, voter_id)
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for Database {
    async fn get(&self, key: &SessionKey) -> Result<Session, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status, votes
            FROM sessions
            WHERE ballot_id = ? AND voter_id = ?
            "#,
        )
        .bind(&key.ballot)
        .bind(&key.voter.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Session::default());
        };

        let status_str = row.get::<String, _>("status");
        let status = SessionStatus::parse(&status_str).ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("unknown status '{}'", status_str),
        })?;
        let votes: BTreeMap<String, SectionVotes> =
            serde_json::from_str(&row.get::<String, _>("votes")).map_err(|e| {
                StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?;

        // The stored counts are derived data; rebuild them from the votes
        Ok(Session::from_parts(status, votes))
    }

    async fn replace(&self, key: &SessionKey, session: &Session) -> Result<(), StoreError> {
        let mut session = session.clone();
        session.recompute_fulfilled();

        let votes = serde_json::to_string(session.votes())?;
        let fulfilled = serde_json::to_string(session.fulfilled_map())?;

        // One statement, so status, votes and fulfilled change together
        sqlx::query(
            r#"
            INSERT INTO sessions (ballot_id, voter_id, status, votes, fulfilled, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(ballot_id, voter_id)
            DO UPDATE SET status = excluded.status, votes = excluded.votes,
                          fulfilled = excluded.fulfilled, updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.ballot)
        .bind(&key.voter.0)
        .bind(session.status().as_str())
        .bind(votes)
        .bind(fulfilled)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CompletedVoters for Database {
    async fn add_completed(&self, ballot: &str, voter: &VoterId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO completed_voters (ballot_id, voter_id, completed_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(ballot)
        .bind(&voter.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn completed_count(&self, ballot: &str) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM completed_voters WHERE ballot_id = ?")
            .bind(ballot)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Vote;

    async fn database() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn key(voter: &str) -> SessionKey {
        SessionKey::new("2026", VoterId::from(voter))
    }

    #[tokio::test]
    async fn missing_session_reads_as_not_started() {
        let db = database().await;
        let session = db.get(&key("1")).await.unwrap();
        assert_eq!(session, Session::default());
    }

    #[tokio::test]
    async fn replace_round_trips_status_and_votes() {
        let db = database().await;
        let mut session = Session::default();
        session.restart();
        session.record("Membership", "Alice", Vote::Yes);
        session.record("Membership", "Bob", Vote::No);
        session.record("Council", "1", Vote::Chose("Carol".into()));

        db.replace(&key("1"), &session).await.unwrap();
        let stored = db.get(&key("1")).await.unwrap();

        assert_eq!(stored.status(), SessionStatus::Started);
        assert_eq!(stored.vote("Council", "1"), Some(&Vote::Chose("Carol".into())));
        assert_eq!(stored.fulfilled("Membership"), 1);
        assert_eq!(stored.fulfilled("Council"), 1);
    }

    #[tokio::test]
    async fn sessions_are_keyed_per_voter_and_ballot() {
        let db = database().await;
        let mut session = Session::default();
        session.complete();
        db.replace(&key("1"), &session).await.unwrap();

        assert_eq!(db.get(&key("2")).await.unwrap().status(), SessionStatus::NotStarted);
        let other_ballot = SessionKey::new("2027", VoterId::from("1"));
        assert_eq!(db.get(&other_ballot).await.unwrap().status(), SessionStatus::NotStarted);
    }

    #[tokio::test]
    async fn stored_fulfilled_matches_votes() {
        let db = database().await;
        let mut session = Session::default();
        session.record("Membership", "Alice", Vote::Yes);
        db.replace(&key("1"), &session).await.unwrap();

        let row = sqlx::query("SELECT fulfilled FROM sessions WHERE voter_id = '1'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("fulfilled"), r#"{"Membership":1}"#);
    }

    #[tokio::test]
    async fn completed_voters_is_a_set() {
        let db = database().await;
        let voter = VoterId::from("1");
        assert!(db.add_completed("2026", &voter).await.unwrap());
        assert!(!db.add_completed("2026", &voter).await.unwrap());
        assert!(db.add_completed("2026", &VoterId::from("2")).await.unwrap());

        assert_eq!(db.completed_count("2026").await.unwrap(), 2);
        assert_eq!(db.completed_count("2027").await.unwrap(), 0);
    }
}
