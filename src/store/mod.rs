// src/store/mod.rs

//! Ports the engine talks through: read-only collaborators (tests, questions,
//! subscriptions) and the two repositories it owns (attempts, leaderboard).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    attempt::Attempt,
    leaderboard::LeaderboardEntry,
    question::Question,
    subscription::Subscription,
    test::TestDefinition,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A versioned write lost against a concurrent writer.
    #[error("conflict: record was modified concurrently")]
    Conflict,

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Test definitions, owned by the catalog side of the platform.
#[async_trait]
pub trait TestCatalog: Send + Sync {
    async fn get_test(&self, test_id: i64) -> Result<Option<TestDefinition>, StorageError>;
}

/// Question definitions. Read-only from the engine's point of view.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Active questions of a test, ordered by position.
    async fn list_active_questions(&self, test_id: i64) -> Result<Vec<Question>, StorageError>;

    /// Questions by id, including inactive ones. Missing ids are simply absent from the map.
    async fn get_questions_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Question>, StorageError>;
}

/// Subscription state, owned by the payment side of the platform.
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    async fn get_subscription(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<Option<Subscription>, StorageError>;
}

/// Outcome of `AttemptRepository::insert_attempt`.
#[derive(Debug, Clone)]
pub enum NewAttempt {
    /// Stored with its assigned id and version 1.
    Created(Attempt),
    /// The user already had an open attempt for the test; nothing was written.
    Existing(Attempt),
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Persists a new attempt.
    ///
    /// Unless `force_new`, the check for an open attempt of the same
    /// (user, test) and the insert are atomic across every writer of the store.
    async fn insert_attempt(&self, attempt: &Attempt, force_new: bool) -> Result<NewAttempt, StorageError>;

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, StorageError>;

    /// Latest in-progress attempt of a user for a test.
    async fn find_in_progress(&self, user_id: i64, test_id: i64) -> Result<Option<Attempt>, StorageError>;

    /// Compare-and-swap on `attempt.version`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored version differs.
    async fn update_attempt(&self, attempt: &Attempt) -> Result<Attempt, StorageError>;

    /// A user's attempts, newest first.
    async fn list_attempts(&self, user_id: i64, test_id: Option<i64>) -> Result<Vec<Attempt>, StorageError>;

    async fn list_in_progress(&self) -> Result<Vec<Attempt>, StorageError>;
}

/// New best result for a (category, test, user) triple.
#[derive(Debug, Clone)]
pub struct BestResult {
    pub category_id: i64,
    pub test_id: i64,
    pub user_id: i64,
    pub score: f64,
    pub attempt_id: i64,
    pub attempt_time_seconds: i64,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    async fn get_entry(
        &self,
        category_id: i64,
        test_id: i64,
        user_id: i64,
    ) -> Result<Option<LeaderboardEntry>, StorageError>;

    async fn get_entry_by_id(&self, entry_id: i64) -> Result<Option<LeaderboardEntry>, StorageError>;

    /// Inserts or overwrites the entry for the triple. Rank is left for the caller to recompute.
    async fn upsert_entry(&self, best: &BestResult) -> Result<LeaderboardEntry, StorageError>;

    async fn list_group(&self, category_id: i64, test_id: i64) -> Result<Vec<LeaderboardEntry>, StorageError>;

    /// Writes every `(entry_id, rank)` pair atomically.
    async fn set_ranks(&self, ranks: &[(i64, i64)]) -> Result<(), StorageError>;

    /// Returns false when nothing was deleted.
    async fn delete_entry(&self, entry_id: i64) -> Result<bool, StorageError>;

    /// Distinct test ids that have entries under a category.
    async fn list_group_tests(&self, category_id: i64) -> Result<Vec<i64>, StorageError>;
}

/// Aggregates every port behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub tests: Arc<dyn TestCatalog>,
    pub questions: Arc<dyn QuestionBank>,
    pub subscriptions: Arc<dyn SubscriptionDirectory>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub leaderboard: Arc<dyn LeaderboardRepository>,
}

impl Storage {
    /// Backs every port with the same in-memory store.
    pub fn in_memory(store: &InMemoryStore) -> Self {
        Self {
            tests: Arc::new(store.clone()),
            questions: Arc::new(store.clone()),
            subscriptions: Arc::new(store.clone()),
            attempts: Arc::new(store.clone()),
            leaderboard: Arc::new(store.clone()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = PgStore::new(pool);
        Self {
            tests: Arc::new(store.clone()),
            questions: Arc::new(store.clone()),
            subscriptions: Arc::new(store.clone()),
            attempts: Arc::new(store.clone()),
            leaderboard: Arc::new(store),
        }
    }
}
