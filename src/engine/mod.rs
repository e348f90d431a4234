// src/engine/mod.rs

//! The test-attempt lifecycle and scoring core.
//!
//! Time limits are enforced lazily: an expired section is closed when the
//! client next polls `check_section_timer`, and away time is registered when an
//! attempt is next read. Nothing runs in the background unless the optional
//! stale-attempt sweep is switched on, so an attempt nobody polls stays open.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{
    Config, DEFAULT_IDLE_THRESHOLD_SECONDS, DEFAULT_SWEEP_GRACE_SECONDS, MAX_TIME_INCREMENT_SECONDS,
};
use crate::models::{attempt::Attempt, test::TestDefinition};
use crate::store::{Storage, StorageError};

pub mod attempt;
pub mod error;
pub mod locks;
pub mod ranking;
pub mod scoring;
pub mod timing;

pub use attempt::TrailingTime;
pub use error::EngineError;
pub use ranking::LeaderboardRanker;

use locks::KeyedLocks;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Read-path gap above which time away is counted as paused.
    pub idle_threshold_seconds: i64,
    /// Slack past a test's duration before the sweep auto-submits it.
    pub sweep_grace_seconds: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            idle_threshold_seconds: DEFAULT_IDLE_THRESHOLD_SECONDS,
            sweep_grace_seconds: DEFAULT_SWEEP_GRACE_SECONDS,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            idle_threshold_seconds: config.idle_threshold_seconds,
            sweep_grace_seconds: config.sweep_grace_seconds,
        }
    }
}

pub struct ExamEngine {
    storage: Storage,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    ranker: LeaderboardRanker,
    /// Serializes every mutation of one attempt.
    attempt_locks: KeyedLocks<i64>,
    /// Serializes attempt creation per (user, test).
    start_locks: KeyedLocks<(i64, i64)>,
}

impl ExamEngine {
    pub fn new(storage: Storage, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        let ranker = LeaderboardRanker::new(storage.leaderboard.clone(), clock.clone());
        Self {
            storage,
            clock,
            settings,
            ranker,
            attempt_locks: KeyedLocks::new(),
            start_locks: KeyedLocks::new(),
        }
    }

    pub fn ranker(&self) -> &LeaderboardRanker {
        &self.ranker
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Loads an attempt the caller owns. Someone else's attempt is reported as missing.
    async fn load_owned(&self, attempt_id: i64, user_id: i64) -> Result<Attempt, EngineError> {
        self.storage
            .attempts
            .get_attempt(attempt_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or(EngineError::NotFound("attempt"))
    }

    async fn require_test(&self, test_id: i64) -> Result<TestDefinition, EngineError> {
        self.storage
            .tests
            .get_test(test_id)
            .await?
            .ok_or(EngineError::NotFound("test"))
    }

    /// Versioned write. On success `attempt` holds the stored copy.
    async fn save(&self, attempt: &mut Attempt) -> Result<(), EngineError> {
        match self.storage.attempts.update_attempt(attempt).await {
            Ok(saved) => {
                *attempt = saved;
                Ok(())
            }
            Err(StorageError::Conflict) => {
                tracing::warn!("Attempt {} was modified concurrently", attempt.id);
                Err(StorageError::Conflict.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_in_progress(attempt: &Attempt) -> Result<(), EngineError> {
    if attempt.status.is_terminal() {
        return Err(EngineError::InvalidState(format!(
            "attempt {} is already {}",
            attempt.id,
            attempt.status.as_str()
        )));
    }
    Ok(())
}

fn validate_increment(increment: i64) -> Result<i64, EngineError> {
    if increment < 0 {
        return Err(EngineError::Validation(
            "time increment must not be negative".to_string(),
        ));
    }
    if increment > MAX_TIME_INCREMENT_SECONDS {
        return Err(EngineError::Validation(format!(
            "time increment must not exceed {MAX_TIME_INCREMENT_SECONDS} seconds"
        )));
    }
    Ok(increment)
}
