// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::models::{
    attempt::{Attempt, AttemptStatus},
    leaderboard::LeaderboardEntry,
    question::Question,
    subscription::Subscription,
    test::TestDefinition,
};

use super::{
    AttemptRepository, BestResult, LeaderboardRepository, NewAttempt, QuestionBank, StorageError,
    SubscriptionDirectory, TestCatalog,
};

#[derive(Default)]
struct Inner {
    tests: HashMap<i64, TestDefinition>,
    questions: HashMap<i64, Question>,
    subscriptions: HashMap<(i64, i64), Subscription>,
    attempts: HashMap<i64, Attempt>,
    entries: HashMap<i64, LeaderboardEntry>,
    next_attempt_id: i64,
    next_entry_id: i64,
}

/// Simple in-memory store implementing every port. Used by tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Seeds or replaces a test definition.
    pub fn put_test(&self, test: TestDefinition) -> Result<(), StorageError> {
        self.lock()?.tests.insert(test.id, test);
        Ok(())
    }

    /// Seeds or replaces a question. Replacing one mid-attempt mimics an admin edit.
    pub fn put_question(&self, question: Question) -> Result<(), StorageError> {
        self.lock()?.questions.insert(question.id, question);
        Ok(())
    }

    pub fn put_subscription(&self, subscription: Subscription) -> Result<(), StorageError> {
        self.lock()?
            .subscriptions
            .insert((subscription.user_id, subscription.category_id), subscription);
        Ok(())
    }
}

#[async_trait]
impl TestCatalog for InMemoryStore {
    async fn get_test(&self, test_id: i64) -> Result<Option<TestDefinition>, StorageError> {
        Ok(self.lock()?.tests.get(&test_id).cloned())
    }
}

#[async_trait]
impl QuestionBank for InMemoryStore {
    async fn list_active_questions(&self, test_id: i64) -> Result<Vec<Question>, StorageError> {
        let guard = self.lock()?;
        let mut questions: Vec<Question> = guard
            .questions
            .values()
            .filter(|q| q.test_id == test_id && q.active)
            .cloned()
            .collect();
        questions.sort_by_key(|q| (q.position, q.id));
        Ok(questions)
    }

    async fn get_questions_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Question>, StorageError> {
        let guard = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| guard.questions.get(id).map(|q| (*id, q.clone())))
            .collect())
    }
}

#[async_trait]
impl SubscriptionDirectory for InMemoryStore {
    async fn get_subscription(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<Option<Subscription>, StorageError> {
        Ok(self.lock()?.subscriptions.get(&(user_id, category_id)).cloned())
    }
}

#[async_trait]
impl AttemptRepository for InMemoryStore {
    async fn insert_attempt(&self, attempt: &Attempt, force_new: bool) -> Result<NewAttempt, StorageError> {
        let mut guard = self.lock()?;
        if !force_new {
            let open = guard
                .attempts
                .values()
                .filter(|a| {
                    a.user_id == attempt.user_id
                        && a.test_id == attempt.test_id
                        && a.status == AttemptStatus::InProgress
                })
                .max_by_key(|a| (a.started_at, a.id));
            if let Some(existing) = open {
                return Ok(NewAttempt::Existing(existing.clone()));
            }
        }
        guard.next_attempt_id += 1;
        let mut stored = attempt.clone();
        stored.id = guard.next_attempt_id;
        stored.version = 1;
        guard.attempts.insert(stored.id, stored.clone());
        Ok(NewAttempt::Created(stored))
    }

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, StorageError> {
        Ok(self.lock()?.attempts.get(&attempt_id).cloned())
    }

    async fn find_in_progress(&self, user_id: i64, test_id: i64) -> Result<Option<Attempt>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .attempts
            .values()
            .filter(|a| {
                a.user_id == user_id && a.test_id == test_id && a.status == AttemptStatus::InProgress
            })
            .max_by_key(|a| (a.started_at, a.id))
            .cloned())
    }

    async fn update_attempt(&self, attempt: &Attempt) -> Result<Attempt, StorageError> {
        let mut guard = self.lock()?;
        let stored = guard
            .attempts
            .get_mut(&attempt.id)
            .ok_or(StorageError::NotFound)?;
        if stored.version != attempt.version {
            return Err(StorageError::Conflict);
        }
        let mut next = attempt.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_attempts(&self, user_id: i64, test_id: Option<i64>) -> Result<Vec<Attempt>, StorageError> {
        let guard = self.lock()?;
        let mut attempts: Vec<Attempt> = guard
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && test_id.is_none_or(|t| a.test_id == t))
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(attempts)
    }

    async fn list_in_progress(&self) -> Result<Vec<Attempt>, StorageError> {
        let guard = self.lock()?;
        let mut attempts: Vec<Attempt> = guard
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::InProgress)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.id);
        Ok(attempts)
    }
}

#[async_trait]
impl LeaderboardRepository for InMemoryStore {
    async fn get_entry(
        &self,
        category_id: i64,
        test_id: i64,
        user_id: i64,
    ) -> Result<Option<LeaderboardEntry>, StorageError> {
        Ok(self
            .lock()?
            .entries
            .values()
            .find(|e| e.category_id == category_id && e.test_id == test_id && e.user_id == user_id)
            .cloned())
    }

    async fn get_entry_by_id(&self, entry_id: i64) -> Result<Option<LeaderboardEntry>, StorageError> {
        Ok(self.lock()?.entries.get(&entry_id).cloned())
    }

    async fn upsert_entry(&self, best: &BestResult) -> Result<LeaderboardEntry, StorageError> {
        let mut guard = self.lock()?;
        let existing = guard
            .entries
            .values_mut()
            .find(|e| {
                e.category_id == best.category_id
                    && e.test_id == best.test_id
                    && e.user_id == best.user_id
            });
        if let Some(entry) = existing {
            entry.best_score = best.score;
            entry.attempt_id = best.attempt_id;
            entry.attempt_time_seconds = best.attempt_time_seconds;
            entry.updated_at = best.recorded_at;
            return Ok(entry.clone());
        }

        guard.next_entry_id += 1;
        let entry = LeaderboardEntry {
            id: guard.next_entry_id,
            category_id: best.category_id,
            test_id: best.test_id,
            user_id: best.user_id,
            best_score: best.score,
            attempt_id: best.attempt_id,
            attempt_time_seconds: best.attempt_time_seconds,
            rank: 0,
            updated_at: best.recorded_at,
        };
        guard.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn list_group(&self, category_id: i64, test_id: i64) -> Result<Vec<LeaderboardEntry>, StorageError> {
        let guard = self.lock()?;
        let mut entries: Vec<LeaderboardEntry> = guard
            .entries
            .values()
            .filter(|e| e.category_id == category_id && e.test_id == test_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.rank, e.id));
        Ok(entries)
    }

    async fn set_ranks(&self, ranks: &[(i64, i64)]) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if ranks.iter().any(|(id, _)| !guard.entries.contains_key(id)) {
            return Err(StorageError::NotFound);
        }
        for (id, rank) in ranks {
            if let Some(entry) = guard.entries.get_mut(id) {
                entry.rank = *rank;
            }
        }
        Ok(())
    }

    async fn delete_entry(&self, entry_id: i64) -> Result<bool, StorageError> {
        Ok(self.lock()?.entries.remove(&entry_id).is_some())
    }

    async fn list_group_tests(&self, category_id: i64) -> Result<Vec<i64>, StorageError> {
        let guard = self.lock()?;
        let mut tests: Vec<i64> = guard
            .entries
            .values()
            .filter(|e| e.category_id == category_id)
            .map(|e| e.test_id)
            .collect();
        tests.sort_unstable();
        tests.dedup();
        Ok(tests)
    }
}
