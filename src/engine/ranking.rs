// src/engine/ranking.rs

//! Leaderboard Ranker.
//!
//! Every qualifying change re-sorts the whole (category, test) group and
//! rewrites every rank, which is O(N) per submission within a group.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::clock::Clock;
use crate::engine::{error::EngineError, locks::KeyedLocks};
use crate::models::leaderboard::{LeaderboardEntry, RankOutcome};
use crate::store::{BestResult, LeaderboardRepository};

/// Total order of a group: higher score first, then faster attempt, then
/// whoever got there first, then entry id.
pub fn compare_entries(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.best_score
        .total_cmp(&a.best_score)
        .then(a.attempt_time_seconds.cmp(&b.attempt_time_seconds))
        .then(a.updated_at.cmp(&b.updated_at))
        .then(a.id.cmp(&b.id))
}

/// Sorts the group and returns dense `(entry_id, rank)` pairs starting at 1.
pub fn assign_ranks(entries: &mut [LeaderboardEntry]) -> Vec<(i64, i64)> {
    entries.sort_by(compare_entries);
    entries
        .iter_mut()
        .enumerate()
        .map(|(i, entry)| {
            entry.rank = i as i64 + 1;
            (entry.id, entry.rank)
        })
        .collect()
}

pub struct LeaderboardRanker {
    repo: Arc<dyn LeaderboardRepository>,
    clock: Arc<dyn Clock>,
    groups: KeyedLocks<(i64, i64)>,
}

impl LeaderboardRanker {
    pub fn new(repo: Arc<dyn LeaderboardRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            groups: KeyedLocks::new(),
        }
    }

    /// Records a submitted attempt's score.
    ///
    /// Only a first entry or a strictly better score touches the board; then
    /// the whole group is re-ranked.
    pub async fn record_result(
        &self,
        category_id: i64,
        test_id: i64,
        user_id: i64,
        score: f64,
        attempt_id: i64,
        attempt_time_seconds: i64,
    ) -> Result<RankOutcome, EngineError> {
        let _group = self.groups.lock((category_id, test_id)).await;

        let existing = self.repo.get_entry(category_id, test_id, user_id).await?;
        if let Some(entry) = existing.filter(|e| score <= e.best_score) {
            return Ok(RankOutcome {
                updated: false,
                rank: Some(entry.rank),
                best_score: entry.best_score,
            });
        }

        let entry = self
            .repo
            .upsert_entry(&BestResult {
                category_id,
                test_id,
                user_id,
                score,
                attempt_id,
                attempt_time_seconds,
                recorded_at: self.clock.now(),
            })
            .await?;

        let ranked = self.rerank(category_id, test_id).await?;
        let rank = ranked.iter().find(|e| e.id == entry.id).map(|e| e.rank);

        tracing::info!(
            "Leaderboard ({}, {}) updated: user {} best {} rank {:?}",
            category_id,
            test_id,
            user_id,
            score,
            rank
        );

        Ok(RankOutcome {
            updated: true,
            rank,
            best_score: score,
        })
    }

    /// Removes an entry and re-ranks what is left of its group.
    pub async fn delete_entry(&self, entry_id: i64) -> Result<(), EngineError> {
        let entry = self
            .repo
            .get_entry_by_id(entry_id)
            .await?
            .ok_or(EngineError::NotFound("leaderboard entry"))?;

        let _group = self.groups.lock((entry.category_id, entry.test_id)).await;
        if !self.repo.delete_entry(entry_id).await? {
            return Err(EngineError::NotFound("leaderboard entry"));
        }
        self.rerank(entry.category_id, entry.test_id).await?;

        tracing::info!(
            "Leaderboard entry {} deleted from ({}, {})",
            entry_id,
            entry.category_id,
            entry.test_id
        );
        Ok(())
    }

    /// Re-sorts one group, or every group of a category. Idempotent.
    /// Returns how many entries were re-ranked.
    pub async fn recalculate_ranks(
        &self,
        category_id: i64,
        test_id: Option<i64>,
    ) -> Result<usize, EngineError> {
        let tests = match test_id {
            Some(test_id) => vec![test_id],
            None => self.repo.list_group_tests(category_id).await?,
        };

        let mut count = 0;
        for test_id in tests {
            let _group = self.groups.lock((category_id, test_id)).await;
            count += self.rerank(category_id, test_id).await?.len();
        }

        tracing::info!("Recalculated {} leaderboard ranks in category {}", count, category_id);
        Ok(count)
    }

    /// Entries of a group in rank order.
    pub async fn leaderboard(
        &self,
        category_id: i64,
        test_id: i64,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, EngineError> {
        let mut entries = self.repo.list_group(category_id, test_id).await?;
        entries.sort_by_key(|e| (e.rank, e.id));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }

    /// Caller must hold the group lock.
    async fn rerank(&self, category_id: i64, test_id: i64) -> Result<Vec<LeaderboardEntry>, EngineError> {
        let mut entries = self.repo.list_group(category_id, test_id).await?;
        let ranks = assign_ranks(&mut entries);
        self.repo.set_ranks(&ranks).await?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    fn entry(id: i64, score: f64, time: i64) -> LeaderboardEntry {
        LeaderboardEntry {
            id,
            category_id: 1,
            test_id: 1,
            user_id: id,
            best_score: score,
            attempt_id: id * 10,
            attempt_time_seconds: time,
            rank: 0,
            updated_at: ManualClock::default().now(),
        }
    }

    #[test]
    fn ranks_by_score_then_time() {
        let mut entries = vec![
            entry(1, 5.0, 100),
            entry(2, 7.5, 300),
            entry(3, 5.0, 50),
            entry(4, 0.0, 10),
        ];
        let ranks = assign_ranks(&mut entries);
        assert_eq!(ranks, vec![(2, 1), (3, 2), (1, 3), (4, 4)]);
    }

    #[test]
    fn full_ties_fall_back_to_id() {
        let mut entries = vec![entry(9, 1.0, 10), entry(3, 1.0, 10)];
        let ranks = assign_ranks(&mut entries);
        assert_eq!(ranks, vec![(3, 1), (9, 2)]);
    }

    fn ranker(store: &InMemoryStore) -> LeaderboardRanker {
        LeaderboardRanker::new(Arc::new(store.clone()), Arc::new(ManualClock::default()))
    }

    fn assert_dense(entries: &[LeaderboardEntry]) {
        let mut ranks: Vec<i64> = entries.iter().map(|e| e.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=entries.len() as i64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn only_improvements_replace_best() {
        let store = InMemoryStore::new();
        let ranker = ranker(&store);

        let first = ranker.record_result(1, 1, 7, 3.0, 100, 60).await.unwrap();
        assert!(first.updated);
        assert_eq!(first.rank, Some(1));

        let worse = ranker.record_result(1, 1, 7, 2.0, 101, 10).await.unwrap();
        assert!(!worse.updated);
        let equal = ranker.record_result(1, 1, 7, 3.0, 102, 10).await.unwrap();
        assert!(!equal.updated);

        let board = ranker.leaderboard(1, 1, 10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].attempt_id, 100);
        assert_eq!(board[0].best_score, 3.0);
    }

    #[tokio::test]
    async fn ranks_stay_dense_after_changes() {
        let store = InMemoryStore::new();
        let ranker = ranker(&store);

        ranker.record_result(1, 1, 1, 2.0, 11, 90).await.unwrap();
        ranker.record_result(1, 1, 2, 4.0, 12, 90).await.unwrap();
        ranker.record_result(1, 1, 3, 2.0, 13, 30).await.unwrap();
        ranker.record_result(1, 2, 4, 9.0, 14, 30).await.unwrap();

        let board = ranker.leaderboard(1, 1, 10).await.unwrap();
        assert_dense(&board);
        let users: Vec<i64> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(users, vec![2, 3, 1]);

        let top = board[0].id;
        ranker.delete_entry(top).await.unwrap();
        let board = ranker.leaderboard(1, 1, 10).await.unwrap();
        assert_dense(&board);
        assert_eq!(board[0].user_id, 3);

        // Other test in the category keeps its own ranking.
        let other = ranker.leaderboard(1, 2, 10).await.unwrap();
        assert_eq!(other[0].rank, 1);
    }

    #[tokio::test]
    async fn deleting_missing_entry_fails() {
        let store = InMemoryStore::new();
        let err = ranker(&store).delete_entry(42).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn recalculate_repairs_every_group_of_category() {
        let store = InMemoryStore::new();
        let ranker = ranker(&store);
        ranker.record_result(5, 1, 1, 1.0, 1, 10).await.unwrap();
        ranker.record_result(5, 1, 2, 2.0, 2, 10).await.unwrap();
        ranker.record_result(5, 2, 1, 1.0, 3, 10).await.unwrap();

        // Corrupt ranks, as a manual data fix might.
        let ids: Vec<(i64, i64)> = store
            .list_group(5, 1)
            .await
            .unwrap()
            .iter()
            .map(|e| (e.id, 7))
            .collect();
        store.set_ranks(&ids).await.unwrap();

        assert_eq!(ranker.recalculate_ranks(5, None).await.unwrap(), 3);
        assert_eq!(ranker.recalculate_ranks(5, Some(1)).await.unwrap(), 2);
        assert_dense(&ranker.leaderboard(5, 1, 10).await.unwrap());
    }
}
