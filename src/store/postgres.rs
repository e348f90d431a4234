// src/store/postgres.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};

use crate::models::{
    attempt::{AnswerRecord, Attempt, AttemptStatus, ScoreSummary, SectionRecord},
    leaderboard::LeaderboardEntry,
    question::Question,
    subscription::{Subscription, SubscriptionStatus},
    test::TestDefinition,
};

use super::{
    AttemptRepository, BestResult, LeaderboardRepository, NewAttempt, QuestionBank, StorageError,
    SubscriptionDirectory, TestCatalog,
};

const ATTEMPT_COLUMNS: &str = r#"
    id, user_id, category_id, test_id, status,
    started_at, ended_at, last_active_at, paused_at, total_paused_seconds,
    current_section_id, sections, answers, result, version
"#;

const ENTRY_COLUMNS: &str = r#"
    id, category_id, test_id, user_id, best_score, attempt_id,
    attempt_time_seconds, rank, updated_at
"#;

const QUESTION_COLUMNS: &str = r#"
    id, test_id, section_id, position, content, options, correct_option_id,
    marks, expected_time_seconds, explanation, active
"#;

/// PostgreSQL-backed store. Attempt children live as JSONB on the attempt row
/// so a whole attempt is written with one versioned UPDATE.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Row shape of the 'attempts' table.
#[derive(FromRow)]
struct AttemptRow {
    id: i64,
    user_id: i64,
    category_id: i64,
    test_id: i64,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    last_active_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    total_paused_seconds: i64,
    current_section_id: Option<i64>,
    sections: Json<Vec<SectionRecord>>,
    answers: Json<Vec<AnswerRecord>>,
    result: Option<Json<ScoreSummary>>,
    version: i64,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = StorageError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        let status = AttemptStatus::try_from(row.status).map_err(StorageError::Serialization)?;
        Ok(Attempt {
            id: row.id,
            user_id: row.user_id,
            category_id: row.category_id,
            test_id: row.test_id,
            status,
            started_at: row.started_at,
            ended_at: row.ended_at,
            last_active_at: row.last_active_at,
            paused_at: row.paused_at,
            total_paused_seconds: row.total_paused_seconds,
            current_section_id: row.current_section_id,
            sections: row.sections.0,
            answers: row.answers.0,
            result: row.result.map(|r| r.0),
            version: row.version,
        })
    }
}

fn into_attempts(rows: Vec<AttemptRow>) -> Result<Vec<Attempt>, StorageError> {
    rows.into_iter().map(Attempt::try_from).collect()
}

#[async_trait]
impl TestCatalog for PgStore {
    async fn get_test(&self, test_id: i64) -> Result<Option<TestDefinition>, StorageError> {
        let test = sqlx::query_as::<_, TestDefinition>(
            r#"
            SELECT
                id, category_id, name, duration_minutes, total_marks, negative_marking,
                sections, section_wise_timing, is_free, active
            FROM tests
            WHERE id = $1
            "#,
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(test)
    }
}

#[async_trait]
impl QuestionBank for PgStore {
    async fn list_active_questions(&self, test_id: i64) -> Result<Vec<Question>, StorageError> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE test_id = $1 AND active ORDER BY position, id"
        );
        let questions = sqlx::query_as::<_, Question>(&sql)
            .bind(test_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(questions)
    }

    async fn get_questions_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Question>, StorageError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        // Use QueryBuilder for dynamic IN clause
        let mut query_builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id IN ("));
        let mut separated = query_builder.separated(",");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let questions: Vec<Question> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        Ok(questions.into_iter().map(|q| (q.id, q)).collect())
    }
}

#[async_trait]
impl SubscriptionDirectory for PgStore {
    async fn get_subscription(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<Option<Subscription>, StorageError> {
        // Prefer an approved row when a user has several for the category.
        let row = sqlx::query_as::<_, (i64, i64, String)>(
            r#"
            SELECT user_id, category_id, status
            FROM subscriptions
            WHERE user_id = $1 AND category_id = $2
            ORDER BY (status = 'APPROVED') DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(category_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(user_id, category_id, status)| {
            Ok(Subscription {
                user_id,
                category_id,
                status: SubscriptionStatus::try_from(status).map_err(StorageError::Serialization)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl AttemptRepository for PgStore {
    async fn insert_attempt(&self, attempt: &Attempt, force_new: bool) -> Result<NewAttempt, StorageError> {
        let mut tx = self.pool.begin().await?;

        // Serializes starts of one (user, test) across processes until commit.
        sqlx::query(
            "SELECT pg_advisory_xact_lock(hashtextextended(format('attempt:%s:%s', $1::bigint, $2::bigint), 0))",
        )
        .bind(attempt.user_id)
        .bind(attempt.test_id)
        .execute(&mut *tx)
        .await?;

        if !force_new {
            let sql = format!(
                r#"
                SELECT {ATTEMPT_COLUMNS} FROM attempts
                WHERE user_id = $1 AND test_id = $2 AND status = 'IN_PROGRESS'
                ORDER BY started_at DESC, id DESC
                LIMIT 1
                "#
            );
            let open = sqlx::query_as::<_, AttemptRow>(&sql)
                .bind(attempt.user_id)
                .bind(attempt.test_id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = open {
                tx.commit().await?;
                return Ok(NewAttempt::Existing(Attempt::try_from(row)?));
            }
        }

        let sql = format!(
            r#"
            INSERT INTO attempts (
                user_id, category_id, test_id, status,
                started_at, ended_at, last_active_at, paused_at, total_paused_seconds,
                current_section_id, sections, answers, result, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 1)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(attempt.user_id)
            .bind(attempt.category_id)
            .bind(attempt.test_id)
            .bind(attempt.status.as_str())
            .bind(attempt.started_at)
            .bind(attempt.ended_at)
            .bind(attempt.last_active_at)
            .bind(attempt.paused_at)
            .bind(attempt.total_paused_seconds)
            .bind(attempt.current_section_id)
            .bind(Json(&attempt.sections))
            .bind(Json(&attempt.answers))
            .bind(attempt.result.as_ref().map(Json))
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(NewAttempt::Created(Attempt::try_from(row)?))
    }

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, StorageError> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1");
        let row = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Attempt::try_from).transpose()
    }

    async fn find_in_progress(&self, user_id: i64, test_id: i64) -> Result<Option<Attempt>, StorageError> {
        let sql = format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM attempts
            WHERE user_id = $1 AND test_id = $2 AND status = 'IN_PROGRESS'
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(user_id)
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Attempt::try_from).transpose()
    }

    async fn update_attempt(&self, attempt: &Attempt) -> Result<Attempt, StorageError> {
        let sql = format!(
            r#"
            UPDATE attempts SET
                status = $3,
                ended_at = $4,
                last_active_at = $5,
                paused_at = $6,
                total_paused_seconds = $7,
                current_section_id = $8,
                sections = $9,
                answers = $10,
                result = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(attempt.id)
            .bind(attempt.version)
            .bind(attempt.status.as_str())
            .bind(attempt.ended_at)
            .bind(attempt.last_active_at)
            .bind(attempt.paused_at)
            .bind(attempt.total_paused_seconds)
            .bind(attempt.current_section_id)
            .bind(Json(&attempt.sections))
            .bind(Json(&attempt.answers))
            .bind(attempt.result.as_ref().map(Json))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Attempt::try_from(row),
            None => {
                let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM attempts WHERE id = $1")
                    .bind(attempt.id)
                    .fetch_optional(&self.pool)
                    .await?;
                if exists.is_some() {
                    Err(StorageError::Conflict)
                } else {
                    Err(StorageError::NotFound)
                }
            }
        }
    }

    async fn list_attempts(&self, user_id: i64, test_id: Option<i64>) -> Result<Vec<Attempt>, StorageError> {
        let sql = format!(
            r#"
            SELECT {ATTEMPT_COLUMNS} FROM attempts
            WHERE user_id = $1 AND ($2::BIGINT IS NULL OR test_id = $2)
            ORDER BY started_at DESC, id DESC
            "#
        );
        let rows = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(user_id)
            .bind(test_id)
            .fetch_all(&self.pool)
            .await?;
        into_attempts(rows)
    }

    async fn list_in_progress(&self) -> Result<Vec<Attempt>, StorageError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE status = 'IN_PROGRESS' ORDER BY id"
        );
        let rows = sqlx::query_as::<_, AttemptRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        into_attempts(rows)
    }
}

#[async_trait]
impl LeaderboardRepository for PgStore {
    async fn get_entry(
        &self,
        category_id: i64,
        test_id: i64,
        user_id: i64,
    ) -> Result<Option<LeaderboardEntry>, StorageError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM leaderboard_entries WHERE category_id = $1 AND test_id = $2 AND user_id = $3"
        );
        let entry = sqlx::query_as::<_, LeaderboardEntry>(&sql)
            .bind(category_id)
            .bind(test_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    async fn get_entry_by_id(&self, entry_id: i64) -> Result<Option<LeaderboardEntry>, StorageError> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM leaderboard_entries WHERE id = $1");
        let entry = sqlx::query_as::<_, LeaderboardEntry>(&sql)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    async fn upsert_entry(&self, best: &BestResult) -> Result<LeaderboardEntry, StorageError> {
        let sql = format!(
            r#"
            INSERT INTO leaderboard_entries
                (category_id, test_id, user_id, best_score, attempt_id, attempt_time_seconds, rank, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            ON CONFLICT (category_id, test_id, user_id) DO UPDATE SET
                best_score = EXCLUDED.best_score,
                attempt_id = EXCLUDED.attempt_id,
                attempt_time_seconds = EXCLUDED.attempt_time_seconds,
                updated_at = EXCLUDED.updated_at
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let entry = sqlx::query_as::<_, LeaderboardEntry>(&sql)
            .bind(best.category_id)
            .bind(best.test_id)
            .bind(best.user_id)
            .bind(best.score)
            .bind(best.attempt_id)
            .bind(best.attempt_time_seconds)
            .bind(best.recorded_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(entry)
    }

    async fn list_group(&self, category_id: i64, test_id: i64) -> Result<Vec<LeaderboardEntry>, StorageError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM leaderboard_entries WHERE category_id = $1 AND test_id = $2 ORDER BY rank, id"
        );
        let entries = sqlx::query_as::<_, LeaderboardEntry>(&sql)
            .bind(category_id)
            .bind(test_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn set_ranks(&self, ranks: &[(i64, i64)]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for (id, rank) in ranks {
            sqlx::query("UPDATE leaderboard_entries SET rank = $1 WHERE id = $2")
                .bind(*rank)
                .bind(*id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_entry(&self, entry_id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM leaderboard_entries WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_group_tests(&self, category_id: i64) -> Result<Vec<i64>, StorageError> {
        let tests = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT test_id FROM leaderboard_entries WHERE category_id = $1 ORDER BY test_id",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tests)
    }
}
