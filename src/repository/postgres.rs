// src/repository/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        grading::{AnswerKey, GradeSummary},
        session::{CandidateResult, PassFail, ResponseRecord, TestMeta, TestSession},
    },
    repository::ExamRepository,
};

const TEST_COLUMNS: &str = "test_id, name, form_id, duration_minutes, end_time, threshold, \
     question_count, total_points, job_title, company_name, representative_email, \
     result_url, published_at";

const SESSION_COLUMNS: &str = "result_id, test_id, user_id, started_at, submitted_at, score";

#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamRepository for PgRepository {
    async fn test_meta(&self, test_id: i64) -> Result<Option<TestMeta>, AppError> {
        let meta = sqlx::query_as::<_, TestMeta>(&format!(
            "SELECT {} FROM tests WHERE test_id = $1",
            TEST_COLUMNS
        ))
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch test {}: {:?}", test_id, e);
            AppError::InternalServerError(e.to_string())
        })?;
        Ok(meta)
    }

    async fn is_candidate(&self, test_id: i64, user_id: i64) -> Result<bool, AppError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM test_candidates WHERE test_id = $1 AND user_id = $2")
                .bind(test_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn session(&self, test_id: i64, user_id: i64) -> Result<Option<TestSession>, AppError> {
        let session = sqlx::query_as::<_, TestSession>(&format!(
            "SELECT {} FROM test_sessions WHERE test_id = $1 AND user_id = $2",
            SESSION_COLUMNS
        ))
        .bind(test_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn create_session_if_absent(
        &self,
        test_id: i64,
        user_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<TestSession, AppError> {
        // The unique (test_id, user_id) constraint makes concurrent first requests converge.
        // A pre-provisioned row keeps its start time once stamped.
        sqlx::query(
            r#"
            INSERT INTO test_sessions (test_id, user_id, started_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (test_id, user_id) DO UPDATE
                SET started_at = COALESCE(test_sessions.started_at, EXCLUDED.started_at)
            "#,
        )
        .bind(test_id)
        .bind(user_id)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create session for test {}: {:?}", test_id, e);
            AppError::InternalServerError(e.to_string())
        })?;

        self.session(test_id, user_id).await?.ok_or_else(|| {
            AppError::InternalServerError(format!(
                "session for test {} user {} vanished after insert",
                test_id, user_id
            ))
        })
    }

    async fn submit_session(&self, result_id: i64, at: DateTime<Utc>) -> Result<bool, AppError> {
        let done = sqlx::query(
            "UPDATE test_sessions SET submitted_at = $2 WHERE result_id = $1 AND submitted_at IS NULL",
        )
        .bind(result_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn upsert_response(&self, response: &ResponseRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO test_responses (result_id, question_id, answer_values, time_taken_ms)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (result_id, question_id) DO UPDATE SET
                answer_values = EXCLUDED.answer_values,
                time_taken_ms = EXCLUDED.time_taken_ms,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(response.result_id)
        .bind(&response.question_id)
        .bind(&response.answer_values)
        .bind(response.time_taken_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert response: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
        Ok(())
    }

    async fn apply_answer_key(
        &self,
        test_id: i64,
        key: &AnswerKey,
    ) -> Result<GradeSummary, AppError> {
        let mut tx = self.pool.begin().await?;

        let sessions: Vec<(i64,)> = sqlx::query_as(
            "SELECT result_id FROM test_sessions WHERE test_id = $1 ORDER BY result_id FOR UPDATE",
        )
        .bind(test_id)
        .fetch_all(&mut *tx)
        .await?;

        let responses = sqlx::query_as::<_, ResponseRecord>(
            r#"
            SELECT r.result_id, r.question_id, r.answer_values, r.time_taken_ms
            FROM test_responses r
            JOIN test_sessions s ON s.result_id = r.result_id
            WHERE s.test_id = $1
            "#,
        )
        .bind(test_id)
        .fetch_all(&mut *tx)
        .await?;

        let tallies = key.tally(&responses);
        for (result_id,) in &sessions {
            let tally = tallies.get(result_id).copied().unwrap_or_default();
            sqlx::query(
                r#"
                UPDATE test_sessions
                SET score = $2, attempted = $3, correct = $4, graded_at = CURRENT_TIMESTAMP
                WHERE result_id = $1
                "#,
            )
            .bind(result_id)
            .bind(tally.score)
            .bind(tally.attempted)
            .bind(tally.correct)
            .execute(&mut *tx)
            .await?;
        }

        let total_points = key.total_points();
        sqlx::query("UPDATE tests SET total_points = $2 WHERE test_id = $1")
            .bind(test_id)
            .bind(total_points)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit scores for test {}: {:?}", test_id, e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(GradeSummary {
            test_id,
            total_points,
            graded_sessions: sessions.len(),
        })
    }

    async fn session_scores(&self, test_id: i64) -> Result<Vec<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT score FROM test_sessions WHERE test_id = $1 AND score IS NOT NULL",
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    async fn pass_fail_counts(&self, test_id: i64, cutoff: i64) -> Result<PassFail, AppError> {
        let counts = sqlx::query_as::<_, PassFail>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE score >= $2) AS pass_count,
                COUNT(*) FILTER (WHERE score < $2) AS fail_count
            FROM test_sessions
            WHERE test_id = $1 AND score IS NOT NULL
            "#,
        )
        .bind(test_id)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn candidate_results(&self, test_id: i64) -> Result<Vec<CandidateResult>, AppError> {
        let rows = sqlx::query_as::<_, CandidateResult>(
            r#"
            SELECT
                s.result_id,
                c.user_uuid,
                c.name AS student_name,
                c.email AS student_email,
                s.started_at,
                s.score,
                COALESCE(s.attempted, 0) AS attempted,
                COALESCE(s.correct, 0) AS correct
            FROM test_sessions s
            JOIN candidates c ON c.user_id = s.user_id
            WHERE s.test_id = $1 AND s.score IS NOT NULL
            ORDER BY s.result_id
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_pending_results_test(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT test_id FROM tests
            WHERE end_time < $1
              AND published_at IS NULL
              AND (results_claimed_at IS NULL OR results_claimed_at < $2)
            ORDER BY end_time
            LIMIT 1
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn claim_results(
        &self,
        test_id: i64,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        // Single conditional UPDATE; concurrent claimers serialize on the row lock.
        let result = sqlx::query(
            r#"
            UPDATE tests SET results_claimed_at = $2
            WHERE test_id = $1
              AND published_at IS NULL
              AND (results_claimed_at IS NULL OR results_claimed_at < $3)
            "#,
        )
        .bind(test_id)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to claim results of test {}: {:?}", test_id, e);
            AppError::InternalServerError(e.to_string())
        })?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_results(&self, test_id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE tests SET results_claimed_at = NULL WHERE test_id = $1 AND published_at IS NULL",
        )
        .bind(test_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_result_url(&self, test_id: i64, url: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE tests SET result_url = $2 WHERE test_id = $1")
            .bind(test_id)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_published(&self, test_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE tests SET published_at = $2 WHERE test_id = $1")
            .bind(test_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tests_for_form(&self, form_id: &str) -> Result<Vec<i64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT test_id FROM tests WHERE form_id = $1")
            .bind(form_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
