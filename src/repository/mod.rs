// src/repository/mod.rs

//! Relational data layer behind the session and result pipeline.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        grading::{AnswerKey, GradeSummary},
        session::{CandidateResult, PassFail, ResponseRecord, TestMeta, TestSession},
    },
};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

#[async_trait]
pub trait ExamRepository: Send + Sync {
    async fn test_meta(&self, test_id: i64) -> Result<Option<TestMeta>, AppError>;

    /// Whether `user_id` is enrolled to take `test_id`.
    async fn is_candidate(&self, test_id: i64, user_id: i64) -> Result<bool, AppError>;

    async fn session(&self, test_id: i64, user_id: i64) -> Result<Option<TestSession>, AppError>;

    /// Creates the session unless one exists; returns whichever row is stored.
    async fn create_session_if_absent(
        &self,
        test_id: i64,
        user_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<TestSession, AppError>;

    /// Stamps `submitted_at` if still unset. Returns whether this call submitted it.
    async fn submit_session(&self, result_id: i64, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Inserts or replaces the response for (result_id, question_id).
    async fn upsert_response(&self, response: &ResponseRecord) -> Result<(), AppError>;

    /// Scores every session of the test against `key` and stores the scores
    /// and the test's total points in one transaction.
    async fn apply_answer_key(
        &self,
        test_id: i64,
        key: &AnswerKey,
    ) -> Result<GradeSummary, AppError>;

    /// Scores of the graded sessions of a test.
    async fn session_scores(&self, test_id: i64) -> Result<Vec<i64>, AppError>;

    async fn pass_fail_counts(&self, test_id: i64, cutoff: i64) -> Result<PassFail, AppError>;

    async fn candidate_results(&self, test_id: i64) -> Result<Vec<CandidateResult>, AppError>;

    /// One test whose window closed before `now`, not yet published and not
    /// claimed since `stale_before`.
    async fn find_pending_results_test(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError>;

    /// Marks the result run of an unpublished test as taken. Fails to claim
    /// while another claim newer than `stale_before` holds. Returns whether
    /// this call won.
    async fn claim_results(
        &self,
        test_id: i64,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Drops the claim so the next run can pick the test up again.
    async fn release_results(&self, test_id: i64) -> Result<(), AppError>;

    async fn set_result_url(&self, test_id: i64, url: &str) -> Result<(), AppError>;

    async fn mark_published(&self, test_id: i64, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn tests_for_form(&self, form_id: &str) -> Result<Vec<i64>, AppError>;
}
