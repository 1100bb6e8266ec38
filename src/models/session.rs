// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::models::form::FormItem;

/// Represents the 'tests' table: one timed test bound to an external form.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TestMeta {
    pub test_id: i64,
    pub name: String,
    pub form_id: String,
    pub duration_minutes: i64,
    pub end_time: DateTime<Utc>,
    /// Pass threshold in percent of total points.
    pub threshold: i32,
    pub question_count: i64,
    /// Set by grading.
    pub total_points: Option<i64>,
    pub job_title: String,
    pub company_name: String,
    pub representative_email: String,
    /// Path of the cumulative report; set once the report is generated.
    pub result_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TestMeta {
    pub fn window_closed(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    InProgress,
    Submitted,
}

/// Represents the 'test_sessions' table: one attempt per (test, candidate).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TestSession {
    pub result_id: i64,
    pub test_id: i64,
    pub user_id: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<i64>,
}

impl TestSession {
    pub fn state(&self) -> SessionState {
        match (self.started_at, self.submitted_at) {
            (_, Some(_)) => SessionState::Submitted,
            (Some(_), None) => SessionState::InProgress,
            (None, None) => SessionState::NotStarted,
        }
    }
}

/// Represents the 'test_responses' table, keyed by (result_id, question_id).
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ResponseRecord {
    pub result_id: i64,
    pub question_id: String,
    pub answer_values: Vec<String>,
    pub time_taken_ms: i64,
}

/// Graded row for one candidate, joined with the candidate's profile.
#[derive(Debug, Clone, FromRow)]
pub struct CandidateResult {
    pub result_id: i64,
    pub user_uuid: String,
    pub student_name: String,
    pub student_email: String,
    pub started_at: Option<DateTime<Utc>>,
    pub score: i64,
    pub attempted: i64,
    pub correct: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct PassFail {
    pub pass_count: i64,
    pub fail_count: i64,
}

/// DTO for an answer attached to a question request.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct ResponsePayload {
    #[validate(length(min = 1, max = 128))]
    pub item_id: String,
    #[validate(length(max = 100))]
    pub values: Vec<String>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub time_taken_ms: i64,
}

/// A question-fetch request as seen by the navigator.
#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub test_id: i64,
    pub item_id: String,
    pub prior_response: Option<ResponsePayload>,
}

/// What the client renders for one poll.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<FormItem>,
    pub prev_id: Option<String>,
    pub next_id: Option<String>,
    pub ttl_seconds_remaining: u64,
}

/// DTO for finalizing a test.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate, ToSchema)]
pub struct SubmitRequest {
    #[validate(nested)]
    #[serde(default)]
    pub final_response: Option<ResponsePayload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub test_id: i64,
    pub result_id: i64,
    pub submitted_at: DateTime<Utc>,
}
