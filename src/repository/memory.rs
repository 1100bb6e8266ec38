// src/repository/memory.rs

//! Process-local repository used by the test suites and local runs without Postgres.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        grading::{AnswerKey, GradeSummary, SessionTally},
        session::{CandidateResult, PassFail, ResponseRecord, TestMeta, TestSession},
    },
    repository::ExamRepository,
};

#[derive(Debug, Clone)]
pub struct CandidateProfile {
    pub user_uuid: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Default)]
struct State {
    tests: HashMap<i64, TestMeta>,
    candidates: HashMap<i64, CandidateProfile>,
    enrollments: HashSet<(i64, i64)>,
    sessions: Vec<StoredSession>,
    responses: HashMap<(i64, String), ResponseRecord>,
    result_claims: HashMap<i64, DateTime<Utc>>,
    next_result_id: i64,
}

#[derive(Debug, Clone)]
struct StoredSession {
    session: TestSession,
    tally: Option<SessionTally>,
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::InternalServerError("repository lock poisoned".to_string()))
    }

    pub fn insert_test(&self, meta: TestMeta) -> Result<(), AppError> {
        self.locked()?.tests.insert(meta.test_id, meta);
        Ok(())
    }

    pub fn enroll(
        &self,
        test_id: i64,
        user_id: i64,
        profile: CandidateProfile,
    ) -> Result<(), AppError> {
        let mut state = self.locked()?;
        state.candidates.insert(user_id, profile);
        state.enrollments.insert((test_id, user_id));
        Ok(())
    }

    /// Responses stored for a session, ordered by question id.
    pub fn responses_for(&self, result_id: i64) -> Result<Vec<ResponseRecord>, AppError> {
        let state = self.locked()?;
        let mut rows: Vec<ResponseRecord> = state
            .responses
            .values()
            .filter(|r| r.result_id == result_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        Ok(rows)
    }
}

#[async_trait]
impl ExamRepository for MemoryRepository {
    async fn test_meta(&self, test_id: i64) -> Result<Option<TestMeta>, AppError> {
        Ok(self.locked()?.tests.get(&test_id).cloned())
    }

    async fn is_candidate(&self, test_id: i64, user_id: i64) -> Result<bool, AppError> {
        Ok(self.locked()?.enrollments.contains(&(test_id, user_id)))
    }

    async fn session(&self, test_id: i64, user_id: i64) -> Result<Option<TestSession>, AppError> {
        Ok(self
            .locked()?
            .sessions
            .iter()
            .find(|s| s.session.test_id == test_id && s.session.user_id == user_id)
            .map(|s| s.session.clone()))
    }

    async fn create_session_if_absent(
        &self,
        test_id: i64,
        user_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<TestSession, AppError> {
        let mut state = self.locked()?;
        if let Some(existing) = state
            .sessions
            .iter_mut()
            .find(|s| s.session.test_id == test_id && s.session.user_id == user_id)
        {
            existing.session.started_at.get_or_insert(started_at);
            return Ok(existing.session.clone());
        }
        state.next_result_id += 1;
        let session = TestSession {
            result_id: state.next_result_id,
            test_id,
            user_id,
            started_at: Some(started_at),
            submitted_at: None,
            score: None,
        };
        state.sessions.push(StoredSession {
            session: session.clone(),
            tally: None,
        });
        Ok(session)
    }

    async fn submit_session(&self, result_id: i64, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.locked()?;
        let stored = state
            .sessions
            .iter_mut()
            .find(|s| s.session.result_id == result_id)
            .ok_or_else(|| AppError::NotFound(format!("session {} not found", result_id)))?;
        if stored.session.submitted_at.is_some() {
            return Ok(false);
        }
        stored.session.submitted_at = Some(at);
        Ok(true)
    }

    async fn upsert_response(&self, response: &ResponseRecord) -> Result<(), AppError> {
        self.locked()?.responses.insert(
            (response.result_id, response.question_id.clone()),
            response.clone(),
        );
        Ok(())
    }

    async fn apply_answer_key(
        &self,
        test_id: i64,
        key: &AnswerKey,
    ) -> Result<GradeSummary, AppError> {
        let mut state = self.locked()?;
        let result_ids: HashSet<i64> = state
            .sessions
            .iter()
            .filter(|s| s.session.test_id == test_id)
            .map(|s| s.session.result_id)
            .collect();
        let tallies = key.tally(
            state
                .responses
                .values()
                .filter(|r| result_ids.contains(&r.result_id)),
        );

        for stored in state
            .sessions
            .iter_mut()
            .filter(|s| s.session.test_id == test_id)
        {
            let tally = tallies
                .get(&stored.session.result_id)
                .copied()
                .unwrap_or_default();
            stored.session.score = Some(tally.score);
            stored.tally = Some(tally);
        }

        let total_points = key.total_points();
        if let Some(meta) = state.tests.get_mut(&test_id) {
            meta.total_points = Some(total_points);
        }

        Ok(GradeSummary {
            test_id,
            total_points,
            graded_sessions: result_ids.len(),
        })
    }

    async fn session_scores(&self, test_id: i64) -> Result<Vec<i64>, AppError> {
        Ok(self
            .locked()?
            .sessions
            .iter()
            .filter(|s| s.session.test_id == test_id)
            .filter_map(|s| s.session.score)
            .collect())
    }

    async fn pass_fail_counts(&self, test_id: i64, cutoff: i64) -> Result<PassFail, AppError> {
        let scores = self.session_scores(test_id).await?;
        let pass_count = scores.iter().filter(|s| **s >= cutoff).count() as i64;
        Ok(PassFail {
            pass_count,
            fail_count: scores.len() as i64 - pass_count,
        })
    }

    async fn candidate_results(&self, test_id: i64) -> Result<Vec<CandidateResult>, AppError> {
        let state = self.locked()?;
        let mut rows = Vec::new();
        for stored in state
            .sessions
            .iter()
            .filter(|s| s.session.test_id == test_id)
        {
            let (Some(score), Some(tally)) = (stored.session.score, stored.tally) else {
                continue;
            };
            let Some(profile) = state.candidates.get(&stored.session.user_id) else {
                continue;
            };
            rows.push(CandidateResult {
                result_id: stored.session.result_id,
                user_uuid: profile.user_uuid.clone(),
                student_name: profile.name.clone(),
                student_email: profile.email.clone(),
                started_at: stored.session.started_at,
                score,
                attempted: tally.attempted,
                correct: tally.correct,
            });
        }
        rows.sort_by_key(|r| r.result_id);
        Ok(rows)
    }

    async fn find_pending_results_test(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<i64>, AppError> {
        let state = self.locked()?;
        Ok(state
            .tests
            .values()
            .filter(|t| t.end_time < now && t.published_at.is_none())
            .filter(|t| {
                state
                    .result_claims
                    .get(&t.test_id)
                    .is_none_or(|claimed| *claimed < stale_before)
            })
            .min_by_key(|t| t.end_time)
            .map(|t| t.test_id))
    }

    async fn claim_results(
        &self,
        test_id: i64,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.locked()?;
        let published = match state.tests.get(&test_id) {
            Some(meta) => meta.published_at.is_some(),
            None => return Ok(false),
        };
        let held = state
            .result_claims
            .get(&test_id)
            .is_some_and(|claimed| *claimed >= stale_before);
        if published || held {
            return Ok(false);
        }
        state.result_claims.insert(test_id, now);
        Ok(true)
    }

    async fn release_results(&self, test_id: i64) -> Result<(), AppError> {
        let mut state = self.locked()?;
        let published = state
            .tests
            .get(&test_id)
            .is_some_and(|meta| meta.published_at.is_some());
        if !published {
            state.result_claims.remove(&test_id);
        }
        Ok(())
    }

    async fn set_result_url(&self, test_id: i64, url: &str) -> Result<(), AppError> {
        let mut state = self.locked()?;
        let meta = state
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| AppError::NotFound(format!("test {} not found", test_id)))?;
        meta.result_url = Some(url.to_string());
        Ok(())
    }

    async fn mark_published(&self, test_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut state = self.locked()?;
        let meta = state
            .tests
            .get_mut(&test_id)
            .ok_or_else(|| AppError::NotFound(format!("test {} not found", test_id)))?;
        meta.published_at = Some(at);
        Ok(())
    }

    async fn tests_for_form(&self, form_id: &str) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .locked()?
            .tests
            .values()
            .filter(|t| t.form_id == form_id)
            .map(|t| t.test_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
