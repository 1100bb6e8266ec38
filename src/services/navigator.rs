// src/services/navigator.rs

//! Candidate-facing session protocol: cover page, question navigation with
//! answer capture, and submission.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        form::COVER_ITEM_ID,
        session::{
            QuestionRequest, QuestionView, ResponsePayload, ResponseRecord, SessionState,
            SubmitReceipt, TestMeta, TestSession,
        },
    },
    repository::ExamRepository,
    services::{
        content::{CachedForm, FormContentLoader},
        timer::{SessionTimer, exam_duration},
    },
};

#[derive(Clone)]
pub struct SessionNavigator {
    repo: Arc<dyn ExamRepository>,
    content: FormContentLoader,
    timer: SessionTimer,
}

impl SessionNavigator {
    pub fn new(
        repo: Arc<dyn ExamRepository>,
        content: FormContentLoader,
        timer: SessionTimer,
    ) -> Self {
        Self {
            repo,
            content,
            timer,
        }
    }

    pub async fn fetch_question(
        &self,
        user_id: i64,
        req: QuestionRequest,
    ) -> Result<QuestionView, AppError> {
        if req.item_id == COVER_ITEM_ID {
            if req.prior_response.is_some() {
                tracing::debug!(test_id = req.test_id, user_id, "Ignoring answer sent with cover request");
            }
            self.open(user_id, req.test_id).await
        } else {
            self.navigate(user_id, req).await
        }
    }

    /// Cover page: validates the candidate, loads the content and starts the clock.
    async fn open(&self, user_id: i64, test_id: i64) -> Result<QuestionView, AppError> {
        let now = Utc::now();
        let meta = self.meta(test_id).await?;
        self.ensure_candidate(test_id, user_id).await?;
        if meta.window_closed(now) {
            return Err(AppError::AuthError(format!("test {} is closed", test_id)));
        }

        if let Some(session) = self.repo.session(test_id, user_id).await? {
            match session.state() {
                SessionState::Submitted => return Err(AppError::AlreadySubmitted),
                SessionState::InProgress => {
                    if self.timer.remaining(test_id, user_id).await?.is_none() {
                        return Err(AppError::TimeUp);
                    }
                }
                SessionState::NotStarted => {}
            }
        }

        let form = self.content.load_or_get(test_id, &meta.form_id).await?;
        let (_, remaining) = self.begin(&meta, user_id, now).await?;
        Ok(QuestionView {
            item: None,
            prev_id: None,
            next_id: form.first_id().map(str::to_string),
            ttl_seconds_remaining: remaining.as_secs(),
        })
    }

    async fn navigate(&self, user_id: i64, req: QuestionRequest) -> Result<QuestionView, AppError> {
        let now = Utc::now();
        let test_id = req.test_id;
        let meta = self.meta(test_id).await?;

        // Expiry and window checks come before anything is written.
        let session = self.repo.session(test_id, user_id).await?;
        let remaining = self.timer.remaining(test_id, user_id).await?;
        if let Some(session) = &session {
            if session.state() == SessionState::Submitted {
                return Err(AppError::AlreadySubmitted);
            }
            if session.started_at.is_some() && remaining.is_none() {
                return Err(AppError::TimeUp);
            }
        }
        if meta.window_closed(now) {
            return Err(AppError::AuthError(format!("test {} is closed", test_id)));
        }
        self.ensure_candidate(test_id, user_id).await?;

        let form = self.content.load_or_get(test_id, &meta.form_id).await?;

        // Candidate skipped the cover page.
        let (session, remaining) = match (session, remaining) {
            (Some(session), Some(remaining)) if session.started_at.is_some() => {
                (session, remaining)
            }
            _ => self.begin(&meta, user_id, now).await?,
        };

        if let Some(prior) = req.prior_response {
            self.record(&form, session.result_id, prior).await?;
        }

        let index = form.position(&req.item_id).ok_or_else(|| {
            AppError::NotFound(format!("item {} is not part of test {}", req.item_id, test_id))
        })?;
        let item = self.content.item(test_id, &req.item_id).await?.ok_or_else(|| {
            AppError::InternalServerError(format!(
                "cached order of test {} names missing item {}",
                test_id, req.item_id
            ))
        })?;
        let (prev_id, next_id) = form.neighbours(index);

        Ok(QuestionView {
            item: Some(item),
            prev_id,
            next_id,
            ttl_seconds_remaining: remaining.as_secs(),
        })
    }

    /// Finalizes the session. Allowed after the timer ran out (client auto-submit).
    pub async fn submit(
        &self,
        user_id: i64,
        test_id: i64,
        final_response: Option<ResponsePayload>,
    ) -> Result<SubmitReceipt, AppError> {
        let session = self.repo.session(test_id, user_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("no session for test {}", test_id))
        })?;
        if session.state() == SessionState::Submitted {
            return Err(AppError::AlreadySubmitted);
        }

        if let Some(response) = final_response {
            if self.timer.remaining(test_id, user_id).await?.is_some() {
                let form = CachedForm {
                    test_id,
                    order: self.content.order(test_id).await?,
                };
                self.record(&form, session.result_id, response).await?;
            } else {
                tracing::warn!(test_id, user_id, "Discarding final answer sent after time ran out");
            }
        }

        let submitted_at = Utc::now();
        if !self.repo.submit_session(session.result_id, submitted_at).await? {
            return Err(AppError::AlreadySubmitted);
        }
        tracing::info!(test_id, user_id, result_id = session.result_id, "Test submitted");

        Ok(SubmitReceipt {
            test_id,
            result_id: session.result_id,
            submitted_at,
        })
    }

    /// Starts the timer and the session row, both create-if-absent.
    async fn begin(
        &self,
        meta: &TestMeta,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(TestSession, Duration), AppError> {
        let duration = exam_duration(meta.duration_minutes)?;
        self.timer.start(meta.test_id, user_id, duration).await?;
        let session = self
            .repo
            .create_session_if_absent(meta.test_id, user_id, now)
            .await?;
        let remaining = self
            .timer
            .remaining(meta.test_id, user_id)
            .await?
            .ok_or(AppError::TimeUp)?;
        Ok((session, remaining))
    }

    async fn record(
        &self,
        form: &CachedForm,
        result_id: i64,
        response: ResponsePayload,
    ) -> Result<(), AppError> {
        if form.position(&response.item_id).is_none() {
            return Err(AppError::BadRequest(format!(
                "answer names unknown item {}",
                response.item_id
            )));
        }
        self.repo
            .upsert_response(&ResponseRecord {
                result_id,
                question_id: response.item_id,
                answer_values: response.values,
                time_taken_ms: response.time_taken_ms,
            })
            .await
    }

    async fn meta(&self, test_id: i64) -> Result<TestMeta, AppError> {
        self.repo
            .test_meta(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("test {} not found", test_id)))
    }

    async fn ensure_candidate(&self, test_id: i64, user_id: i64) -> Result<(), AppError> {
        if !self.repo.is_candidate(test_id, user_id).await? {
            return Err(AppError::AuthError(format!(
                "not a candidate of test {}",
                test_id
            )));
        }
        Ok(())
    }
}
