// src/services/grading.rs

use std::sync::Arc;

use chrono::Utc;

use crate::{
    clients::forms::{FormProvider, FormView},
    error::AppError,
    models::grading::{AnswerKey, GradeSummary},
    repository::ExamRepository,
};

/// Scores every session of a closed test against the authoritative form.
#[derive(Clone)]
pub struct GradingEngine {
    repo: Arc<dyn ExamRepository>,
    provider: Arc<dyn FormProvider>,
}

impl GradingEngine {
    pub fn new(repo: Arc<dyn ExamRepository>, provider: Arc<dyn FormProvider>) -> Self {
        Self { repo, provider }
    }

    pub async fn grade(&self, test_id: i64) -> Result<GradeSummary, AppError> {
        let meta = self
            .repo
            .test_meta(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("test {} not found", test_id)))?;
        if !meta.window_closed(Utc::now()) {
            return Err(AppError::PreconditionFailed(format!(
                "test {} is still running until {}",
                test_id, meta.end_time
            )));
        }

        let items = self
            .provider
            .fetch_form(&meta.form_id, FormView::Authoritative)
            .await?;
        let key = AnswerKey::from_items(&items);
        if key.is_empty() {
            tracing::warn!(test_id, form_id = %meta.form_id, "Form carries no answer key, every score will be 0");
        }

        let summary = self.repo.apply_answer_key(test_id, &key).await?;
        tracing::info!(
            test_id,
            total_points = summary.total_points,
            sessions = summary.graded_sessions,
            "Test graded"
        );
        Ok(summary)
    }
}
