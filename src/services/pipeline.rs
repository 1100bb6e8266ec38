// src/services/pipeline.rs

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{
    error::AppError,
    models::grading::GradeSummary,
    repository::ExamRepository,
    services::{
        grading::GradingEngine,
        publisher::{PublishOutcome, ResultPublisher},
        report::ReportGenerator,
    },
    utils::sink::{ErrorSink, Severity},
};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub grade: GradeSummary,
    pub report_path: PathBuf,
    pub publish: PublishOutcome,
}

/// Grade, then report, then publish; each stage starts only after the previous one succeeded.
///
/// A run first claims its test in the repository, so at most one run per test
/// is in flight. A failed run releases the claim and the test stays pending.
#[derive(Clone)]
pub struct ResultPipeline {
    repo: Arc<dyn ExamRepository>,
    grading: GradingEngine,
    reports: ReportGenerator,
    publisher: ResultPublisher,
    sink: ErrorSink,
    claim_timeout: TimeDelta,
}

impl ResultPipeline {
    pub fn new(
        repo: Arc<dyn ExamRepository>,
        grading: GradingEngine,
        reports: ReportGenerator,
        publisher: ResultPublisher,
        sink: ErrorSink,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            grading,
            reports,
            publisher,
            sink,
            claim_timeout: TimeDelta::from_std(claim_timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.claim_timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Oldest closed test still waiting for its results.
    pub async fn next_pending(&self) -> Result<Option<i64>, AppError> {
        let now = Utc::now();
        self.repo
            .find_pending_results_test(now, self.stale_before(now))
            .await
    }

    /// Takes the result run of a closed test. Conflict when the results are
    /// already published or another run holds the test.
    pub async fn claim(&self, test_id: i64) -> Result<(), AppError> {
        let meta = self
            .repo
            .test_meta(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Test not found".to_string()))?;
        let now = Utc::now();
        if !meta.window_closed(now) {
            return Err(AppError::PreconditionFailed(
                "Test is still running".to_string(),
            ));
        }
        if meta.published_at.is_some() {
            return Err(AppError::Conflict(
                "Results of this test are already published".to_string(),
            ));
        }
        if !self
            .repo
            .claim_results(test_id, now, self.stale_before(now))
            .await?
        {
            return Err(AppError::Conflict(
                "Results of this test are already being processed".to_string(),
            ));
        }
        tracing::debug!(test_id, "Result run claimed");
        Ok(())
    }

    /// Claims the test and runs every stage.
    pub async fn run(&self, test_id: i64) -> Result<PipelineSummary, AppError> {
        self.claim(test_id).await?;
        self.run_claimed(test_id).await
    }

    /// Runs the stages of a test claimed with [`ResultPipeline::claim`].
    pub async fn run_claimed(&self, test_id: i64) -> Result<PipelineSummary, AppError> {
        match self.stages(test_id).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.sink.report(
                    Severity::Critical,
                    format!("result pipeline of test {}", test_id),
                    &e,
                );
                if let Err(release) = self.repo.release_results(test_id).await {
                    tracing::error!(test_id, "Failed to release result claim: {}", release);
                }
                Err(e)
            }
        }
    }

    async fn stages(&self, test_id: i64) -> Result<PipelineSummary, AppError> {
        let grade = self.grading.grade(test_id).await?;
        let report_path = self.reports.cumulative(test_id).await?;
        let publish = self.publisher.publish(test_id).await?;
        Ok(PipelineSummary {
            grade,
            report_path,
            publish,
        })
    }
}
