// src/services/poller.rs

//! Background trigger for the result pipeline.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
    clients::forms::{ChangeCursor, FormProvider},
    config::Config,
    error::AppError,
    repository::ExamRepository,
    services::{content::FormContentLoader, pipeline::ResultPipeline},
};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Consecutive failures tolerated before the poller stops.
    pub error_quota: u32,
}

impl From<&Config> for PollerConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            error_quota: config.poll_error_quota,
        }
    }
}

pub struct ResultPoller {
    repo: Arc<dyn ExamRepository>,
    pipeline: Arc<ResultPipeline>,
    provider: Arc<dyn FormProvider>,
    content: FormContentLoader,
    config: PollerConfig,
    cursor: ChangeCursor,
    consecutive_errors: u32,
}

impl ResultPoller {
    pub fn new(
        repo: Arc<dyn ExamRepository>,
        pipeline: Arc<ResultPipeline>,
        provider: Arc<dyn FormProvider>,
        content: FormContentLoader,
        config: PollerConfig,
    ) -> Self {
        Self {
            repo,
            pipeline,
            provider,
            content,
            config,
            cursor: ChangeCursor::default(),
            consecutive_errors: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<(), AppError>> {
        tokio::spawn(self.run())
    }

    /// Polls until the error quota is exceeded; returns the last error.
    pub async fn run(mut self) -> Result<(), AppError> {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        tracing::info!(interval_secs = self.config.interval.as_secs(), "Result poller started");

        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(_) => self.consecutive_errors = 0,
                Err(e) => {
                    self.consecutive_errors += 1;
                    tracing::error!(
                        errors = self.consecutive_errors,
                        quota = self.config.error_quota,
                        "Result poll failed: {}",
                        e
                    );
                    if self.consecutive_errors > self.config.error_quota {
                        tracing::error!("Result poller stopping, error quota exceeded");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// One tick: report stale cached forms, then run the pipeline for at most
    /// one overdue test. Returns the processed test id.
    pub async fn poll_once(&mut self) -> Result<Option<i64>, AppError> {
        self.watch_form_changes().await;

        let Some(test_id) = self.pipeline.next_pending().await? else {
            return Ok(None);
        };
        tracing::info!(test_id, "Running result pipeline");
        let summary = match self.pipeline.run(test_id).await {
            Ok(summary) => summary,
            Err(AppError::Conflict(reason)) => {
                tracing::debug!(test_id, "Result run skipped: {}", reason);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        tracing::info!(
            test_id,
            sessions = summary.grade.graded_sessions,
            delivered = summary.publish.delivered + summary.publish.redelivered,
            failed = summary.publish.failed,
            "Result pipeline finished"
        );
        Ok(Some(test_id))
    }

    async fn watch_form_changes(&mut self) {
        let changed = match self.provider.changed_files(&mut self.cursor).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!("Form change feed unavailable: {}", e);
                return;
            }
        };
        for form_id in changed {
            let tests = match self.repo.tests_for_form(&form_id).await {
                Ok(tests) => tests,
                Err(e) => {
                    tracing::warn!(form_id = %form_id, "Failed to look up tests of changed form: {}", e);
                    continue;
                }
            };
            for test_id in tests {
                if self.content.is_cached(test_id).await.unwrap_or(false) {
                    tracing::warn!(
                        test_id,
                        form_id = %form_id,
                        "Form changed after its content was cached, evict to refresh"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryCache,
        repository::MemoryRepository,
        services::{
            fakes::{RecordingMailer, StaticProvider, enroll, sample_items, temp_results_dir, test_meta},
            grading::GradingEngine,
            publisher::{PublisherConfig, ResultPublisher},
            report::ReportGenerator,
        },
        utils::sink::ErrorSink,
    };
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    struct Fixture {
        poller: ResultPoller,
        repo: Arc<MemoryRepository>,
        provider: Arc<StaticProvider>,
        mailer: Arc<RecordingMailer>,
        dir: std::path::PathBuf,
    }

    fn fixture(error_quota: u32) -> Fixture {
        let repo = Arc::new(MemoryRepository::new());
        let provider = Arc::new(StaticProvider::new(sample_items()));
        let mailer = Arc::new(RecordingMailer::default());
        let dir = temp_results_dir();
        let (sink, _) = ErrorSink::channel();

        let reports = ReportGenerator::new(repo.clone(), mailer.clone(), dir.clone());
        let publisher = ResultPublisher::new(
            repo.clone(),
            reports.clone(),
            mailer.clone(),
            sink.clone(),
            PublisherConfig {
                primary_workers: 2,
                retry_workers: 1,
                queue_capacity: 4,
                retry_queue_capacity: 2,
                max_attempts: 2,
                retry_backoff: Duration::from_millis(1),
            },
        );
        let pipeline = Arc::new(ResultPipeline::new(
            repo.clone(),
            GradingEngine::new(repo.clone(), provider.clone()),
            reports,
            publisher,
            sink,
            Duration::from_secs(3600),
        ));
        let content = FormContentLoader::new(
            Arc::new(MemoryCache::new()),
            provider.clone(),
            Duration::from_secs(2),
        );
        let poller = ResultPoller::new(
            repo.clone(),
            pipeline,
            provider.clone(),
            content,
            PollerConfig {
                interval: Duration::from_secs(60),
                error_quota,
            },
        );
        Fixture {
            poller,
            repo,
            provider,
            mailer,
            dir,
        }
    }

    #[tokio::test]
    async fn overdue_test_goes_through_the_whole_pipeline() {
        let mut f = fixture(4);
        f.repo
            .insert_test(test_meta(1, Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();
        enroll(&f.repo, 1, 7);
        f.repo
            .create_session_if_absent(1, 7, Utc::now())
            .await
            .unwrap();

        assert_eq!(f.poller.poll_once().await.unwrap(), Some(1));

        let meta = f.repo.test_meta(1).await.unwrap().unwrap();
        assert_eq!(meta.total_points, Some(20));
        assert!(meta.result_url.is_some());
        assert!(meta.published_at.is_some());
        // Draft to the representative plus one candidate mail.
        assert_eq!(f.mailer.sent().len(), 2);

        assert_eq!(f.poller.poll_once().await.unwrap(), None);
        tokio::fs::remove_dir_all(&f.dir).await.unwrap();
    }

    #[tokio::test]
    async fn failed_run_is_picked_up_on_next_tick() {
        let mut f = fixture(4);
        f.repo
            .insert_test(test_meta(1, Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();
        enroll(&f.repo, 1, 7);
        f.repo
            .create_session_if_absent(1, 7, Utc::now())
            .await
            .unwrap();
        f.provider.fail_form.store(true, Ordering::SeqCst);

        assert!(f.poller.poll_once().await.is_err());
        assert!(f.mailer.sent().is_empty());

        f.provider.fail_form.store(false, Ordering::SeqCst);
        assert_eq!(f.poller.poll_once().await.unwrap(), Some(1));
        assert_eq!(f.mailer.sent().len(), 2);
        let _ = tokio::fs::remove_dir_all(&f.dir).await;
    }

    #[tokio::test]
    async fn idle_tick_does_nothing() {
        let mut f = fixture(4);
        f.repo
            .insert_test(test_meta(1, Utc::now() + chrono::Duration::hours(1)))
            .unwrap();
        assert_eq!(f.poller.poll_once().await.unwrap(), None);
        assert_eq!(f.provider.form_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_exceeding_error_quota() {
        let f = fixture(2);
        f.repo
            .insert_test(test_meta(1, Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();
        f.provider.fail_form.store(true, Ordering::SeqCst);
        let provider = f.provider.clone();

        let result = f.poller.run().await;

        assert!(result.is_err());
        assert_eq!(provider.form_fetches.load(Ordering::SeqCst), 3);
    }
}
