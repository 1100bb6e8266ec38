// src/services/publisher.rs

//! Result mail fan-out.
//!
//! The producer renders one task per graded candidate into a bounded primary
//! queue drained by a fixed worker group. Failed sends move to a smaller retry
//! queue whose workers re-deliver with exponential backoff until the allowed
//! attempts run out. Closing the primary sender ends the run: primary workers
//! drain and drop their retry senders, which closes the retry queue.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};

use crate::{
    clients::mailer::{Attachment, MailTransport, OutgoingMail},
    config::Config,
    error::AppError,
    models::session::{CandidateResult, TestMeta},
    repository::ExamRepository,
    services::report::ReportGenerator,
    utils::{
        sink::{ErrorSink, Severity},
        templates::{ResultPublishedEmail, result_published},
    },
};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub primary_workers: usize,
    pub retry_workers: usize,
    pub queue_capacity: usize,
    pub retry_queue_capacity: usize,
    /// Total sends per task, the first one included.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl From<&Config> for PublisherConfig {
    fn from(config: &Config) -> Self {
        Self {
            primary_workers: config.primary_workers,
            retry_workers: config.retry_workers,
            queue_capacity: config.queue_capacity,
            retry_queue_capacity: config.retry_queue_capacity,
            max_attempts: config.max_attempts,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailTask {
    pub result_id: i64,
    pub mail: OutgoingMail,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub enqueued: usize,
    pub skipped: usize,
    /// Delivered on the first attempt.
    pub delivered: usize,
    /// Delivered by a retry worker.
    pub redelivered: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicUsize,
    redelivered: AtomicUsize,
    failed: AtomicUsize,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<EmailTask>>>;

#[derive(Clone)]
pub struct ResultPublisher {
    repo: Arc<dyn ExamRepository>,
    reports: ReportGenerator,
    mailer: Arc<dyn MailTransport>,
    sink: ErrorSink,
    config: PublisherConfig,
}

impl ResultPublisher {
    pub fn new(
        repo: Arc<dyn ExamRepository>,
        reports: ReportGenerator,
        mailer: Arc<dyn MailTransport>,
        sink: ErrorSink,
        config: PublisherConfig,
    ) -> Self {
        Self {
            repo,
            reports,
            mailer,
            sink,
            config,
        }
    }

    /// Mails every graded candidate their report, then marks the test published.
    pub async fn publish(&self, test_id: i64) -> Result<PublishOutcome, AppError> {
        let meta = self
            .repo
            .test_meta(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("test {} not found", test_id)))?;
        if meta.result_url.is_none() {
            return Err(AppError::PreconditionFailed(format!(
                "test {} has no cumulative report yet",
                test_id
            )));
        }
        let candidates = self.repo.candidate_results(test_id).await?;
        tracing::info!(test_id, candidates = candidates.len(), "Publishing results");

        let (task_tx, task_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let handles = self.spawn_workers(task_rx, counters.clone());

        let mut outcome = PublishOutcome::default();
        for candidate in &candidates {
            let task = match self.prepare(&meta, candidate).await {
                Ok(task) => task,
                Err(e) => {
                    self.sink.report(
                        Severity::Error,
                        format!("render result {} of test {}", candidate.result_id, test_id),
                        &e,
                    );
                    outcome.skipped += 1;
                    continue;
                }
            };
            if task_tx.send(task).await.is_err() {
                self.sink.report(
                    Severity::Critical,
                    format!("publish test {}", test_id),
                    "all primary workers exited early",
                );
                outcome.skipped += 1;
                continue;
            }
            outcome.enqueued += 1;
        }

        drop(task_tx);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(test_id, "Publish worker panicked: {}", e);
            }
        }

        outcome.delivered = counters.delivered.load(Ordering::SeqCst);
        outcome.redelivered = counters.redelivered.load(Ordering::SeqCst);
        outcome.failed = counters.failed.load(Ordering::SeqCst);

        self.repo.mark_published(test_id, Utc::now()).await?;
        tracing::info!(
            test_id,
            enqueued = outcome.enqueued,
            skipped = outcome.skipped,
            delivered = outcome.delivered,
            redelivered = outcome.redelivered,
            failed = outcome.failed,
            "Results published"
        );
        Ok(outcome)
    }

    async fn prepare(
        &self,
        meta: &TestMeta,
        candidate: &CandidateResult,
    ) -> Result<EmailTask, AppError> {
        if candidate.student_email.trim().is_empty() {
            return Err(AppError::BadRequest("candidate has no e-mail".to_string()));
        }
        let path = self.reports.individual(meta, candidate).await?;
        let body = result_published(&ResultPublishedEmail {
            student_name: &candidate.student_name,
            test_name: &meta.name,
            job_title: &meta.job_title,
            company_name: &meta.company_name,
            start_time: candidate.started_at,
        });
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}_testresult.html", meta.test_id));
        Ok(EmailTask {
            result_id: candidate.result_id,
            mail: OutgoingMail {
                recipients: vec![candidate.student_email.clone()],
                subject: format!("Your result for {}", meta.name),
                html_body: body,
                attachment: Some(Attachment { path, file_name }),
            },
            attempts: 0,
        })
    }

    fn spawn_workers(
        &self,
        task_rx: mpsc::Receiver<EmailTask>,
        counters: Arc<Counters>,
    ) -> Vec<JoinHandle<()>> {
        let (retry_tx, retry_rx) = mpsc::channel(self.config.retry_queue_capacity.max(1));
        let task_rx: SharedReceiver = Arc::new(Mutex::new(task_rx));
        let retry_rx: SharedReceiver = Arc::new(Mutex::new(retry_rx));
        let mut handles = Vec::new();

        for worker in 0..self.config.primary_workers.max(1) {
            let rx = task_rx.clone();
            let retry_tx = retry_tx.clone();
            let mailer = self.mailer.clone();
            let sink = self.sink.clone();
            let counters = counters.clone();
            handles.push(tokio::spawn(async move {
                while let Some(mut task) = next_task(&rx).await {
                    task.attempts += 1;
                    match mailer.send(&task.mail).await {
                        Ok(()) => {
                            counters.delivered.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            tracing::warn!(worker, result_id = task.result_id, "Result mail failed, queued for retry: {}", e);
                            if let Err(mpsc::error::SendError(task)) = retry_tx.send(task).await {
                                counters.failed.fetch_add(1, Ordering::SeqCst);
                                sink.report(
                                    Severity::Critical,
                                    format!("result mail {}", task.result_id),
                                    "retry queue closed",
                                );
                            }
                        }
                    }
                }
            }));
        }
        // Only the primary workers hold retry senders now.
        drop(retry_tx);

        for worker in 0..self.config.retry_workers.max(1) {
            let rx = retry_rx.clone();
            let mailer = self.mailer.clone();
            let sink = self.sink.clone();
            let counters = counters.clone();
            let max_attempts = self.config.max_attempts.max(1);
            let backoff = self.config.retry_backoff;
            handles.push(tokio::spawn(async move {
                while let Some(mut task) = next_task(&rx).await {
                    loop {
                        if task.attempts >= max_attempts {
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                            sink.report(
                                Severity::Critical,
                                format!("result mail {}", task.result_id),
                                format!("undeliverable after {} attempts", task.attempts),
                            );
                            break;
                        }
                        tokio::time::sleep(retry_delay(backoff, task.attempts)).await;
                        task.attempts += 1;
                        match mailer.send(&task.mail).await {
                            Ok(()) => {
                                counters.redelivered.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                            Err(e) => tracing::warn!(
                                worker,
                                result_id = task.result_id,
                                attempt = task.attempts,
                                "Result mail retry failed: {}",
                                e
                            ),
                        }
                    }
                }
            }));
        }

        handles
    }
}

async fn next_task(rx: &SharedReceiver) -> Option<EmailTask> {
    rx.lock().await.recv().await
}

/// Backoff before the send following attempt number `attempts` (1-based).
fn retry_delay(base: Duration, attempts: u32) -> Duration {
    base.saturating_mul(1u32 << attempts.saturating_sub(1).min(16))
}
