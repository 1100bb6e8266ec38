// src/services/fakes.rs

//! In-process collaborators for the service tests.

use std::{
    path::PathBuf,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    clients::{
        forms::{ChangeCursor, FormProvider, FormView},
        mailer::{MailTransport, OutgoingMail},
    },
    error::AppError,
    models::{
        form::{
            ChoiceOption, ChoiceType, FormItem, Grading, Media, MediaPayload, QuestionItem,
            QuestionKind, TextItem,
        },
        session::TestMeta,
    },
    repository::{MemoryRepository, memory::CandidateProfile},
};

pub const SHARED_IMAGE: &str = "https://media.test/diagram.png";

pub struct StaticProvider {
    items: Vec<FormItem>,
    delay: Duration,
    pub changed: Mutex<Vec<String>>,
    pub form_fetches: AtomicUsize,
    pub media_fetches: AtomicUsize,
    pub fail_form: AtomicBool,
    pub fail_media: AtomicBool,
}

impl StaticProvider {
    pub fn new(items: Vec<FormItem>) -> Self {
        Self {
            items,
            delay: Duration::ZERO,
            changed: Mutex::new(Vec::new()),
            form_fetches: AtomicUsize::new(0),
            media_fetches: AtomicUsize::new(0),
            fail_form: AtomicBool::new(false),
            fail_media: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl FormProvider for StaticProvider {
    async fn fetch_form(&self, _form_id: &str, view: FormView) -> Result<Vec<FormItem>, AppError> {
        self.form_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_form.load(Ordering::SeqCst) {
            return Err(AppError::InternalServerError("provider down".to_string()));
        }
        let mut items = self.items.clone();
        if view == FormView::Candidate {
            items.iter_mut().for_each(FormItem::strip_grading);
        }
        Ok(items)
    }

    async fn fetch_media(&self, _uri: &str) -> Result<MediaPayload, AppError> {
        self.media_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(AppError::InternalServerError("media gone".to_string()));
        }
        Ok(MediaPayload {
            content_type: "image/png".to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        })
    }

    async fn changed_files(&self, _cursor: &mut ChangeCursor) -> Result<Vec<String>, AppError> {
        let mut changed = self
            .changed
            .lock()
            .map_err(|_| AppError::InternalServerError("lock poisoned".to_string()))?;
        Ok(std::mem::take(&mut *changed))
    }
}

/// Records every mail; fails the first `failures` sends.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingMail>>,
    pub attempts: AtomicUsize,
    failures: AtomicUsize,
}

impl RecordingMailer {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), AppError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::InternalServerError("smtp refused".to_string()));
        }
        self.sent
            .lock()
            .map_err(|_| AppError::InternalServerError("lock poisoned".to_string()))?
            .push(mail.clone());
        Ok(())
    }
}

fn choice(id: &str, title: &str, options: &[&str], correct: &[&str], points: i64) -> QuestionItem {
    QuestionItem {
        item_id: id.to_string(),
        title: title.to_string(),
        description: None,
        required: true,
        question: QuestionKind::Choice {
            choice_type: if correct.len() > 1 {
                ChoiceType::Checkbox
            } else {
                ChoiceType::Radio
            },
            options: options
                .iter()
                .map(|o| ChoiceOption {
                    value: o.to_string(),
                    image: None,
                })
                .collect(),
        },
        image: None,
        grading: Some(Grading {
            point_value: points,
            correct_answers: correct.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

/// Intro text plus three graded questions worth 20 points in total.
pub fn sample_items() -> Vec<FormItem> {
    let mut q1 = choice("q1", "Pick <script>alert(1)</script>one", &["A", "B", "C"], &["A"], 5);
    q1.image = Some(Media::Remote {
        uri: SHARED_IMAGE.to_string(),
        alt_text: Some("diagram".to_string()),
    });

    let mut q2 = choice("q2", "Pick all that apply", &["A", "B", "C"], &["A", "C"], 5);
    if let QuestionKind::Choice { options, .. } = &mut q2.question {
        options[1].image = Some(Media::Remote {
            uri: SHARED_IMAGE.to_string(),
            alt_text: None,
        });
    }

    let q3 = choice("q3", "Last one", &["A", "B", "C"], &["C"], 10);

    vec![
        FormItem::Text(TextItem {
            item_id: "intro".to_string(),
            title: "Read carefully".to_string(),
            description: Some("<b>No</b> going back after submit".to_string()),
        }),
        FormItem::Question(q1),
        FormItem::Question(q2),
        FormItem::Question(q3),
    ]
}

pub fn test_meta(test_id: i64, end_time: DateTime<Utc>) -> TestMeta {
    TestMeta {
        test_id,
        name: "Aptitude".to_string(),
        form_id: "form-1".to_string(),
        duration_minutes: 30,
        end_time,
        threshold: 40,
        question_count: 3,
        total_points: None,
        job_title: "Engineer".to_string(),
        company_name: "Acme".to_string(),
        representative_email: "hr@acme.test".to_string(),
        result_url: None,
        published_at: None,
    }
}

pub fn enroll(repo: &MemoryRepository, test_id: i64, user_id: i64) {
    repo.enroll(
        test_id,
        user_id,
        CandidateProfile {
            user_uuid: format!("uuid-{}", user_id),
            name: format!("Candidate {}", user_id),
            email: format!("candidate{}@test.dev", user_id),
        },
    )
    .unwrap();
}

pub fn temp_results_dir() -> PathBuf {
    std::env::temp_dir().join(format!("results-{}", uuid::Uuid::new_v4()))
}
