// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use assessment::{
    cache::MemoryCache,
    clients::{forms::FormsClient, mailer::HttpMailer},
    config::Config,
    models::session::TestMeta,
    repository::{ExamRepository, MemoryRepository, memory::CandidateProfile},
    routes,
    state::AppState,
    utils::{
        jwt::{ROLE_ADMIN, ROLE_CANDIDATE, sign_jwt},
        sink::ErrorSink,
    },
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

pub const OPEN_TEST: i64 = 1;
pub const CLOSED_TEST: i64 = 2;
pub const CANDIDATE: i64 = 7;
pub const FINISHED_CANDIDATE: i64 = 8;
pub const STRANGER: i64 = 99;
pub const FORM_ID: &str = "form-1";
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 1, 2, 3];

/// Stand-in for the form provider and the mail API.
#[derive(Clone)]
pub struct MockUpstream {
    pub address: String,
    pub mails: Arc<Mutex<Vec<Value>>>,
}

impl MockUpstream {
    pub fn mails(&self) -> Vec<Value> {
        self.mails.lock().unwrap().clone()
    }
}

pub fn form_json(address: &str) -> Value {
    json!({
        "formId": FORM_ID,
        "items": [
            {
                "itemId": "intro",
                "title": "Read carefully",
                "description": "No going back after submit",
                "textItem": {}
            },
            {
                "itemId": "q1",
                "title": "Pick one",
                "questionItem": {
                    "question": {
                        "required": true,
                        "grading": {
                            "pointValue": 5,
                            "correctAnswers": { "answers": [{ "value": "A" }] }
                        },
                        "choiceQuestion": {
                            "type": "RADIO",
                            "options": [{ "value": "A" }, { "value": "B" }]
                        }
                    },
                    "image": {
                        "contentUri": format!("{}/media/diagram.png", address),
                        "altText": "diagram"
                    }
                }
            },
            {
                "itemId": "q2",
                "title": "Pick the last letter",
                "questionItem": {
                    "question": {
                        "grading": {
                            "pointValue": 10,
                            "correctAnswers": { "answers": [{ "value": "C" }] }
                        },
                        "choiceQuestion": {
                            "type": "RADIO",
                            "options": [{ "value": "B" }, { "value": "C" }]
                        }
                    }
                }
            }
        ]
    })
}

async fn form(
    State(upstream): State<MockUpstream>,
    Path(form_id): Path<String>,
) -> impl IntoResponse {
    if form_id != FORM_ID {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })));
    }
    (StatusCode::OK, Json(form_json(&upstream.address)))
}

async fn media() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES)
}

async fn start_page_token() -> Json<Value> {
    Json(json!({ "startPageToken": "10" }))
}

async fn changes() -> Json<Value> {
    Json(json!({
        "changes": [{ "fileId": FORM_ID }, { "removed": true }],
        "newStartPageToken": "11"
    }))
}

async fn send_mail(State(upstream): State<MockUpstream>, Json(body): Json<Value>) -> StatusCode {
    upstream.mails.lock().unwrap().push(body);
    StatusCode::ACCEPTED
}

/// Spawns the mock upstream on a random port.
pub async fn spawn_upstream() -> MockUpstream {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let upstream = MockUpstream {
        address: format!("http://127.0.0.1:{}", port),
        mails: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/v1/forms/{form_id}", get(form))
        .route("/media/diagram.png", get(media))
        .route("/drive/v3/changes/startPageToken", get(start_page_token))
        .route("/drive/v3/changes", get(changes))
        .route("/send", post(send_mail))
        .with_state(upstream.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    upstream
}

pub struct TestApp {
    pub address: String,
    pub config: Config,
    pub repo: Arc<MemoryRepository>,
    pub upstream: MockUpstream,
}

impl TestApp {
    pub fn token(&self, user_id: i64) -> String {
        sign_jwt(user_id, ROLE_CANDIDATE, &self.config.jwt_secret, 600).unwrap()
    }

    pub fn admin_token(&self) -> String {
        sign_jwt(1, ROLE_ADMIN, &self.config.jwt_secret, 600).unwrap()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

pub fn meta(test_id: i64, end_time: DateTime<Utc>) -> TestMeta {
    TestMeta {
        test_id,
        name: "Aptitude".to_string(),
        form_id: FORM_ID.to_string(),
        duration_minutes: 30,
        end_time,
        threshold: 50,
        question_count: 2,
        total_points: None,
        job_title: "Engineer".to_string(),
        company_name: "Acme".to_string(),
        representative_email: "hr@acme.test".to_string(),
        result_url: None,
        published_at: None,
    }
}

pub fn profile(user_id: i64) -> CandidateProfile {
    CandidateProfile {
        user_uuid: format!("uuid-{}", user_id),
        name: format!("Candidate {}", user_id),
        email: format!("candidate{}@test.dev", user_id),
    }
}

/// Helper function to spawn the app on a random port for testing.
///
/// Seeds one running test with an enrolled candidate, and one closed test
/// with a candidate who already submitted.
pub async fn spawn_app() -> TestApp {
    let upstream = spawn_upstream().await;

    // 1. Configuration pointing at the mock upstream
    let results_dir = std::env::temp_dir().join(format!("results-{}", uuid::Uuid::new_v4()));
    let mut config = Config::for_tests(results_dir);
    config.forms_api_base = upstream.address.clone();
    config.drive_api_base = upstream.address.clone();
    config.mail_api_url = format!("{}/send", upstream.address);

    // 2. Seed the repository
    let repo = Arc::new(MemoryRepository::new());
    let now = Utc::now();
    repo.insert_test(meta(OPEN_TEST, now + Duration::hours(1)))
        .unwrap();
    repo.enroll(OPEN_TEST, CANDIDATE, profile(CANDIDATE)).unwrap();

    repo.insert_test(meta(CLOSED_TEST, now - Duration::minutes(1)))
        .unwrap();
    repo.enroll(CLOSED_TEST, FINISHED_CANDIDATE, profile(FINISHED_CANDIDATE))
        .unwrap();
    let session = repo
        .create_session_if_absent(CLOSED_TEST, FINISHED_CANDIDATE, now - Duration::minutes(20))
        .await
        .unwrap();
    for (question_id, value) in [("q1", "A"), ("q2", "B")] {
        repo.upsert_response(&assessment::models::session::ResponseRecord {
            result_id: session.result_id,
            question_id: question_id.to_string(),
            answer_values: vec![value.to_string()],
            time_taken_ms: 1_000,
        })
        .await
        .unwrap();
    }
    repo.submit_session(session.result_id, now - Duration::minutes(5))
        .await
        .unwrap();

    // 3. Real HTTP collaborators against the mock upstream
    let http = reqwest::Client::new();
    let provider = FormsClient::new(
        http.clone(),
        &config.forms_api_base,
        &config.drive_api_base,
        None,
    )
    .unwrap();
    let mailer = HttpMailer::new(http, &config.mail_api_url, None, config.mail_from.clone()).unwrap();
    let (sink, _rx) = ErrorSink::channel();

    let state = AppState::new(
        config.clone(),
        repo.clone(),
        Arc::new(MemoryCache::new()),
        Arc::new(provider),
        Arc::new(mailer),
        sink,
    );

    // 4. Create the router with the app state
    let app = routes::create_router(state);

    // 5. Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // 6. Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        config,
        repo,
        upstream,
    }
}
