// src/routes.rs

use axum::{
    Json, Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use utoipa::OpenApi;

use crate::{
    handlers::{admin, exam},
    models::session::{ResponsePayload, SubmitRequest},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        exam::get_question,
        exam::answer_question,
        exam::submit_test,
        admin::trigger_results,
        admin::evict_content
    ),
    components(schemas(ResponsePayload, SubmitRequest)),
    tags((name = "assessment", description = "Timed test sessions and result publishing"))
)]
pub struct ApiDoc;

/// Assembles the main application router.
///
/// * Candidate routes (question navigation, submit) require a valid token.
/// * Admin routes additionally require the admin role; they also serve the
///   generated report files under `/api/admin/reports`.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let test_routes = Router::new()
        .route(
            "/{test_id}/questions/{item_id}",
            get(exam::get_question).post(exam::answer_question),
        )
        .route("/{test_id}/submit", post(exam::submit_test))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/tests/{test_id}/results", post(admin::trigger_results))
        .route("/tests/{test_id}/content", delete(admin::evict_content))
        // Generated report artifacts
        .nest_service("/reports", ServeDir::new(&state.config.results_dir))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api/tests", test_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
