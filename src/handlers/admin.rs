// src/handlers/admin.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    services::{FormContentLoader, ResultPipeline},
};

/// Starts grading, reporting and publishing for a closed test.
/// Admin only. The test is claimed before answering; the stages run in the background.
#[utoipa::path(
    post,
    path = "/api/admin/tests/{test_id}/results",
    params(("test_id" = i64, Path, description = "Test id")),
    responses(
        (status = 202, description = "Pipeline started"),
        (status = 404, description = "Unknown test"),
        (status = 409, description = "Results already published or being processed"),
        (status = 412, description = "Test still running")
    )
)]
pub async fn trigger_results(
    State(pipeline): State<Arc<ResultPipeline>>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    pipeline.claim(test_id).await?;

    tokio::spawn(async move {
        match pipeline.run_claimed(test_id).await {
            Ok(summary) => tracing::info!(
                test_id,
                delivered = summary.publish.delivered + summary.publish.redelivered,
                failed = summary.publish.failed,
                "Manual result run finished"
            ),
            Err(e) => tracing::error!(test_id, "Manual result run failed: {}", e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "test_id": test_id, "status": "started" })),
    ))
}

/// Drops a test's cached content so the next request fetches the form again.
/// Admin only.
#[utoipa::path(
    delete,
    path = "/api/admin/tests/{test_id}/content",
    params(("test_id" = i64, Path, description = "Test id")),
    responses(
        (status = 204, description = "Content evicted"),
        (status = 404, description = "Nothing cached")
    )
)]
pub async fn evict_content(
    State(content): State<FormContentLoader>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !content.evict(test_id).await? {
        return Err(AppError::NotFound("No cached content".to_string()));
    }
    tracing::info!(test_id, "Cached test content evicted");
    Ok(StatusCode::NO_CONTENT)
}
