// src/handlers/exam.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::session::{QuestionRequest, ResponsePayload, SubmitRequest},
    services::SessionNavigator,
    utils::jwt::Claims,
};

/// Returns one item of a test, or the cover page when `item_id` is `cover`.
#[utoipa::path(
    get,
    path = "/api/tests/{test_id}/questions/{item_id}",
    params(
        ("test_id" = i64, Path, description = "Test id"),
        ("item_id" = String, Path, description = "Item id, or `cover` to start the test")
    ),
    responses(
        (status = 200, description = "Item with its neighbours and the remaining time"),
        (status = 409, description = "Test already given"),
        (status = 410, description = "Time is up, auto-submit")
    )
)]
pub async fn get_question(
    State(navigator): State<SessionNavigator>,
    Extension(claims): Extension<Claims>,
    Path((test_id, item_id)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let view = navigator
        .fetch_question(
            user_id,
            QuestionRequest {
                test_id,
                item_id,
                prior_response: None,
            },
        )
        .await?;
    Ok(Json(view))
}

/// Saves the answer to the previous item, then returns the requested one.
#[utoipa::path(
    post,
    path = "/api/tests/{test_id}/questions/{item_id}",
    params(
        ("test_id" = i64, Path, description = "Test id"),
        ("item_id" = String, Path, description = "Item to show next")
    ),
    request_body = ResponsePayload,
    responses(
        (status = 200, description = "Answer stored, next item returned"),
        (status = 400, description = "Invalid answer"),
        (status = 410, description = "Time is up, auto-submit")
    )
)]
pub async fn answer_question(
    State(navigator): State<SessionNavigator>,
    Extension(claims): Extension<Claims>,
    Path((test_id, item_id)): Path<(i64, String)>,
    Json(payload): Json<ResponsePayload>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user_id = claims.user_id()?;
    let view = navigator
        .fetch_question(
            user_id,
            QuestionRequest {
                test_id,
                item_id,
                prior_response: Some(payload),
            },
        )
        .await?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/api/tests/{test_id}/submit",
    params(("test_id" = i64, Path, description = "Test id")),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Test submitted"),
        (status = 404, description = "Test was never started"),
        (status = 409, description = "Test already given")
    )
)]
pub async fn submit_test(
    State(navigator): State<SessionNavigator>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
    Json(payload): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;
    let receipt = navigator
        .submit(user_id, test_id, payload.final_response)
        .await?;
    Ok(Json(receipt))
}
