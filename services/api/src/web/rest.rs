//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification. The route layer is a thin
//! translation onto `StudyService`; user identity arrives in the
//! `x-user-id` header.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use medquiz_core::domain::{QuestionPayload, QuestionSource};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        study_question_handler,
        record_answer_handler,
        review_question_handler,
        sweep_handler,
    ),
    components(
        schemas(
            StudyQuestionRequest,
            StudyQuestionResponse,
            QuestionBody,
            RecordAnswerRequest,
            TopicStatsResponse,
            ReviewQuestionRequest,
            ReviewQuestionResponse,
            SweepResponse,
        )
    ),
    tags(
        (name = "MedQuiz API", description = "Study-question serving, answer recording and review mode.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct StudyQuestionRequest {
    pub topic_id: Uuid,
}

/// A served question body, as stored in the cache.
#[derive(Serialize, ToSchema)]
pub struct QuestionBody {
    question_text: String,
    options: Vec<String>,
    correct_index: usize,
    explanation: String,
    page_reference: Option<i32>,
}

impl From<QuestionPayload> for QuestionBody {
    fn from(payload: QuestionPayload) -> Self {
        Self {
            question_text: payload.question_text,
            options: payload.options,
            correct_index: payload.correct_index,
            explanation: payload.explanation,
            page_reference: payload.page_reference,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct StudyQuestionResponse {
    question: QuestionBody,
    /// "buffer" when served from the prefetch buffer, "generated" otherwise.
    source: String,
    buffer_size_after: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct RecordAnswerRequest {
    pub topic_id: Uuid,
    pub question_id: Option<i64>,
    pub is_correct: bool,
    #[serde(default)]
    pub is_review: bool,
}

#[derive(Serialize, ToSchema)]
pub struct TopicStatsResponse {
    topic_id: Uuid,
    total_answered: i64,
    total_correct: i64,
    total_wrong: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct ReviewQuestionRequest {
    pub topic_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct ReviewQuestionResponse {
    question_id: i64,
    question: QuestionBody,
}

#[derive(Serialize, ToSchema)]
pub struct SweepResponse {
    removed: u64,
}

/// Extracts the calling user's id from the `x-user-id` header.
fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("Invalid x-user-id format".to_string()))
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Serve the next study question for a topic.
///
/// Buffer hits return instantly; a cold start generates an initial batch and
/// may take several seconds. Transient generation failures return 503 with
/// `retryable: true` and a `retry_after_ms` hint.
#[utoipa::path(
    post,
    path = "/study/question",
    request_body = StudyQuestionRequest,
    responses(
        (status = 200, description = "Question served", body = StudyQuestionResponse),
        (status = 422, description = "No source content for the topic"),
        (status = 503, description = "Generation backend overloaded; retry later")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn study_question_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<StudyQuestionRequest>,
) -> Result<Json<StudyQuestionResponse>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let served = app_state
        .study
        .request_study_question(user_id, request.topic_id)
        .await?;

    let source = match served.source {
        QuestionSource::Buffer => "buffer",
        QuestionSource::Generated => "generated",
    };
    Ok(Json(StudyQuestionResponse {
        question: served.question.into(),
        source: source.to_string(),
        buffer_size_after: served.buffer_size_after,
    }))
}

/// Record an answer and update the per-topic statistics.
///
/// A wrong study answer files the question for review mode; a correct review
/// answer removes it from the review set.
#[utoipa::path(
    post,
    path = "/study/answer",
    request_body = RecordAnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = TopicStatsResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn record_answer_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RecordAnswerRequest>,
) -> Result<Json<TopicStatsResponse>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let stats = app_state
        .study
        .record_answer(
            user_id,
            request.topic_id,
            request.question_id,
            request.is_correct,
            request.is_review,
        )
        .await?;

    Ok(Json(TopicStatsResponse {
        topic_id: stats.topic_id,
        total_answered: stats.total_answered,
        total_correct: stats.total_correct,
        total_wrong: stats.total_wrong,
    }))
}

/// Serve the oldest failed question for review, bypassing the buffer.
#[utoipa::path(
    post,
    path = "/study/review",
    request_body = ReviewQuestionRequest,
    responses(
        (status = 200, description = "Review question served", body = ReviewQuestionResponse),
        (status = 404, description = "No failed questions to review")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn review_question_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ReviewQuestionRequest>,
) -> Result<Json<ReviewQuestionResponse>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let review = app_state
        .study
        .request_review_question(user_id, request.topic_id)
        .await?
        .ok_or_else(|| {
            ApiError::Port(medquiz_core::ports::PortError::NotFound(
                "No failed questions to review".to_string(),
            ))
        })?;

    Ok(Json(ReviewQuestionResponse {
        question_id: review.question_id,
        question: review.question.into(),
    }))
}

/// Purge expired prefetch-buffer entries across all users and topics.
#[utoipa::path(
    post,
    path = "/maintenance/sweep",
    responses(
        (status = 200, description = "Expired entries purged", body = SweepResponse)
    )
)]
pub async fn sweep_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<SweepResponse>, ApiError> {
    let removed = app_state.study.sweep_buffers().await?;
    Ok(Json(SweepResponse { removed }))
}
