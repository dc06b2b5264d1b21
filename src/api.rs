use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::PoisonError;
use tracing::{info, warn};

use crate::{
    app_state::{AppState, Status},
    calculators::{EnergyEstimate, EnergyProfile},
    error::{QueryError, QuizError},
    models::{QueryOutcome, SourceRecord},
    quiz::{self, Quiz},
};

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct QueryPayload {
    question: String,
}

#[derive(Deserialize)]
pub struct QuizPayload {
    title: String,
}

#[derive(Deserialize)]
pub struct StudyPayload {
    title: String,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(query_handler))
        .route("/api/calculate", post(calculate_handler))
        .route("/api/quiz", post(quiz_handler))
        .route("/api/study", post(study_handler))
        .route("/api/sources", get(sources_handler))
        .route("/api/status", get(status_handler))
        .route("/api/reindex", post(reindex_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> (StatusCode, Json<QueryOutcome>) {
    let kb = match state.knowledge_base() {
        Ok(kb) => kb,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(QueryOutcome::failed(err)),
            )
        }
    };

    outcome_response(kb.composer.query(&payload.question).await)
}

#[axum::debug_handler]
async fn study_handler(
    State(state): State<AppState>,
    Json(payload): Json<StudyPayload>,
) -> (StatusCode, Json<QueryOutcome>) {
    let kb = match state.knowledge_base() {
        Ok(kb) => kb,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(QueryOutcome::failed(err)),
            )
        }
    };

    outcome_response(kb.composer.study_guide(&payload.title).await)
}

fn outcome_response(outcome: QueryOutcome) -> (StatusCode, Json<QueryOutcome>) {
    let status = match outcome {
        QueryOutcome::Answered(_) => StatusCode::OK,
        QueryOutcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(outcome))
}

#[axum::debug_handler]
async fn calculate_handler(
    Json(profile): Json<EnergyProfile>,
) -> Result<Json<EnergyEstimate>, ApiError> {
    profile.estimate().map(Json).map_err(|err| {
        warn!("Cálculo rechazado: {}", err);
        api_error(StatusCode::BAD_REQUEST, err)
    })
}

#[axum::debug_handler]
async fn quiz_handler(
    State(state): State<AppState>,
    Json(payload): Json<QuizPayload>,
) -> Result<Json<Quiz>, ApiError> {
    let kb = state
        .knowledge_base()
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;

    match quiz::generate_quiz(&kb.composer, &payload.title).await {
        Ok(quiz) => Ok(Json(quiz)),
        Err(QuizError::Query(QueryError::NotInitialized(reason))) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            QueryError::NotInitialized(reason),
        )),
        Err(QuizError::Query(err)) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, err)),
        Err(err @ QuizError::Backend(_)) => Err(api_error(StatusCode::BAD_GATEWAY, err)),
    }
}

#[axum::debug_handler]
async fn sources_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceRecord>>, ApiError> {
    let kb = state
        .knowledge_base()
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e))?;
    Ok(Json(kb.sources.clone()))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status_snapshot())
}

#[axum::debug_handler]
async fn reindex_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if state.spawn_rebuild() {
        info!("Reindexación solicitada.");
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(api_error(
            StatusCode::CONFLICT,
            "Ya hay una indexación en curso.",
        ))
    }
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}
