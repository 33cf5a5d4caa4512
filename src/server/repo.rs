//! Repository management endpoints

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::storage::StoreError;

pub const BANNER: &str = "gitrelay: git over HTTP with live push events";

#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    name: String,
}

/// GET /
pub async fn banner() -> &'static str {
    BANNER
}

/// POST /repo {"name": "..."}
pub async fn create_repo(
    State(state): State<AppState>,
    payload: Result<Json<CreateRepoRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": rejection.body_text(),
                    "message": "Only JSON requests are allowed",
                })),
            )
                .into_response();
        }
    };

    match state.repos.create(&request.name).await {
        Ok(_) => Json(json!({ "status": true, "repoName": request.name })).into_response(),
        Err(e @ StoreError::InvalidName(_)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e @ StoreError::AlreadyExists) => {
            (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => {
            error!(repo = %request.name, "failed to create repository: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
