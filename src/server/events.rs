use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gitrelay_hub::subscribe_upgrade;

use super::AppState;
use crate::storage::is_valid_name;

/// GET /events/:repo - live push events for one repository
///
/// Subscribing does not require the repository to exist yet, so a client
/// can wait for the first push to a repository that is about to be created.
pub async fn subscribe(
    ws: WebSocketUpgrade,
    Path(repo): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if !is_valid_name(&repo) {
        return (StatusCode::BAD_REQUEST, "invalid repository name").into_response();
    }
    subscribe_upgrade(ws, state.hubs, repo)
}
