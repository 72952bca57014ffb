use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use threadline_api::{
    CommentId, CommentRecord, CommentSource, Cursor, Error as ApiError, LikeRequest, LikeState,
    NewComment, Page, PostId,
};
use tower_http::trace::TraceLayer;

use crate::MockServer;

pub struct Error(ApiError);

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Error {
        Error(err)
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::info!("returning error to client: {}", self.0);
        (self.0.status_code(), self.0.contents()).into_response()
    }
}

#[derive(serde::Deserialize)]
struct CursorQuery {
    cursor: Option<String>,
}

impl CursorQuery {
    fn cursor(self) -> Option<Cursor> {
        self.cursor.map(Cursor)
    }
}

/// REST facade over a `MockServer`, for driving the client over real HTTP
pub fn router(server: Arc<MockServer>) -> Router {
    Router::new()
        .route("/api/posts/:post/comments", get(fetch_root_comments))
        .route("/api/comments", post(create_comment))
        .route("/api/comments/:id", delete(delete_comment))
        .route("/api/comments/:id/replies", get(fetch_replies))
        .route("/api/comments/:id/like", post(toggle_like))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn fetch_root_comments(
    State(server): State<Arc<MockServer>>,
    Path(post): Path<String>,
    Query(q): Query<CursorQuery>,
) -> Result<Json<Page<CommentRecord>>, Error> {
    let cursor = q.cursor();
    Ok(Json(
        server
            .fetch_root_comments(&PostId(post), cursor.as_ref())
            .await?,
    ))
}

async fn fetch_replies(
    State(server): State<Arc<MockServer>>,
    Path(id): Path<String>,
    Query(q): Query<CursorQuery>,
) -> Result<Json<Page<CommentRecord>>, Error> {
    let cursor = q.cursor();
    Ok(Json(
        server
            .fetch_replies(&CommentId(id), cursor.as_ref())
            .await?,
    ))
}

async fn create_comment(
    State(server): State<Arc<MockServer>>,
    Json(comment): Json<NewComment>,
) -> Result<Json<CommentRecord>, Error> {
    Ok(Json(server.create_comment(comment).await?))
}

async fn toggle_like(
    State(server): State<Arc<MockServer>>,
    Path(id): Path<String>,
    Json(req): Json<LikeRequest>,
) -> Result<Json<LikeState>, Error> {
    Ok(Json(server.toggle_like(&CommentId(id), req.desired).await?))
}

async fn delete_comment(
    State(server): State<Arc<MockServer>>,
    Path(id): Path<String>,
) -> Result<(), Error> {
    Ok(server.delete_comment(&CommentId(id)).await?)
}
