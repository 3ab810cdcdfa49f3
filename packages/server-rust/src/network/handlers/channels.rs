//! Channel management and message processing endpoints.
//!
//! All routes live under `/api/v1/channels`. Domain failures are rendered by
//! [`ApiError`] as `{ "error": <kind>, "message": <text>, "details"?: {...} }`;
//! unreadable bodies get the same shape through [`JsonBody`].

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use conduit_core::{Channel, ChannelError, ProcessingResult};
use serde_json::{json, Value};

use super::AppState;

/// HTTP rendering of a [`ChannelError`].
#[derive(Debug)]
pub struct ApiError(pub ChannelError);

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        Self(err)
    }
}

/// Maps a domain error onto its HTTP status.
#[must_use]
pub fn status_for(err: &ChannelError) -> StatusCode {
    match err {
        ChannelError::NotFound { .. } => StatusCode::NOT_FOUND,
        ChannelError::AlreadyExists { .. } => StatusCode::CONFLICT,
        ChannelError::InvalidData { .. }
        | ChannelError::Validation { .. }
        | ChannelError::Configuration(_)
        | ChannelError::Disabled { .. } => StatusCode::BAD_REQUEST,
        ChannelError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "channel request failed");
        }

        let mut body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        match &self.0 {
            ChannelError::Validation { field, .. } => {
                body["details"] = json!({ "field": field });
            }
            ChannelError::Configuration(err) => {
                body["details"] = json!({ "path": err.path() });
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

/// JSON request body whose rejections render like every other API error.
#[derive(Debug)]
pub struct JsonBody(pub Value);

impl<S: Send + Sync> FromRequest<S> for JsonBody {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<Value>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(body_rejection(&rejection)),
        }
    }
}

fn body_rejection(rejection: &JsonRejection) -> Response {
    let status = rejection.status();
    let error = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "invalid_data"
    };
    let body = json!({ "error": error, "message": rejection.body_text() });
    (status, Json(body)).into_response()
}

/// Routes for channel CRUD, enable/disable, and processing.
pub fn channel_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_channel).get(list_channels))
        .route(
            "/{id}",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/{id}/enable", post(enable_channel))
        .route("/{id}/disable", post(disable_channel))
        .route("/{id}/process", post(process_message))
}

async fn create_channel(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    let channel = state.channels.create(&payload).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn list_channels(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let channels = state.channels.list().await?;
    let total = channels.len();
    Ok(Json(json!({ "channels": channels, "total": total })))
}

async fn get_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.channels.get(&id).await?))
}

async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.channels.update(&id, &patch).await?))
}

async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.channels.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.channels.enable(&id).await?))
}

async fn disable_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.channels.disable(&id).await?))
}

/// Runs one message through the channel. The body is the raw message.
async fn process_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(message): JsonBody,
) -> Result<Json<ProcessingResult>, ApiError> {
    let _guard = state.shutdown.in_flight_guard();
    Ok(Json(state.channels.process(&id, message).await?))
}
