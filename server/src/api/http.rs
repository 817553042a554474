use axum::{
    body::Bytes,
    extract::{Path, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tapgame_execution::{Error, Store};
use tapgame_types::api::{ActionRequest, ErrorResponse, SyncResponse};
use tapgame_types::{ActionResponse, PlayerState};
use tracing::{debug, error, warn};

use crate::Backend;

/// Error body with its HTTP status.
#[derive(Debug)]
pub(super) struct ApiError {
    status: StatusCode,
    code: &'static str,
}

impl ApiError {
    pub(super) fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::IdentityMismatch => StatusCode::FORBIDDEN,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::StorageTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::StorageFatal(_) | Error::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!(error = %err, "storage unavailable");
        } else if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            code: err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.code))).into_response()
    }
}

/// Decodes a JSON body, reporting any failure as `invalid_json`.
pub(super) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "malformed request body");
        ApiError::from(Error::InvalidRequest("invalid_json"))
    })
}

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

/// Current snapshot of the caller, created on first contact.
pub(super) async fn get_user<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<PlayerState>, ApiError> {
    let identity = backend.authorize(&headers, &user_id)?;
    let state = backend.run(move |layer| layer.snapshot(&identity)).await?;
    Ok(Json(state))
}

/// Legacy client sync. The client payload is ignored; the stored snapshot wins.
pub(super) async fn sync_user<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SyncResponse>, ApiError> {
    let identity = backend.authorize(&headers, &user_id)?;
    let data = backend.run(move |layer| layer.snapshot(&identity)).await?;
    Ok(Json(SyncResponse {
        status: "ok".to_string(),
        data,
    }))
}

pub(super) async fn action<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let identity = backend.authorize(&headers, &user_id)?;
    let request: ActionRequest = parse_json(&body)?;
    let action = request
        .action_name()
        .ok_or(Error::InvalidRequest("action_required"))?;
    let response = backend
        .run(move |layer| layer.process(&identity, &action))
        .await?;
    Ok(Json(response))
}

/// Top players by coins. Any valid credential may read it.
pub(super) async fn leaderboard<S: Store + 'static>(
    AxumState(backend): AxumState<Arc<Backend<S>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    backend.authenticate(&headers)?;
    let body = backend.leaderboard_json().await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
