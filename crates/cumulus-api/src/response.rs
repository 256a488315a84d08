//! Response envelope, error mapping and the JSON body extractor.

use axum::Json;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cumulus_orchestrator::{ErrorKind, OrchestratorError, OrchestratorResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// HTTP status for an orchestrator failure.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Exhausted | ErrorKind::Dispatch | ErrorKind::InvalidConfig | ErrorKind::Internal => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

pub fn failure(e: &OrchestratorError) -> Response {
    let status = status_for(e.kind());
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        warn!(status = status.as_u16(), error = %e, "request failed");
    } else {
        debug!(status = status.as_u16(), error = %e, "request rejected");
    }
    error_response(&e.to_string(), status).into_response()
}

/// 200 with the value, or the mapped error.
pub fn reply<T: Serialize>(result: OrchestratorResult<T>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => failure(&e),
    }
}

/// 201 with the created value, or the mapped error.
pub fn created<T: Serialize>(result: OrchestratorResult<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::CREATED, ApiResponse::ok(data)).into_response(),
        Err(e) => failure(&e),
    }
}

pub fn deleted(result: OrchestratorResult<()>) -> Response {
    reply(result.map(|()| "deleted"))
}

/// `Json` that answers malformed bodies with 400 in the API envelope.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(error_response(&rejection.body_text(), StatusCode::BAD_REQUEST).into_response()),
        }
    }
}
