use crate::error::{Error, InvalidRequest};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error returned by handlers, rendered as `{"code": .., "description": ..}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    description: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRequest(InvalidRequest::NoPrimaryKey(_)) | Error::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(err = %self.0, "request failed");
        } else {
            tracing::debug!(err = %self.0, "request rejected");
        }
        let body = ErrorBody {
            code: self.0.kind(),
            description: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
