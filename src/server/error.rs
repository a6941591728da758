use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::error::ConvertError;
use crate::format::UnknownOutputFormat;

/// Errors raised by [`ApiServer`](super::ApiServer) itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

/// Every failure a handler can return. Rendered as
/// `{"status": "error", "error": <kind>, "detail": <message>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    OutputFormat(#[from] UnknownOutputFormat),
    /// Malformed JSON or multipart body.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

/// Body of every error response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub(crate) struct ErrorResponse {
    #[schema(example = "error")]
    pub status: String,
    /// Stable error kind, e.g. `file_too_large`.
    #[schema(example = "invalid_output_format")]
    pub error: String,
    pub detail: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::OutputFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Convert(e) => match e {
                ConvertError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
                ConvertError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                ConvertError::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                ConvertError::CorruptDocument { .. }
                | ConvertError::PasswordRequired { .. }
                | ConvertError::NoExtractableText { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ConvertError::DownloadFailed { .. } => StatusCode::BAD_GATEWAY,
                ConvertError::DownloadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                ConvertError::EngineNotReady | ConvertError::EngineInit(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ConvertError::InvalidConfig(_) | ConvertError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Convert(e) => e.kind(),
            ApiError::OutputFormat(_) => "invalid_output_format",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{} ({}): {}", status, self.kind(), self);
        } else {
            tracing::debug!("{} ({}): {}", status, self.kind(), self);
        }
        let body = ErrorResponse {
            status: "error".to_string(),
            error: self.kind().to_string(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        let cases = [
            (ConvertError::InvalidUrl { input: "ftp://x".into() }, 400),
            (ConvertError::FileTooLarge { limit_mb: 1 }, 413),
            (
                ConvertError::UnsupportedFormat {
                    name: "a.docx".into(),
                    detected: "ooxml".into(),
                    supported: "pdf".into(),
                },
                415,
            ),
            (ConvertError::PasswordRequired { name: "a.pdf".into() }, 422),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).status().as_u16(), code);
        }
    }

    #[test]
    fn upstream_and_readiness_errors() {
        let e = ApiError::from(ConvertError::DownloadTimeout {
            url: "https://x".into(),
            secs: 3,
        });
        assert_eq!(e.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::from(ConvertError::EngineNotReady).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(ConvertError::Internal("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn output_format_error_is_422() {
        let err: ApiError = "yaml".parse::<crate::format::OutputFormat>().unwrap_err().into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.kind(), "invalid_output_format");
        assert!(err.to_string().contains("markdown, json, doctags, text"));
    }
}
