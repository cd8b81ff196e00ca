//! Error types for the edgequake-convert library.
//!
//! [`ConvertError`] is the single, closed error taxonomy shared by the
//! converters, the temporary-file manager, the conversion store and the HTTP
//! layer. Each variant knows the HTTP status it maps to, so handlers never
//! inspect message text to pick a response code.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Message returned when no PDFium library could be bound at startup.
pub const RASTERIZER_MISSING_MESSAGE: &str =
    "PDF rasterizer not available: PDFium library not found. \
     Install PDFium or set PDFIUM_LIB_PATH and restart the service.";

/// All errors returned by the edgequake-convert library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The multipart form was malformed or a required field was missing.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request body exceeded the configured upload limit.
    #[error("Upload too large: {0}")]
    TooLarge(String),

    /// The requested target format is unknown or cannot be encoded.
    #[error("Unsupported format: '{format}'")]
    UnsupportedFormat { format: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded bytes could not be decoded as the expected kind of file.
    #[error("Could not decode '{name}': {detail}")]
    Decode { name: String, detail: String },

    /// The PDF opened successfully but has no pages.
    #[error("Could not convert PDF: document has no pages")]
    EmptyDocument,

    // ── Environment errors ────────────────────────────────────────────────
    /// The PDF rasterizer could not be bound when the service started.
    #[error("{}", RASTERIZER_MISSING_MESSAGE)]
    DependencyMissing,

    /// The conversion log could not be written or read.
    #[error("Conversion store error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A filesystem operation on a temporary or output file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Shorthand for wrapping an [`std::io::Error`] with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status the error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConvertError::InvalidRequest(_) | ConvertError::UnsupportedFormat { .. } => {
                StatusCode::BAD_REQUEST
            }
            ConvertError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ConvertError::Decode { .. } | ConvertError::EmptyDocument => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ConvertError::DependencyMissing => StatusCode::SERVICE_UNAVAILABLE,
            ConvertError::Storage(_)
            | ConvertError::Io { .. }
            | ConvertError::InvalidConfig(_)
            | ConvertError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::InvalidRequest(_) => "invalid_request",
            ConvertError::TooLarge(_) => "too_large",
            ConvertError::UnsupportedFormat { .. } => "unsupported_format",
            ConvertError::Decode { .. } => "decode_failed",
            ConvertError::EmptyDocument => "empty_document",
            ConvertError::DependencyMissing => "dependency_missing",
            ConvertError::Storage(_) => "storage",
            ConvertError::Io { .. } => "io",
            ConvertError::InvalidConfig(_) => "invalid_config",
            ConvertError::Internal(_) => "internal",
        }
    }
}

/// Every error leaves the service as `{"detail": "<message>"}`.
impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = ?self, "request failed");
        } else {
            tracing::warn!(code = self.code(), "request rejected: {detail}");
        }
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_per_kind() {
        let cases = [
            (ConvertError::InvalidRequest("no file".into()), 400),
            (
                ConvertError::UnsupportedFormat {
                    format: "xyz".into(),
                },
                400,
            ),
            (
                ConvertError::Decode {
                    name: "a.png".into(),
                    detail: "bad header".into(),
                },
                422,
            ),
            (ConvertError::EmptyDocument, 422),
            (ConvertError::TooLarge("over 1 MiB".into()), 413),
            (ConvertError::DependencyMissing, 503),
            (ConvertError::Internal("boom".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{}", err.code());
        }
    }

    #[test]
    fn dependency_missing_uses_fixed_message() {
        assert_eq!(
            ConvertError::DependencyMissing.to_string(),
            RASTERIZER_MISSING_MESSAGE
        );
    }

    #[test]
    fn io_display_names_path() {
        let e = ConvertError::io(
            "/tmp/outputs/x.png",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = e.to_string();
        assert!(msg.contains("/tmp/outputs/x.png"), "got: {msg}");
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn response_body_carries_detail() {
        let resp = ConvertError::UnsupportedFormat {
            format: "xyz".into(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Unsupported format: 'xyz'");
    }

    #[test]
    fn storage_errors_convert_from_sqlx() {
        let e: ConvertError = sqlx::Error::RowNotFound.into();
        assert_eq!(e.code(), "storage");
    }
}
