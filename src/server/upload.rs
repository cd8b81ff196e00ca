//! Multipart intake shared by the three conversion endpoints.

use crate::error::ConvertError;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::Multipart;
use axum::http::StatusCode;
use bytes::Bytes;
use tracing::debug;

const FILE_FIELD: &str = "file";
const TARGET_FIELD: &str = "target_format";

/// The fields of a conversion request.
#[derive(Debug)]
pub struct UploadForm {
    /// Filename as supplied by the client.
    pub filename: String,
    /// The uploaded payload, untouched.
    pub bytes: Bytes,
    /// Raw `target_format` text, when the client sent one.
    pub target_format: Option<String>,
}

impl UploadForm {
    /// Collect `file` and `target_format` from the request body. Unknown
    /// fields are skipped.
    pub async fn read(
        multipart: Result<Multipart, MultipartRejection>,
    ) -> Result<Self, ConvertError> {
        let mut multipart =
            multipart.map_err(|e| ConvertError::InvalidRequest(e.body_text()))?;

        let mut file: Option<(String, Bytes)> = None;
        let mut target_format = None;

        while let Some(field) = multipart.next_field().await.map_err(field_error)? {
            match field.name() {
                Some(FILE_FIELD) => {
                    let filename = field
                        .file_name()
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ConvertError::InvalidRequest(format!(
                                "'{FILE_FIELD}' must be a file upload with a filename"
                            ))
                        })?;
                    let bytes = field.bytes().await.map_err(field_error)?;
                    file = Some((filename, bytes));
                }
                Some(TARGET_FIELD) => {
                    target_format = Some(field.text().await.map_err(field_error)?);
                }
                other => debug!("Ignoring multipart field {:?}", other),
            }
        }

        let (filename, bytes) = file.ok_or_else(|| {
            ConvertError::InvalidRequest(format!("missing '{FILE_FIELD}' field"))
        })?;
        debug!("Received '{}' ({} bytes)", filename, bytes.len());

        Ok(Self {
            filename,
            bytes,
            target_format,
        })
    }

    /// The `target_format` field, required by two of the three endpoints.
    pub fn target(&self) -> Result<&str, ConvertError> {
        self.target_format.as_deref().ok_or_else(|| {
            ConvertError::InvalidRequest(format!("missing '{TARGET_FIELD}' field"))
        })
    }
}

fn field_error(e: MultipartError) -> ConvertError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ConvertError::TooLarge(e.body_text())
    } else {
        ConvertError::InvalidRequest(e.body_text())
    }
}
