//! Request handlers.
//!
//! The three conversion endpoints share one flow: allocate names, persist the
//! upload, convert, log the result, return the converted bytes. Only the
//! converter in the middle differs.

use crate::error::ConvertError;
use crate::format::{source_format, TargetFormat};
use crate::pipeline::raster::Converted;
use crate::pipeline::render::Rasterizer;
use crate::pipeline::{pdf, raster};
use crate::server::state::AppState;
use crate::server::upload::UploadForm;
use crate::store::{ConversionRecord, NewConversionRecord};
use crate::workspace::ConversionFiles;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const PDF_EXTENSION: &str = "pdf";
const PDF_MIME: &str = "application/pdf";

/// `POST /convert-image`: raster to raster.
pub async fn convert_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ConvertError> {
    let form = UploadForm::read(multipart).await?;
    let target = TargetFormat::parse(form.target()?)?;

    let files = state.workspace().allocate(&form.filename, target.token())?;
    files.write_upload(&form.bytes).await?;

    let (name, job_target) = (form.filename.clone(), target.clone());
    let quality = state.config().jpeg_quality;
    let files = convert_blocking(files, move |input, output| {
        raster::convert_image(input, output, &job_target, &name, quality)
    })
    .await?;

    let source = source_format(&form.filename);
    respond_with_output(&state, files, &form.filename, &source, target.token(), target.mime_type())
        .await
}

/// `POST /image-to-pdf`: raster to a single-page PDF.
pub async fn image_to_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ConvertError> {
    let form = UploadForm::read(multipart).await?;

    let files = state.workspace().allocate(&form.filename, PDF_EXTENSION)?;
    files.write_upload(&form.bytes).await?;

    let name = form.filename.clone();
    let quality = state.config().jpeg_quality;
    let files = convert_blocking(files, move |input, output| {
        pdf::image_to_pdf(input, output, &name, quality)
    })
    .await?;

    let source = source_format(&form.filename);
    respond_with_output(&state, files, &form.filename, &source, PDF_EXTENSION, PDF_MIME).await
}

/// `POST /pdf-to-image`: first page of a PDF to a raster image.
pub async fn pdf_to_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ConvertError> {
    let form = UploadForm::read(multipart).await?;
    let target = TargetFormat::parse(form.target()?)?;
    let rasterizer = state.rasterizer().ok_or(ConvertError::DependencyMissing)?;

    let files = state.workspace().allocate(&form.filename, target.token())?;
    files.write_upload(&form.bytes).await?;

    let (files, _) = rasterizer
        .pdf_to_image(files, target.clone(), form.filename.clone())
        .await?;

    respond_with_output(
        &state,
        files,
        &form.filename,
        PDF_EXTENSION,
        target.token(),
        target.mime_type(),
    )
    .await
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pdf_rasterizer: bool,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        pdf_rasterizer: state.rasterizer().is_some_and(Rasterizer::is_running),
    })
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

/// `GET /conversions?limit=N`: most recent records first.
pub async fn list_conversions(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<ConversionRecord>>, ConvertError> {
    let Query(params) = params.map_err(|e| ConvertError::InvalidRequest(e.body_text()))?;
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.store().list_recent(limit).await?))
}

// ── Shared tail of every conversion ──────────────────────────────────────

/// Log the finished conversion, then answer with the converted bytes.
///
/// The record is written before the response; if that fails the output is
/// discarded and the client gets the storage error instead of the file.
async fn respond_with_output(
    state: &AppState,
    files: ConversionFiles,
    filename: &str,
    source: &str,
    target: &str,
    mime: &str,
) -> Result<Response, ConvertError> {
    let file_size = files.output_size().await?;
    let body = files.read_output().await?;

    let record = NewConversionRecord {
        filename: filename.to_string(),
        source_format: source.to_string(),
        target_format: target.to_string(),
        file_size,
    };
    let logged = match state.store().insert(&record).await {
        Ok(logged) => logged,
        Err(e) => {
            files.discard_output().await;
            return Err(e);
        }
    };
    info!(
        "Conversion #{} '{}' {} → {} ({} bytes) served",
        logged.id, filename, source, target, file_size
    );

    // Dropping the guard applies the cleanup policy.
    drop(files);
    Ok(attachment(body, target, mime))
}

fn attachment(body: Vec<u8>, ext: &str, mime: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"converted.{ext}\""),
            ),
        ],
        body,
    )
        .into_response()
}

/// Run a blocking converter from the request's inbound file to its outbound
/// file.
///
/// The blocking task owns `files` until the converter returns. A client that
/// disconnects mid-conversion drops only the waiting handler; the cleanup
/// policy then runs on the blocking thread after the output has been written.
async fn convert_blocking<F>(
    files: ConversionFiles,
    convert: F,
) -> Result<ConversionFiles, ConvertError>
where
    F: FnOnce(&Path, &Path) -> Result<Converted, ConvertError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        convert(files.inbound(), files.outbound())?;
        Ok(files)
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("Conversion task panicked: {e}")))?
}
