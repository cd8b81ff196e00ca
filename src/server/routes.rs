//! Router assembly: endpoints, CORS, request tracing and body limits.

use crate::error::ConvertError;
use crate::server::handlers;
use crate::server::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowHeaders, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Build the application router for `state`.
pub fn build_router(state: AppState) -> Result<Router, ConvertError> {
    let cors = cors_layer(&state.config().cors_origins)?;
    let body_limit = match state.config().max_upload_bytes {
        Some(bytes) => DefaultBodyLimit::max(bytes),
        None => DefaultBodyLimit::disable(),
    };

    Ok(Router::new()
        .route("/convert-image", post(handlers::convert_image))
        .route("/image-to-pdf", post(handlers::image_to_pdf))
        .route("/pdf-to-image", post(handlers::pdf_to_image))
        .route("/conversions", get(handlers::list_conversions))
        .route("/health", get(handlers::health))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Browser access policy.
///
/// An explicit list allows credentials. A lone `*` allows every origin but
/// never together with credentials.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, ConvertError> {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];

    if origins.iter().any(|o| o == "*") {
        warn!("CORS configured to allow all origins; credentials are disabled");
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any));
    }

    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|_| ConvertError::InvalidConfig(format!("invalid CORS origin '{o}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}
