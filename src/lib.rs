//! # edgequake-convert
//!
//! A small HTTP service that converts uploaded files and keeps a log of every
//! conversion it performs.
//!
//! ## Conversions
//!
//! ```text
//! raster ──▶ raster   /convert-image   png, jpg/jpeg, webp, bmp, gif, tiff
//! raster ──▶ PDF      /image-to-pdf    one page, image placed at 100 DPI
//! PDF    ──▶ raster   /pdf-to-image    first page only, rendered via pdfium
//! ```
//!
//! Each request stores its upload under a fresh random name, converts it,
//! appends a [`ConversionRecord`] to a SQLite log, and returns the converted
//! bytes as `converted.<ext>`. JPEG and BMP outputs never carry alpha.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_convert::{server, AppState, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().port(8000).build()?;
//!     let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
//!     let state = AppState::initialize(config).await?;
//!     server::serve(state, listener).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature    | Default | Description |
//! |------------|---------|-------------|
//! | `cli`      | on      | Enables the `convert-server` binary (clap + anyhow + dotenvy + tracing-subscriber) |
//! | `download` | on      | Lets the service fetch pdfium at startup when `--pdfium-download` is set |
//!
//! ## PDF rasterization
//!
//! `/pdf-to-image` needs the pdfium shared library. It is located once at
//! startup (see the `pdfium-auto` crate); without it the service still runs
//! and that endpoint answers `503` with a fixed message.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CleanupPolicy, ServiceConfig, ServiceConfigBuilder};
pub use error::{ConvertError, RASTERIZER_MISSING_MESSAGE};
pub use format::TargetFormat;
pub use pipeline::raster::Converted;
pub use pipeline::render::{Rasterizer, RenderSettings};
pub use server::{build_router, AppState};
pub use store::{ConversionRecord, ConversionStore, NewConversionRecord};
pub use workspace::{ConversionFiles, SweepReport, Workspace};
