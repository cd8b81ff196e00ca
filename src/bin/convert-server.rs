//! Server binary for edgequake-convert.
//!
//! A thin shim over the library crate that maps CLI flags (and `CONVERT_*`
//! environment variables, optionally from a `.env` file) to `ServiceConfig`
//! and runs the HTTP server until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_convert::config::DEFAULT_CORS_ORIGINS;
use edgequake_convert::{server, AppState, CleanupPolicy, ServiceConfig};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port with ./uploads, ./outputs and ./conversions.db
  convert-server

  # Keep every upload and output, sweeping files older than a day every hour
  convert-server --cleanup retain --sweep-interval-secs 3600 --max-file-age-secs 86400

  # Allow a deployed front-end
  convert-server --cors-origins https://converter.example.com

  # Convert an image
  curl -F file=@photo.png -F target_format=jpg -o out.jpg http://localhost:8000/convert-image

PDF RASTERIZATION:
  /pdf-to-image needs the pdfium shared library. It is looked up in
  PDFIUM_LIB_PATH, the pdfium-auto cache directory and the system library
  path. Pass --pdfium-download to fetch it on first start.
"#;

/// HTTP service converting images between formats, images to PDF and PDF pages to images.
#[derive(Parser, Debug)]
#[command(
    name = "convert-server",
    version,
    about = "HTTP service converting images between formats, images to PDF and PDF pages to images",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to listen on.
    #[arg(long, env = "CONVERT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// TCP port.
    #[arg(short, long, env = "CONVERT_PORT", default_value_t = 8000)]
    port: u16,

    /// SQLite URL of the conversion log.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://conversions.db")]
    database_url: String,

    /// Connections in the conversion log pool.
    #[arg(long, env = "CONVERT_DB_CONNECTIONS", default_value_t = 5)]
    db_connections: u32,

    /// Directory receiving uploads.
    #[arg(long, env = "CONVERT_UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,

    /// Directory receiving converted files.
    #[arg(long, env = "CONVERT_OUTPUTS_DIR", default_value = "outputs")]
    outputs_dir: PathBuf,

    /// What to do with a request's files after responding.
    #[arg(long, env = "CONVERT_CLEANUP", value_enum, default_value = "after-response")]
    cleanup: CleanupArg,

    /// Sweep both directories every N seconds.
    #[arg(long, env = "CONVERT_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Age after which the sweep removes a file.
    #[arg(long, env = "CONVERT_MAX_FILE_AGE_SECS", default_value_t = 3600)]
    max_file_age_secs: u64,

    /// Allowed browser origins, comma separated. A lone `*` allows any origin without credentials.
    #[arg(long, env = "CONVERT_CORS_ORIGINS", value_delimiter = ',',
          default_values_t = DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect::<Vec<_>>())]
    cors_origins: Vec<String>,

    /// Reject request bodies larger than this many bytes.
    #[arg(long, env = "CONVERT_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    /// Rendering DPI for PDF pages (72–600).
    #[arg(long, env = "CONVERT_PDF_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Cap on either dimension of a rendered PDF page.
    #[arg(long, env = "CONVERT_MAX_RENDERED_PIXELS", default_value_t = 8000,
          value_parser = clap::value_parser!(u32).range(100..=32_767))]
    max_rendered_pixels: u32,

    /// JPEG quality for JPEG outputs and PDF images (1–100).
    #[arg(long, env = "CONVERT_JPEG_QUALITY", default_value_t = 90,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Bind exactly this pdfium library.
    #[arg(long, env = "CONVERT_PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Download pdfium on startup when no local copy is found.
    #[arg(long, env = "CONVERT_PDFIUM_DOWNLOAD")]
    pdfium_download: bool,

    /// Debug-level logging.
    #[arg(short, long, env = "CONVERT_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, env = "CONVERT_QUIET")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CleanupArg {
    AfterResponse,
    Retain,
}

impl From<CleanupArg> for CleanupPolicy {
    fn from(v: CleanupArg) -> Self {
        match v {
            CleanupArg::AfterResponse => CleanupPolicy::AfterResponse,
            CleanupArg::Retain => CleanupPolicy::Retain,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; anything else is worth knowing about.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: could not load .env: {e}");
        }
    }
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let mut builder = ServiceConfig::builder()
        .host(cli.host)
        .port(cli.port)
        .database_url(cli.database_url)
        .max_db_connections(cli.db_connections)
        .uploads_dir(cli.uploads_dir)
        .outputs_dir(cli.outputs_dir)
        .cleanup(cli.cleanup.into())
        .sweep_interval_secs(cli.sweep_interval_secs)
        .max_file_age_secs(cli.max_file_age_secs)
        .cors_origins(cli.cors_origins)
        .max_upload_bytes(cli.max_upload_bytes)
        .pdf_dpi(cli.dpi)
        .max_rendered_pixels(cli.max_rendered_pixels)
        .jpeg_quality(cli.jpeg_quality)
        .pdfium_download(cli.pdfium_download);
    if let Some(path) = cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path);
    }
    let config = builder.build().context("Invalid configuration")?;
    tracing::debug!(?config, "Configuration loaded");

    // ── Startup ──────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

    let state = AppState::initialize(config)
        .await
        .context("Failed to initialise the service")?;

    server::serve(state, listener).await.context("Server failed")?;
    Ok(())
}
