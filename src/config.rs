//! Configuration types for the conversion service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The binary maps command-line flags and `CONVERT_*`
//! environment variables onto the builder; tests use the builder directly with
//! temporary directories.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Front-end development hosts allowed by default.
pub const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:5500", "http://127.0.0.1:5500"];

/// Largest accepted value for [`ServiceConfig::max_rendered_pixels`].
pub const MAX_RENDERED_PIXELS_LIMIT: u32 = 32_767;

/// Configuration for the conversion service.
///
/// Built via [`ServiceConfig::builder()`] or using [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_convert::{CleanupPolicy, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .port(9000)
///     .uploads_dir("/var/tmp/convert/uploads")
///     .outputs_dir("/var/tmp/convert/outputs")
///     .cleanup(CleanupPolicy::Retain)
///     .build()
///     .unwrap();
/// assert_eq!(config.bind_addr(), "0.0.0.0:9000");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Interface to listen on. Default: `0.0.0.0`.
    pub host: String,

    /// TCP port. Default: 8000.
    pub port: u16,

    /// SQLite connection URL for the conversion log. Default: `sqlite://conversions.db`.
    pub database_url: String,

    /// Pool size for the conversion log. Default: 5.
    pub max_db_connections: u32,

    /// Directory receiving uploaded payloads. Default: `uploads`.
    pub uploads_dir: PathBuf,

    /// Directory receiving converted files. Default: `outputs`.
    pub outputs_dir: PathBuf,

    /// What happens to a request's files once its response is produced.
    /// Default: [`CleanupPolicy::AfterResponse`].
    pub cleanup: CleanupPolicy,

    /// Run a background sweep of both directories every N seconds. Default: off.
    pub sweep_interval_secs: Option<u64>,

    /// Files older than this are removed by the sweep. Default: 3600.
    pub max_file_age_secs: u64,

    /// Origins allowed to call the API from a browser.
    ///
    /// A single `*` entry allows any origin but disables credentials.
    pub cors_origins: Vec<String>,

    /// Upper bound on a request body in bytes. Default: unbounded.
    pub max_upload_bytes: Option<usize>,

    /// Rasterization DPI for PDF pages. Range: 72–600. Default: 200.
    pub pdf_dpi: u32,

    /// Cap on either dimension of a rendered PDF page, in pixels.
    /// Range: 100–[`MAX_RENDERED_PIXELS_LIMIT`]. Default: 8000.
    ///
    /// At 200 DPI an A4 page is about 1654 × 2339 px; the cap only bites for
    /// posters and other oversized pages.
    pub max_rendered_pixels: u32,

    /// JPEG quality used for JPEG outputs and for the image embedded in PDFs.
    /// Range: 1–100. Default: 90.
    pub jpeg_quality: u8,

    /// Bind exactly this PDFium library instead of searching for one.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Allow downloading PDFium at startup when no local copy is found. Default: false.
    pub pdfium_download: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_url: "sqlite://conversions.db".to_string(),
            max_db_connections: 5,
            uploads_dir: PathBuf::from("uploads"),
            outputs_dir: PathBuf::from("outputs"),
            cleanup: CleanupPolicy::default(),
            sweep_interval_secs: None,
            max_file_age_secs: 3600,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            max_upload_bytes: None,
            pdf_dpi: 200,
            max_rendered_pixels: 8000,
            jpeg_quality: 90,
            pdfium_lib_path: None,
            pdfium_download: false,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn max_db_connections(mut self, n: u32) -> Self {
        self.config.max_db_connections = n.max(1);
        self
    }

    pub fn uploads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.uploads_dir = dir.into();
        self
    }

    pub fn outputs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.outputs_dir = dir.into();
        self
    }

    pub fn cleanup(mut self, policy: CleanupPolicy) -> Self {
        self.config.cleanup = policy;
        self
    }

    pub fn sweep_interval_secs(mut self, secs: Option<u64>) -> Self {
        self.config.sweep_interval_secs = secs.filter(|s| *s > 0);
        self
    }

    pub fn max_file_age_secs(mut self, secs: u64) -> Self {
        self.config.max_file_age_secs = secs;
        self
    }

    pub fn cors_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.cors_origins = origins
            .into_iter()
            .map(Into::into)
            .map(|s: String| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: Option<usize>) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn pdf_dpi(mut self, dpi: u32) -> Self {
        self.config.pdf_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.clamp(100, MAX_RENDERED_PIXELS_LIMIT);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn pdfium_download(mut self, v: bool) -> Self {
        self.config.pdfium_download = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.database_url.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "database URL must not be empty".into(),
            ));
        }
        if c.uploads_dir == c.outputs_dir {
            return Err(ConvertError::InvalidConfig(format!(
                "uploads and outputs must be different directories, both are {:?}",
                c.uploads_dir
            )));
        }
        if c.cors_origins.len() > 1 && c.cors_origins.iter().any(|o| o == "*") {
            return Err(ConvertError::InvalidConfig(
                "CORS origin '*' cannot be combined with explicit origins".into(),
            ));
        }
        if c.max_upload_bytes == Some(0) {
            return Err(ConvertError::InvalidConfig(
                "max upload size must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Lifetime of the files a request writes to the two working directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Remove the upload and the converted file once the response body is
    /// in memory. (default)
    #[default]
    AfterResponse,
    /// Leave every file on disk; rely on the periodic sweep or an operator.
    Retain,
}
