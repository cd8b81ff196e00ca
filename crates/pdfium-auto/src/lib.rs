//! # pdfium-auto
//!
//! Locate, cache and bind the [PDFium](https://pdfium.googlesource.com/pdfium/)
//! shared library for `pdfium-render`, so a service can find out at startup
//! whether PDF rasterization is available on this host.
//!
//! ## Resolution order
//!
//! [`bind_pdfium`] tries each source in turn and stops at the first library
//! that binds:
//!
//! 1. An explicit path from [`BindOptions::lib_path`] (an error if it fails).
//! 2. `PDFIUM_LIB_PATH`, when it points to an existing file.
//! 3. The per-version cache directory, see [`pdfium_cache_dir`].
//! 4. The system library search path (`libpdfium.so` / `.dylib` / `pdfium.dll`).
//! 5. With the `download` feature and [`BindOptions::allow_download`], the
//!    platform archive from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries)
//!    is fetched into the cache directory and bound from there.
//!
//! The returned [`LibrarySource`] records which step succeeded.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pdfium_auto::{bind_pdfium, BindOptions};
//!
//! let (pdfium, source) = bind_pdfium(&BindOptions::default()).expect("PDFium unavailable");
//! println!("bound PDFium from {source}");
//! # drop(pdfium);
//! ```
//!
//! ## Environment variable overrides
//!
//! - `PDFIUM_LIB_PATH`: path to an existing pdfium library.
//! - `PDFIUM_AUTO_CACHE_DIR`: override the default cache directory.

use std::fmt;
use std::path::{Path, PathBuf};

use pdfium_render::prelude::Pdfium;
use thiserror::Error;
use tracing::debug;

// ── Public constants ─────────────────────────────────────────────────────────

/// The pdfium-binaries release tag used for downloads and the cache layout.
pub const PDFIUM_VERSION: &str = "7690";

/// Directory name under the platform cache root.
const CACHE_APP_DIR: &str = "edgequake-convert";

#[cfg(feature = "download")]
const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by pdfium-auto operations.
#[derive(Error, Debug)]
pub enum PdfiumAutoError {
    /// The current OS/architecture combination is not supported.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// gzip/tar extraction failed.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// `pdfium-render` could not load the library at `path`.
    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },

    /// Every source in the resolution order was tried and none bound.
    #[error("PDFium library not found (tried: {})", .tried.join(", "))]
    NotFound { tried: Vec<String> },
}

// ── Binding options and outcome ──────────────────────────────────────────────

/// Controls where [`bind_pdfium`] looks for the library.
#[derive(Debug, Clone, Default)]
pub struct BindOptions {
    /// Bind exactly this file instead of searching.
    pub lib_path: Option<PathBuf>,
    /// Permit a network download when no local library is found.
    /// Ignored unless the `download` feature is enabled.
    pub allow_download: bool,
}

/// Where the bound library came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibrarySource {
    /// [`BindOptions::lib_path`] or `PDFIUM_LIB_PATH`.
    Explicit(PathBuf),
    /// Previously cached copy in [`pdfium_cache_dir`].
    Cache(PathBuf),
    /// Resolved by the dynamic loader from the system search path.
    System,
    /// Downloaded during this call.
    Downloaded(PathBuf),
}

impl fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibrarySource::Explicit(p) => write!(f, "explicit path {}", p.display()),
            LibrarySource::Cache(p) => write!(f, "cache {}", p.display()),
            LibrarySource::System => f.write_str("system library path"),
            LibrarySource::Downloaded(p) => write!(f, "download {}", p.display()),
        }
    }
}

// ── Internal: platform metadata ──────────────────────────────────────────────

struct PlatformInfo {
    /// Asset filename in the GitHub release, e.g. `pdfium-mac-arm64.tgz`.
    #[cfg_attr(not(feature = "download"), allow(dead_code))]
    archive_name: &'static str,
    /// Relative path inside the archive, e.g. `lib/libpdfium.dylib`.
    #[cfg_attr(not(feature = "download"), allow(dead_code))]
    lib_path_in_archive: &'static str,
    /// Filename on disk, e.g. `libpdfium.dylib`.
    lib_name: &'static str,
}

fn detect_platform() -> Result<PlatformInfo, PdfiumAutoError> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    let (archive_name, lib_path_in_archive, lib_name) = match (os, arch) {
        ("macos", "aarch64") => ("pdfium-mac-arm64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib"),
        ("macos", "x86_64") => ("pdfium-mac-x64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib"),
        ("linux", "x86_64") => ("pdfium-linux-x64.tgz", "lib/libpdfium.so", "libpdfium.so"),
        ("linux", "aarch64") => ("pdfium-linux-arm64.tgz", "lib/libpdfium.so", "libpdfium.so"),
        ("windows", "x86_64") => ("pdfium-win-x64.tgz", "bin/pdfium.dll", "pdfium.dll"),
        ("windows", "aarch64") => ("pdfium-win-arm64.tgz", "bin/pdfium.dll", "pdfium.dll"),
        ("windows", "x86") => ("pdfium-win-x86.tgz", "bin/pdfium.dll", "pdfium.dll"),
        (os, arch) => {
            return Err(PdfiumAutoError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
        }
    };

    Ok(PlatformInfo {
        archive_name,
        lib_path_in_archive,
        lib_name,
    })
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the per-version cache directory for the PDFium library.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/edgequake-convert/pdfium-{VERSION}/`
/// - **Linux**: `~/.cache/edgequake-convert/pdfium-{VERSION}/`
/// - **Windows**: `%LOCALAPPDATA%\edgequake-convert\pdfium-{VERSION}\`
///
/// Override by setting `PDFIUM_AUTO_CACHE_DIR`.
pub fn pdfium_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("PDFIUM_AUTO_CACHE_DIR") {
        return PathBuf::from(override_dir).join(format!("pdfium-{PDFIUM_VERSION}"));
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join(CACHE_APP_DIR)
        .join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Returns the cached library path, or `None` when nothing is cached.
pub fn cached_pdfium_path() -> Option<PathBuf> {
    let info = detect_platform().ok()?;
    let p = pdfium_cache_dir().join(info.lib_name);
    p.exists().then_some(p)
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Binds to PDFium following the resolution order in the crate docs.
pub fn bind_pdfium(options: &BindOptions) -> Result<(Pdfium, LibrarySource), PdfiumAutoError> {
    if let Some(path) = &options.lib_path {
        let pdfium = bind_pdfium_from_path(path)?;
        return Ok((pdfium, LibrarySource::Explicit(path.clone())));
    }

    let mut tried = Vec::new();

    if let Ok(env_path) = std::env::var("PDFIUM_LIB_PATH") {
        let p = PathBuf::from(env_path);
        match bind_pdfium_from_path(&p) {
            Ok(pdfium) => return Ok((pdfium, LibrarySource::Explicit(p))),
            Err(e) => {
                debug!("PDFIUM_LIB_PATH rejected: {e}");
                tried.push(format!("PDFIUM_LIB_PATH={}", p.display()));
            }
        }
    }

    if let Some(p) = cached_pdfium_path() {
        match bind_pdfium_from_path(&p) {
            Ok(pdfium) => return Ok((pdfium, LibrarySource::Cache(p))),
            Err(e) => debug!("cached library rejected: {e}"),
        }
    }
    tried.push(format!("cache {}", pdfium_cache_dir().display()));

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => return Ok((Pdfium::new(bindings), LibrarySource::System)),
        Err(e) => {
            debug!("system library rejected: {e}");
            tried.push("system library path".to_string());
        }
    }

    #[cfg(feature = "download")]
    if options.allow_download {
        let p = download_pdfium_library()?;
        let pdfium = bind_pdfium_from_path(&p)?;
        return Ok((pdfium, LibrarySource::Downloaded(p)));
    }

    Err(PdfiumAutoError::NotFound { tried })
}

/// Binds to a PDFium library at an explicit `path`.
///
/// Does not interact with the download / cache layer.
pub fn bind_pdfium_from_path(path: &Path) -> Result<Pdfium, PdfiumAutoError> {
    if !path.is_file() {
        return Err(PdfiumAutoError::Bind {
            path: path.to_path_buf(),
            reason: "file does not exist".to_string(),
        });
    }
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| PdfiumAutoError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Downloads the platform library into [`pdfium_cache_dir`] unless it is
/// already there, returning its path.
#[cfg(feature = "download")]
pub fn download_pdfium_library() -> Result<PathBuf, PdfiumAutoError> {
    let info = detect_platform()?;
    let cache_dir = pdfium_cache_dir();
    let lib_path = cache_dir.join(info.lib_name);
    if lib_path.exists() {
        return Ok(lib_path);
    }

    let url = format!(
        "{}/chromium%2F{}/{}",
        BASE_URL, PDFIUM_VERSION, info.archive_name
    );
    tracing::info!("Downloading PDFium {PDFIUM_VERSION} from {url}");

    std::fs::create_dir_all(&cache_dir).map_err(PdfiumAutoError::CacheDir)?;

    let archive_bytes = download_bytes(&url)?;
    extract_library(&archive_bytes, info.lib_path_in_archive, &lib_path)?;

    tracing::info!("PDFium cached at {}", lib_path.display());
    Ok(lib_path)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

#[cfg(feature = "download")]
fn download_bytes(url: &str) -> Result<Vec<u8>, PdfiumAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| PdfiumAutoError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| PdfiumAutoError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(PdfiumAutoError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    response
        .bytes()
        .map(|b| b.to_vec())
        .map_err(|e| PdfiumAutoError::Download(format!("Read error: {e}")))
}

/// Extracts a single file from a gzipped tar archive into `dest_path`.
#[cfg(feature = "download")]
fn extract_library(
    archive_bytes: &[u8],
    lib_path_in_archive: &str,
    dest_path: &Path,
) -> Result<(), PdfiumAutoError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let gz = GzDecoder::new(archive_bytes);
    let mut archive = Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| PdfiumAutoError::Extract(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| PdfiumAutoError::Extract(e.to_string()))?;
        let matches = entry
            .path()
            .map_err(|e| PdfiumAutoError::Extract(e.to_string()))?
            .to_string_lossy()
            == lib_path_in_archive;

        if matches {
            entry
                .unpack(dest_path)
                .map_err(|e| PdfiumAutoError::Extract(format!("Unpack failed: {e}")))?;
            return Ok(());
        }
    }

    Err(PdfiumAutoError::Extract(format!(
        "Library '{}' not found in archive",
        lib_path_in_archive
    )))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
