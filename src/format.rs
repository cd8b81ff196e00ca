//! Target-format tokens and source-format derivation.
//!
//! A target token is what the client sends in the `target_format` form field
//! (`"png"`, `"JPG"`, `" webp "`). It is trimmed and lower-cased once, and that
//! normalised token is used everywhere afterwards: as the output file
//! extension, in the `Content-Disposition` filename, and in the conversion log.

use crate::error::ConvertError;
use image::ImageFormat;
use std::fmt;
use std::path::Path;

/// A validated raster output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFormat {
    token: String,
    format: ImageFormat,
}

impl TargetFormat {
    /// Parse a client-supplied token.
    ///
    /// Fails with [`ConvertError::UnsupportedFormat`] when the token names no
    /// raster format, or one this build cannot encode.
    pub fn parse(raw: &str) -> Result<Self, ConvertError> {
        let token = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        let unsupported = || ConvertError::UnsupportedFormat {
            format: raw.trim().to_string(),
        };
        if token.is_empty() {
            return Err(unsupported());
        }
        let format = ImageFormat::from_extension(&token).ok_or_else(unsupported)?;
        if !format.writing_enabled() {
            return Err(unsupported());
        }
        Ok(Self { token, format })
    }

    /// The normalised token, also used as the output file extension.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn image_format(&self) -> ImageFormat {
        self.format
    }

    /// Formats the service always writes as 3-channel RGB, dropping alpha.
    pub fn requires_rgb(&self) -> bool {
        matches!(self.format, ImageFormat::Jpeg | ImageFormat::Bmp)
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Extension of `filename` without the dot, exactly as the client wrote it.
pub fn extension_of(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
}

/// Source format recorded in the conversion log: the lower-cased extension of
/// the original filename, or an empty string when it has none.
pub fn source_format(filename: &str) -> String {
    extension_of(filename)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}
