//! Raster-to-raster conversion.
//!
//! The input format is sniffed from the file's magic bytes rather than trusted
//! from the upload's extension, so a PNG named `photo.jpg` still decodes.

use crate::error::ConvertError;
use crate::format::TargetFormat;
use crate::pipeline::encode::{prepare_for_target, write_image};
use image::{DynamicImage, ImageReader};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Summary of a finished conversion, used for logging and the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converted {
    pub width: u32,
    pub height: u32,
    /// Size of the written output file in bytes.
    pub bytes: u64,
}

/// Decode the image at `path`, sniffing its format from content.
///
/// `name` is the client-facing filename used in error messages.
pub fn decode_image(path: &Path, name: &str) -> Result<DynamicImage, ConvertError> {
    let decode_failed = |detail: String| ConvertError::Decode {
        name: name.to_string(),
        detail,
    };

    let reader = ImageReader::open(path)
        .map_err(|e| ConvertError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| ConvertError::io(path, e))?;

    if reader.format().is_none() {
        return Err(decode_failed("unrecognised image data".to_string()));
    }

    reader.decode().map_err(|e| decode_failed(e.to_string()))
}

/// Convert the raster image at `input` into `target`, written to `output`.
///
/// Runs synchronously; callers on the async runtime wrap it in
/// `spawn_blocking`.
pub fn convert_image(
    input: &Path,
    output: &Path,
    target: &TargetFormat,
    name: &str,
    jpeg_quality: u8,
) -> Result<Converted, ConvertError> {
    let started = Instant::now();
    let img = decode_image(input, name)?;
    let (width, height) = (img.width(), img.height());
    debug!("Decoded '{}' as {:?}, {}x{}", name, img.color(), width, height);

    let img = prepare_for_target(img, target);
    let bytes = write_image(&img, output, target, jpeg_quality)?;

    info!(
        "Converted '{}' → {} ({}x{}, {} bytes) in {:.1}ms",
        name,
        target,
        width,
        height,
        bytes,
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(Converted {
        width,
        height,
        bytes,
    })
}
