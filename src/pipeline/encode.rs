//! Image encoding: `DynamicImage` → file on disk in the requested format.
//!
//! Every converter funnels through here, so the colour-mode rules live in one
//! place. JPEG and BMP outputs are always 3-channel (or grayscale) 8-bit;
//! alpha is dropped rather than failing the request. Other encoders only
//! accept a subset of colour types, so exotic inputs (16-bit, float, gray
//! with alpha) are narrowed to the nearest 8-bit type they can write.

use crate::error::ConvertError;
use crate::format::TargetFormat;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageError, ImageFormat};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Narrow `img` to a colour type the target encoder can write.
pub fn prepare_for_target(img: DynamicImage, target: &TargetFormat) -> DynamicImage {
    let color = img.color();
    let has_alpha = color.has_alpha();

    let narrowed = match target.image_format() {
        _ if target.requires_rgb() => match color {
            ColorType::L8 | ColorType::Rgb8 => None,
            _ => Some(DynamicImage::ImageRgb8(img.to_rgb8())),
        },
        ImageFormat::Png => match color {
            ColorType::Rgb32F => Some(DynamicImage::ImageRgb8(img.to_rgb8())),
            ColorType::Rgba32F => Some(DynamicImage::ImageRgba8(img.to_rgba8())),
            _ => None,
        },
        _ => match color {
            ColorType::Rgb8 | ColorType::Rgba8 => None,
            _ if has_alpha => Some(DynamicImage::ImageRgba8(img.to_rgba8())),
            _ => Some(DynamicImage::ImageRgb8(img.to_rgb8())),
        },
    };

    match narrowed {
        Some(out) => {
            debug!("Colour mode {:?} → {:?} for {}", color, out.color(), target);
            out
        }
        None => img,
    }
}

/// Write `img` to `path` in `target`'s format and return the file size.
///
/// The caller is expected to have run [`prepare_for_target`] first.
pub fn write_image(
    img: &DynamicImage,
    path: &Path,
    target: &TargetFormat,
    jpeg_quality: u8,
) -> Result<u64, ConvertError> {
    let file = File::create(path).map_err(|e| ConvertError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    let encoded = if target.image_format() == ImageFormat::Jpeg {
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, jpeg_quality))
    } else {
        img.write_to(&mut writer, target.image_format())
    };
    encoded.map_err(|e| encode_error(e, target, path))?;
    writer.flush().map_err(|e| ConvertError::io(path, e))?;
    drop(writer);

    let size = std::fs::metadata(path)
        .map_err(|e| ConvertError::io(path, e))?
        .len();
    debug!("Encoded {} → {} ({} bytes)", target, path.display(), size);
    Ok(size)
}

/// Encode `img` as an in-memory baseline JPEG, flattening it to RGB first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

fn encode_error(e: ImageError, target: &TargetFormat, path: &Path) -> ConvertError {
    match e {
        ImageError::Unsupported(_) => ConvertError::UnsupportedFormat {
            format: target.token().to_string(),
        },
        ImageError::IoError(source) => ConvertError::io(path, source),
        other => ConvertError::Internal(format!("encoding {target} failed: {other}")),
    }
}
