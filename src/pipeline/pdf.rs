//! Raster-to-PDF conversion: one image, one page.
//!
//! The page is sized so the image prints at 100 DPI (`points = pixels × 72 / 100`)
//! and the image fills it edge to edge. Pixels are flattened to RGB and
//! embedded as a baseline JPEG (`/DCTDecode`), which every PDF reader handles
//! without extra filters.

use crate::error::ConvertError;
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::raster::{decode_image, Converted};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;
use tracing::{debug, info};

/// Resolution at which the embedded image is placed on the page.
pub const PDF_IMAGE_DPI: f32 = 100.0;

/// Convert the raster image at `input` into a single-page PDF at `output`.
pub fn image_to_pdf(
    input: &Path,
    output: &Path,
    name: &str,
    jpeg_quality: u8,
) -> Result<Converted, ConvertError> {
    let img = decode_image(input, name)?;
    let (width, height) = (img.width(), img.height());

    let jpeg = encode_jpeg(&img, jpeg_quality)
        .map_err(|e| ConvertError::Internal(format!("JPEG encoding for PDF failed: {e}")))?;
    debug!("Embedding {}x{} image as {} byte JPEG", width, height, jpeg.len());

    let pdf = build_single_page_pdf(&jpeg, width, height)?;
    std::fs::write(output, &pdf).map_err(|e| ConvertError::io(output, e))?;

    let bytes = pdf.len() as u64;
    info!("Converted '{}' → pdf ({}x{}, {} bytes)", name, width, height, bytes);
    Ok(Converted {
        width,
        height,
        bytes,
    })
}

/// Page size in PDF points for an image of `px` pixels at [`PDF_IMAGE_DPI`].
pub fn page_points(px: u32) -> f32 {
    px as f32 * 72.0 / PDF_IMAGE_DPI
}

fn build_single_page_pdf(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ConvertError> {
    let (page_w, page_h) = (page_points(width), page_points(height));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg.to_vec(),
    ));

    let content = format!("q\n{page_w:.3} 0 0 {page_h:.3} 0 0 cm\n/Im0 Do\nQ\n");
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), Object::Real(page_w), Object::Real(page_h)],
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
        "Contents" => content_id,
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ConvertError::Internal(format!("writing PDF failed: {e}")))?;
    Ok(buffer)
}
