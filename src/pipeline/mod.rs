//! Format converters.
//!
//! Each submodule implements one conversion; all of them read from the
//! inbound path and perform exactly one write to the outbound path.
//!
//! ## Data Flow
//!
//! ```text
//! raster ──▶ decode ──▶ encode ──▶ file        (raster)
//! raster ──▶ decode ──▶ JPEG   ──▶ PDF page    (pdf)
//! PDF    ──▶ pdfium ──▶ encode ──▶ file        (render)
//! ```
//!
//! 1. [`raster`]: sniff, decode and re-encode a raster image
//! 2. [`pdf`]: wrap a raster image in a single-page PDF
//! 3. [`render`]: rasterise page 1 of a PDF on the pdfium thread
//! 4. [`encode`]: colour-mode narrowing and file encoding shared by all three

pub mod encode;
pub mod pdf;
pub mod raster;
pub mod render;
