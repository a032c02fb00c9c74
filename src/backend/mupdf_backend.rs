//! MuPDF-backed implementation of the backend seam.

use std::path::Path;

use mupdf::{Colorspace, Document, Matrix};

use crate::artifact::{PixelFormat, RasterArtifact};
use crate::error::BackendError;
use crate::key::{ClipRect, Rotation};

use super::{PdfBackend, PdfDocument};

#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfBackend;

impl PdfBackend for MupdfBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
        let doc = Document::open(path.to_string_lossy().as_ref())?;
        let page_count = doc.page_count()? as u32;
        Ok(Box::new(MupdfDocument { doc, page_count }))
    }
}

struct MupdfDocument {
    doc: Document,
    page_count: u32,
}

impl PdfDocument for MupdfDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn title(&self) -> Option<String> {
        self.doc
            .metadata(mupdf::MetadataName::Title)
            .ok()
            .filter(|t| !t.is_empty())
    }

    fn rasterize(
        &self,
        page: u32,
        zoom: f32,
        rotation: Rotation,
        clip: Option<ClipRect>,
    ) -> Result<RasterArtifact, BackendError> {
        if page >= self.page_count {
            return Err(BackendError::PageOutOfRange {
                page,
                page_count: self.page_count,
            });
        }

        let page = self.doc.load_page(page as i32)?;
        let bounds = page.bounds()?;
        let transform = render_matrix(zoom, rotation);

        let rgb = Colorspace::device_rgb();
        let pixmap = page.to_pixmap(&transform, &rgb, false, false)?;

        let mut artifact = pixmap_to_packed_rgb(&pixmap)?;

        // MuPDF's to_pixmap has no clip parameter on this code path, so the
        // clip is applied as a post-raster crop in device space.
        if let Some(clip) = clip {
            let page_origin = transformed_min(&transform, bounds.x0, bounds.y0, bounds.x1, bounds.y1);
            let clip_min = transformed_min(&transform, clip.x0, clip.y0, clip.x1, clip.y1);
            let clip_max = transformed_max(&transform, clip.x0, clip.y0, clip.x1, clip.y1);

            let x0 = (clip_min.0 - page_origin.0).floor().max(0.0) as usize;
            let y0 = (clip_min.1 - page_origin.1).floor().max(0.0) as usize;
            let x1 = ((clip_max.0 - page_origin.0).ceil() as usize).min(artifact.width as usize);
            let y1 = ((clip_max.1 - page_origin.1).ceil() as usize).min(artifact.height as usize);

            if x0 >= x1 || y0 >= y1 {
                return Err(BackendError::failure("clip lies outside the page"));
            }
            artifact = crop_packed(&artifact, x0, y0, x1, y1);
        }

        Ok(artifact)
    }
}

/// Compose zoom and an axis-aligned rotation into a single matrix. The
/// rotation entries are exact, so no trigonometry drift.
fn render_matrix(zoom: f32, rotation: Rotation) -> Matrix {
    match rotation {
        Rotation::R0 => Matrix::new(zoom, 0.0, 0.0, zoom, 0.0, 0.0),
        Rotation::R90 => Matrix::new(0.0, zoom, -zoom, 0.0, 0.0, 0.0),
        Rotation::R180 => Matrix::new(-zoom, 0.0, 0.0, -zoom, 0.0, 0.0),
        Rotation::R270 => Matrix::new(0.0, -zoom, zoom, 0.0, 0.0, 0.0),
    }
}

fn apply(m: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (m.a * x + m.c * y + m.e, m.b * x + m.d * y + m.f)
}

fn transformed_min(m: &Matrix, x0: f32, y0: f32, x1: f32, y1: f32) -> (f32, f32) {
    let corners = [apply(m, x0, y0), apply(m, x1, y0), apply(m, x0, y1), apply(m, x1, y1)];
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
    (min_x, min_y)
}

fn transformed_max(m: &Matrix, x0: f32, y0: f32, x1: f32, y1: f32) -> (f32, f32) {
    let corners = [apply(m, x0, y0), apply(m, x1, y0), apply(m, x0, y1), apply(m, x1, y1)];
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);
    (max_x, max_y)
}

/// Repack a pixmap into a tightly packed RGB artifact, tolerating padded
/// strides and extra channels.
fn pixmap_to_packed_rgb(pixmap: &mupdf::Pixmap) -> Result<RasterArtifact, BackendError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(BackendError::failure(format!(
            "unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height.saturating_sub(1)) + row_bytes {
        return Err(BackendError::failure("pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..3]);
            }
        }
    }

    Ok(RasterArtifact::packed(
        out,
        width as u32,
        height as u32,
        PixelFormat::Rgb8,
    ))
}

fn crop_packed(src: &RasterArtifact, x0: usize, y0: usize, x1: usize, y1: usize) -> RasterArtifact {
    let bpp = src.format.bytes_per_pixel();
    let width = x1 - x0;
    let height = y1 - y0;
    let mut out = Vec::with_capacity(width * height * bpp);

    for y in y0..y1 {
        let start = y * src.stride + x0 * bpp;
        out.extend_from_slice(&src.pixels[start..start + width * bpp]);
    }

    RasterArtifact::packed(out, width as u32, height as u32, src.format)
}
