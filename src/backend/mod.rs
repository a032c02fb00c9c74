//! PDF backend seam. This is the only layer allowed to touch the decoding
//! library; everything above it sees opaque pixel buffers.

use std::path::Path;

use crate::artifact::RasterArtifact;
use crate::error::BackendError;
use crate::key::{ClipRect, Rotation};

#[cfg(feature = "mupdf")]
mod mupdf_backend;
#[cfg(feature = "mupdf")]
pub use mupdf_backend::MupdfBackend;

#[cfg(any(test, feature = "test-utils"))]
pub mod stub;

/// Opens documents. Implementations must be shareable across threads; the
/// engine opens each document exactly once.
pub trait PdfBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PdfDocument>, BackendError>;
}

/// An open document handle.
///
/// Implementations are assumed thread-hostile per document: the engine
/// serializes every call on a single handle behind an exclusive lock, so a
/// `PdfDocument` is only ever used by one thread at a time.
pub trait PdfDocument: Send {
    fn page_count(&self) -> u32;

    fn title(&self) -> Option<String> {
        None
    }

    /// Rasterize one page into an RGB pixel matrix in device pixels.
    ///
    /// `zoom` scales PDF-point extents to device pixels, `rotation` is
    /// applied around the page, and `clip` (PDF points) restricts output to
    /// a sub-rectangle. `zoom` arrives exact, not quantized.
    fn rasterize(
        &self,
        page: u32,
        zoom: f32,
        rotation: Rotation,
        clip: Option<ClipRect>,
    ) -> Result<RasterArtifact, BackendError>;
}
