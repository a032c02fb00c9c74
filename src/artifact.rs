//! Immutable rasterized page artifacts.

/// Pixel layout of a raster artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

/// A rasterized page image. Produced once by a worker, then shared behind an
/// `Arc` between the cache and any number of callbacks; never mutated after
/// the filter stage.
#[derive(Clone)]
pub struct RasterArtifact {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row; at least `width * bytes_per_pixel`.
    pub stride: usize,
    pub format: PixelFormat,
}

impl RasterArtifact {
    /// A tightly packed artifact (stride equals the row byte width).
    #[must_use]
    pub fn packed(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            pixels,
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
        }
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.pixels.len() as u64
    }

    /// Meaningful bytes per row, excluding stride padding.
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Debug for RasterArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterArtifact")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("size_bytes", &self.size_bytes())
            .finish_non_exhaustive()
    }
}
