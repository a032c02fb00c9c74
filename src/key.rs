//! Render request identity: document id, page, quantized zoom, rotation,
//! reading mode and optional clip region.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Canonicalized identity of a document on disk.
///
/// Two paths naming the same file compare equal after canonicalization, so
/// cache entries and in-flight tasks never split across spellings of a path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocId(Arc<PathBuf>);

impl DocId {
    /// Canonicalize a path into a document id.
    ///
    /// If the file does not resolve the raw path is kept; the subsequent
    /// open reports the real error.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        #[cfg(windows)]
        let resolved = PathBuf::from(resolved.to_string_lossy().to_lowercase());

        Self(Arc::new(resolved))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Page rotation in quarter turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Parse a rotation from degrees. Only the four axis-aligned values are
    /// representable.
    #[must_use]
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Self::R0),
            90 => Some(Self::R90),
            180 => Some(Self::R180),
            270 => Some(Self::R270),
            _ => None,
        }
    }

    #[must_use]
    pub const fn degrees(self) -> u16 {
        match self {
            Self::R0 => 0,
            Self::R90 => 90,
            Self::R180 => 180,
            Self::R270 => 270,
        }
    }

    /// Whether the rotation swaps page width and height.
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        matches!(self, Self::R90 | Self::R270)
    }
}

/// Reading-mode filter applied after rasterization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReadMode {
    #[default]
    Default,
    Sepia,
    Dark,
}

/// Clip region in PDF points. Construction enforces a non-empty, finite
/// rectangle, which keeps the manual `Eq`/`Hash` over float bits sound.
#[derive(Clone, Copy, Debug)]
pub struct ClipRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl ClipRect {
    #[must_use]
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Option<Self> {
        let finite = [x0, y0, x1, y1].iter().all(|v| v.is_finite());
        if finite && x0 < x1 && y0 < y1 {
            Some(Self { x0, y0, x1, y1 })
        } else {
            None
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

impl PartialEq for ClipRect {
    fn eq(&self, other: &Self) -> bool {
        self.x0.to_bits() == other.x0.to_bits()
            && self.y0.to_bits() == other.y0.to_bits()
            && self.x1.to_bits() == other.x1.to_bits()
            && self.y1.to_bits() == other.y1.to_bits()
    }
}

impl Eq for ClipRect {}

impl Hash for ClipRect {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x0.to_bits().hash(state);
        self.y0.to_bits().hash(state);
        self.x1.to_bits().hash(state);
        self.y1.to_bits().hash(state);
    }
}

/// Quantize a zoom factor to `decimals` places as an integer for stable
/// hashing. Near-equal zoom requests collapse onto one key while the
/// rasterizer still receives the exact value.
#[must_use]
pub fn quantize_zoom(zoom: f32, decimals: u32) -> u32 {
    let scale = 10u32.pow(decimals.min(6)) as f32;
    (zoom * scale).round() as u32
}

/// Cache and coalescing key for a render request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub doc: DocId,
    /// 0-indexed page.
    pub page: u32,
    /// Zoom quantized via [`quantize_zoom`].
    pub zoom_q: u32,
    pub rotation: Rotation,
    pub mode: ReadMode,
    /// `None` for full-page renders.
    pub clip: Option<ClipRect>,
}

impl RenderKey {
    #[must_use]
    pub fn new(
        doc: DocId,
        page: u32,
        zoom: f32,
        zoom_quant_decimals: u32,
        rotation: Rotation,
        mode: ReadMode,
        clip: Option<ClipRect>,
    ) -> Self {
        Self {
            doc,
            page,
            zoom_q: quantize_zoom(zoom, zoom_quant_decimals),
            rotation,
            mode,
            clip,
        }
    }
}
