//! Deterministic in-memory backend for tests.
//!
//! Pixel content is a pure function of page, position and zoomed geometry,
//! so identical requests produce byte-identical artifacts. The backend is
//! cloneable with shared internals: tests keep a clone to inspect call
//! counts, inject failures and gate rasterization.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::artifact::{PixelFormat, RasterArtifact};
use crate::error::BackendError;
use crate::key::{ClipRect, Rotation};

use super::{PdfBackend, PdfDocument};

/// Reusable open/closed latch. Workers block in `rasterize` while the gate
/// is closed, letting tests pile up requests before any completes.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    #[must_use]
    pub fn open() -> Self {
        Self::with_state(true)
    }

    #[must_use]
    pub fn closed() -> Self {
        Self::with_state(false)
    }

    fn with_state(open: bool) -> Self {
        Self {
            inner: Arc::new((Mutex::new(open), Condvar::new())),
        }
    }

    pub fn release(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = cvar.wait(open).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct StubState {
    page_count: u32,
    page_size: (f32, f32),
    title: Option<String>,
    gate: Gate,
    fail_open: AtomicBool,
    fail_pages: Mutex<HashSet<u32>>,
    open_calls: AtomicUsize,
    raster_calls: AtomicUsize,
}

#[derive(Clone)]
pub struct StubBackend {
    state: Arc<StubState>,
}

impl StubBackend {
    #[must_use]
    pub fn new(page_count: u32) -> Self {
        Self::with_gate(page_count, Gate::open())
    }

    #[must_use]
    pub fn with_gate(page_count: u32, gate: Gate) -> Self {
        Self {
            state: Arc::new(StubState {
                page_count,
                page_size: (612.0, 792.0),
                title: Some("stub document".to_string()),
                gate,
                fail_open: AtomicBool::new(false),
                fail_pages: Mutex::new(HashSet::new()),
                open_calls: AtomicUsize::new(0),
                raster_calls: AtomicUsize::new(0),
            }),
        }
    }

    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn raster_calls(&self) -> usize {
        self.state.raster_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make rasterization of `page` fail until cleared.
    pub fn fail_page(&self, page: u32) {
        self.state
            .fail_pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page);
    }

    pub fn clear_failures(&self) {
        self.state
            .fail_pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl PdfBackend for StubBackend {
    fn open(&self, _path: &Path) -> Result<Box<dyn PdfDocument>, BackendError> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(BackendError::failure("synthetic open failure"));
        }
        Ok(Box::new(StubDocument {
            state: Arc::clone(&self.state),
        }))
    }
}

struct StubDocument {
    state: Arc<StubState>,
}

impl PdfDocument for StubDocument {
    fn page_count(&self) -> u32 {
        self.state.page_count
    }

    fn title(&self) -> Option<String> {
        self.state.title.clone()
    }

    fn rasterize(
        &self,
        page: u32,
        zoom: f32,
        rotation: Rotation,
        clip: Option<ClipRect>,
    ) -> Result<RasterArtifact, BackendError> {
        self.state.gate.wait();

        if page >= self.state.page_count {
            return Err(BackendError::PageOutOfRange {
                page,
                page_count: self.state.page_count,
            });
        }
        let failing = self
            .state
            .fail_pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&page);
        if failing {
            return Err(BackendError::failure("synthetic decode failure"));
        }

        self.state.raster_calls.fetch_add(1, Ordering::SeqCst);

        let (page_w, page_h) = self.state.page_size;
        let (region_w, region_h) = match clip {
            Some(c) => (c.width(), c.height()),
            None => (page_w, page_h),
        };

        let (out_w, out_h) = if rotation.swaps_axes() {
            (region_h * zoom, region_w * zoom)
        } else {
            (region_w * zoom, region_h * zoom)
        };
        let width = (out_w.round() as u32).max(1);
        let height = (out_h.round() as u32).max(1);

        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                pixels.push((page as u8).wrapping_mul(31).wrapping_add(17));
                pixels.push((x % 251) as u8);
                pixels.push((y % 241) as u8);
            }
        }

        Ok(RasterArtifact::packed(pixels, width, height, PixelFormat::Rgb8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_requests_produce_identical_pixels() {
        let backend = StubBackend::new(4);
        let doc = backend.open(Path::new("/stub.pdf")).unwrap();
        let a = doc.rasterize(1, 1.0, Rotation::R0, None).unwrap();
        let b = doc.rasterize(1, 1.0, Rotation::R0, None).unwrap();
        assert_eq!(a.pixels, b.pixels);
        assert_eq!(backend.raster_calls(), 2);
    }

    #[test]
    fn rotation_swaps_output_axes() {
        let backend = StubBackend::new(1);
        let doc = backend.open(Path::new("/stub.pdf")).unwrap();
        let upright = doc.rasterize(0, 0.5, Rotation::R0, None).unwrap();
        let turned = doc.rasterize(0, 0.5, Rotation::R90, None).unwrap();
        assert_eq!(upright.width, turned.height);
        assert_eq!(upright.height, turned.width);
    }

    #[test]
    fn failing_page_reports_backend_failure() {
        let backend = StubBackend::new(2);
        backend.fail_page(1);
        let doc = backend.open(Path::new("/stub.pdf")).unwrap();
        assert!(doc.rasterize(1, 1.0, Rotation::R0, None).is_err());
        backend.clear_failures();
        assert!(doc.rasterize(1, 1.0, Rotation::R0, None).is_ok());
    }

    #[test]
    fn clip_shrinks_output() {
        let backend = StubBackend::new(1);
        let doc = backend.open(Path::new("/stub.pdf")).unwrap();
        let clip = ClipRect::new(0.0, 0.0, 100.0, 50.0).unwrap();
        let art = doc.rasterize(0, 1.0, Rotation::R0, Some(clip)).unwrap();
        assert_eq!(art.width, 100);
        assert_eq!(art.height, 50);
    }
}
