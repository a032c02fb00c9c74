//! Render requests, replies and the in-flight task unit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::artifact::RasterArtifact;
use crate::document::DocumentSlot;
use crate::error::RenderError;
use crate::key::{ClipRect, ReadMode, RenderKey, Rotation};

pub type TaskId = u64;

/// What a UI producer asks for: page, exact zoom, rotation, reading mode and
/// optional clip. The engine resolves this against the current document.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRequest {
    /// 0-indexed page.
    pub page: u32,
    /// Exact zoom factor; the cache key uses a quantized copy.
    pub zoom: f32,
    pub rotation: Rotation,
    pub mode: ReadMode,
    pub clip: Option<ClipRect>,
}

impl PageRequest {
    #[must_use]
    pub fn new(page: u32, zoom: f32) -> Self {
        Self {
            page,
            zoom,
            rotation: Rotation::R0,
            mode: ReadMode::Default,
            clip: None,
        }
    }

    #[must_use]
    pub fn rotated(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn clipped(mut self, clip: ClipRect) -> Self {
        self.clip = Some(clip);
        self
    }
}

/// Delivered to a callback on the UI thread: the original request plus the
/// shared artifact, or the error/cancellation discriminator.
#[derive(Clone, Debug)]
pub struct RenderReply {
    pub request: PageRequest,
    pub outcome: Result<Arc<RasterArtifact>, RenderError>,
}

pub type RenderCallback = Box<dyn FnOnce(RenderReply) + Send + 'static>;

/// One in-flight unit of work. Key and request are fixed at construction;
/// only the callback list grows (while queued or running) and the cancelled
/// flag flips. Workers check the flag cooperatively at checkpoints.
pub struct RenderTask {
    pub id: TaskId,
    pub key: RenderKey,
    pub request: PageRequest,
    /// Document pinned at enqueue time; a swap closes the slot under us.
    pub slot: Arc<DocumentSlot>,
    cancelled: AtomicBool,
    callbacks: Mutex<Vec<RenderCallback>>,
}

impl RenderTask {
    pub fn new(
        id: TaskId,
        key: RenderKey,
        request: PageRequest,
        slot: Arc<DocumentSlot>,
        callback: RenderCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            key,
            request,
            slot,
            cancelled: AtomicBool::new(false),
            callbacks: Mutex::new(vec![callback]),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Coalesce another requester onto this task.
    pub fn attach(&self, callback: RenderCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Take the callbacks for delivery. Called exactly once per task; a
    /// second call observes an empty list.
    #[must_use]
    pub fn take_callbacks(&self) -> Vec<RenderCallback> {
        std::mem::take(
            &mut *self
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl std::fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTask")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
