//! Document handle ownership: at most one open handle per active document,
//! reused across render tasks and released on swap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{PdfBackend, PdfDocument};
use crate::error::BackendError;
use crate::key::DocId;

/// Metadata probed once when a document is opened.
#[derive(Clone, Debug)]
pub struct DocumentInfo {
    pub page_count: u32,
    pub title: Option<String>,
}

/// An open document plus the exclusive lock that serializes backend calls.
///
/// The backend is assumed thread-hostile per document, so two workers
/// rasterizing different pages of the same document still serialize here.
/// The underlying handle closes when the last `Arc` holder drops the slot.
pub struct DocumentSlot {
    doc_id: DocId,
    info: DocumentInfo,
    closed: AtomicBool,
    handle: Mutex<Box<dyn PdfDocument>>,
}

impl DocumentSlot {
    fn new(doc_id: DocId, handle: Box<dyn PdfDocument>) -> Self {
        let info = DocumentInfo {
            page_count: handle.page_count(),
            title: handle.title(),
        };
        Self {
            doc_id,
            info,
            closed: AtomicBool::new(false),
            handle: Mutex::new(handle),
        }
    }

    #[must_use]
    pub fn doc_id(&self) -> &DocId {
        &self.doc_id
    }

    #[must_use]
    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.info.page_count
    }

    /// Mark the slot closed. In-flight rasterizations still holding the lock
    /// finish; later acquisitions fail with `HandleClosed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run a backend call under the per-document exclusive lock.
    pub fn with_handle<T>(
        &self,
        f: impl FnOnce(&dyn PdfDocument) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(BackendError::HandleClosed);
        }
        f(guard.as_ref())
    }
}

impl std::fmt::Debug for DocumentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSlot")
            .field("doc_id", &self.doc_id)
            .field("page_count", &self.info.page_count)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Owns the current document slot. Swapping is driven by the engine facade,
/// which runs the cancellation barrier before calling in here.
pub struct DocumentRegistry {
    backend: Arc<dyn PdfBackend>,
    current: Mutex<Option<Arc<DocumentSlot>>>,
}

impl DocumentRegistry {
    pub fn new(backend: Arc<dyn PdfBackend>) -> Self {
        Self {
            backend,
            current: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<DocumentSlot>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_current(&self, doc_id: &DocId) -> bool {
        self.current()
            .is_some_and(|slot| slot.doc_id() == doc_id)
    }

    /// Open `doc_id` through the backend and make it current. On failure the
    /// registry stays in whatever state `clear` left it (the no-document
    /// state when called from a swap).
    pub fn open(&self, doc_id: DocId) -> Result<Arc<DocumentSlot>, BackendError> {
        let handle = self.backend.open(doc_id.path())?;
        Ok(self.adopt(doc_id, handle))
    }

    /// Adopt a pre-opened handle, avoiding a double open when the caller has
    /// already loaded the document.
    pub fn adopt(&self, doc_id: DocId, handle: Box<dyn PdfDocument>) -> Arc<DocumentSlot> {
        let slot = Arc::new(DocumentSlot::new(doc_id, handle));
        let prev = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&slot));
        if let Some(prev) = prev {
            prev.close();
        }
        slot
    }

    /// Drop the current document, entering the no-document state.
    pub fn clear(&self) {
        let prev = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(prev) = prev {
            prev.close();
        }
    }
}
