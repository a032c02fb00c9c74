//! Engine facade: wires the registry, cache, filter stage and worker pool
//! behind the public render API.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use flume::{Receiver, Sender};

use crate::backend::{PdfBackend, PdfDocument};
use crate::cache::RenderCache;
use crate::config::{EngineConfig, MAX_ZOOM, MIN_ZOOM};
use crate::document::{DocumentInfo, DocumentRegistry};
use crate::error::{BackendError, RenderError};
use crate::key::{DocId, RenderKey};
use crate::request::{PageRequest, RenderCallback, RenderReply};
use crate::scheduler::{Delivery, Scheduler};
use crate::telemetry::{TaskEvent, TelemetrySink};

static GLOBAL: OnceLock<Engine> = OnceLock::new();

/// Process-wide render engine. Cheap to clone; all clones share one worker
/// pool, one cache and one document registry.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: DocumentRegistry,
    cache: Arc<Mutex<RenderCache>>,
    scheduler: Scheduler,
    delivery_tx: Sender<Delivery>,
    delivery_rx: Receiver<Delivery>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig, backend: Arc<dyn PdfBackend>) -> Self {
        Self::with_telemetry(config, backend, None)
    }

    #[must_use]
    pub fn with_telemetry(
        config: EngineConfig,
        backend: Arc<dyn PdfBackend>,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        let config = config.normalized();
        let cache = Arc::new(Mutex::new(RenderCache::new(
            config.cache_entries,
            config.cache_bytes,
        )));
        let (delivery_tx, delivery_rx) = flume::unbounded();
        let scheduler = Scheduler::new(
            config.workers,
            Arc::clone(&cache),
            delivery_tx.clone(),
            telemetry.clone(),
        );

        log::info!(
            "render engine up: {} workers, {} MiB cache",
            config.workers,
            config.cache_bytes / (1024 * 1024)
        );

        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: DocumentRegistry::new(backend),
                cache,
                scheduler,
                delivery_tx,
                delivery_rx,
                telemetry,
            }),
        }
    }

    /// Initialize the process-wide instance once; later calls return the
    /// existing engine regardless of arguments.
    pub fn init(config: EngineConfig, backend: Arc<dyn PdfBackend>) -> Self {
        GLOBAL
            .get_or_init(|| Self::new(config, backend))
            .clone()
    }

    /// The process-wide instance, if `init` has run.
    #[must_use]
    pub fn instance() -> Option<Self> {
        GLOBAL.get().cloned()
    }

    /// The process-wide instance, initialized with defaults and the MuPDF
    /// backend on first use.
    #[cfg(feature = "mupdf")]
    pub fn instance_or_init() -> Self {
        GLOBAL
            .get_or_init(|| {
                Self::new(
                    EngineConfig::default(),
                    Arc::new(crate::backend::MupdfBackend),
                )
            })
            .clone()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Make `path` the active document.
    ///
    /// A swap is a barrier: every in-flight task is cancelled and
    /// acknowledged before the previous handle closes, so once this returns
    /// all new requests target the new document and no completion for the
    /// old one can surface. Setting the already-active path is a no-op.
    pub fn set_document(&self, path: &Path) -> Result<DocumentInfo, BackendError> {
        let doc_id = DocId::new(path);
        if let Some(current) = self.inner.registry.current() {
            if current.doc_id() == &doc_id {
                return Ok(current.info().clone());
            }
        }

        self.swap_barrier();
        match self.inner.registry.open(doc_id.clone()) {
            Ok(slot) => {
                self.lock_cache().purge_except(&doc_id);
                log::info!("document opened: {doc_id} ({} pages)", slot.page_count());
                Ok(slot.info().clone())
            }
            Err(e) => {
                self.lock_cache().clear();
                log::warn!("document open failed for {doc_id}: {e}");
                Err(e)
            }
        }
    }

    /// Adopt a handle the caller already opened, avoiding a double open.
    pub fn set_document_handle(
        &self,
        path: &Path,
        handle: Box<dyn PdfDocument>,
    ) -> DocumentInfo {
        let doc_id = DocId::new(path);
        self.swap_barrier();
        let slot = self.inner.registry.adopt(doc_id.clone(), handle);
        self.lock_cache().purge_except(&doc_id);
        log::info!("document adopted: {doc_id} ({} pages)", slot.page_count());
        slot.info().clone()
    }

    fn swap_barrier(&self) {
        self.inner.scheduler.cancel_all();
        self.inner.scheduler.drain_running();
        self.inner.registry.clear();
    }

    /// Metadata of the active document, if any.
    #[must_use]
    pub fn document_info(&self) -> Option<DocumentInfo> {
        self.inner.registry.current().map(|s| s.info().clone())
    }

    /// Request a render. Never blocks and never returns an error: cache
    /// hits, coalesced attachments and failures alike reach `callback`
    /// through the delivery pump, exactly once.
    pub fn request_render(
        &self,
        request: PageRequest,
        callback: impl FnOnce(RenderReply) + Send + 'static,
    ) {
        let callback: RenderCallback = Box::new(callback);

        let Some(slot) = self.inner.registry.current() else {
            self.deliver_error(None, request, callback, RenderError::NoDocument);
            return;
        };

        if request.page >= slot.page_count() {
            let err = RenderError::invalid(format!(
                "page {} out of range (document has {} pages)",
                request.page,
                slot.page_count()
            ));
            self.deliver_error(Some(slot.doc_id().clone()), request, callback, err);
            return;
        }
        if !request.zoom.is_finite() || !(MIN_ZOOM..=MAX_ZOOM).contains(&request.zoom) {
            let err = RenderError::invalid(format!(
                "zoom {} outside [{MIN_ZOOM}, {MAX_ZOOM}]",
                request.zoom
            ));
            self.deliver_error(Some(slot.doc_id().clone()), request, callback, err);
            return;
        }

        let key = self.key_for(slot.doc_id().clone(), &request);

        if let Some(artifact) = self.lock_cache().get(&key) {
            let task_id = self.inner.scheduler.next_task_id();
            if let Some(sink) = &self.inner.telemetry {
                sink.on_task_event(task_id, TaskEvent::CacheHit, Instant::now());
            }
            let _ = self.inner.delivery_tx.send(Delivery {
                task_id,
                doc: Some(key.doc),
                request,
                outcome: Ok(artifact),
                callbacks: vec![callback],
            });
            return;
        }

        self.inner.scheduler.submit(key, request, slot, callback);
    }

    /// Cancel every pending and running task. Their callbacks receive a
    /// cancellation notice. A no-op when nothing is in flight.
    pub fn cancel_all(&self) -> usize {
        self.inner.scheduler.cancel_all()
    }

    /// Drop all pending tasks without touching running ones.
    pub fn clear_queue(&self) -> usize {
        self.inner.scheduler.clear_queue()
    }

    /// Drain the delivery channel, invoking callbacks. Must be called from
    /// the UI thread; this is the single serializing point for callbacks.
    /// Returns the number of deliveries processed.
    pub fn poll_deliveries(&self) -> usize {
        let mut count = 0;

        while let Ok(mut delivery) = self.inner.delivery_rx.try_recv() {
            if delivery.outcome.is_ok() {
                let stale = delivery
                    .doc
                    .as_ref()
                    .is_some_and(|doc| !self.inner.registry.is_current(doc));
                if stale {
                    // Completed before a swap but pumped after it; the
                    // contract forbids surfacing foreign-document results.
                    delivery.outcome = Err(RenderError::HandleClosed);
                }
            }

            for callback in delivery.callbacks {
                callback(RenderReply {
                    request: delivery.request.clone(),
                    outcome: delivery.outcome.clone(),
                });
            }
            count += 1;
        }

        count
    }

    /// Whether a request would currently be served from the cache.
    #[must_use]
    pub fn is_cached(&self, request: &PageRequest) -> bool {
        let Some(slot) = self.inner.registry.current() else {
            return false;
        };
        let key = self.key_for(slot.doc_id().clone(), request);
        self.lock_cache().contains(&key)
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }

    #[must_use]
    pub fn cache_bytes(&self) -> u64 {
        self.lock_cache().total_bytes()
    }

    /// Stop the worker pool. Queued tasks that no worker picks up are
    /// dropped; this is only called at process teardown.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
    }

    fn key_for(&self, doc: DocId, request: &PageRequest) -> RenderKey {
        RenderKey::new(
            doc,
            request.page,
            request.zoom,
            self.inner.config.zoom_quant_decimals,
            request.rotation,
            request.mode,
            request.clip,
        )
    }

    fn deliver_error(
        &self,
        doc: Option<DocId>,
        request: PageRequest,
        callback: RenderCallback,
        error: RenderError,
    ) {
        let _ = self.inner.delivery_tx.send(Delivery {
            task_id: self.inner.scheduler.next_task_id(),
            doc,
            request,
            outcome: Err(error),
            callbacks: vec![callback],
        });
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, RenderCache> {
        self.inner.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
