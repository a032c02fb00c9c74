//! Bounded worker pool with duplicate-key coalescing and cooperative
//! cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use flume::{Receiver, Sender};

use crate::cache::RenderCache;
use crate::document::DocumentSlot;
use crate::error::RenderError;
use crate::filter;
use crate::key::{DocId, RenderKey};
use crate::request::{PageRequest, RenderCallback, RenderTask, TaskId};
use crate::telemetry::{TaskEvent, TelemetrySink};

/// Message on the shared worker queue. Each worker clones the receiver and
/// pulls from the same FIFO; a `Shutdown` sentinel stops one worker.
enum WorkerMessage {
    Task(Arc<RenderTask>),
    Shutdown,
}

/// Finished work travelling to the UI thread. Callbacks ride along so the
/// delivery pump can invoke them without touching scheduler state.
pub struct Delivery {
    pub task_id: TaskId,
    pub doc: Option<DocId>,
    pub request: PageRequest,
    pub outcome: Result<Arc<crate::artifact::RasterArtifact>, RenderError>,
    pub callbacks: Vec<RenderCallback>,
}

/// Result of submitting a request to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submitted {
    /// Attached to an in-flight task with the same key.
    Coalesced(TaskId),
    /// A new task was enqueued.
    Enqueued(TaskId),
}

struct Indices {
    /// Tasks enqueued but not yet picked up, keyed for coalescing.
    pending: HashMap<RenderKey, Arc<RenderTask>>,
    /// Tasks currently executing, keyed by id; the running set is at most
    /// the worker count, so key lookups scan.
    running: HashMap<TaskId, Arc<RenderTask>>,
}

struct Shared {
    indices: Mutex<Indices>,
    /// Signalled whenever the running set becomes empty.
    drained: Condvar,
    cache: Arc<Mutex<RenderCache>>,
    delivery_tx: Sender<Delivery>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    next_task_id: AtomicU64,
}

impl Shared {
    fn lock_indices(&self) -> MutexGuard<'_, Indices> {
        self.indices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, task: TaskId, event: TaskEvent) {
        if let Some(sink) = &self.telemetry {
            sink.on_task_event(task, event, Instant::now());
        }
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    queue_tx: Sender<WorkerMessage>,
    workers: usize,
}

impl Scheduler {
    /// Spawn `workers` threads pulling from a shared MPMC queue. flume is
    /// used because std/tokio mpsc receivers cannot be cloned for fan-out.
    pub fn new(
        workers: usize,
        cache: Arc<Mutex<RenderCache>>,
        delivery_tx: Sender<Delivery>,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        let workers = workers.max(1);
        let (queue_tx, queue_rx) = flume::unbounded();

        let shared = Arc::new(Shared {
            indices: Mutex::new(Indices {
                pending: HashMap::new(),
                running: HashMap::new(),
            }),
            drained: Condvar::new(),
            cache,
            delivery_tx,
            telemetry,
            next_task_id: AtomicU64::new(1),
        });

        for _ in 0..workers {
            let rx: Receiver<WorkerMessage> = queue_rx.clone();
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || worker_loop(&shared, &rx));
        }

        Self {
            shared,
            queue_tx,
            workers,
        }
    }

    #[must_use]
    pub fn next_task_id(&self) -> TaskId {
        self.shared.next_task_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Coalesce onto an in-flight task with the same key, or enqueue a new
    /// one. The check and the enqueue happen under one lock, so duplicate
    /// keys can never race into two tasks.
    pub fn submit(
        &self,
        key: RenderKey,
        request: PageRequest,
        slot: Arc<DocumentSlot>,
        callback: RenderCallback,
    ) -> Submitted {
        let mut idx = self.shared.lock_indices();

        if let Some(task) = idx.pending.get(&key) {
            task.attach(callback);
            return Submitted::Coalesced(task.id);
        }
        if let Some(task) = idx
            .running
            .values()
            .find(|t| t.key == key && !t.is_cancelled())
        {
            task.attach(callback);
            return Submitted::Coalesced(task.id);
        }

        let id = self.next_task_id();
        let task = RenderTask::new(id, key.clone(), request, slot, callback);
        idx.pending.insert(key, Arc::clone(&task));
        self.shared.emit(id, TaskEvent::Enqueued);
        let _ = self.queue_tx.send(WorkerMessage::Task(task));
        Submitted::Enqueued(id)
    }

    /// Cancel every pending and running task. Pending tasks deliver their
    /// cancellation notices immediately; running tasks short-circuit at
    /// their next checkpoint. Returns the number of tasks touched.
    pub fn cancel_all(&self) -> usize {
        let mut idx = self.shared.lock_indices();
        let mut touched = 0;

        let drained: Vec<Arc<RenderTask>> = idx.pending.drain().map(|(_, t)| t).collect();
        for task in drained {
            task.cancel();
            deliver_cancelled(&self.shared, &task);
            touched += 1;
        }
        for task in idx.running.values() {
            task.cancel();
            touched += 1;
        }
        touched
    }

    /// Drop all pending tasks without touching running ones. Used to
    /// discard obsolete work after a viewport change settles.
    pub fn clear_queue(&self) -> usize {
        let mut idx = self.shared.lock_indices();
        let drained: Vec<Arc<RenderTask>> = idx.pending.drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for task in drained {
            task.cancel();
            deliver_cancelled(&self.shared, &task);
        }
        count
    }

    /// Block until no task is executing. Paired with `cancel_all`, this is
    /// the swap barrier acknowledgement.
    pub fn drain_running(&self) {
        let mut idx = self.shared.lock_indices();
        while !idx.running.is_empty() {
            idx = self
                .shared
                .drained
                .wait(idx)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Send one shutdown sentinel per worker.
    pub fn shutdown(&self) {
        for _ in 0..self.workers {
            let _ = self.queue_tx.send(WorkerMessage::Shutdown);
        }
    }
}

fn deliver_cancelled(shared: &Shared, task: &RenderTask) {
    shared.emit(task.id, TaskEvent::Cancelled);
    let _ = shared.delivery_tx.send(Delivery {
        task_id: task.id,
        doc: Some(task.key.doc.clone()),
        request: task.request.clone(),
        outcome: Err(RenderError::Cancelled),
        callbacks: task.take_callbacks(),
    });
}

fn worker_loop(shared: &Shared, queue: &Receiver<WorkerMessage>) {
    for message in queue.iter() {
        match message {
            WorkerMessage::Shutdown => break,
            WorkerMessage::Task(task) => run_task(shared, &task),
        }
    }
}

fn run_task(shared: &Shared, task: &Arc<RenderTask>) {
    // Checkpoint: before handle acquisition. Tasks cancelled while queued
    // were already drained from the pending index and delivered, so a stale
    // queue message simply drops here.
    {
        let mut idx = shared.lock_indices();
        let still_pending = idx
            .pending
            .get(&task.key)
            .is_some_and(|t| t.id == task.id);
        if !still_pending {
            return;
        }
        idx.pending.remove(&task.key);

        if task.is_cancelled() {
            finish(shared, idx, task, Err(RenderError::Cancelled));
            return;
        }
        idx.running.insert(task.id, Arc::clone(task));
    }

    shared.emit(task.id, TaskEvent::Started);

    let raster = task.slot.with_handle(|doc| {
        doc.rasterize(
            task.request.page,
            task.request.zoom,
            task.request.rotation,
            task.request.clip,
        )
    });

    // Checkpoint: after rasterize, before the filter stage.
    let outcome = match raster {
        Err(e) => Err(RenderError::from(e)),
        Ok(mut artifact) => {
            if task.is_cancelled() {
                Err(RenderError::Cancelled)
            } else {
                filter::apply_in_place(task.key.mode, &mut artifact);
                Ok(Arc::new(artifact))
            }
        }
    };

    let idx = shared.lock_indices();
    finish(shared, idx, task, outcome);
}

/// Decide the final outcome, update the cache and emit the delivery, all
/// under the scheduler lock. A swap barrier takes the same lock to flag
/// cancellation, so it orders strictly before or after this decision and a
/// completion for a swapped-out document can never slip through.
fn finish(
    shared: &Shared,
    mut idx: MutexGuard<'_, Indices>,
    task: &Arc<RenderTask>,
    outcome: Result<Arc<crate::artifact::RasterArtifact>, RenderError>,
) {
    idx.running.remove(&task.id);

    let outcome = if task.is_cancelled() {
        Err(RenderError::Cancelled)
    } else {
        outcome
    };

    if let Ok(artifact) = &outcome {
        shared
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.key.clone(), Arc::clone(artifact));
    }

    let event = match &outcome {
        Ok(_) => TaskEvent::Completed,
        Err(RenderError::Cancelled) => TaskEvent::Cancelled,
        Err(_) => TaskEvent::Failed,
    };
    shared.emit(task.id, event);

    if let Err(e) = &outcome {
        log::debug!("task {} for page {} ended: {e}", task.id, task.request.page);
    }

    // Unbounded channel, so this send never blocks under the lock.
    let _ = shared.delivery_tx.send(Delivery {
        task_id: task.id,
        doc: Some(task.key.doc.clone()),
        request: task.request.clone(),
        outcome,
        callbacks: task.take_callbacks(),
    });

    if idx.running.is_empty() {
        shared.drained.notify_all();
    }
}
