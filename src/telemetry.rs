//! Optional structured task-event hook.

use std::time::Instant;

use crate::request::TaskId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskEvent {
    Enqueued,
    Started,
    Completed,
    Cancelled,
    Failed,
    CacheHit,
}

/// Receives one event per task transition. Implementations may route this
/// anywhere; absence is valid and the engine carries no default sink.
pub trait TelemetrySink: Send + Sync {
    fn on_task_event(&self, task: TaskId, event: TaskEvent, at: Instant);
}

/// Routes task events to the `log` facade at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn on_task_event(&self, task: TaskId, event: TaskEvent, _at: Instant) {
        log::debug!("task {task}: {event:?}");
    }
}
