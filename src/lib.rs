//! Concurrent, cache-backed page render engine for PDF viewers.
//!
//! UI producers (page views, thumbnail strips, zoomable scenes) call
//! [`Engine::request_render`]; a bounded worker pool rasterizes through a
//! single-owned document handle, runs the reading-mode filter stage, fills
//! an LRU artifact cache and delivers results to callbacks on the UI thread
//! via [`Engine::poll_deliveries`]. Duplicate in-flight requests coalesce
//! onto one task.

pub mod artifact;
pub mod backend;
pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod filter;
pub mod key;
pub mod request;
pub mod scheduler;
pub mod telemetry;

pub use artifact::{PixelFormat, RasterArtifact};
pub use config::EngineConfig;
pub use document::DocumentInfo;
pub use engine::Engine;
pub use error::{BackendError, RenderError};
pub use key::{ClipRect, DocId, ReadMode, RenderKey, Rotation};
pub use request::{PageRequest, RenderReply};
pub use telemetry::{TaskEvent, TelemetrySink};
