//! Engine configuration, read once at init.

use serde::Deserialize;

/// Worker pool size. Two is a deliberate stability choice: PDF backends
/// often serialize on a per-document lock and scale poorly beyond two
/// concurrent page decodes.
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_CACHE_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_CACHE_ENTRIES: usize = 512;
pub const DEFAULT_ZOOM_QUANT_DECIMALS: u32 = 3;

/// Zoom bounds accepted by `request_render`.
pub const MIN_ZOOM: f32 = 0.05;
pub const MAX_ZOOM: f32 = 5.0;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workers: usize,
    pub cache_bytes: u64,
    pub cache_entries: usize,
    pub zoom_quant_decimals: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cache_bytes: DEFAULT_CACHE_BYTES,
            cache_entries: DEFAULT_CACHE_ENTRIES,
            zoom_quant_decimals: DEFAULT_ZOOM_QUANT_DECIMALS,
        }
    }
}

impl EngineConfig {
    /// Parse from a TOML fragment, typically the render table of an
    /// application settings file.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Clamp out-of-range values rather than failing init.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.cache_entries = self.cache_entries.max(1);
        self.zoom_quant_decimals = self.zoom_quant_decimals.clamp(1, 6);
        self
    }
}
