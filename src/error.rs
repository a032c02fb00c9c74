//! Error kinds surfaced by the backend seam and to render callbacks.

/// Failure raised by the PDF backend while opening or rasterizing.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("document handle closed")]
    HandleClosed,

    #[error("{detail}")]
    Failure { detail: String },
}

impl BackendError {
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure { detail: msg.into() }
    }
}

#[cfg(feature = "mupdf")]
impl From<mupdf::error::Error> for BackendError {
    fn from(e: mupdf::error::Error) -> Self {
        Self::failure(e.to_string())
    }
}

/// Error delivered to a render callback. Never raised into the caller of
/// `request_render`, which is always non-blocking.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("invalid request: {detail}")]
    InvalidRequest { detail: String },

    #[error("no document is open")]
    NoDocument,

    #[error("render cancelled")]
    Cancelled,

    #[error("backend failure: {detail}")]
    BackendFailure { detail: String },

    #[error("document was swapped while the task was running")]
    HandleClosed,
}

impl RenderError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest { detail: msg.into() }
    }
}

impl From<BackendError> for RenderError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::HandleClosed => Self::HandleClosed,
            other => Self::BackendFailure {
                detail: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_closed_maps_through() {
        assert_eq!(
            RenderError::from(BackendError::HandleClosed),
            RenderError::HandleClosed
        );
    }

    #[test]
    fn backend_message_is_carried() {
        let err = RenderError::from(BackendError::failure("decode blew up"));
        assert_eq!(
            err,
            RenderError::BackendFailure {
                detail: "decode blew up".into()
            }
        );
    }
}
