use crate::frame::PixelFormat;

pub type Result<T> = std::result::Result<T, JarvisError>;

/// Everything that can go wrong inside the engine.
///
/// Frame-scoped failures (capture, format) are absorbed by their stage and
/// never abort the loop; anything touching persistent state is surfaced to
/// the caller and aborts that operation only.
#[derive(Debug, thiserror::Error)]
pub enum JarvisError {
    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),

    #[error("sketch file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("sketch file not parseable: {0}")]
    Parse(String),

    #[error("sketch signature mismatch, file may be tampered")]
    Tamper,
}

impl JarvisError {
    /// True for errors the frame loop absorbs without surfacing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            JarvisError::Capture(_) | JarvisError::UnsupportedFormat(_)
        )
    }
}
