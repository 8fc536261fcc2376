use thiserror::Error;
use tiercache_store::StoreError;

/// Errors produced while encoding or decoding a stored payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Empty payload")]
    Empty,

    #[error("Unknown encoding marker: 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("Compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("Decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cache error taxonomy.
///
/// Only `InvalidConfiguration` is ever returned to callers (at construction).
/// The other variants are observed inside the coordinator, logged and turned
/// into breaker failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Remote(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl CacheError {
    /// Create a new InvalidConfiguration error
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::Remote(e) => e.kind(),
            Self::Codec(_) => "codec",
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
