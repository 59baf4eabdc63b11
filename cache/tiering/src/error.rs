//! Error types for segment and tier operations.

/// Errors that can occur during segment and tier operations.
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    /// No codec is registered for the requested key or value type.
    ///
    /// Raised while building a segment or tier, never during put/get.
    #[error("unsupported type: no codec registered for {0}")]
    UnsupportedType(&'static str),

    /// Stored bytes could not be decoded back into a value.
    #[error("codec error: {0}")]
    Codec(String),

    /// The storage budget is exhausted and nothing evictable remains.
    #[error("out of memory")]
    OutOfMemory,

    /// A single entry is larger than the whole storage budget.
    #[error("entry of {size} bytes exceeds storage capacity of {capacity} bytes")]
    EntryTooLarge {
        /// Encoded record size in bytes.
        size: usize,
        /// Storage budget in bytes.
        capacity: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O fault from file-backed storage.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Result type for segment and tier operations.
pub type TierResult<T> = Result<T, TierError>;
