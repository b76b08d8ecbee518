/// Errors from log store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Seek index is beyond the addressable range of the store.
    #[error("seek index {index} out of range (limit {limit})")]
    IndexOutOfRange { index: usize, limit: usize },

    /// Seek index names a slot that holds no live record.
    #[error("no live record at index {index}")]
    EmptySlot { index: usize },

    /// Intra-record offset is not inside the target record.
    #[error("offset {offset} out of range for record {index} of length {len}")]
    OffsetOutOfRange {
        index: usize,
        offset: usize,
        len: usize,
    },

    /// An absolute reposition would land outside `[0, total_len]`.
    #[error("invalid position {requested} (total length {total_len})")]
    InvalidPosition { requested: i128, total_len: u64 },

    /// A ring was requested with zero slots.
    #[error("ring capacity must be non-zero")]
    ZeroCapacity,

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for caller-supplied argument errors that were rejected
    /// without touching store state.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::IndexOutOfRange { .. }
                | Self::EmptySlot { .. }
                | Self::OffsetOutOfRange { .. }
                | Self::InvalidPosition { .. }
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
