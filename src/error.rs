use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
pub enum KdIndexError {
    /// A constructor or mutating call was given an argument outside its
    /// documented domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A growing tree reached its maximum level count and cannot accept more
    /// items.
    #[error("Tree full: maximum level count {0} reached")]
    CapacityExceeded(usize),

    /// A segment's window does not fit inside its backing slice.
    #[error("Segment of offset {offset} and length {length} does not fit backing slice of length {backing}")]
    SegmentShape {
        /// Start of the window.
        offset: usize,
        /// Length of the window.
        length: usize,
        /// Length of the backing slice.
        backing: usize,
    },
}

pub type Result<T> = std::result::Result<T, KdIndexError>;
