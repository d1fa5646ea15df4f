//! Errors reported by checked allocation.

use allocator_api2::alloc::AllocError;
use thiserror::Error;

/// Reason an allocation or release request was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The request itself is malformed for this allocator.
    #[error("invalid argument: {0}")]
    InvalidArgument(Misuse),

    /// Every slot is handed out.
    #[error("out of memory")]
    OutOfMemory,

    /// A release was requested while the pool already holds all of its slots.
    #[error("pool already fully free")]
    LogicError,
}

/// Detail carried by [`PoolError::InvalidArgument`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    /// More elements than the pool holds in total.
    #[error("not enough memory")]
    NotEnoughMemory,

    /// Null pointer, or a pointer that is not a slot of this pool.
    #[error("bad pointer")]
    BadPointer,

    /// The layout does not fit into a single slot.
    #[error("layout does not fit a single slot")]
    UnsupportedLayout,

    /// Requested element count overflows `isize::MAX` bytes.
    #[error("capacity overflow")]
    CapacityOverflow,
}

impl From<Misuse> for PoolError {
    #[inline]
    fn from(misuse: Misuse) -> Self {
        PoolError::InvalidArgument(misuse)
    }
}

impl From<AllocError> for PoolError {
    #[inline]
    fn from(_: AllocError) -> Self {
        PoolError::OutOfMemory
    }
}
