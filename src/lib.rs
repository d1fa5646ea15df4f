//! Fixed-capacity pool allocator library.
//!
//! `slotpool` provides [`FixedPool`], an arena of `N` equally sized slots handed out and
//! reclaimed through a LIFO free list, together with two small containers that take their
//! storage from an injected allocator: [`BareVector`] and [`SortedMap`].
//!
//! This crate depends on [`allocator-api2`](https://crates.io/crates/allocator-api2), a polyfill
//! for the unstable [`allocator_api`](https://doc.rust-lang.org/unstable-book/library-features/allocator-api.html) feature,
//! so a pool also plugs into `allocator_api2::vec::Vec` and `allocator_api2::boxed::Box`.
//!
//! # Usage
//! ```
//! use slotpool::{MapPool, PoolError, SortedMap};
//!
//! let pool = MapPool::<i32, i32, 2>::new();
//! let mut map = SortedMap::new_in(pool);
//! map.insert(2, 20)?;
//! map.insert(1, 10)?;
//! assert_eq!(map.insert(3, 30), Err(PoolError::OutOfMemory));
//! assert!(map.iter().eq([(&1, &10), (&2, &20)]));
//! # Ok::<(), PoolError>(())
//! ```
//!
//! To bring the allocator traits into scope, import the prelude:
//! ```
//! use slotpool::prelude::*;
//! ```
//!
//! # Feature flags
//! - `std` (default) implements [`CheckedAllocator`] for [`std::alloc::System`] and builds the
//!   demo binary. Without it the library is `no_std` and only needs `alloc`.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

use allocator_api2::alloc::{Allocator, Global};
use core::{alloc::Layout, ptr::NonNull};

pub mod error;
pub mod map;
pub mod pool;
pub mod vector;

pub use error::{Misuse, PoolError};
pub use map::{MapPool, SortedMap};
pub use pool::FixedPool;
pub use vector::BareVector;

/// Prelude exports all the allocator-related traits.
pub mod prelude {
    pub use crate::{ArenaAllocator as _, CheckedAllocator as _};
    pub use allocator_api2::alloc::Allocator as _;
}

/// Allocator that uses region-based memory management.
pub trait ArenaAllocator: Allocator {
    /// Returns `true` if the allocation specified by `ptr` and `layout` is within the allocator's arena.
    fn contains(&self, ptr: NonNull<u8>, layout: Layout) -> bool;
}

impl<A> ArenaAllocator for &A
where
    A: ArenaAllocator,
{
    #[inline]
    fn contains(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        (*self).contains(ptr, layout)
    }
}

/// Extension of [`Allocator`] that explains refused requests with a [`PoolError`].
///
/// The default methods forward to [`Allocator`] and report every failure as
/// [`PoolError::OutOfMemory`], which is all a general purpose allocator can say.
pub trait CheckedAllocator: Allocator {
    /// Like [`Allocator::allocate`], with the reason for a refusal.
    #[inline]
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, PoolError> {
        Ok(self.allocate(layout)?)
    }

    /// Like [`Allocator::deallocate`], but a refused release is returned instead of swallowed.
    ///
    /// # Safety
    /// Same contract as [`Allocator::deallocate`]: `ptr` must denote a block currently allocated
    /// by this allocator and `layout` must fit that block.
    #[inline]
    unsafe fn try_deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> Result<(), PoolError> {
        self.deallocate(ptr, layout);
        Ok(())
    }
}

impl<A> CheckedAllocator for &A
where
    A: CheckedAllocator,
{
    #[inline]
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, PoolError> {
        (*self).try_allocate(layout)
    }

    #[inline]
    unsafe fn try_deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> Result<(), PoolError> {
        (*self).try_deallocate(ptr, layout)
    }
}

impl CheckedAllocator for Global {}

#[cfg(feature = "std")]
impl CheckedAllocator for std::alloc::System {}

#[inline]
pub(crate) fn as_usize<T>(ptr: NonNull<T>) -> usize {
    ptr.as_ptr() as usize
}
