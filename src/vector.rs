//! Minimal growable array over an injected allocator.

use crate::{CheckedAllocator, Misuse, PoolError};
use allocator_api2::alloc::{Allocator, Global};
use core::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    mem,
    ptr::{self, NonNull},
    slice,
};

/// Append-only array whose buffer comes from `A`.
///
/// A new vector owns no buffer. When an append finds the buffer full, a buffer of
/// `2 * capacity + 1` elements is obtained, the elements are moved over and the old buffer
/// is released, so capacities run 0, 1, 3, 7, 15, ...
///
/// There is no indexing, removal or shrinking: elements are appended and iterated in order.
///
/// # Example
/// ```
/// use slotpool::{BareVector, FixedPool, PoolError};
///
/// // Every buffer up to 15 `u32`s fits a single slot.
/// let pool = FixedPool::<[u32; 16], 2>::new();
/// let mut v = BareVector::new_in(pool.clone());
/// for i in 0..10 {
///     v.push(i)?;
/// }
/// assert_eq!(v.capacity(), 15);
/// assert_eq!(pool.outstanding(), 1);
/// assert!(v.iter().copied().eq(0..10));
/// # Ok::<(), PoolError>(())
/// ```
pub struct BareVector<T, A: Allocator = Global> {
    ptr: NonNull<T>,
    cap: usize,
    len: usize,
    alloc: A,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, A: Allocator + Send> Send for BareVector<T, A> {}
unsafe impl<T: Sync, A: Allocator + Sync> Sync for BareVector<T, A> {}

impl<T> BareVector<T> {
    /// Creates an empty vector backed by the global allocator.
    #[inline]
    pub fn new() -> Self {
        Self::new_in(Global)
    }
}

impl<T> Default for BareVector<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Allocator> BareVector<T, A> {
    /// Creates an empty vector that will take its buffers from `alloc`.
    ///
    /// Nothing is allocated until the first [`push`](BareVector::push).
    #[inline]
    pub const fn new_in(alloc: A) -> Self {
        Self {
            ptr: NonNull::dangling(),
            cap: 0,
            len: 0,
            alloc,
            _marker: PhantomData,
        }
    }

    /// Number of elements appended so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True until the first successful [`push`](BareVector::push).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the current buffer holds.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// The allocator handle buffers are taken from.
    #[inline]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Iterates over the elements in append order.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, T> {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }.iter()
    }

    /// Moves the contents out, leaving `self` empty with no buffer.
    ///
    /// The returned vector adopts the buffer; `self` keeps a handle to the same allocator.
    pub fn take(&mut self) -> Self
    where
        A: Clone,
    {
        let empty = Self::new_in(self.alloc.clone());
        mem::replace(self, empty)
    }
}

impl<T, A: CheckedAllocator> BareVector<T, A> {
    /// Appends `value`, growing the buffer if it is full.
    ///
    /// # Errors
    /// Whatever the allocator reports when the larger buffer cannot be obtained or the old one
    /// cannot be released. The vector is left unchanged and `value` is dropped.
    pub fn push(&mut self, value: T) -> Result<(), PoolError> {
        if self.len == self.cap {
            self.grow()?;
        }
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    fn grow(&mut self) -> Result<(), PoolError> {
        let new_cap = self
            .cap
            .checked_mul(2)
            .and_then(|cap| cap.checked_add(1))
            .ok_or(Misuse::CapacityOverflow)?;
        let old_layout = buffer_layout::<T>(self.cap)?;
        let new_layout = buffer_layout::<T>(new_cap)?;
        let new_ptr = self.alloc.try_allocate(new_layout)?.cast::<T>();
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len) };

        if self.cap > 0 {
            if let Err(err) = unsafe { self.alloc.try_deallocate(self.ptr.cast(), old_layout) } {
                // The elements still live in the old buffer; the new one only holds bit copies.
                unsafe { self.alloc.deallocate(new_ptr.cast(), new_layout) };
                return Err(err);
            }
        }
        tracing::trace!(from = self.cap, to = new_cap, "vector buffer grown");
        self.ptr = new_ptr;
        self.cap = new_cap;
        Ok(())
    }

    /// Deep-copies the elements into a buffer of the same capacity from `alloc`.
    pub fn try_clone_in<B>(&self, alloc: B) -> Result<BareVector<T, B>, PoolError>
    where
        T: Clone,
        B: CheckedAllocator,
    {
        let mut copy: BareVector<T, B> = BareVector::new_in(alloc);
        if self.cap > 0 {
            copy.ptr = copy
                .alloc
                .try_allocate(buffer_layout::<T>(self.cap)?)?
                .cast();
            copy.cap = self.cap;
        }
        for item in self {
            // `len` tracks the written prefix, so a panicking `clone` drops only that.
            unsafe { copy.ptr.as_ptr().add(copy.len).write(item.clone()) };
            copy.len += 1;
        }
        Ok(copy)
    }

    /// Deep-copies the elements, sharing this vector's allocator handle.
    #[inline]
    pub fn try_clone(&self) -> Result<Self, PoolError>
    where
        T: Clone,
        A: Clone,
    {
        self.try_clone_in(self.alloc.clone())
    }
}

impl<T: Clone, A: CheckedAllocator + Clone> Clone for BareVector<T, A> {
    /// # Panics
    /// If the allocator cannot provide the copy's buffer.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(copy) => copy,
            Err(err) => panic!("cannot clone vector of capacity {}: {err}", self.cap),
        }
    }
}

impl<T, A: Allocator> Drop for BareVector<T, A> {
    fn drop(&mut self) {
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len));
        }
        if self.cap > 0 {
            if let Ok(layout) = buffer_layout::<T>(self.cap) {
                unsafe { self.alloc.deallocate(self.ptr.cast(), layout) }
            }
        }
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a BareVector<T, A> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: fmt::Debug, A: Allocator> fmt::Debug for BareVector<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[inline]
fn buffer_layout<T>(cap: usize) -> Result<Layout, PoolError> {
    Layout::array::<T>(cap).map_err(|_| Misuse::CapacityOverflow.into())
}
