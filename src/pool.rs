//! Fixed-capacity slot pool.

use crate::{as_usize, ArenaAllocator, CheckedAllocator, Misuse, PoolError};
use alloc::{rc::Rc, vec::Vec};
use allocator_api2::alloc::{AllocError, Allocator, Global};
use core::{alloc::Layout, cell::RefCell, fmt, marker::PhantomData, mem, ptr::NonNull};

/// Backing block shared by every handle of one pool.
struct Arena {
    block: NonNull<u8>,
    block_layout: Layout,
    slot: Layout,
    capacity: usize,
    /// Stack of free slot indices, top is the next slot handed out.
    free: RefCell<Vec<usize>>,
}

impl Arena {
    fn new(slot: Layout, capacity: usize) -> Result<Self, PoolError> {
        let size = slot
            .size()
            .checked_mul(capacity)
            .ok_or(Misuse::CapacityOverflow)?;
        let block_layout =
            Layout::from_size_align(size, slot.align()).map_err(|_| Misuse::CapacityOverflow)?;
        let block = if size == 0 {
            dangling(slot.align())
        } else {
            Global.allocate(block_layout)?.cast::<u8>()
        };
        // Descending push, so slot 0 is handed out first.
        let free = (0..capacity).rev().collect();
        Ok(Self {
            block,
            block_layout,
            slot,
            capacity,
            free: RefCell::new(free),
        })
    }

    #[inline]
    fn free_slots(&self) -> usize {
        self.free.borrow().len()
    }

    #[inline]
    fn fits(&self, layout: Layout) -> bool {
        layout.size() <= self.slot.size() && layout.align() <= self.slot.align()
    }

    fn index_of(&self, ptr: *mut u8) -> Option<usize> {
        let ptr = NonNull::new(ptr)?;
        let offset = as_usize(ptr).checked_sub(as_usize(self.block))?;
        if offset % self.slot.size() != 0 {
            return None;
        }
        let index = offset / self.slot.size();
        (index < self.capacity).then_some(index)
    }

    fn acquire(&self, layout: Layout) -> Result<NonNull<[u8]>, PoolError> {
        if layout.size() == 0 {
            return Ok(NonNull::slice_from_raw_parts(dangling(layout.align()), 0));
        }
        if !self.fits(layout) {
            return Err(refused(layout, Misuse::UnsupportedLayout.into()));
        }
        let mut free = self.free.borrow_mut();
        let Some(index) = free.pop() else {
            return Err(refused(layout, PoolError::OutOfMemory));
        };
        tracing::trace!(slot = index, free = free.len(), "slot handed out");
        let ptr = unsafe { self.block.add(index * self.slot.size()) };
        Ok(NonNull::slice_from_raw_parts(ptr, self.slot.size()))
    }

    fn release(&self, ptr: *mut u8, layout: Layout) -> Result<(), PoolError> {
        if layout.size() == 0 {
            return Ok(());
        }
        if !self.fits(layout) {
            return Err(refused(layout, Misuse::UnsupportedLayout.into()));
        }
        let Some(index) = self.index_of(ptr) else {
            return Err(refused(layout, Misuse::BadPointer.into()));
        };
        let mut free = self.free.borrow_mut();
        // Only catches a release into a pool that has nothing outstanding.
        if free.len() == self.capacity {
            return Err(refused(layout, PoolError::LogicError));
        }
        free.push(index);
        tracing::trace!(slot = index, free = free.len(), "slot returned");
        Ok(())
    }

    fn contains(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        let block_start = as_usize(self.block);
        let block_end = block_start.saturating_add(self.block_layout.size());
        let alloc_start = as_usize(ptr);
        let alloc_end = alloc_start.saturating_add(layout.size());
        block_start <= alloc_start && block_end >= alloc_end
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if self.block_layout.size() != 0 {
            unsafe { Global.deallocate(self.block, self.block_layout) }
        }
    }
}

/// Pool of `N` slots, each large enough for one `T`.
///
/// Slots are handed out from a free list with stack discipline: a fresh pool hands out the
/// lowest slot first, and afterwards the most recently released slot is the next one reused.
///
/// A pool is a handle. [`Clone`] and [`rebind`](FixedPool::rebind) produce handles to the
/// *same* arena, so containers that copy, move or swap their allocator keep sharing one pool.
/// Only [`fresh`](FixedPool::fresh) creates a new arena. The arena is released when the last
/// handle is dropped.
///
/// # Example
/// ```
/// use slotpool::{FixedPool, PoolError};
///
/// let pool = FixedPool::<u64, 2>::new();
/// let a = pool.allocate(1)?;
/// let b = pool.allocate(1)?;
/// assert_eq!(pool.allocate(1), Err(PoolError::OutOfMemory));
///
/// unsafe { pool.deallocate(b.as_ptr(), 1)? };
/// assert_eq!(pool.allocate(1)?, b);
/// # unsafe { pool.deallocate(a.as_ptr(), 1)?; pool.deallocate(b.as_ptr(), 1)? };
/// # Ok::<(), PoolError>(())
/// ```
pub struct FixedPool<T, const N: usize> {
    arena: Rc<Arena>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, const N: usize> FixedPool<T, N> {
    /// Allocates a fresh arena of `N` slots.
    ///
    /// # Panics
    /// If the arena size overflows `isize::MAX` or the global allocator fails.
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(pool) => pool,
            Err(err) => panic!("cannot create a pool of {N} slots: {err}"),
        }
    }

    /// Allocates a fresh arena of `N` slots, reporting failure instead of panicking.
    pub fn try_new() -> Result<Self, PoolError> {
        Ok(Self::from_arena(Arena::new(slot_layout::<T>()?, N)?))
    }

    fn from_arena(arena: Arena) -> Self {
        Self {
            arena: Rc::new(arena),
            _marker: PhantomData,
        }
    }

    /// Allocates a new, fully free arena with the same slot layout as this one.
    ///
    /// This is what a container should use when a copy must not share its source's pool.
    ///
    /// # Panics
    /// Under the same conditions as [`FixedPool::new`].
    pub fn fresh(&self) -> Self {
        match Arena::new(self.arena.slot, N) {
            Ok(arena) => Self::from_arena(arena),
            Err(err) => panic!("cannot create a pool of {N} slots: {err}"),
        }
    }

    /// Returns a handle for elements of type `U` that shares this pool's arena and free list.
    ///
    /// Slots keep the layout of the type the arena was created for: requests for a `U` that
    /// does not fit are refused with [`Misuse::UnsupportedLayout`].
    pub fn rebind<U>(&self) -> FixedPool<U, N> {
        FixedPool {
            arena: Rc::clone(&self.arena),
            _marker: PhantomData,
        }
    }

    /// Total number of slots.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of slots currently available.
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.arena.free_slots()
    }

    /// Number of slots currently handed out.
    #[inline]
    pub fn outstanding(&self) -> usize {
        N - self.free_slots()
    }

    /// Layout of one slot.
    #[inline]
    pub fn slot_layout(&self) -> Layout {
        self.arena.slot
    }

    /// Takes one slot for `count` elements of `T`.
    ///
    /// Only `count == 1` takes a slot. `count == 0` returns a dangling, well-aligned pointer
    /// without touching the pool.
    ///
    /// # Errors
    /// - [`Misuse::NotEnoughMemory`] if `count > N`;
    /// - [`Misuse::UnsupportedLayout`] if `count > 1`, or a `T` does not fit a slot;
    /// - [`PoolError::OutOfMemory`] if every slot is handed out.
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>, PoolError> {
        let layout = self.request_layout(count)?;
        Ok(self.arena.acquire(layout)?.cast())
    }

    /// Returns the slot at `ptr` to the free list.
    ///
    /// `count == 0` is a no-op, matching [`FixedPool::allocate`].
    ///
    /// # Errors
    /// - [`Misuse::NotEnoughMemory`] if `count > N`;
    /// - [`Misuse::BadPointer`] if `ptr` is null or not a slot of this pool;
    /// - [`PoolError::LogicError`] if no slot is outstanding.
    ///
    /// Releasing the same slot twice while *other* slots are outstanding is not detected.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`FixedPool::allocate`] on a handle of this arena with
    /// the same `count`, and must not have been released since. Any value stored in the slot is
    /// not dropped.
    pub unsafe fn deallocate(&self, ptr: *mut T, count: usize) -> Result<(), PoolError> {
        let layout = self.request_layout(count)?;
        self.arena.release(ptr.cast(), layout)
    }

    /// Maps a typed request onto the arena: nothing for `count == 0`, a whole slot for one `T`.
    fn request_layout(&self, count: usize) -> Result<Layout, PoolError> {
        if count > N {
            return Err(Misuse::NotEnoughMemory.into());
        }
        match count {
            0 => Ok(Layout::from_size_align(0, mem::align_of::<T>())
                .map_err(|_| Misuse::CapacityOverflow)?),
            // Zero-sized `T` still takes a slot, so every allocation is counted.
            1 if self.arena.fits(Layout::new::<T>()) => Ok(self.arena.slot),
            _ => Err(Misuse::UnsupportedLayout.into()),
        }
    }
}

impl<T, const N: usize> Default for FixedPool<T, N> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Clone for FixedPool<T, N> {
    #[inline]
    fn clone(&self) -> Self {
        self.rebind()
    }
}

impl<T, const N: usize> fmt::Debug for FixedPool<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedPool")
            .field("block", &self.arena.block)
            .field("slot", &self.arena.slot)
            .field("capacity", &N)
            .field("free", &self.free_slots())
            .finish()
    }
}

/// Handles are equal when they share one arena and report the same free slot count.
impl<T, U, const N: usize> PartialEq<FixedPool<U, N>> for FixedPool<T, N> {
    #[inline]
    fn eq(&self, other: &FixedPool<U, N>) -> bool {
        Rc::ptr_eq(&self.arena, &other.arena) && self.free_slots() == other.free_slots()
    }
}

impl<T, const N: usize> Eq for FixedPool<T, N> {}

unsafe impl<T, const N: usize> Allocator for FixedPool<T, N> {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.arena.acquire(layout).map_err(|_| AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if let Err(err) = self.arena.release(ptr.as_ptr(), layout) {
            tracing::error!(%err, ?layout, "slot release refused");
        }
    }
}

impl<T, const N: usize> CheckedAllocator for FixedPool<T, N> {
    #[inline]
    fn try_allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, PoolError> {
        self.arena.acquire(layout)
    }

    #[inline]
    unsafe fn try_deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> Result<(), PoolError> {
        self.arena.release(ptr.as_ptr(), layout)
    }
}

impl<T, const N: usize> ArenaAllocator for FixedPool<T, N> {
    #[inline]
    fn contains(&self, ptr: NonNull<u8>, layout: Layout) -> bool {
        self.arena.contains(ptr, layout)
    }
}

fn slot_layout<T>() -> Result<Layout, PoolError> {
    let layout = Layout::new::<T>();
    // Zero-sized `T` still gets one byte per slot so slots have distinct addresses.
    Layout::from_size_align(layout.size().max(1), layout.align())
        .map(|layout| layout.pad_to_align())
        .map_err(|_| Misuse::CapacityOverflow.into())
}

#[inline]
fn dangling(align: usize) -> NonNull<u8> {
    // `Layout` guarantees a non-zero power of two.
    unsafe { NonNull::new_unchecked(align as *mut u8) }
}

#[inline]
fn refused(layout: Layout, err: PoolError) -> PoolError {
    tracing::debug!(%err, size = layout.size(), align = layout.align(), "request refused");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr<T>(ptr: NonNull<T>) -> usize {
        as_usize(ptr)
    }

    #[test]
    fn fresh_pool_hands_out_lowest_slot_first() {
        let pool = FixedPool::<u32, 4>::new();
        let base = as_usize(pool.arena.block);

        let first = pool.allocate(1).unwrap();
        let second = pool.allocate(1).unwrap();
        assert_eq!(addr(first), base);
        assert_eq!(addr(second), base + 4);
        assert_eq!(pool.free_slots(), 2);
        assert_eq!(pool.outstanding(), 2);
    }

    #[test]
    fn released_slot_is_reused_first() {
        let pool = FixedPool::<u64, 3>::new();
        let slots: Vec<_> = (0..3).map(|_| pool.allocate(1).unwrap()).collect();

        unsafe { pool.deallocate(slots[1].as_ptr(), 1).unwrap() };
        assert_eq!(pool.allocate(1).unwrap(), slots[1]);

        unsafe {
            pool.deallocate(slots[0].as_ptr(), 1).unwrap();
            pool.deallocate(slots[2].as_ptr(), 1).unwrap();
        }
        assert_eq!(pool.allocate(1).unwrap(), slots[2]);
        assert_eq!(pool.allocate(1).unwrap(), slots[0]);
    }

    #[test]
    fn exhausted_pool_reports_out_of_memory() {
        let pool = FixedPool::<(i32, i32), 10>::new();
        for _ in 0..10 {
            pool.allocate(1).unwrap();
        }
        assert_eq!(pool.allocate(1), Err(PoolError::OutOfMemory));
        assert_eq!(pool.free_slots(), 0);
    }

    #[test]
    fn outstanding_slots_are_unique_and_in_bounds() {
        const N: usize = 16;
        let pool = FixedPool::<u16, N>::new();
        let layout = Layout::new::<u16>();
        let mut live: Vec<NonNull<u16>> = Vec::new();

        // Deterministic mix of allocations and releases that never exceeds N outstanding.
        let mut state = 0x2545_f491_u32;
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let release = !live.is_empty() && (live.len() == N || state % 3 == 0);
            if release {
                let slot = live.swap_remove(state as usize % live.len());
                unsafe { pool.deallocate(slot.as_ptr(), 1).unwrap() };
            } else {
                let slot = pool.allocate(1).unwrap();
                assert!(pool.contains(slot.cast(), layout));
                live.push(slot);
            }
            let unique: HashSet<_> = live.iter().map(|slot| addr(*slot)).collect();
            assert_eq!(unique.len(), live.len());
            assert_eq!(pool.free_slots() + live.len(), N);
        }
    }

    #[test]
    fn oversized_requests_are_invalid() {
        let pool = FixedPool::<u32, 4>::new();
        let invalid = PoolError::InvalidArgument(Misuse::NotEnoughMemory);

        assert_eq!(pool.allocate(5), Err(invalid));
        let slot = pool.allocate(1).unwrap();
        assert_eq!(unsafe { pool.deallocate(slot.as_ptr(), 5) }, Err(invalid));
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn multi_slot_requests_are_unsupported() {
        let pool = FixedPool::<u32, 4>::new();
        assert_eq!(
            pool.allocate(2),
            Err(PoolError::InvalidArgument(Misuse::UnsupportedLayout))
        );
        assert_eq!(pool.free_slots(), 4);
    }

    #[test]
    fn zero_count_does_not_touch_the_pool() {
        let pool = FixedPool::<u64, 1>::new();
        let ptr = pool.allocate(0).unwrap();
        assert_eq!(addr(ptr) % core::mem::align_of::<u64>(), 0);
        assert_eq!(pool.free_slots(), 1);
        unsafe { pool.deallocate(ptr.as_ptr(), 0).unwrap() };
        assert_eq!(pool.free_slots(), 1);
    }

    #[test]
    fn release_into_fully_free_pool_is_a_logic_error() {
        let pool = FixedPool::<u32, 2>::new();
        let slot = pool.allocate(1).unwrap();
        unsafe { pool.deallocate(slot.as_ptr(), 1).unwrap() };
        assert_eq!(
            unsafe { pool.deallocate(slot.as_ptr(), 1) },
            Err(PoolError::LogicError)
        );
        assert_eq!(pool.free_slots(), 2);
    }

    #[test]
    fn double_release_with_other_slots_outstanding_goes_unnoticed() {
        let pool = FixedPool::<u32, 3>::new();
        let a = pool.allocate(1).unwrap();
        let _b = pool.allocate(1).unwrap();
        unsafe {
            pool.deallocate(a.as_ptr(), 1).unwrap();
            pool.deallocate(a.as_ptr(), 1).unwrap();
        }
        assert_eq!(pool.free_slots(), 3);
    }

    #[test]
    fn foreign_pointers_are_rejected() {
        let pool = FixedPool::<u32, 2>::new();
        let _slot = pool.allocate(1).unwrap();
        let bad = PoolError::InvalidArgument(Misuse::BadPointer);

        assert_eq!(unsafe { pool.deallocate(core::ptr::null_mut(), 1) }, Err(bad));

        let mut outside = 0u32;
        assert_eq!(unsafe { pool.deallocate(&mut outside, 1) }, Err(bad));

        let misaligned = unsafe { pool.arena.block.as_ptr().add(1) }.cast::<u32>();
        assert_eq!(unsafe { pool.deallocate(misaligned, 1) }, Err(bad));
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn clones_and_rebinds_share_the_arena() {
        let pool = FixedPool::<(i32, i32), 4>::new();
        let copy = pool.clone();
        let bytes = pool.rebind::<[u8; 8]>();

        let slot = bytes.allocate(1).unwrap();
        assert_eq!(pool.free_slots(), 3);
        assert_eq!(copy.free_slots(), 3);
        assert!(pool.contains(slot.cast(), Layout::new::<[u8; 8]>()));
        assert!(pool == bytes);
        assert_eq!(pool, copy);

        unsafe { copy.deallocate(slot.as_ptr().cast::<(i32, i32)>(), 1).unwrap() };
        assert_eq!(bytes.free_slots(), 4);
    }

    #[test]
    fn rebind_to_larger_type_is_refused() {
        let pool = FixedPool::<u8, 4>::new();
        let wide = pool.rebind::<u64>();
        assert_eq!(
            wide.allocate(1),
            Err(PoolError::InvalidArgument(Misuse::UnsupportedLayout))
        );
    }

    #[test]
    fn fresh_arena_is_distinct() {
        let pool = FixedPool::<u32, 2>::new();
        let _slot = pool.allocate(1).unwrap();

        let other = pool.fresh();
        assert_eq!(other.free_slots(), 2);
        assert_eq!(other.slot_layout(), pool.slot_layout());
        assert!(pool != other);
        assert!(FixedPool::<u32, 2>::new() != FixedPool::<u32, 2>::new());
    }

    #[test]
    fn arena_outlives_original_handle() {
        let pool = FixedPool::<u64, 1>::new();
        let copy = pool.clone();
        drop(pool);

        let slot = copy.allocate(1).unwrap();
        unsafe {
            slot.as_ptr().write(7);
            assert_eq!(slot.as_ptr().read(), 7);
            copy.deallocate(slot.as_ptr(), 1).unwrap();
        }
    }

    #[test]
    fn zero_sized_elements_get_distinct_slots() {
        let pool = FixedPool::<(), 2>::new();
        assert_eq!(pool.slot_layout().size(), 1);

        let layout = Layout::from_size_align(1, 1).unwrap();
        let a = pool.try_allocate(layout).unwrap().cast::<u8>();
        let b = pool.try_allocate(layout).unwrap().cast::<u8>();
        assert_ne!(a, b);
    }

    #[test]
    fn zero_sized_elements_are_counted_like_any_other() {
        let pool = FixedPool::<(), 2>::new();
        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(1).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.allocate(1), Err(PoolError::OutOfMemory));

        unsafe {
            pool.deallocate(a.as_ptr(), 1).unwrap();
            pool.deallocate(b.as_ptr(), 1).unwrap();
            assert_eq!(pool.deallocate(a.as_ptr(), 1), Err(PoolError::LogicError));
        }
        assert_eq!(pool.free_slots(), 2);
    }

    #[test]
    fn rebound_release_of_larger_type_is_refused() {
        let pool = FixedPool::<u8, 4>::new();
        let slot = pool.allocate(1).unwrap();
        let wide = pool.rebind::<u64>();
        assert_eq!(
            unsafe { wide.deallocate(slot.as_ptr().cast(), 1) },
            Err(PoolError::InvalidArgument(Misuse::UnsupportedLayout))
        );
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn allocator_interface_refuses_layouts_wider_than_a_slot() {
        let pool = FixedPool::<u32, 4>::new();
        let unsupported = PoolError::InvalidArgument(Misuse::UnsupportedLayout);
        assert_eq!(pool.try_allocate(Layout::new::<u64>()), Err(unsupported));
        assert_eq!(pool.try_allocate(Layout::new::<[u32; 8]>()), Err(unsupported));
        assert_eq!(pool.free_slots(), 4);
    }

    #[test]
    fn empty_pool_refuses_everything() {
        let pool = FixedPool::<u32, 0>::new();
        assert_eq!(
            pool.allocate(1),
            Err(PoolError::InvalidArgument(Misuse::NotEnoughMemory))
        );
    }

    #[test]
    fn vec_with_pool_allocator_grows_inside_one_slot() {
        use allocator_api2::vec::Vec;

        let pool = FixedPool::<[u32; 8], 2>::new();
        let mut v: Vec<u32, _> = Vec::with_capacity_in(4, &pool);
        v.extend([1, 2, 3, 4]);
        assert_eq!(pool.outstanding(), 1);

        v.push(5); // reallocates into the second slot
        assert_eq!(v.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(pool.outstanding(), 1);

        v.try_reserve(16).unwrap_err();
        drop(v);
        assert_eq!(pool.free_slots(), 2);
    }

    #[test]
    fn box_with_pool_allocator_returns_slot_on_drop() {
        use allocator_api2::boxed::Box;

        let pool = FixedPool::<u64, 1>::new();
        let b = Box::new_in(42u64, pool.clone());
        assert!(pool.contains(NonNull::from(&*b).cast(), Layout::new::<u64>()));
        assert_eq!(pool.free_slots(), 0);
        drop(b);
        assert_eq!(pool.free_slots(), 1);
    }
}
