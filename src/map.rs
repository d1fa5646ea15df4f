//! Ordered map taking one allocation per entry.

use crate::{CheckedAllocator, FixedPool, PoolError};
use allocator_api2::alloc::{Allocator, Global};
use core::{
    alloc::Layout,
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    iter::FusedIterator,
    marker::PhantomData,
    mem,
    ptr::NonNull,
};

type Link<K, V> = Option<NonNull<Node<K, V>>>;

/// One entry of a [`SortedMap`].
///
/// Only named so that pools can be sized for it, see [`MapPool`].
pub struct Node<K, V> {
    key: K,
    value: V,
    next: Link<K, V>,
}

/// Pool with room for exactly `N` entries of a `SortedMap<K, V, _>`.
pub type MapPool<K, V, const N: usize> = FixedPool<Node<K, V>, N>;

/// Map that keeps its entries sorted by key.
///
/// Entries live in a singly linked list, each node being a single allocation of
/// `Layout::new::<Node<K, V>>()`, so a [`MapPool`] of `N` slots holds exactly `N` entries.
/// Lookups and inserts walk the list; this container exists to drive per-entry allocators,
/// not to be fast.
///
/// Moving or swapping a map moves its allocator handle along with its entries.
///
/// # Example
/// ```
/// use slotpool::{PoolError, SortedMap};
///
/// let mut map = SortedMap::new();
/// map.insert("b", 2)?;
/// map.insert("a", 1)?;
/// assert_eq!(map.insert("b", 20)?, Some(2));
/// assert_eq!(map.get("b"), Some(&20));
/// assert!(map.iter().map(|(k, _)| *k).eq(["a", "b"]));
/// # Ok::<(), PoolError>(())
/// ```
pub struct SortedMap<K, V, A: Allocator = Global> {
    head: Link<K, V>,
    len: usize,
    alloc: A,
    _marker: PhantomData<Node<K, V>>,
}

unsafe impl<K: Send, V: Send, A: Allocator + Send> Send for SortedMap<K, V, A> {}
unsafe impl<K: Sync, V: Sync, A: Allocator + Sync> Sync for SortedMap<K, V, A> {}

impl<K, V> SortedMap<K, V> {
    /// Creates an empty map backed by the global allocator.
    #[inline]
    pub fn new() -> Self {
        Self::new_in(Global)
    }
}

impl<K, V> Default for SortedMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, A: Allocator> SortedMap<K, V, A> {
    /// Creates an empty map whose entries are allocated from `alloc`.
    #[inline]
    pub const fn new_in(alloc: A) -> Self {
        Self {
            head: None,
            len: 0,
            alloc,
            _marker: PhantomData,
        }
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the map holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The allocator handle entries are taken from.
    #[inline]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Iterates over the entries in ascending key order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            next: self.head,
            remaining: self.len,
            _marker: PhantomData,
        }
    }

    /// Returns the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).map(|node| unsafe { &(*node.as_ptr()).value })
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key)
            .map(|node| unsafe { &mut (*node.as_ptr()).value })
    }

    /// True if an entry exists for `key`.
    #[inline]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(key).is_some()
    }

    fn find<Q>(&self, key: &Q) -> Link<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut link = self.head;
        while let Some(node) = link {
            let node_ref = unsafe { node.as_ref() };
            match node_ref.key.borrow().cmp(key) {
                Ordering::Less => link = node_ref.next,
                Ordering::Equal => return Some(node),
                Ordering::Greater => break,
            }
        }
        None
    }

    /// Removes `key`, returning its value and giving its node back to the allocator.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut link = &mut self.head;
        while let Some(node) = *link {
            let node_ref = unsafe { &mut *node.as_ptr() };
            match node_ref.key.borrow().cmp(key) {
                Ordering::Less => link = &mut node_ref.next,
                Ordering::Equal => {
                    let Node { value, next, .. } = unsafe { node.as_ptr().read() };
                    *link = next;
                    self.len -= 1;
                    unsafe { self.alloc.deallocate(node.cast(), Layout::new::<Node<K, V>>()) };
                    return Some(value);
                }
                Ordering::Greater => break,
            }
        }
        None
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        let mut link = self.head.take();
        self.len = 0;
        while let Some(node) = link {
            let entry = unsafe { node.as_ptr().read() };
            link = entry.next;
            unsafe { self.alloc.deallocate(node.cast(), Layout::new::<Node<K, V>>()) };
            drop(entry);
        }
    }
}

impl<K: Ord, V, A: CheckedAllocator> SortedMap<K, V, A> {
    /// Inserts `value` under `key`.
    ///
    /// Returns the previous value if `key` was present; replacing a value allocates nothing.
    ///
    /// # Errors
    /// Whatever the allocator reports when a new entry cannot be allocated, e.g.
    /// [`PoolError::OutOfMemory`] once a [`MapPool`] is full. The map is left unchanged.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, PoolError> {
        let mut link = &mut self.head;
        while let Some(node) = *link {
            let node_ref = unsafe { &mut *node.as_ptr() };
            match node_ref.key.cmp(&key) {
                Ordering::Less => link = &mut node_ref.next,
                Ordering::Equal => return Ok(Some(mem::replace(&mut node_ref.value, value))),
                Ordering::Greater => break,
            }
        }

        let node = self
            .alloc
            .try_allocate(Layout::new::<Node<K, V>>())?
            .cast::<Node<K, V>>();
        unsafe {
            node.as_ptr().write(Node {
                key,
                value,
                next: *link,
            })
        };
        *link = Some(node);
        self.len += 1;
        Ok(None)
    }
}

impl<K, V, A: Allocator> Drop for SortedMap<K, V, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<K: fmt::Debug, V: fmt::Debug, A: Allocator> fmt::Debug for SortedMap<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V, A: Allocator> IntoIterator for &'a SortedMap<K, V, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entries of a [`SortedMap`] in ascending key order.
pub struct Iter<'a, K, V> {
    next: Link<K, V>,
    remaining: usize,
    _marker: PhantomData<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = unsafe { self.next?.as_ref() };
        self.next = node.next;
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            next: self.next,
            remaining: self.remaining,
            _marker: PhantomData,
        }
    }
}
