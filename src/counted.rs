//! The counted box: a heap cell holding a user value next to its atomic
//! reference count.
//!
//! All sharing in this crate goes through `*mut Counted<T>` pointers. The
//! count is the only atomic member; the value itself is never moved for the
//! lifetime of the box.

use core::sync::atomic::{fence, AtomicUsize, Ordering};

use crate::reclaim;

/// A user value prepended with its atomic reference count.
///
/// Allocating shared objects through this type ensures the count can always
/// be reached from the box pointer, and that box identity (the address) is
/// stable for the whole lifetime of the value.
pub(crate) struct Counted<T> {
    refs: AtomicUsize,
    value: T,
}

impl<T> Counted<T> {
    /// Heap-allocate a new box holding `value` with a count of one.
    pub(crate) fn boxed(value: T) -> *mut Self {
        Box::into_raw(Box::new(Self {
            refs: AtomicUsize::new(1),
            value,
        }))
    }

    #[inline]
    pub(crate) fn value(&self) -> &T {
        &self.value
    }

    #[inline]
    pub(crate) fn value_ptr(&self) -> *const T {
        &self.value
    }

    /// Pointer to the `value` field from a raw box pointer, without going
    /// through a shared reference.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point to a live `Counted<T>`.
    #[inline]
    pub(crate) unsafe fn value_mut(ptr: *mut Self) -> *mut T {
        unsafe { core::ptr::addr_of_mut!((*ptr).value) }
    }

    /// Add `n` units to the count, returning the previous count.
    ///
    /// Relaxed is enough: a new reference can only be created from an
    /// existing one (or from a validated announcement), so the count is
    /// already at least one and no ordering is carried by the increment.
    #[inline]
    pub(crate) fn add_refs(&self, n: usize) -> usize {
        self.refs.fetch_add(n, Ordering::Relaxed)
    }

    /// Remove `n` units from the count, returning the previous count.
    ///
    /// Release, so that everything done through this reference
    /// happens-before the destructor run by whoever observes the final
    /// decrement.
    #[inline]
    pub(crate) fn release_refs(&self, n: usize) -> usize {
        self.refs.fetch_sub(n, Ordering::Release)
    }

    /// Observational read of the count. May be stale under concurrency.
    #[inline]
    pub(crate) fn load_refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

/// Drop one reference to `ptr`, destroying the box if it was the last.
///
/// When the decrement hits zero the box is unreachable from every cell, so
/// no *new* announcement of it can validate. A worker may still hold a
/// not-yet-released announcement from before the count dropped, though, and
/// freeing under it would invalidate that worker's read. In that case one
/// unit is put back and the final decrement is handed to the engine, which
/// applies it once the announcement is gone.
///
/// # Safety
///
/// `ptr` must point to a live `Counted<T>` and the caller must own one unit
/// of its count.
pub(crate) unsafe fn decrement<T: Send + Sync + 'static>(ptr: *mut Counted<T>) {
    if unsafe { (*ptr).release_refs(1) } == 1 {
        fence(Ordering::Acquire);
        if reclaim::announced(ptr as *mut ()) {
            unsafe { (*ptr).add_refs(1) };
            reclaim::retire(ptr as *mut (), decrement_erased::<T>);
        } else {
            // SAFETY: count reached zero and no announcement protects the
            // pointer; this is the single destruction point.
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

/// Type-erased form of [`decrement`], stored in deferred-queue entries.
///
/// # Safety
///
/// `ptr` must be a live `*mut Counted<T>` for the `T` this was instantiated
/// with, and the caller must own one unit of its count.
pub(crate) unsafe fn decrement_erased<T: Send + Sync + 'static>(ptr: *mut ()) {
    unsafe { decrement(ptr as *mut Counted<T>) }
}

/// Type-erased count increment, recorded next to snapshot slots so the
/// engine can convert an announced pointer into an owning claim without
/// knowing its value type.
///
/// # Safety
///
/// `ptr` must be a live `*mut Counted<T>` for the `T` this was instantiated
/// with.
pub(crate) unsafe fn bump_erased<T: Send + Sync + 'static>(ptr: *mut ()) {
    unsafe { (*(ptr as *mut Counted<T>)).add_refs(1) };
}
