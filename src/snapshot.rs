//! `Snapshot<T>` — a borrowed view protected by an announcement slot.
//!
//! A snapshot costs no count increment to acquire: instead it occupies one
//! of the calling worker's snapshot announcement slots, which inhibits
//! reclamation of the box for as long as the slot announces it. When every
//! slot is busy the engine kicks one, silently converting that snapshot
//! into an ordinary count-holding reference; the handle notices on drop and
//! balances the count.

use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::counted::{self, Counted};

/// A borrowed, non-count-holding view of the value a cell held.
///
/// Obtained from [`AtomicShared::get_snapshot`](crate::AtomicShared::get_snapshot).
/// Cheaper than a full load for short-lived reads: acquiring it performs no
/// count increment. Movable but not clonable; to keep a reference past the
/// snapshot's scope, load the cell instead.
///
/// A snapshot stays on the thread that created it — it is deliberately
/// `!Send` and `!Sync`, since it is bound to one of that worker's
/// announcement slots.
pub struct Snapshot<T: Send + Sync + 'static> {
    ptr: *mut Counted<T>,
    slot: &'static AtomicPtr<()>,
}

impl<T: Send + Sync + 'static> Snapshot<T> {
    /// Bind a snapshot to the slot announcing `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and validated against `slot` by the snapshot
    /// protocol, on the calling worker's own slot.
    #[inline]
    pub(crate) unsafe fn new(ptr: *mut Counted<T>, slot: &'static AtomicPtr<()>) -> Self {
        debug_assert!(!ptr.is_null());
        Self { ptr, slot }
    }

    #[inline]
    pub(crate) fn as_counted(&self) -> *mut Counted<T> {
        self.ptr
    }

    /// The address of the viewed value, usable for identity comparisons.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        // SAFETY: the announcement (or the kicked-in count unit) keeps the
        // box alive while the snapshot exists.
        unsafe { (*self.ptr).value_ptr() }
    }

    /// Whether `self` and `other` view the same box.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }

    /// Observational read of the viewed box's reference count.
    #[inline]
    pub fn use_count(&self) -> usize {
        // SAFETY: as in as_ptr.
        unsafe { (*self.ptr).load_refs() }
    }
}

impl<T: Send + Sync + 'static> Drop for Snapshot<T> {
    fn drop(&mut self) {
        // If the slot still announces this exact pointer the snapshot was
        // never kicked: clearing the slot releases the protection with no
        // count change. Otherwise the slot was converted to an owning claim
        // on our behalf, and the matching decrement is owed here.
        if self.slot.load(Ordering::SeqCst) == self.ptr as *mut () {
            self.slot.store(core::ptr::null_mut(), Ordering::SeqCst);
        } else {
            // SAFETY: the kick added one unit for this handle.
            unsafe { counted::decrement(self.ptr) };
        }
    }
}

impl<T: Send + Sync + 'static> Deref for Snapshot<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: as in as_ptr.
        unsafe { (*self.ptr).value() }
    }
}

impl<T: Send + Sync + 'static + fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: Send + Sync + 'static + fmt::Display> fmt::Display for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
