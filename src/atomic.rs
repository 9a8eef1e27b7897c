//! `AtomicShared<T>` — an atomic cell holding at most one counted
//! reference.
//!
//! The cell owns one unit of its referent's count while non-null. Reads go
//! through the announcement protocol; replacements retire the displaced
//! pointer so its decrement is deferred until no reader announces it.

use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::counted::{self, Counted};
use crate::reclaim;
use crate::shared::Shared;
use crate::snapshot::Snapshot;

/// An atomically updatable cell holding at most one [`Shared<T>`]
/// reference.
///
/// A single logical memory location: the cell is neither copyable nor
/// movable once shared. All pointer accesses are sequentially consistent.
///
/// # Examples
///
/// ```rust
/// use petek::{AtomicShared, Shared};
///
/// let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
/// let handle = cell.load().unwrap();
/// assert_eq!(*handle, "Hello, World");
/// assert!(handle.use_count() >= 2);
/// ```
pub struct AtomicShared<T: Send + Sync + 'static> {
    ptr: AtomicPtr<Counted<T>>,
}

// SAFETY: the cell is a shared-write location mutated only through atomic
// operations; the values it points at are Send + Sync.
unsafe impl<T: Send + Sync + 'static> Send for AtomicShared<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for AtomicShared<T> {}

impl<T: Send + Sync + 'static> AtomicShared<T> {
    /// Create an empty cell.
    #[inline]
    pub fn null() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Create a cell adopting `desired`'s count unit. No atomic operation
    /// touches the count.
    #[inline]
    pub fn new(desired: Option<Shared<T>>) -> Self {
        Self {
            ptr: AtomicPtr::new(into_raw(desired)),
        }
    }

    /// The cell's pointer word reinterpreted type-erased for the engine.
    #[inline]
    fn erased(&self) -> &AtomicPtr<()> {
        // SAFETY: AtomicPtr<Counted<T>> and AtomicPtr<()> share one layout
        // (a single pointer word); the engine only compares and copies the
        // word, never dereferences through this view.
        unsafe { &*(&self.ptr as *const AtomicPtr<Counted<T>> as *const AtomicPtr<()>) }
    }

    /// Announcement-stabilized read, returning an owning handle.
    ///
    /// The returned handle carries a freshly added count unit; the
    /// announcement taken during the read is released before returning.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::{AtomicShared, Shared};
    ///
    /// let cell = AtomicShared::new(Some(Shared::new(7)));
    /// assert_eq!(*cell.load().unwrap(), 7);
    /// assert!(AtomicShared::<i32>::null().load().is_none());
    /// ```
    pub fn load(&self) -> Option<Shared<T>> {
        let acquired = reclaim::acquire(self.erased());
        let ptr = acquired.ptr() as *mut Counted<T>;
        if ptr.is_null() {
            None
        } else {
            // SAFETY: the validated announcement keeps the box alive while
            // we take our own unit; `acquired` clears the slot on drop.
            unsafe { (*ptr).add_refs(1) };
            Some(unsafe { Shared::from_counted(ptr) })
        }
    }

    /// Replace the cell's reference, retiring the displaced one.
    ///
    /// The cell adopts `desired`'s count unit. The old referent's decrement
    /// is deferred until no reader announces it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::{AtomicShared, Shared};
    ///
    /// let cell = AtomicShared::null();
    /// cell.store(Some(Shared::new(1)));
    /// cell.store(Some(Shared::new(2)));
    /// assert_eq!(*cell.load().unwrap(), 2);
    /// ```
    pub fn store(&self, desired: Option<Shared<T>>) {
        let old = self.ptr.swap(into_raw(desired), Ordering::SeqCst);
        if !old.is_null() {
            reclaim::retire(old as *mut (), counted::decrement_erased::<T>);
        }
    }

    /// Replace the cell's reference, returning the previous one.
    ///
    /// Both count units transfer untouched: the cell adopts `desired`'s and
    /// the returned handle adopts the cell's.
    pub fn exchange(&self, desired: Option<Shared<T>>) -> Option<Shared<T>> {
        let old = self.ptr.swap(into_raw(desired), Ordering::SeqCst);
        // SAFETY: the cell owned one unit on `old`; it moves to the handle.
        (!old.is_null()).then(|| unsafe { Shared::from_counted(old) })
    }

    /// Exchange the cell's reference with `handle`'s in place, preserving
    /// both counts.
    ///
    /// The non-atomic side must not be accessed concurrently; the `&mut`
    /// borrow enforces that here.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::{AtomicShared, Shared};
    ///
    /// let cell = AtomicShared::new(Some(Shared::new(1)));
    /// let mut handle = Some(Shared::new(2));
    /// cell.swap(&mut handle);
    /// assert_eq!(*handle.unwrap(), 1);
    /// assert_eq!(*cell.load().unwrap(), 2);
    /// ```
    pub fn swap(&self, handle: &mut Option<Shared<T>>) {
        let old = self.ptr.swap(into_raw(handle.take()), Ordering::SeqCst);
        *handle = (!old.is_null()).then(|| {
            // SAFETY: the cell owned one unit on `old`; it moves to the
            // handle.
            unsafe { Shared::from_counted(old) }
        });
    }

    /// Snapshot-stabilized read, returning a borrowed view with no count
    /// change.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::{AtomicShared, Shared};
    ///
    /// let cell = AtomicShared::new(Some(Shared::new(String::from("Hello, World"))));
    /// let snap = cell.get_snapshot().unwrap();
    /// cell.store(Some(Shared::new(String::from("Other"))));
    /// assert_eq!(*snap, "Hello, World");
    /// assert_eq!(*cell.load().unwrap(), "Other");
    /// ```
    pub fn get_snapshot(&self) -> Option<Snapshot<T>> {
        let (ptr, slot) = reclaim::protect_snapshot(self.erased(), counted::bump_erased::<T>)?;
        // SAFETY: protect_snapshot validated the announcement on the
        // calling worker's own slot and never returns null here.
        Some(unsafe { Snapshot::new(ptr as *mut Counted<T>, slot) })
    }

    /// Compare-and-swap, copy form: on success the cell takes a fresh count
    /// unit on `desired` and the caller keeps theirs.
    ///
    /// Identity is box address; two boxes holding equal values never
    /// match. `expected` may be an owning handle or a snapshot, bare or in
    /// `Option`. Returns whether the replacement happened; on failure the
    /// cell, `expected`, and `desired` are all unchanged.
    ///
    /// The desired pointer is reserved in the worker's primary announcement
    /// slot across the exchange and the increment: `desired` may borrow a
    /// handle stored inside the object the exchange unlinks, whose own
    /// teardown could otherwise race the count to zero first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::{AtomicShared, Shared};
    ///
    /// let cell = AtomicShared::new(Some(Shared::new(1)));
    /// let current = cell.load();
    /// let next = Some(Shared::new(2));
    /// assert!(cell.compare_and_swap(&current, &next));
    /// assert!(!cell.compare_and_swap(&current, &next));
    /// assert_eq!(*cell.load().unwrap(), 2);
    /// ```
    pub fn compare_and_swap<E>(&self, expected: &E, desired: &Option<Shared<T>>) -> bool
    where
        E: Expected<T>,
    {
        let expected_ptr = expected.expected_ptr();
        let desired_ptr = desired.as_ref().map_or(ptr::null_mut(), Shared::as_counted);
        let reserved = (!desired_ptr.is_null()).then(|| reclaim::reserve(desired_ptr as *mut ()));
        match self.ptr.compare_exchange(
            expected_ptr,
            desired_ptr,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(old) => {
                if !desired_ptr.is_null() {
                    // SAFETY: the reservation keeps the box alive even if
                    // the displaced referent owned desired's last unit.
                    unsafe { (*desired_ptr).add_refs(1) };
                }
                // The cell now holds its own unit; retiring below may run
                // destructors that reuse the primary slot, so release the
                // reservation first.
                drop(reserved);
                if !old.is_null() {
                    reclaim::retire(old as *mut (), counted::decrement_erased::<T>);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Compare-and-swap, move form: on success the cell adopts `desired`'s
    /// existing count unit.
    ///
    /// No reservation is needed — the moved-in handle itself guarantees the
    /// count stays positive. On failure `desired` is handed back unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::{AtomicShared, Shared};
    ///
    /// let cell = AtomicShared::new(Some(Shared::new(1)));
    /// let current = cell.load();
    /// match cell.compare_exchange(&current, Some(Shared::new(2))) {
    ///     Ok(()) => assert_eq!(*cell.load().unwrap(), 2),
    ///     Err(_rejected) => unreachable!(),
    /// }
    /// ```
    pub fn compare_exchange<E>(
        &self,
        expected: &E,
        desired: Option<Shared<T>>,
    ) -> Result<(), Option<Shared<T>>>
    where
        E: Expected<T>,
    {
        let expected_ptr = expected.expected_ptr();
        let desired_ptr = desired.as_ref().map_or(ptr::null_mut(), Shared::as_counted);
        match self.ptr.compare_exchange(
            expected_ptr,
            desired_ptr,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(old) => {
                // Transfer desired's unit to the cell.
                if let Some(handle) = desired {
                    handle.into_counted();
                }
                if !old.is_null() {
                    reclaim::retire(old as *mut (), counted::decrement_erased::<T>);
                }
                Ok(())
            }
            Err(_) => Err(desired),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for AtomicShared<T> {
    fn drop(&mut self) {
        // Retire rather than decrement in place: long chains of cell-linked
        // objects then tear down iteratively through the deferred queue,
        // one entry per link, instead of by recursion.
        let ptr = *self.ptr.get_mut();
        if !ptr.is_null() {
            reclaim::retire(ptr as *mut (), counted::decrement_erased::<T>);
        }
    }
}

impl<T: Send + Sync + 'static> Default for AtomicShared<T> {
    /// An empty cell.
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Send + Sync + 'static> From<Shared<T>> for AtomicShared<T> {
    fn from(desired: Shared<T>) -> Self {
        Self::new(Some(desired))
    }
}

impl<T: Send + Sync + 'static> From<Option<Shared<T>>> for AtomicShared<T> {
    fn from(desired: Option<Shared<T>>) -> Self {
        Self::new(desired)
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for AtomicShared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicShared({:p})", self.ptr.load(Ordering::Relaxed))
    }
}

#[inline]
fn into_raw<T: Send + Sync + 'static>(handle: Option<Shared<T>>) -> *mut Counted<T> {
    handle.map_or(ptr::null_mut(), Shared::into_counted)
}

mod sealed {
    use crate::counted::Counted;
    use crate::shared::Shared;
    use crate::snapshot::Snapshot;

    pub trait Sealed<T: Send + Sync + 'static> {
        fn expected_ptr(&self) -> *mut Counted<T>;
    }

    impl<T: Send + Sync + 'static> Sealed<T> for Shared<T> {
        fn expected_ptr(&self) -> *mut Counted<T> {
            self.as_counted()
        }
    }

    impl<T: Send + Sync + 'static> Sealed<T> for Snapshot<T> {
        fn expected_ptr(&self) -> *mut Counted<T> {
            self.as_counted()
        }
    }

    impl<T: Send + Sync + 'static> Sealed<T> for Option<Shared<T>> {
        fn expected_ptr(&self) -> *mut Counted<T> {
            self.as_ref()
                .map_or(core::ptr::null_mut(), Shared::as_counted)
        }
    }

    impl<T: Send + Sync + 'static> Sealed<T> for Option<Snapshot<T>> {
        fn expected_ptr(&self) -> *mut Counted<T> {
            self.as_ref()
                .map_or(core::ptr::null_mut(), Snapshot::as_counted)
        }
    }
}

use sealed::Sealed;

/// Values usable as the expected side of a compare-and-swap: owning handles
/// and snapshots, bare or in `Option` (where `None` means an empty cell).
///
/// Sealed; implemented for [`Shared<T>`], [`Snapshot<T>`],
/// `Option<Shared<T>>`, and `Option<Snapshot<T>>`.
pub trait Expected<T: Send + Sync + 'static>: Sealed<T> {}

impl<T: Send + Sync + 'static> Expected<T> for Shared<T> {}
impl<T: Send + Sync + 'static> Expected<T> for Snapshot<T> {}
impl<T: Send + Sync + 'static> Expected<T> for Option<Shared<T>> {}
impl<T: Send + Sync + 'static> Expected<T> for Option<Snapshot<T>> {}
