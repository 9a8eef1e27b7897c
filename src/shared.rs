//! `Shared<T>` — an owning, reference-counted handle.
//!
//! A `Shared<T>` contributes exactly one unit to its box's count for as
//! long as it is alive. Nullability is expressed as `Option<Shared<T>>`,
//! which occupies a single pointer.

use core::fmt;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::counted::{self, Counted};

/// An owning handle to a shared, reference-counted value.
///
/// Cloning adds one unit to the count; dropping removes one, destroying the
/// value when the last unit goes. Handles compare by box identity through
/// [`ptr_eq`](Shared::ptr_eq); compare values through `Deref`.
///
/// # Examples
///
/// ```rust
/// use petek::Shared;
///
/// let a = Shared::new(String::from("hello"));
/// let b = a.clone();
/// assert_eq!(*a, "hello");
/// assert!(a.ptr_eq(&b));
/// assert_eq!(a.use_count(), 2);
/// ```
pub struct Shared<T: Send + Sync + 'static> {
    ptr: NonNull<Counted<T>>,
}

// SAFETY: a Shared is a counted reference to immutable shared state; it can
// move between threads and be referenced from several whenever T can.
unsafe impl<T: Send + Sync + 'static> Send for Shared<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for Shared<T> {}

impl<T: Send + Sync + 'static> Shared<T> {
    /// Allocate a new box holding `value` with this handle as its only
    /// reference.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::Shared;
    ///
    /// let v = Shared::new(vec![1, 2, 3]);
    /// assert_eq!(v.use_count(), 1);
    /// ```
    pub fn new(value: T) -> Self {
        // SAFETY: boxed() never returns null.
        Self {
            ptr: unsafe { NonNull::new_unchecked(Counted::boxed(value)) },
        }
    }

    /// Adopt an existing count unit on `ptr` without touching the count.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, live, and the caller must transfer exactly
    /// one unit of its count to the new handle.
    #[inline]
    pub(crate) unsafe fn from_counted(ptr: *mut Counted<T>) -> Self {
        debug_assert!(!ptr.is_null());
        Self {
            ptr: unsafe { NonNull::new_unchecked(ptr) },
        }
    }

    /// Give up ownership of the handle's count unit, returning the raw box
    /// pointer.
    #[inline]
    pub(crate) fn into_counted(self) -> *mut Counted<T> {
        let ptr = self.ptr.as_ptr();
        core::mem::forget(self);
        ptr
    }

    #[inline]
    pub(crate) fn as_counted(&self) -> *mut Counted<T> {
        self.ptr.as_ptr()
    }

    /// The address of the shared value, usable for identity comparisons.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        // SAFETY: the handle keeps the box alive.
        unsafe { (*self.ptr.as_ptr()).value_ptr() }
    }

    /// Whether `self` and `other` refer to the same box.
    ///
    /// Two boxes holding equal values are still distinct.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }

    /// Observational read of the reference count. Under concurrency the
    /// value may be stale by the time it is returned.
    #[inline]
    pub fn use_count(&self) -> usize {
        // SAFETY: the handle keeps the box alive.
        unsafe { (*self.ptr.as_ptr()).load_refs() }
    }

    /// Mutable access to the value when this handle is the only reference.
    ///
    /// Returns `None` whenever the count is above one — including units
    /// held by cells.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::Shared;
    ///
    /// let mut v = Shared::new(1);
    /// *Shared::get_mut(&mut v).unwrap() += 1;
    /// assert_eq!(*v, 2);
    ///
    /// let w = v.clone();
    /// assert!(Shared::get_mut(&mut v).is_none());
    /// drop(w);
    /// ```
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if this.use_count() == 1 {
            // SAFETY: sole reference, checked above; &mut self prevents
            // new clones for the borrow's duration.
            Some(unsafe { &mut *Counted::value_mut(this.ptr.as_ptr()) })
        } else {
            None
        }
    }
}

impl<T: Send + Sync + 'static> Clone for Shared<T> {
    #[inline]
    fn clone(&self) -> Self {
        // SAFETY: the handle keeps the box alive.
        unsafe { (*self.ptr.as_ptr()).add_refs(1) };
        Self { ptr: self.ptr }
    }
}

impl<T: Send + Sync + 'static> Drop for Shared<T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: this handle owns one count unit.
        unsafe { counted::decrement(self.ptr.as_ptr()) };
    }
}

impl<T: Send + Sync + 'static> Deref for Shared<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the handle keeps the box alive.
        unsafe { (*self.ptr.as_ptr()).value() }
    }
}

impl<T: Send + Sync + 'static + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: Send + Sync + 'static + fmt::Display> fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T: Send + Sync + 'static> From<T> for Shared<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
