//! Unique: exclusive ownership with a type-erased deleter cell.

use crate::erase::{destroy_cell, erase_cell, try_box_with, DeleterCell, Release};
use crate::error::AllocError;
use crate::null::Null;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

/// Access pointer plus the cell that owns the original allocation.
struct Owned<T: ?Sized> {
    ptr: NonNull<T>,
    cell: NonNull<dyn Release>,
}

impl<T: ?Sized> Clone for Owned<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Owned<T> {}

/// Exclusive owner of a heap value, destroyed as the type it was boxed as.
///
/// Converting with [`Unique::map`] changes the exposed type but keeps the
/// original deleter, so a `Unique<Base>` made from a `Box<Derived>` still
/// runs `Derived`'s destructor.
pub struct Unique<T: ?Sized> {
    inner: Option<Owned<T>>,
    _owns: PhantomData<T>,
}

// SAFETY: a `Unique<T>` either still exposes its original type, or was
// converted by `map`, which requires the original to be `Send + 'static`.
// Moving the handle moves the value, as with `Box<T>`.
unsafe impl<T: ?Sized + Send> Send for Unique<T> {}
// SAFETY: `&Unique<T>` hands out only `&T`.
unsafe impl<T: ?Sized + Sync> Sync for Unique<T> {}

impl<T: ?Sized> Unique<T> {
    /// Empty handle: no pointee, no deleter cell.
    pub const fn null() -> Self {
        Self {
            inner: None,
            _owns: PhantomData,
        }
    }

    /// Take ownership of a box. Aborts through `handle_alloc_error` if the
    /// deleter cell cannot be allocated.
    pub fn from_box(value: Box<T>) -> Self {
        match Self::try_from_box(value) {
            Ok(h) => h,
            Err(e) => std::alloc::handle_alloc_error(e.layout()),
        }
    }

    /// Take ownership of a box, returning it if the deleter cell cannot be
    /// allocated.
    pub fn try_from_box(value: Box<T>) -> Result<Self, AllocError<Box<T>>> {
        let owned = adopt(value)?;
        Ok(Self {
            inner: Some(owned),
            _owns: PhantomData,
        })
    }

    /// Take ownership of a raw pointer. Null yields an empty handle.
    ///
    /// # Safety
    /// A non-null `ptr` must come from `Box::into_raw` and must not be
    /// owned by anything else.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        match NonNull::new(ptr) {
            Some(p) => Self::from_box(Box::from_raw(p.as_ptr())),
            None => Self::null(),
        }
    }

    /// Raw access pointer, without affecting ownership.
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.inner.map(|o| o.ptr)
    }

    #[inline]
    pub fn is_some(&self) -> bool {
        self.inner.is_some()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    pub fn as_ref(&self) -> Option<&T> {
        // SAFETY: the pointee lives as long as the cell we own.
        self.inner.map(|o| unsafe { o.ptr.as_ref() })
    }

    pub fn as_mut(&mut self) -> Option<&mut T> {
        // SAFETY: as above, and `&mut self` makes the access exclusive.
        self.inner.map(|mut o| unsafe { o.ptr.as_mut() })
    }

    /// Move the resource out, leaving this handle empty.
    pub fn take(&mut self) -> Self {
        Self {
            inner: self.inner.take(),
            _owns: PhantomData,
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.inner, &mut other.inner);
    }

    /// Destroy the current resource (if any) and adopt `value` (if any).
    pub fn reset(&mut self, value: impl Into<Option<Box<T>>>) {
        if let Err(e) = self.try_reset(value) {
            std::alloc::handle_alloc_error(e.layout());
        }
    }

    /// Like [`Unique::reset`], but on allocation failure the handle keeps its
    /// current resource and the new box is handed back.
    pub fn try_reset(
        &mut self,
        value: impl Into<Option<Box<T>>>,
    ) -> Result<(), AllocError<Box<T>>> {
        let next = match value.into() {
            Some(b) => Some(adopt(b)?),
            None => None,
        };
        let prev = core::mem::replace(&mut self.inner, next);
        if let Some(o) = prev {
            // SAFETY: `o.cell` was owned by this handle and is now detached.
            unsafe { destroy_cell(o.cell) };
        }
        Ok(())
    }

    /// Convert to a handle exposing a view of the pointee, such as a field
    /// or a trait object. The original deleter is kept.
    ///
    /// ```
    /// use erased_rc::Unique;
    /// let h = Unique::new(String::from("hi"));
    /// let d: Unique<dyn std::fmt::Display> = h.map(|s| s as &mut dyn std::fmt::Display);
    /// assert_eq!(d.to_string(), "hi");
    /// ```
    pub fn map<V: ?Sized>(self, f: impl for<'a> FnOnce(&'a mut T) -> &'a mut V) -> Unique<V>
    where
        T: Send + 'static,
    {
        let Some(owned) = self.inner else {
            return Unique::null();
        };
        // SAFETY: we own the only access to the pointee. If `f` panics, `self`
        // still owns the cell and releases it while unwinding.
        let view = NonNull::from(f(unsafe { &mut *owned.ptr.as_ptr() }));
        core::mem::forget(self);
        Unique {
            inner: Some(Owned {
                ptr: view,
                cell: owned.cell,
            }),
            _owns: PhantomData,
        }
    }

    fn addr(&self) -> Option<NonNull<()>> {
        self.inner.map(|o| o.ptr.cast::<()>())
    }

    /// Pointee address plus cell address; zero-sized values share a
    /// dangling pointee address, never a cell.
    fn identity(&self) -> Option<(NonNull<()>, NonNull<()>)> {
        self.inner
            .map(|o| (o.ptr.cast::<()>(), o.cell.cast::<()>()))
    }
}

impl<T> Unique<T> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

fn adopt<T: ?Sized>(value: Box<T>) -> Result<Owned<T>, AllocError<Box<T>>> {
    // SAFETY: `Box::into_raw` never returns null.
    let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };
    match try_box_with(|| DeleterCell::new(ptr)) {
        Ok(cell) => Ok(Owned {
            ptr,
            cell: erase_cell(cell),
        }),
        Err(layout) => {
            log::debug!("deleter cell allocation failed: {layout:?}");
            // SAFETY: no cell was built, so the allocation is still ours alone.
            let value = unsafe { Box::from_raw(ptr.as_ptr()) };
            Err(AllocError::new("deleter cell", layout, value))
        }
    }
}

impl<T: ?Sized> Drop for Unique<T> {
    fn drop(&mut self) {
        if let Some(o) = self.inner.take() {
            // SAFETY: the cell is owned by this handle alone.
            unsafe { destroy_cell(o.cell) };
        }
    }
}

impl<T: ?Sized> Default for Unique<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> From<Box<T>> for Unique<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized> Deref for Unique<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &T {
        match self.as_ref() {
            Some(v) => v,
            None => panic!("dereferenced an empty Unique"),
        }
    }
}

impl<T: ?Sized> DerefMut for Unique<T> {
    #[track_caller]
    fn deref_mut(&mut self) -> &mut T {
        match self.as_mut() {
            Some(v) => v,
            None => panic!("dereferenced an empty Unique"),
        }
    }
}

impl<T: ?Sized, V: ?Sized> PartialEq<Unique<V>> for Unique<T> {
    fn eq(&self, other: &Unique<V>) -> bool {
        self.identity() == other.identity()
    }
}

impl<T: ?Sized> Eq for Unique<T> {}

impl<T: ?Sized> PartialEq<Null> for Unique<T> {
    fn eq(&self, _: &Null) -> bool {
        self.is_null()
    }
}

impl<T: ?Sized> PartialEq<Unique<T>> for Null {
    fn eq(&self, other: &Unique<T>) -> bool {
        other.is_null()
    }
}

impl<T: ?Sized> Hash for Unique<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Unique<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(p) => f.debug_tuple("Unique").field(&p).finish(),
            None => f.write_str("Unique(null)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for Unique<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr() {
            Some(p) => fmt::Pointer::fmt(&p, f),
            None => fmt::Pointer::fmt(&core::ptr::null::<()>(), f),
        }
    }
}
