//! Shared: reference-counted, thread-safe ownership through a type-erased
//! control block.

use crate::count::{AtomicCount, Count, Token};
use crate::erase::{
    destroy_block, erase_block, try_box_with, Block, ControlBlock, DeleterCell,
};
use crate::error::AllocError;
use crate::null::Null;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

/// One counted share: the access pointer, the block, and the token proving
/// this share was added to the block's count.
struct Share<T: ?Sized, C: Count> {
    ptr: NonNull<T>,
    block: NonNull<dyn Block<C>>,
    token: Token<C>,
}

impl<T: ?Sized, C: Count> Share<T, C> {
    #[inline]
    fn count(&self) -> &C {
        // SAFETY: the token we hold keeps the block alive.
        unsafe { self.block.as_ref() }.count()
    }

    /// Mint another share of the same block, incrementing its count once.
    #[inline]
    fn duplicate(&self) -> Self {
        Self {
            ptr: self.ptr,
            block: self.block,
            token: self.count().get(),
        }
    }

    /// Return the token; the caller that observes zero frees the block.
    fn release(self) {
        let Share { block, token, .. } = self;
        // SAFETY: the token we hold keeps the block alive until `put`.
        let last = unsafe { block.as_ref() }.count().put(token);
        if last {
            // SAFETY: the count just reached zero, so no other share exists
            // and nobody else can observe zero on this block.
            unsafe { destroy_block(block) };
        }
    }
}

/// Shared owner of a heap value, destroyed as the type it was boxed as,
/// once the last owner is released.
///
/// `C` picks the counting policy: [`AtomicCount`] (default, lock-free) or
/// [`crate::MutexCount`].
pub struct Shared<T: ?Sized, C: Count = AtomicCount> {
    inner: Option<Share<T, C>>,
    _owns: PhantomData<T>,
}

// SAFETY: like `Arc<T>`, sending or sharing a `Shared<T>` can drop or read
// the pointee from another thread, so `T` must be `Send + Sync`. Views made
// by `map`/`view` require the previous view to be `Send + Sync + 'static`,
// so the erased original type is always at least as thread-safe as `T`.
unsafe impl<T: ?Sized + Send + Sync, C: Count> Send for Shared<T, C> {}
// SAFETY: see above.
unsafe impl<T: ?Sized + Send + Sync, C: Count> Sync for Shared<T, C> {}

impl<T: ?Sized, C: Count> Shared<T, C> {
    /// Empty handle: no pointee, no control block.
    pub const fn null() -> Self {
        Self {
            inner: None,
            _owns: PhantomData,
        }
    }

    /// Take ownership of a box with a fresh count of 1. Aborts through
    /// `handle_alloc_error` if the control block cannot be allocated.
    pub fn from_box(value: Box<T>) -> Self {
        match Self::try_from_box(value) {
            Ok(h) => h,
            Err(e) => std::alloc::handle_alloc_error(e.layout()),
        }
    }

    /// Take ownership of a box, returning it if the control block cannot be
    /// allocated.
    pub fn try_from_box(value: Box<T>) -> Result<Self, AllocError<Box<T>>> {
        let share = adopt(value)?;
        Ok(Self {
            inner: Some(share),
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
        self.inner.as_ref().map(|s| s.ptr)
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
        // SAFETY: the pointee lives while any share of its block does.
        self.inner.as_ref().map(|s| unsafe { s.ptr.as_ref() })
    }

    /// Number of live shares of this handle's block; 0 for an empty handle.
    /// Only a snapshot when other threads hold shares.
    pub fn use_count(&self) -> usize {
        self.inner.as_ref().map_or(0, |s| s.count().current())
    }

    /// Whether both handles point at the same pointee of the same
    /// allocation. Zero-sized values share a dangling address, so the block
    /// is compared as well.
    pub fn ptr_eq<V: ?Sized, D: Count>(&self, other: &Shared<V, D>) -> bool {
        self.identity() == other.identity()
    }

    /// Move the share out, leaving this handle empty. The count is unchanged.
    pub fn take(&mut self) -> Self {
        Self {
            inner: self.inner.take(),
            _owns: PhantomData,
        }
    }

    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.inner, &mut other.inner);
    }

    /// Release the current share (if any) and adopt `value` (if any) with a
    /// fresh count of 1.
    pub fn reset(&mut self, value: impl Into<Option<Box<T>>>) {
        if let Err(e) = self.try_reset(value) {
            std::alloc::handle_alloc_error(e.layout());
        }
    }

    /// Like [`Shared::reset`], but on allocation failure the handle keeps its
    /// current share and the new box is handed back.
    pub fn try_reset(
        &mut self,
        value: impl Into<Option<Box<T>>>,
    ) -> Result<(), AllocError<Box<T>>> {
        let next = match value.into() {
            Some(b) => Some(adopt(b)?),
            None => None,
        };
        if let Some(prev) = core::mem::replace(&mut self.inner, next) {
            prev.release();
        }
        Ok(())
    }

    /// Convert to a handle exposing a view of the pointee, keeping the same
    /// share. The original destructor still runs when the count reaches zero.
    pub fn map<V: ?Sized>(mut self, f: impl for<'a> FnOnce(&'a T) -> &'a V) -> Shared<V, C>
    where
        T: Send + Sync + 'static,
    {
        let Some(ptr) = self.inner.as_ref().map(|s| s.ptr) else {
            return Shared::null();
        };
        // SAFETY: our share keeps the pointee alive. If `f` panics, `self`
        // still holds the share and releases it while unwinding.
        let view = NonNull::from(f(unsafe { ptr.as_ref() }));
        Shared {
            inner: self.inner.take().map(|s| Share {
                ptr: view,
                block: s.block,
                token: s.token,
            }),
            _owns: PhantomData,
        }
    }

    /// Like [`Shared::map`], but adds a share instead of consuming this one.
    ///
    /// ```
    /// use erased_rc::Shared;
    /// struct Point { x: i32, y: i32 }
    /// let p: Shared<Point> = Shared::new(Point { x: 1, y: 2 });
    /// let y: Shared<i32> = p.view(|p| &p.y);
    /// assert_eq!((*y, p.x, p.use_count()), (2, 1, 2));
    /// ```
    pub fn view<V: ?Sized>(&self, f: impl for<'a> FnOnce(&'a T) -> &'a V) -> Shared<V, C>
    where
        T: Send + Sync + 'static,
    {
        self.clone().map(f)
    }

    fn addr(&self) -> Option<NonNull<()>> {
        self.get().map(|p| p.cast::<()>())
    }

    fn identity(&self) -> Option<(NonNull<()>, NonNull<()>)> {
        self.inner
            .as_ref()
            .map(|s| (s.ptr.cast::<()>(), s.block.cast::<()>()))
    }
}

impl<T, C: Count> Shared<T, C> {
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

fn adopt<T: ?Sized, C: Count>(value: Box<T>) -> Result<Share<T, C>, AllocError<Box<T>>> {
    // SAFETY: `Box::into_raw` never returns null.
    let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };
    let (count, token) = C::one();
    match try_box_with(move || ControlBlock::new(count, DeleterCell::new(ptr))) {
        Ok(block) => {
            log::trace!("new control block for {ptr:p}");
            Ok(Share {
                ptr,
                block: erase_block(block),
                token,
            })
        }
        Err(layout) => {
            log::debug!("control block allocation failed: {layout:?}");
            // The counter this token belongs to was never built.
            core::mem::forget(token);
            // SAFETY: no block was built, so the allocation is still ours alone.
            let value = unsafe { Box::from_raw(ptr.as_ptr()) };
            Err(AllocError::new("control block", layout, value))
        }
    }
}

impl<T: ?Sized, C: Count> Drop for Shared<T, C> {
    fn drop(&mut self) {
        if let Some(share) = self.inner.take() {
            share.release();
        }
    }
}

impl<T: ?Sized, C: Count> Clone for Shared<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.as_ref().map(Share::duplicate),
            _owns: PhantomData,
        }
    }
}

impl<T: ?Sized, C: Count> Default for Shared<T, C> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized, C: Count> From<Box<T>> for Shared<T, C> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized, C: Count> Deref for Shared<T, C> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &T {
        match self.as_ref() {
            Some(v) => v,
            None => panic!("dereferenced an empty Shared"),
        }
    }
}

impl<T: ?Sized, C: Count, V: ?Sized, D: Count> PartialEq<Shared<V, D>> for Shared<T, C> {
    fn eq(&self, other: &Shared<V, D>) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: ?Sized, C: Count> Eq for Shared<T, C> {}

impl<T: ?Sized, C: Count> PartialEq<Null> for Shared<T, C> {
    fn eq(&self, _: &Null) -> bool {
        self.is_null()
    }
}

impl<T: ?Sized, C: Count> PartialEq<Shared<T, C>> for Null {
    fn eq(&self, other: &Shared<T, C>) -> bool {
        other.is_null()
    }
}

impl<T: ?Sized, C: Count> Hash for Shared<T, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl<T: ?Sized, C: Count> fmt::Debug for Shared<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(p) => f
                .debug_struct("Shared")
                .field("ptr", &p)
                .field("use_count", &self.use_count())
                .finish(),
            None => f.write_str("Shared(null)"),
        }
    }
}

impl<T: ?Sized, C: Count> fmt::Pointer for Shared<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr() {
            Some(p) => fmt::Pointer::fmt(&p, f),
            None => fmt::Pointer::fmt(&core::ptr::null::<()>(), f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::count::MutexCount;
    use crate::erase::fail_injection;

    #[test]
    fn failed_reset_keeps_current_share() {
        let mut h: Shared<u32> = Shared::new(1);
        let other = h.clone();
        fail_injection::fail_next();
        let err = h.try_reset(Box::new(2)).unwrap_err();
        assert!(err.to_string().contains("control block"));
        assert_eq!(*err.into_inner(), 2);
        assert!(h == other);
        assert_eq!(h.use_count(), 2);
    }

    #[test]
    fn failed_construction_returns_box() {
        fail_injection::fail_next();
        let err = Shared::<Vec<u8>, MutexCount>::try_from_box(Box::new(vec![1, 2])).unwrap_err();
        assert_eq!(*err.into_inner(), vec![1, 2]);
    }

    #[test]
    fn clone_increments_the_source_block() {
        let a: Shared<u8, MutexCount> = Shared::new(3);
        let mut b: Shared<u8, MutexCount> = Shared::new(4);
        b.clone_from(&a);
        assert_eq!(a.use_count(), 2);
        assert!(a == b);
    }
}
