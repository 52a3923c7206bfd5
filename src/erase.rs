//! Type-erased destroy capabilities.
//!
//! A `DeleterCell<U>` owns the allocation behind a `Box<U>` and frees it
//! as a `U` when dropped. Handles keep cells only behind `dyn Release`
//! (exclusive) or `dyn Block<C>` (shared), so the original type is
//! recovered through the vtable no matter what type the handle exposes.

use crate::count::Count;
use core::alloc::Layout;
use core::marker::PhantomData;
use core::ptr::NonNull;
use std::alloc;

/// Something whose drop glue destroys a captured allocation.
pub(crate) trait Release {}

/// Shared bookkeeping: a counter plus a `Release` capability.
pub(crate) trait Block<C: Count> {
    fn count(&self) -> &C;
}

/// Owns the original `Box<U>` as a raw pointer.
///
/// The pointer came from `Box::into_raw` so handles can keep aliasing
/// views into the allocation while the cell moves around.
pub(crate) struct DeleterCell<U: ?Sized> {
    ptr: NonNull<U>,
    _owns: PhantomData<U>,
}

impl<U: ?Sized> DeleterCell<U> {
    pub(crate) fn new(ptr: NonNull<U>) -> Self {
        Self {
            ptr,
            _owns: PhantomData,
        }
    }
}

impl<U: ?Sized> Release for DeleterCell<U> {}

impl<U: ?Sized> Drop for DeleterCell<U> {
    fn drop(&mut self) {
        log::trace!(
            "releasing {} at {:p}",
            core::any::type_name::<U>(),
            self.ptr
        );
        // SAFETY: `ptr` came from `Box::into_raw` and the cell is its sole
        // owner; a cell is dropped at most once.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }
}

pub(crate) struct ControlBlock<U: ?Sized, C: Count> {
    count: C,
    cell: DeleterCell<U>,
}

impl<U: ?Sized, C: Count> ControlBlock<U, C> {
    pub(crate) fn new(count: C, cell: DeleterCell<U>) -> Self {
        Self { count, cell }
    }
}

impl<U: ?Sized, C: Count> Block<C> for ControlBlock<U, C> {
    #[inline]
    fn count(&self) -> &C {
        &self.count
    }
}

impl<U: ?Sized, C: Count> Drop for ControlBlock<U, C> {
    fn drop(&mut self) {
        log::trace!("control block for {:p} reached zero", self.cell.ptr);
    }
}

/// Erase a deleter cell into an owning `dyn Release` pointer.
///
/// The `'static` on the trait object is nominal. Handles that still carry
/// a non-`'static` `U` expose it as their own type parameter, and only
/// `'static` values may be converted to another view.
pub(crate) fn erase_cell<'a, U: ?Sized + 'a>(cell: Box<DeleterCell<U>>) -> NonNull<dyn Release> {
    let raw: *mut (dyn Release + 'a) = Box::into_raw(cell);
    // SAFETY: only the lifetime bound of the trait object changes; see above.
    let raw: *mut (dyn Release + 'static) = unsafe { core::mem::transmute(raw) };
    // SAFETY: `Box::into_raw` never returns null.
    unsafe { NonNull::new_unchecked(raw) }
}

/// Erase a control block into a shared `dyn Block<C>` pointer.
pub(crate) fn erase_block<'a, U: ?Sized + 'a, C: Count>(
    block: Box<ControlBlock<U, C>>,
) -> NonNull<dyn Block<C>> {
    let raw: *mut (dyn Block<C> + 'a) = Box::into_raw(block);
    // SAFETY: as in `erase_cell`.
    let raw: *mut (dyn Block<C> + 'static) = unsafe { core::mem::transmute(raw) };
    // SAFETY: `Box::into_raw` never returns null.
    unsafe { NonNull::new_unchecked(raw) }
}

/// Drop an erased cell, destroying the allocation it owns.
///
/// # Safety
/// `cell` must come from `erase_cell` and not have been destroyed yet.
pub(crate) unsafe fn destroy_cell(cell: NonNull<dyn Release>) {
    drop(Box::from_raw(cell.as_ptr()));
}

/// Drop an erased control block whose count reached zero.
///
/// # Safety
/// `block` must come from `erase_block`, and the caller must have just
/// observed the last `put` on it.
pub(crate) unsafe fn destroy_block<C: Count>(block: NonNull<dyn Block<C>>) {
    drop(Box::from_raw(block.as_ptr()));
}

/// Allocate a box for `X`, building the value only once memory is secured.
///
/// On failure `make` is not called, so anything it would have consumed
/// stays with the caller.
pub(crate) fn try_box_with<X>(make: impl FnOnce() -> X) -> Result<Box<X>, Layout> {
    let layout = Layout::new::<X>();
    if layout.size() == 0 {
        return Ok(Box::new(make()));
    }
    #[cfg(test)]
    if fail_injection::should_fail() {
        return Err(layout);
    }
    // SAFETY: `layout` has a non-zero size.
    let raw = unsafe { alloc::alloc(layout) }.cast::<X>();
    if raw.is_null() {
        return Err(layout);
    }
    // SAFETY: `raw` is a fresh allocation with the layout of `X`, which is
    // exactly what `Box::from_raw` expects from the global allocator.
    unsafe {
        raw.write(make());
        Ok(Box::from_raw(raw))
    }
}
