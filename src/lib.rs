//! erased-rc: exclusive and shared owning handles that always destroy a
//! value as the type it was allocated with.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a `Unique<T>` (move-only) and a `Shared<T>` (reference
//!   counted, thread-safe) that can be converted to a view of a related
//!   type (a field, a trait object) and still run the original type's
//!   destructor on release.
//! - Layers:
//!   - `erase`: `DeleterCell<U>` owns the original `Box<U>`;
//!     `ControlBlock<U, C>` pairs a cell with a counter. Both are only
//!     reached through trait objects (`dyn Release`, `dyn Block<C>`)
//!     after construction, so the vtable remembers `U`.
//!   - `count`: linear `Token`s and the `Count` policies (`AtomicCount`,
//!     `MutexCount`) that serialise increments and decrements per block.
//!   - `Unique<T>` / `Shared<T, C>`: the handles. Each is an access pointer
//!     of the exposed type plus the erased management object.
//!
//! Constraints
//! - One allocation per construction for the management object; the value
//!   itself stays in the caller's `Box`.
//! - A control block is destroyed exactly once, by the thread whose `put`
//!   observes the count reaching zero.
//! - Handle operations never touch the managed value except to destroy it.
//!
//! Conversion rules
//! - `map`/`view` take a closure `for<'a> FnOnce(&'a T) -> &'a V`, so the
//!   new access pointer is provably derived from the old one.
//! - Converting requires the current view to be `'static` and thread-safe
//!   (`Send` for `Unique`, `Send + Sync` for `Shared`). A handle whose
//!   exposed type is still its original type carries the original's
//!   lifetimes and auto traits directly.
//!
//! Overflow semantics
//! - Count overflow aborts the process, matching `Arc`.
//!
//! Notes and non-goals
//! - No weak handles, custom deleters, allocators, or colocated
//!   value-and-count allocations.
//! - Dereferencing an empty handle panics; use `as_ref` for checked access.

mod count;
mod erase;
mod error;
mod null;
mod shared;
mod unique;

// Public surface
pub use count::{AtomicCount, Count, MutexCount, Token};
pub use error::AllocError;
pub use null::Null;
pub use shared::Shared;
pub use unique::Unique;
