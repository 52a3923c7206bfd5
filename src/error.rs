use core::alloc::Layout;
use core::fmt;
use thiserror::Error;

/// A deleter cell or control block could not be allocated.
///
/// Carries the box the caller tried to hand over, so nothing is lost and
/// the handle that attempted the operation is left as it was.
#[derive(Error)]
#[error("failed to allocate a {what} ({layout:?})")]
pub struct AllocError<P> {
    what: &'static str,
    layout: Layout,
    rejected: P,
}

impl<P> AllocError<P> {
    pub(crate) fn new(what: &'static str, layout: Layout, rejected: P) -> Self {
        Self {
            what,
            layout,
            rejected,
        }
    }

    /// Layout of the management object that failed to allocate.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Take back the value that was not adopted.
    pub fn into_inner(self) -> P {
        self.rejected
    }
}

impl<P> fmt::Debug for AllocError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocError")
            .field("what", &self.what)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}
