/// The empty handle value, for comparisons in either operand order.
///
/// ```
/// use erased_rc::{Null, Unique};
/// let h: Unique<u8> = Unique::null();
/// assert!(h == Null && Null == h);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Null;
