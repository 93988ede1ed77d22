use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};

use crate::NULL_OFFSET;

/// A pointer represented as a byte offset from an arena's base address.
///
/// Unlike a raw pointer, `Ptr<T>` is valid regardless of where the arena is
/// mapped in a given process's address space — resolving it always requires
/// the caller to supply that process's base address explicitly.
#[repr(transparent)]
pub struct Ptr<T> {
    offset: u64,
    _marker: PhantomData<fn() -> T>,
}

// Manual impls: `T` need not be `Copy`/`Clone`/etc. for `Ptr<T>` to be.
impl<T> Copy for Ptr<T> {}
impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}
impl<T> Eq for Ptr<T> {}
impl<T> PartialOrd for Ptr<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Ptr<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.offset.cmp(&other.offset)
    }
}
impl<T> std::fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "Ptr(null)")
        } else {
            write!(f, "Ptr(+{:#x})", self.offset)
        }
    }
}

// SAFETY: `Ptr<T>` is a transparent wrapper over a `u64`; the `PhantomData`
// carries no bytes. This holds for every `T`, hookable or not, since we never
// read `T`'s bytes through this type directly.
unsafe impl<T> Zeroable for Ptr<T> {}
unsafe impl<T: 'static> Pod for Ptr<T> {}

impl<T> Default for Ptr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Ptr<T> {
    /// The null / unassigned pointer.
    pub const fn null() -> Self {
        Self {
            offset: NULL_OFFSET,
            _marker: PhantomData,
        }
    }

    /// Construct from a raw byte offset.
    pub const fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// Compute the offset of `ptr` from `base_ptr` and wrap it.
    ///
    /// # Safety
    /// `ptr` must point into the same arena as `base_ptr`.
    pub unsafe fn from_address(ptr: *const T, base_ptr: *const u8) -> Self {
        Self::from_offset(ptr as u64 - base_ptr as u64)
    }

    pub const fn is_null(&self) -> bool {
        self.offset == NULL_OFFSET
    }

    pub const fn offset(&self) -> u64 {
        self.offset
    }

    pub fn cast<U>(self) -> Ptr<U> {
        Ptr::from_offset(self.offset)
    }

    /// Resolve the offset back into a pointer given this process's base address.
    ///
    /// # Safety
    /// `base_address` must be the base of the arena this offset was computed
    /// against, and the resulting pointer must point at a live, correctly
    /// aligned `T`.
    pub unsafe fn resolve(&self, base_address: *mut u8) -> *mut T {
        debug_assert!(!self.is_null(), "resolving a null Ptr");
        base_address.add(self.offset as usize) as *mut T
    }

    /// `const` counterpart of [`Ptr::resolve`] for shared access.
    ///
    /// # Safety
    /// Same requirements as [`Ptr::resolve`].
    pub unsafe fn resolve_const(&self, base_address: *const u8) -> *const T {
        debug_assert!(!self.is_null(), "resolving a null Ptr");
        base_address.add(self.offset as usize) as *const T
    }
}

impl<T> std::ops::Add<u64> for Ptr<T> {
    type Output = Ptr<T>;
    fn add(self, rhs: u64) -> Ptr<T> {
        Ptr::from_offset(self.offset + rhs * std::mem::size_of::<T>() as u64)
    }
}

impl<T> std::ops::Sub<u64> for Ptr<T> {
    type Output = Ptr<T>;
    fn sub(self, rhs: u64) -> Ptr<T> {
        Ptr::from_offset(self.offset - rhs * std::mem::size_of::<T>() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pointer_round_trips() {
        let p: Ptr<u32> = Ptr::null();
        assert!(p.is_null());
        assert_eq!(p, Ptr::default());
    }

    #[test]
    fn offset_arithmetic_scales_by_size_of_t() {
        let p: Ptr<u64> = Ptr::from_offset(100);
        let next = p + 2;
        assert_eq!(next.offset(), 100 + 2 * 8);
        let back = next - 2;
        assert_eq!(back, p);
    }

    #[test]
    fn cast_preserves_offset() {
        let p: Ptr<u32> = Ptr::from_offset(64);
        let q: Ptr<u8> = p.cast();
        assert_eq!(q.offset(), 64);
    }
}
