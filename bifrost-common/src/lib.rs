//! Wire types shared between the injector/daemon side (`bifrost-core`) and the
//! bootstrap module injected into a target process (`bifrost-bootstrap`).
//!
//! Everything in this crate must be valid when mapped at two different
//! virtual addresses in two different processes: no raw pointers, no
//! absolute addresses, only offsets and `#[repr(C)]` plain-old-data.

#![cfg_attr(not(feature = "host"), allow(dead_code))]

pub mod error;
pub mod ptr;
pub mod value;

pub use error::Error;
pub use ptr::Ptr;
pub use value::{StorageValue, StorageValueWire, ValueTag, INLINE_STRING_CAPACITY};

/// Block size every arena allocation is rounded up to, matching the original
/// free-list allocator's 64-byte granularity.
pub const ALLOC_BLOCK_SIZE: u64 = 64;

/// Number of blocks the allocator reserves for its own bookkeeping before the
/// first allocatable byte of the arena.
pub const ALLOC_RESERVED_BLOCKS: u64 = 4;

/// Sentinel offset meaning "no value" / "null pointer", matching `Ptr::is_null`.
pub const NULL_OFFSET: u64 = u64::MAX;

/// Log severity, matching the log-callback ABI in spec §6.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "host", derive(serde::Serialize, serde::Deserialize))]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Disable = 5,
}

impl LogLevel {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            4 => Self::Error,
            5 => Self::Disable,
            _ => return None,
        })
    }
}

/// The kind of interception mechanism a hook site uses.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "host", derive(serde::Serialize, serde::Deserialize))]
pub enum HookKind {
    /// Inline trampoline rewrite of a free C function's prologue.
    CFunction = 0,
    /// Overwrite of a single slot in an object's virtual method table.
    VTableSlot = 1,
}

/// One row of the identifier table compiled into the bootstrap: stable
/// mapping from a plugin-visible integer id to the module it lives in, its
/// kind, and (for `CFunction` sites) the exported symbol name to resolve.
///
/// This table is generated at build time by `xtask` from a manifest file,
/// per the re-architecture note in spec §9 replacing the macro DSL.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "host", derive(serde::Serialize, serde::Deserialize))]
pub struct HookIdentifier {
    pub id: u32,
    pub name: String,
    pub module: String,
    pub kind: HookKind,
    /// Exported symbol name; empty for `VTableSlot` sites (the caller
    /// supplies the vtable pointer and byte offset directly instead).
    pub symbol: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_roundtrips_through_u32() {
        for lvl in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
            LogLevel::Disable,
        ] {
            assert_eq!(LogLevel::from_u32(lvl as u32), Some(lvl));
        }
        assert_eq!(LogLevel::from_u32(6), None);
    }
}
