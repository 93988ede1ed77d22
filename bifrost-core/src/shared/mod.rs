//! The shared control block (C2): the arena's first allocation, owning a
//! reference count, the original creation size for mismatch checks, and
//! offset-pointers to the store and log stash.
pub mod log_stash;
pub mod storage;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bifrost_common::Ptr;

use crate::arena::Arena;
pub use log_stash::LogStash;
use log_stash::LogStashHeader;
pub use storage::Storage;
use storage::StorageHeader;

/// The control block living at [`Arena::first_address`]. `ref_count` is a
/// plain atomic (not mutex-guarded): increment/decrement is the only
/// operation performed on it, so no wider critical section is needed.
#[repr(C)]
struct ControlBlock {
    ref_count: AtomicU64,
    memory_size: u64,
    storage: Ptr<StorageHeader>,
    log_stash: Ptr<LogStashHeader>,
}

/// Owns the arena mapping plus attached handles to its store and log stash.
/// Dropping the last `SharedContext` for a given arena tears its control
/// block, store and log stash down and returns their memory to the
/// allocator (spec §3's "Entity lifecycles").
pub struct SharedContext {
    arena: Arc<Arena>,
    control: Ptr<ControlBlock>,
}

impl SharedContext {
    /// Create a brand-new arena and its control block, which must land at
    /// `arena.first_address()` per spec §3.
    pub fn create(name: &str, size: u64) -> bifrost_common::Result<Self> {
        let arena = Arc::new(Arena::create(name, size)?);
        let control_ptr = arena.allocate(std::mem::size_of::<ControlBlock>() as u64)?;
        debug_assert_eq!(control_ptr.offset(), arena.first_address());

        let storage_ptr = arena.allocate(std::mem::size_of::<StorageHeader>() as u64)?;
        let stash_ptr = arena.allocate(std::mem::size_of::<LogStashHeader>() as u64)?;

        unsafe {
            (*storage_ptr.cast::<StorageHeader>().resolve(arena.base_ptr())).init();
            (*stash_ptr.cast::<LogStashHeader>().resolve(arena.base_ptr())).init();

            let control = control_ptr.cast::<ControlBlock>().resolve(arena.base_ptr());
            control.write(ControlBlock {
                ref_count: AtomicU64::new(1),
                memory_size: size,
                storage: storage_ptr.cast(),
                log_stash: stash_ptr.cast(),
            });
        }

        Ok(Self {
            arena,
            control: control_ptr.cast(),
        })
    }

    /// Attach to an existing arena's control block, incrementing its
    /// reference count.
    pub fn open(name: &str, expected_size: u64) -> bifrost_common::Result<Self> {
        let arena = Arc::new(Arena::open(name, expected_size)?);
        let control_ptr: Ptr<ControlBlock> = Ptr::from_offset(arena.first_address());
        let control = unsafe { &*arena.resolve(control_ptr) };

        if control.memory_size != expected_size {
            log::warn!(
                "arena `{name}` control block memory_size {} differs from requested {expected_size}",
                control.memory_size
            );
        }
        control.ref_count.fetch_add(1, Ordering::AcqRel);

        Ok(Self {
            arena,
            control: control_ptr,
        })
    }

    fn control(&self) -> &ControlBlock {
        unsafe { &*self.arena.resolve(self.control) }
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn memory_size(&self) -> u64 {
        self.control().memory_size
    }

    pub fn ref_count(&self) -> u64 {
        self.control().ref_count.load(Ordering::Acquire)
    }

    pub fn storage(&self) -> Storage<'_> {
        unsafe { Storage::attach(&self.arena, self.control().storage) }
    }

    pub fn log_stash(&self) -> LogStash<'_> {
        unsafe { LogStash::attach(&self.arena, self.control().log_stash) }
    }
}

impl Drop for SharedContext {
    fn drop(&mut self) {
        let control = self.control();
        if control.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        // Last detacher: return the store and log stash headers to the
        // allocator. Their own entries were already freed by callers via
        // `Storage::remove`/`LogStash::drain`; a long-lived daemon is
        // expected to drain before dropping, matching spec §4.2's "final
        // drain on teardown" contract.
        self.arena.deallocate(control.storage.cast());
        self.arena.deallocate(control.log_stash.cast());
        self.arena.deallocate(self.control.cast());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_common::{LogLevel, StorageValue};

    #[test]
    fn create_then_open_shares_storage() {
        let name = format!("shared-ctx-{}", std::process::id());
        let writer = SharedContext::create(&name, 1 << 16).unwrap();
        writer.storage().set("bfl.plugin.0.name", StorageValue::String("demo".into())).unwrap();

        let reader = SharedContext::open(&name, 1 << 16).unwrap();
        assert_eq!(reader.ref_count(), 2);
        assert_eq!(
            reader.storage().get("bfl.plugin.0.name"),
            Some(StorageValue::String("demo".into()))
        );

        drop(reader);
        assert_eq!(writer.ref_count(), 1);
    }

    #[test]
    fn log_stash_is_reachable_through_the_control_block() {
        let name = format!("shared-ctx-log-{}", std::process::id());
        let ctx = SharedContext::create(&name, 1 << 16).unwrap();
        let stash = ctx.log_stash();
        stash.push(LogLevel::Info, "mod", "hello").unwrap();
        assert_eq!(stash.len(), 1);
    }
}
