//! Virtual-table slot hooking (C5), grounded on the original free function
//! `SetVTableHook`: unprotect the vtable page, overwrite one pointer-sized
//! slot, restore protection. No trampoline is produced since there is
//! nothing to detour through — the original slot value itself is the
//! "original" the caller chains to.
use windows_sys::Win32::System::Memory::{VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS};

use bifrost_common::{Error, Result};

/// A single overwritten vtable slot, restored to its original value on
/// drop unless [`Self::forget`] is called (when a later chain element now
/// owns the restore).
pub struct VTableHook {
    slot: *mut u64,
    original: u64,
    restored: bool,
}

impl VTableHook {
    /// Overwrite the vtable slot at `vtable_base + index * size_of::<u64>()`
    /// with `replacement`, returning the previous value via
    /// [`Self::original`].
    ///
    /// # Safety
    /// `vtable_base` must point at a live vtable with at least `index + 1`
    /// entries, and the object it backs must outlive this hook.
    pub unsafe fn new(vtable_base: *const (), index: usize, replacement: u64) -> Result<Self> {
        let slot = (vtable_base as *mut u64).add(index);
        let mut old_protect: u32 = 0;
        let ok = VirtualProtect(
            slot as *const _,
            std::mem::size_of::<u64>(),
            PAGE_EXECUTE_READWRITE,
            &mut old_protect,
        );
        if ok == 0 {
            return Err(Error::ProtectionChangeFailed(slot as u64));
        }

        let original = slot.read();
        slot.write(replacement);

        // Best-effort restore of the previous protection; a failure here
        // leaves the page read-write-execute, which is undesirable but not
        // unsafe, so it is logged rather than propagated.
        let mut unused: u32 = 0;
        if VirtualProtect(
            slot as *const _,
            std::mem::size_of::<u64>(),
            old_protect as PAGE_PROTECTION_FLAGS,
            &mut unused,
        ) == 0
        {
            log::warn!("failed to restore page protection after vtable hook at {:#x}", slot as u64);
        }

        Ok(Self {
            slot,
            original,
            restored: false,
        })
    }

    pub fn original(&self) -> u64 {
        self.original
    }

    pub fn slot_address(&self) -> *const () {
        self.slot as *const ()
    }

    /// Restore the slot to its original value.
    pub fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        let mut old_protect: u32 = 0;
        let ok = unsafe {
            VirtualProtect(
                self.slot as *const _,
                std::mem::size_of::<u64>(),
                PAGE_EXECUTE_READWRITE,
                &mut old_protect,
            )
        };
        if ok == 0 {
            return Err(Error::ProtectionChangeFailed(self.slot as u64));
        }
        unsafe {
            self.slot.write(self.original);
            let mut unused: u32 = 0;
            VirtualProtect(
                self.slot as *const _,
                std::mem::size_of::<u64>(),
                old_protect as PAGE_PROTECTION_FLAGS,
                &mut unused,
            );
        }
        self.restored = true;
        Ok(())
    }

    /// Mark the slot as already accounted for elsewhere, so `Drop` does not
    /// attempt to restore it (used when a higher-priority chain hop
    /// overwrites the same slot again).
    pub fn forget(mut self) {
        self.restored = true;
    }
}

impl Drop for VTableHook {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(err) = self.restore() {
                log::warn!("failed to restore vtable slot on drop: {err}");
            }
        }
    }
}

unsafe impl Send for VTableHook {}
