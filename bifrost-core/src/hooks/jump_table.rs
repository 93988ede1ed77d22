//! Jump-table chain hops (C5): a small block of executable memory holding
//! one absolute indirect jump, whose target can be rewritten without
//! touching the chain's other members. Used to re-target a chain hop when
//! the chain is reordered, per spec §4.5.
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
};

use bifrost_common::{Error, Result};

/// `jmp qword ptr [rip+0]` (`FF 25 00 00 00 00`) followed by the 8-byte
/// absolute target, for a total 14-byte stub. Rounded up to a page-aligned
/// `VirtualAlloc` call since Windows has no sub-page executable allocator.
const STUB_LEN: usize = 14;
const JMP_RIP0: [u8; 6] = [0xFF, 0x25, 0x00, 0x00, 0x00, 0x00];
const TARGET_OFFSET: usize = 6;

/// One executable stub a hook chain hop jumps through. `entry_point()` is
/// what gets installed as the previous chain element's "original" pointer;
/// `set_target`/`restore` rewrite where the jump lands.
pub struct JumpTable {
    stub: *mut u8,
    target_set: bool,
}

impl JumpTable {
    pub fn new() -> Result<Self> {
        let stub = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                STUB_LEN,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        } as *mut u8;
        if stub.is_null() {
            let code = unsafe { GetLastError() };
            return Err(Error::ProtectionChangeFailed(code as u64));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(JMP_RIP0.as_ptr(), stub, JMP_RIP0.len());
        }
        Ok(Self {
            stub,
            target_set: false,
        })
    }

    pub fn entry_point(&self) -> *const () {
        self.stub as *const ()
    }

    /// Point the stub's jump at `target`. Safe to call repeatedly; a prior
    /// target is simply overwritten.
    pub fn set_target(&mut self, target: *const ()) {
        unsafe {
            let dest = self.stub.add(TARGET_OFFSET) as *mut u64;
            dest.write_unaligned(target as u64);
        }
        self.target_set = true;
    }

    /// The chain hop this stub served has no replacement left to run;
    /// rewrite the jump to land directly on `original` so the stub falls
    /// through to the unmodified behavior instead of the detached
    /// replacement it last pointed at.
    pub fn restore(&mut self, original: *const ()) {
        self.set_target(original);
        self.target_set = false;
    }

    pub fn is_set(&self) -> bool {
        self.target_set
    }
}

impl Drop for JumpTable {
    fn drop(&mut self) {
        unsafe {
            VirtualFree(self.stub as *mut _, 0, MEM_RELEASE);
        }
    }
}

unsafe impl Send for JumpTable {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_encodes_a_rip_relative_indirect_jump() {
        let table = JumpTable::new().unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(table.stub, JMP_RIP0.len()) };
        assert_eq!(bytes, JMP_RIP0);
    }

    #[test]
    fn set_target_updates_the_embedded_pointer() {
        let mut table = JumpTable::new().unwrap();
        let fake_target = 0x1234_5678_9abc_def0u64 as *const ();
        table.set_target(fake_target);
        let stored = unsafe { (table.stub.add(TARGET_OFFSET) as *const u64).read_unaligned() };
        assert_eq!(stored, fake_target as u64);
        assert!(table.is_set());
    }

    #[test]
    fn restore_rewrites_the_jump_instead_of_just_clearing_a_flag() {
        let mut table = JumpTable::new().unwrap();
        let replacement = 0x1111_0000_0000_0000u64 as *const ();
        table.set_target(replacement);

        let original = 0x2222_0000_0000_0000u64 as *const ();
        table.restore(original);

        let stored = unsafe { (table.stub.add(TARGET_OFFSET) as *const u64).read_unaligned() };
        assert_eq!(stored, original as u64);
        assert!(!table.is_set());
    }
}
