//! The shared arena: a named region of memory mapped at possibly different
//! addresses in the injector and target processes, carrying the allocator
//! control block plus everything allocated from it.
mod allocator;

pub use allocator::MallocFreeList;

use std::fs::OpenOptions;
use std::path::PathBuf;

use bifrost_common::{Error, Result};
use memmap2::MmapMut;

/// A live mapping of the named arena, plus the allocator that manages it.
///
/// `memmap2::MmapMut` over a backing file in the temp directory stands in
/// for the original `CreateFileMappingA`/`MapViewOfFile` pair: both give
/// every attaching process its own virtual mapping of the same physical
/// pages, which is the only property the arena's offset-based pointers
/// depend on.
pub struct Arena {
    mmap: MmapMut,
    control: *mut MallocFreeList,
    name: String,
}

// SAFETY: access to the arena's interior is synchronized by the in-arena
// `RawSpinMutex` embedded in `MallocFreeList` and in every structure built
// on top of it; `Arena` itself holds no process-local-only state.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

fn backing_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bifrost-{name}.shm"))
}

impl Arena {
    /// Create a fresh named arena of `size` bytes and initialize the
    /// allocator over it.
    pub fn create(name: &str, size: u64) -> Result<Self> {
        let path = backing_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let control = unsafe { MallocFreeList::create(mmap.as_mut_ptr(), size) };

        Ok(Self {
            mmap,
            control,
            name: name.to_string(),
        })
    }

    /// Attach to an existing named arena previously created by another
    /// process. `expected_size` is compared against the mapping's actual
    /// size; a mismatch is logged, not fatal, and the smaller of the two
    /// governs (per spec §9).
    pub fn open(name: &str, expected_size: u64) -> Result<Self> {
        let path = backing_path(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let actual_size = file.metadata()?.len();
        if actual_size != expected_size {
            log::warn!(
                "arena `{name}` size mismatch: attached {actual_size}, expected {expected_size}"
            );
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let control = unsafe { MallocFreeList::open(mmap.as_mut_ptr()) };

        Ok(Self {
            mmap,
            control,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// The first byte offset available to callers above the allocator's
    /// own reserved bookkeeping region.
    pub fn first_address(&self) -> u64 {
        MallocFreeList::first_address_offset()
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    // SAFETY: `MallocFreeList` serializes every mutation behind its own
    // embedded spin mutex, so handing out a `&mut` here from a shared `&self`
    // is sound as long as every caller goes through that lock — which every
    // method below does. This lets `Arena` be shared across threads (e.g.
    // the log-stash consumer and ordinary store writers) as `Arc<Arena>`
    // without a second, redundant process-local lock.
    #[allow(clippy::mut_from_ref)]
    fn allocator(&self) -> &mut MallocFreeList {
        unsafe { &mut *self.control }
    }

    pub fn allocate(&self, size: u64) -> Result<bifrost_common::Ptr<u8>> {
        let base = self.base_ptr();
        let ptr = self.allocator().allocate(size, base)?;
        let offset = ptr as u64 - base as u64;
        Ok(bifrost_common::Ptr::from_offset(offset))
    }

    pub fn deallocate(&self, ptr: bifrost_common::Ptr<u8>) {
        let base = self.base_ptr();
        let raw = unsafe { ptr.resolve(base) };
        self.allocator().deallocate(raw, base);
    }

    pub fn num_free_bytes(&self) -> u64 {
        unsafe { &*self.control }.num_free_bytes(self.mmap.as_ptr() as *mut u8)
    }

    /// Resolve an in-arena offset to a raw pointer valid in this process.
    ///
    /// # Safety
    /// `ptr` must have been produced against this same arena.
    pub unsafe fn resolve<T>(&self, ptr: bifrost_common::Ptr<T>) -> *mut T {
        ptr.resolve(self.base_ptr())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Err(err) = self.mmap.flush() {
            log::warn!("arena `{}` failed to flush on drop: {err}", self.name);
        }
    }
}

pub fn check_size(attached: u64, created: u64) -> Result<()> {
    if attached != created {
        return Err(Error::ArenaMismatch { attached, created });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("test-{tag}-{}", std::process::id())
    }

    #[test]
    fn create_then_open_shares_the_same_allocator_state() {
        let name = unique_name("create-open");
        let writer = Arena::create(&name, 1 << 16).unwrap();
        let ptr = writer.allocate(128).unwrap();
        drop(writer);

        let reader = Arena::open(&name, 1 << 16).unwrap();
        // The block allocated by the writer is still accounted for.
        assert!(reader.num_free_bytes() < reader.size());
        reader.deallocate(ptr);

        std::fs::remove_file(backing_path(&name)).ok();
    }

    #[test]
    fn mismatched_size_reports_error_via_check_size() {
        assert!(check_size(1024, 2048).is_err());
        assert!(check_size(1024, 1024).is_ok());
    }
}
