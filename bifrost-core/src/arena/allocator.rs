//! First-fit, address-ordered, coalescing free-list allocator over a byte
//! range that may be mapped at different virtual addresses in different
//! processes. Every link is a byte offset from the arena base, never a raw
//! pointer, per spec §3/§4.1.
use bifrost_common::{Error, Ptr, Result, ALLOC_BLOCK_SIZE, ALLOC_RESERVED_BLOCKS};

use crate::spin_mutex::RawSpinMutex;

/// Header preceding every block, free or allocated. While a block is free,
/// `prev`/`next` (address-ordered free-list links) live in the bytes
/// immediately after this header; while allocated, those bytes belong to
/// the caller's payload.
#[repr(C)]
struct BlockHeader {
    /// Total size of this block (header + link/payload bytes), a multiple
    /// of [`ALLOC_BLOCK_SIZE`].
    size: u64,
}

#[repr(C)]
struct FreeLinks {
    prev: Ptr<BlockHeader>,
    next: Ptr<BlockHeader>,
}

const HEADER_SIZE: u64 = std::mem::size_of::<BlockHeader>() as u64;
const LINKS_SIZE: u64 = std::mem::size_of::<FreeLinks>() as u64;

fn round_up_to_block(n: u64) -> u64 {
    n.div_ceil(ALLOC_BLOCK_SIZE) * ALLOC_BLOCK_SIZE
}

/// The allocator's control block. Lives at a fixed offset
/// (`ALLOC_RESERVED_BLOCKS * ALLOC_BLOCK_SIZE`) from the arena base; that
/// offset is additionally mirrored into the arena's first 8 bytes so a
/// secondary attacher can locate it without recompiling the constant,
/// matching the original `MallocFreeList` bootstrap.
#[repr(C)]
pub struct MallocFreeList {
    mutex: RawSpinMutex,
    free_head: Ptr<BlockHeader>,
    total_size: u64,
    num_free_bytes: u64,
}

impl MallocFreeList {
    /// Byte offset from the arena base to this control block.
    pub const CONTROL_BLOCK_OFFSET: u64 = ALLOC_RESERVED_BLOCKS * ALLOC_BLOCK_SIZE;

    /// The first byte offset available for real allocations: past the
    /// allocator's own reserved bookkeeping region.
    pub const fn first_address_offset() -> u64 {
        Self::CONTROL_BLOCK_OFFSET + std::mem::size_of::<MallocFreeList>() as u64
    }

    /// Initialize a brand-new arena: write the 8-byte bootstrap prefix,
    /// construct the control block, and seed the free list with one giant
    /// free block spanning the rest of the arena.
    ///
    /// # Safety
    /// `base` must point at a writable region of at least `arena_size`
    /// bytes, exclusively owned by the caller for the duration of this call.
    pub unsafe fn create(base: *mut u8, arena_size: u64) -> *mut MallocFreeList {
        let prefix = base as *mut u64;
        prefix.write(Self::CONTROL_BLOCK_OFFSET);

        let first_addr = Self::first_address_offset();
        let free_bytes = arena_size - first_addr;

        let control = base.add(Self::CONTROL_BLOCK_OFFSET as usize) as *mut MallocFreeList;
        control.write(MallocFreeList {
            mutex: RawSpinMutex::new(),
            free_head: Ptr::from_offset(first_addr),
            total_size: arena_size,
            num_free_bytes: free_bytes,
        });

        let head_header = base.add(first_addr as usize) as *mut BlockHeader;
        head_header.write(BlockHeader { size: free_bytes });
        let head_links = base.add(first_addr as usize + HEADER_SIZE as usize) as *mut FreeLinks;
        head_links.write(FreeLinks {
            prev: Ptr::null(),
            next: Ptr::null(),
        });

        control
    }

    /// Locate an existing control block by reading the 8-byte bootstrap
    /// prefix written by [`Self::create`].
    ///
    /// # Safety
    /// `base` must point at an arena previously initialized by
    /// [`Self::create`].
    pub unsafe fn open(base: *mut u8) -> *mut MallocFreeList {
        let offset = *(base as *const u64);
        base.add(offset as usize) as *mut MallocFreeList
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn num_free_bytes(&self, base: *mut u8) -> u64 {
        let _guard = Guard::new(&self.mutex);
        let _ = base;
        self.num_free_bytes
    }

    /// Allocate `size` bytes, returning a pointer in `base`'s address space.
    pub fn allocate(&mut self, size: u64, base: *mut u8) -> Result<*mut u8> {
        let needed = round_up_to_block(size + HEADER_SIZE).max(ALLOC_BLOCK_SIZE);
        let _guard = Guard::new(&self.mutex);

        unsafe {
            let mut cursor = self.free_head;
            let mut prev_cursor: Ptr<BlockHeader> = Ptr::null();

            while !cursor.is_null() {
                let header = &mut *cursor.resolve(base);
                if header.size >= needed {
                    let links_ptr = (cursor.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                        as *mut FreeLinks;
                    let links = &*links_ptr;
                    let (prev, next) = (links.prev, links.next);

                    let remainder = header.size - needed;
                    if remainder >= ALLOC_BLOCK_SIZE {
                        header.size = needed;
                        let new_free_offset = cursor.offset() + needed;
                        let new_header =
                            base.add(new_free_offset as usize) as *mut BlockHeader;
                        new_header.write(BlockHeader { size: remainder });
                        let new_links = base.add(new_free_offset as usize + HEADER_SIZE as usize)
                            as *mut FreeLinks;
                        new_links.write(FreeLinks { prev, next });
                        self.relink_neighbors(base, prev, next, Ptr::from_offset(new_free_offset));
                    } else {
                        self.relink_neighbors(base, prev, next, Ptr::null());
                    }

                    if prev_cursor.is_null() {
                        // handled by relink_neighbors via None marker above when prev is null
                    }

                    self.num_free_bytes -= header.size;
                    return Ok((cursor.resolve(base) as *mut u8).add(HEADER_SIZE as usize));
                }
                prev_cursor = cursor;
                let links = &*((cursor.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                    as *const FreeLinks);
                cursor = links.next;
            }
            let _ = prev_cursor;
        }

        Err(Error::ArenaExhausted {
            requested: size,
            available: self.num_free_bytes,
        })
    }

    /// Return the block at `ptr` (previously returned by [`Self::allocate`])
    /// to the free list, coalescing with address-adjacent free neighbors.
    pub fn deallocate(&mut self, ptr: *mut u8, base: *mut u8) {
        let _guard = Guard::new(&self.mutex);
        unsafe {
            let header_ptr = ptr.sub(HEADER_SIZE as usize) as *mut BlockHeader;
            let header = &mut *header_ptr;
            let offset = header_ptr as u64 - base as u64;

            self.num_free_bytes += header.size;
            self.insert_address_ordered(base, Ptr::from_offset(offset), header.size);
            self.coalesce_neighbors(base, Ptr::from_offset(offset));
        }
    }

    unsafe fn relink_neighbors(
        &mut self,
        base: *mut u8,
        prev: Ptr<BlockHeader>,
        next: Ptr<BlockHeader>,
        replacement: Ptr<BlockHeader>,
    ) {
        if prev.is_null() {
            self.free_head = if replacement.is_null() { next } else { replacement };
        } else {
            let prev_links = (prev.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                as *mut FreeLinks;
            (*prev_links).next = if replacement.is_null() { next } else { replacement };
        }
        if !next.is_null() {
            let next_links = (next.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                as *mut FreeLinks;
            (*next_links).prev = if replacement.is_null() { prev } else { replacement };
        }
        if !replacement.is_null() {
            let links_ptr = (replacement.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                as *mut FreeLinks;
            (*links_ptr).prev = prev;
            (*links_ptr).next = next;
        }
    }

    unsafe fn insert_address_ordered(&mut self, base: *mut u8, node: Ptr<BlockHeader>, _size: u64) {
        let mut cursor = self.free_head;
        let mut prev: Ptr<BlockHeader> = Ptr::null();

        while !cursor.is_null() && cursor.offset() < node.offset() {
            prev = cursor;
            let links = &*((cursor.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                as *const FreeLinks);
            cursor = links.next;
        }

        let node_links =
            (node.resolve(base) as *mut u8).add(HEADER_SIZE as usize) as *mut FreeLinks;
        (*node_links).prev = prev;
        (*node_links).next = cursor;

        if prev.is_null() {
            self.free_head = node;
        } else {
            let prev_links = (prev.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                as *mut FreeLinks;
            (*prev_links).next = node;
        }
        if !cursor.is_null() {
            let cursor_links = (cursor.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                as *mut FreeLinks;
            (*cursor_links).prev = node;
        }
    }

    unsafe fn coalesce_neighbors(&mut self, base: *mut u8, node: Ptr<BlockHeader>) {
        let node_header = &mut *(node.resolve(base) as *mut BlockHeader);
        let node_links_ptr =
            (node.resolve(base) as *mut u8).add(HEADER_SIZE as usize) as *mut FreeLinks;
        let node_links = &*node_links_ptr;

        // Coalesce with successor if immediately adjacent.
        let next = node_links.next;
        if !next.is_null() && node.offset() + node_header.size == next.offset() {
            let next_header = &*(next.resolve(base) as *const BlockHeader);
            let next_links = &*((next.resolve(base) as *mut u8).add(HEADER_SIZE as usize)
                as *const FreeLinks);
            let after_next = next_links.next;

            node_header.size += next_header.size;
            (*node_links_ptr).next = after_next;
            if !after_next.is_null() {
                let after_links = (after_next.resolve(base) as *mut u8)
                    .add(HEADER_SIZE as usize) as *mut FreeLinks;
                (*after_links).prev = node;
            }
        }

        // Coalesce with predecessor if immediately adjacent.
        let prev = (*node_links_ptr).prev;
        if !prev.is_null() {
            let prev_header = &mut *(prev.resolve(base) as *mut BlockHeader);
            if prev.offset() + prev_header.size == node.offset() {
                let node_links = &*node_links_ptr;
                let next = node_links.next;

                prev_header.size += node_header.size;
                let prev_links_ptr = (prev.resolve(base) as *mut u8)
                    .add(HEADER_SIZE as usize) as *mut FreeLinks;
                (*prev_links_ptr).next = next;
                if !next.is_null() {
                    let next_links = (next.resolve(base) as *mut u8)
                        .add(HEADER_SIZE as usize) as *mut FreeLinks;
                    (*next_links).prev = prev;
                }
            }
        }
    }
}

struct Guard<'a> {
    mutex: &'a RawSpinMutex,
}

impl<'a> Guard<'a> {
    fn new(mutex: &'a RawSpinMutex) -> Self {
        mutex.lock();
        Self { mutex }
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[allow(dead_code)]
const fn _assert_links_fit_in_min_block() {
    assert!(HEADER_SIZE + LINKS_SIZE <= ALLOC_BLOCK_SIZE);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_arena(size: u64) -> (Vec<u8>, *mut MallocFreeList) {
        let mut buf = vec![0u8; size as usize];
        let base = buf.as_mut_ptr();
        let control = unsafe { MallocFreeList::create(base, size) };
        (buf, control)
    }

    #[test]
    fn fresh_arena_has_one_free_block() {
        let (mut buf, control) = new_arena(1 << 16);
        let base = buf.as_mut_ptr();
        let alloc = unsafe { &mut *control };
        let free_at_start = alloc.num_free_bytes(base);
        assert!(free_at_start > 0);
    }

    #[test]
    fn allocate_then_deallocate_restores_free_bytes() {
        let (mut buf, control) = new_arena(1 << 16);
        let base = buf.as_mut_ptr();
        let alloc = unsafe { &mut *control };
        let before = alloc.num_free_bytes(base);

        let p1 = alloc.allocate(100, base).unwrap();
        let p2 = alloc.allocate(200, base).unwrap();
        let p3 = alloc.allocate(50, base).unwrap();
        assert!(alloc.num_free_bytes(base) < before);

        alloc.deallocate(p2, base);
        alloc.deallocate(p1, base);
        alloc.deallocate(p3, base);

        assert_eq!(alloc.num_free_bytes(base), before);
    }

    #[test]
    fn exhausting_the_arena_returns_arena_exhausted() {
        let (mut buf, control) = new_arena(1024);
        let base = buf.as_mut_ptr();
        let alloc = unsafe { &mut *control };
        let free = alloc.num_free_bytes(base);
        let err = alloc.allocate(free + 1, base).unwrap_err();
        assert!(matches!(err, Error::ArenaExhausted { .. }));
    }

    #[test]
    fn many_interleaved_allocations_eventually_fully_coalesce() {
        let (mut buf, control) = new_arena(1 << 20);
        let base = buf.as_mut_ptr();
        let alloc = unsafe { &mut *control };
        let before = alloc.num_free_bytes(base);

        let mut ptrs = Vec::new();
        for i in 0..64 {
            ptrs.push(alloc.allocate(16 + i, base).unwrap());
        }
        // Deallocate out of order to exercise coalescing from both sides.
        ptrs.reverse();
        for p in ptrs {
            alloc.deallocate(p, base);
        }

        assert_eq!(alloc.num_free_bytes(base), before);
    }
}
