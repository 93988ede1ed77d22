//! Arena-resident key/value store (C2). Entries form a singly linked list
//! anchored at a header allocated once from the arena; every write replaces
//! the prior value under the store's own spin mutex, independent of the
//! allocator's.
use bifrost_common::{Ptr, StorageValue, StorageValueWire, ValueTag, INLINE_STRING_CAPACITY};

use crate::arena::Arena;
use crate::spin_mutex::RawSpinMutex;

/// Longest key accepted, chosen to keep entries a fixed, POD-friendly size;
/// the reserved `bfl.` namespace (spec §6) comfortably fits within it.
pub const STORE_KEY_CAPACITY: usize = 63;

#[repr(C)]
struct StoreEntry {
    next: Ptr<StoreEntry>,
    key_len: u8,
    key: [u8; STORE_KEY_CAPACITY],
    value: StorageValueWire,
}

/// Header allocated once per [`SharedContext`], holding the store's spin
/// mutex and the head of its entry list.
#[repr(C)]
pub struct StorageHeader {
    mutex: RawSpinMutex,
    head: Ptr<StoreEntry>,
}

impl StorageHeader {
    pub fn init(&mut self) {
        self.mutex = RawSpinMutex::new();
        self.head = Ptr::null();
    }
}

/// Handle to a live store, bound to the arena it lives in.
pub struct Storage<'a> {
    arena: &'a Arena,
    header: Ptr<StorageHeader>,
}

impl<'a> Storage<'a> {
    /// # Safety
    /// `header` must point at a [`StorageHeader`] previously initialized by
    /// [`StorageHeader::init`] inside `arena`.
    pub unsafe fn attach(arena: &'a Arena, header: Ptr<StorageHeader>) -> Self {
        Self { arena, header }
    }

    fn header(&self) -> &mut StorageHeader {
        unsafe { &mut *self.arena.resolve(self.header) }
    }

    /// Insert or replace the value at `key`. Any previously heap-allocated
    /// payload for this key is freed before the new value is written.
    pub fn set(&self, key: &str, value: StorageValue) -> bifrost_common::Result<()> {
        if key.len() > STORE_KEY_CAPACITY {
            return Err(bifrost_common::Error::ParameterDecode(format!(
                "store key `{key}` exceeds {STORE_KEY_CAPACITY} bytes"
            )));
        }
        let base = self.arena.base_ptr();
        let header = self.header();
        let _guard = Guard::new(&header.mutex);

        let mut cursor = header.head;
        unsafe {
            while !cursor.is_null() {
                let entry = &mut *cursor.resolve(base);
                if entry.key_len as usize == key.len() && &entry.key[..key.len()] == key.as_bytes() {
                    self.free_heap_payload(&mut entry.value);
                    entry.value = self.encode(value)?;
                    return Ok(());
                }
                cursor = entry.next;
            }
        }

        let entry_ptr = self.arena.allocate(std::mem::size_of::<StoreEntry>() as u64)?;
        unsafe {
            let entry = entry_ptr.cast::<StoreEntry>().resolve(base);
            let mut key_bytes = [0u8; STORE_KEY_CAPACITY];
            key_bytes[..key.len()].copy_from_slice(key.as_bytes());
            entry.write(StoreEntry {
                next: header.head,
                key_len: key.len() as u8,
                key: key_bytes,
                value: self.encode(value)?,
            });
        }
        header.head = entry_ptr.cast();
        Ok(())
    }

    /// Read the value at `key`, applying the implicit conversions described
    /// in spec §4.2 by returning the owned [`StorageValue`] and letting the
    /// caller call `as_*` on it.
    pub fn get(&self, key: &str) -> Option<StorageValue> {
        let base = self.arena.base_ptr();
        let header = self.header();
        let _guard = Guard::new(&header.mutex);

        let mut cursor = header.head;
        unsafe {
            while !cursor.is_null() {
                let entry = &*cursor.resolve(base);
                if entry.key_len as usize == key.len() && &entry.key[..key.len()] == key.as_bytes() {
                    return Some(self.decode(&entry.value));
                }
                cursor = entry.next;
            }
        }
        None
    }

    /// Remove `key`, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let base = self.arena.base_ptr();
        let header = self.header();
        let _guard = Guard::new(&header.mutex);

        let mut cursor = header.head;
        let mut prev: Ptr<StoreEntry> = Ptr::null();
        unsafe {
            while !cursor.is_null() {
                let entry = &mut *cursor.resolve(base);
                if entry.key_len as usize == key.len() && &entry.key[..key.len()] == key.as_bytes() {
                    self.free_heap_payload(&mut entry.value);
                    if prev.is_null() {
                        header.head = entry.next;
                    } else {
                        (*prev.resolve(base)).next = entry.next;
                    }
                    self.arena.deallocate(cursor.cast());
                    return true;
                }
                prev = cursor;
                cursor = entry.next;
            }
        }
        false
    }

    fn encode(&self, value: StorageValue) -> bifrost_common::Result<StorageValueWire> {
        let mut wire = StorageValueWire::zeroed();
        match value {
            StorageValue::Bool(b) => {
                wire.tag = ValueTag::BOOL;
                wire.as_bool = b as u8;
            }
            StorageValue::Int(i) => {
                wire.tag = ValueTag::INT;
                wire.as_int = i;
            }
            StorageValue::Double(d) => {
                wire.tag = ValueTag::DOUBLE;
                wire.as_double = d;
            }
            StorageValue::String(s) => {
                wire.tag = ValueTag::STRING;
                self.write_bytes(&mut wire, s.as_bytes())?;
            }
            StorageValue::Bytes(b) => {
                wire.tag = ValueTag::BYTES;
                self.write_bytes(&mut wire, &b)?;
            }
        }
        Ok(wire)
    }

    fn write_bytes(&self, wire: &mut StorageValueWire, bytes: &[u8]) -> bifrost_common::Result<()> {
        if bytes.len() <= INLINE_STRING_CAPACITY {
            wire.inline_len = bytes.len() as u32;
            wire.inline_bytes[..bytes.len()].copy_from_slice(bytes);
        } else {
            let heap = self.arena.allocate(bytes.len() as u64)?;
            unsafe {
                let dst = heap.resolve(self.arena.base_ptr());
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
            }
            wire.heap_ptr = heap;
            wire.heap_len = bytes.len() as u64;
        }
        Ok(())
    }

    fn free_heap_payload(&self, wire: &mut StorageValueWire) {
        if !wire.heap_ptr.is_null() {
            self.arena.deallocate(wire.heap_ptr);
            wire.heap_ptr = Ptr::null();
            wire.heap_len = 0;
        }
    }

    fn decode(&self, wire: &StorageValueWire) -> StorageValue {
        match wire.tag {
            ValueTag::BOOL => StorageValue::Bool(wire.as_bool != 0),
            ValueTag::INT => StorageValue::Int(wire.as_int),
            ValueTag::DOUBLE => StorageValue::Double(wire.as_double),
            ValueTag::STRING => StorageValue::String(self.read_text(wire)),
            ValueTag::BYTES => StorageValue::Bytes(self.read_raw(wire)),
            _ => StorageValue::Bytes(Vec::new()),
        }
    }

    fn read_raw(&self, wire: &StorageValueWire) -> Vec<u8> {
        if wire.heap_ptr.is_null() {
            wire.inline_bytes[..wire.inline_len as usize].to_vec()
        } else {
            unsafe {
                let src = wire.heap_ptr.resolve_const(self.arena.base_ptr());
                std::slice::from_raw_parts(src, wire.heap_len as usize).to_vec()
            }
        }
    }

    fn read_text(&self, wire: &StorageValueWire) -> String {
        String::from_utf8_lossy(&self.read_raw(wire)).into_owned()
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

#[cfg(test)]
mod tests {
    use super::*;

    fn new_storage(arena: &Arena) -> Storage<'_> {
        let header_ptr = arena
            .allocate(std::mem::size_of::<StorageHeader>() as u64)
            .unwrap();
        unsafe {
            let header = header_ptr.cast::<StorageHeader>().resolve(arena.base_ptr());
            (*header).init();
            Storage::attach(arena, header_ptr.cast())
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let arena = Arena::create(&format!("storage-test-{}", std::process::id()), 1 << 16).unwrap();
        let store = new_storage(&arena);

        store.set("bfl.plugin.0.name", StorageValue::String("demo".into())).unwrap();
        assert_eq!(
            store.get("bfl.plugin.0.name"),
            Some(StorageValue::String("demo".into()))
        );
    }

    #[test]
    fn implicit_conversions_match_spec() {
        let arena = Arena::create(&format!("storage-test-conv-{}", std::process::id()), 1 << 16).unwrap();
        let store = new_storage(&arena);

        store.set("count", StorageValue::Int(42)).unwrap();
        let value = store.get("count").unwrap();
        assert_eq!(value.as_bool(), Some(true));
        assert_eq!(value.as_f64(), Some(42.0));
        assert_eq!(value.as_string(), Some("42".to_string()));
    }

    #[test]
    fn overwrite_frees_previous_heap_payload() {
        let arena = Arena::create(&format!("storage-test-overwrite-{}", std::process::id()), 1 << 16).unwrap();
        let store = new_storage(&arena);
        let free_before = arena.num_free_bytes();

        let long = "x".repeat(200);
        store.set("k", StorageValue::String(long)).unwrap();
        store.set("k", StorageValue::Int(1)).unwrap();

        // The entry itself stays allocated; only the heap string payload is
        // freed back, so free bytes should recover to within one entry's
        // worth of the starting point.
        let free_after = arena.num_free_bytes();
        assert!(free_after <= free_before);
        assert!(free_after > free_before - 512);
    }

    #[test]
    fn remove_reports_existence() {
        let arena = Arena::create(&format!("storage-test-remove-{}", std::process::id()), 1 << 16).unwrap();
        let store = new_storage(&arena);

        store.set("a", StorageValue::Bool(true)).unwrap();
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn inline_and_heap_string_boundary() {
        let arena = Arena::create(&format!("storage-test-boundary-{}", std::process::id()), 1 << 16).unwrap();
        let store = new_storage(&arena);

        let exact = "a".repeat(INLINE_STRING_CAPACITY);
        let over = "a".repeat(INLINE_STRING_CAPACITY + 1);
        store.set("exact", StorageValue::String(exact.clone())).unwrap();
        store.set("over", StorageValue::String(over.clone())).unwrap();

        assert_eq!(store.get("exact"), Some(StorageValue::String(exact)));
        assert_eq!(store.get("over"), Some(StorageValue::String(over)));
    }
}
