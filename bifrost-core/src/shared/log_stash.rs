//! Arena-resident FIFO log queue (C2) with a per-process consumer thread
//! that drains it into registered callbacks using the exponential backoff
//! schedule from the original `LogStashConsumer`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bifrost_common::{LogLevel, Ptr};

use crate::arena::Arena;
use crate::spin_mutex::RawSpinMutex;

/// Longest module/message strings copied into the arena per record. Longer
/// input is truncated rather than spilling into a secondary allocation,
/// keeping the hot push path allocation-free.
pub const LOG_MODULE_CAPACITY: usize = 31;
pub const LOG_MESSAGE_CAPACITY: usize = 223;

const BACKOFF_SCHEDULE_MS: [u64; 5] = [1, 5, 10, 50, 100];

#[repr(C)]
struct LogRecord {
    next: Ptr<LogRecord>,
    level: u32,
    module_len: u8,
    module: [u8; LOG_MODULE_CAPACITY],
    message_len: u16,
    message: [u8; LOG_MESSAGE_CAPACITY],
}

/// Header allocated once per [`SharedContext`], holding the stash's own
/// spin mutex (distinct from the allocator's and the store's, per the
/// strict mutex-ordering rule in spec §5) plus FIFO head/tail/count.
#[repr(C)]
pub struct LogStashHeader {
    mutex: RawSpinMutex,
    head: Ptr<LogRecord>,
    tail: Ptr<LogRecord>,
    count: u64,
}

impl LogStashHeader {
    pub fn init(&mut self) {
        self.mutex = RawSpinMutex::new();
        self.head = Ptr::null();
        self.tail = Ptr::null();
        self.count = 0;
    }
}

/// A registered drain callback, keyed by name so registration is idempotent
/// (spec §4.2).
pub type LogCallback = Box<dyn Fn(LogLevel, &str, &str) + Send + Sync>;

struct Registered {
    name: String,
    callback: LogCallback,
}

/// Handle to a live log stash, bound to the arena it lives in. Producers
/// call [`LogStash::push`] directly; a background thread started by
/// [`LogStash::spawn_consumer`] drains records into the registered
/// callbacks.
pub struct LogStash<'a> {
    arena: &'a Arena,
    header: Ptr<LogStashHeader>,
    callbacks: Arc<Mutex<Vec<Registered>>>,
    done: Arc<AtomicBool>,
}

impl<'a> LogStash<'a> {
    /// # Safety
    /// `header` must point at a [`LogStashHeader`] previously initialized by
    /// [`LogStashHeader::init`] inside `arena`.
    pub unsafe fn attach(arena: &'a Arena, header: Ptr<LogStashHeader>) -> Self {
        Self {
            arena,
            header,
            callbacks: Arc::new(Mutex::new(Vec::new())),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    fn header(&self) -> &mut LogStashHeader {
        unsafe { &mut *self.arena.resolve(self.header) }
    }

    pub fn register(&self, name: impl Into<String>, callback: LogCallback) {
        let name = name.into();
        let mut callbacks = self.callbacks.lock().unwrap();
        if let Some(existing) = callbacks.iter_mut().find(|r| r.name == name) {
            existing.callback = callback;
        } else {
            callbacks.push(Registered { name, callback });
        }
    }

    /// Enqueue a record. Never blocks on a consumer (spec §4.2's contract).
    pub fn push(&self, level: LogLevel, module: &str, message: &str) -> bifrost_common::Result<()> {
        let entry_ptr = self
            .arena
            .allocate(std::mem::size_of::<LogRecord>() as u64)?;
        let base = self.arena.base_ptr();

        let mut module_buf = [0u8; LOG_MODULE_CAPACITY];
        let module_bytes = &module.as_bytes()[..module.len().min(LOG_MODULE_CAPACITY)];
        module_buf[..module_bytes.len()].copy_from_slice(module_bytes);

        let mut message_buf = [0u8; LOG_MESSAGE_CAPACITY];
        let message_bytes = &message.as_bytes()[..message.len().min(LOG_MESSAGE_CAPACITY)];
        message_buf[..message_bytes.len()].copy_from_slice(message_bytes);

        unsafe {
            let record = entry_ptr.cast::<LogRecord>().resolve(base);
            record.write(LogRecord {
                next: Ptr::null(),
                level: level as u32,
                module_len: module_bytes.len() as u8,
                module: module_buf,
                message_len: message_bytes.len() as u16,
                message: message_buf,
            });
        }

        let header = self.header();
        let _guard = Guard::new(&header.mutex);
        let node: Ptr<LogRecord> = entry_ptr.cast();
        if header.tail.is_null() {
            header.head = node;
        } else {
            unsafe {
                (*header.tail.resolve(base)).next = node;
            }
        }
        header.tail = node;
        header.count += 1;
        Ok(())
    }

    /// Pop every currently queued record, invoking the registered callbacks
    /// in FIFO order, and return how many were drained.
    pub fn drain(&self) -> usize {
        let base = self.arena.base_ptr();
        let mut drained = 0;
        loop {
            let popped = {
                let header = self.header();
                let _guard = Guard::new(&header.mutex);
                if header.head.is_null() {
                    None
                } else {
                    let node = header.head;
                    let next = unsafe { (*node.resolve(base)).next };
                    header.head = next;
                    if next.is_null() {
                        header.tail = Ptr::null();
                    }
                    header.count -= 1;
                    Some(node)
                }
            };
            let Some(node) = popped else { break };

            unsafe {
                let record = &*node.resolve(base);
                let level = LogLevel::from_u32(record.level).unwrap_or(LogLevel::Info);
                let module =
                    std::str::from_utf8(&record.module[..record.module_len as usize]).unwrap_or("");
                let message =
                    std::str::from_utf8(&record.message[..record.message_len as usize]).unwrap_or("");
                for registered in self.callbacks.lock().unwrap().iter() {
                    (registered.callback)(level, module, message);
                }
            }
            self.arena.deallocate(node.cast());
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> u64 {
        let header = self.header();
        let _guard = Guard::new(&header.mutex);
        header.count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the per-process consumer thread. Exponential backoff when the
    /// queue is empty, per spec §5's "up to ~100 ms" schedule.
    pub fn spawn_consumer(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let stash = Arc::clone(self);
        std::thread::spawn(move || {
            let mut backoff_idx = 0usize;
            loop {
                let drained = stash.drain();
                if stash.done.load(Ordering::Acquire) {
                    stash.drain();
                    break;
                }
                if drained > 0 {
                    backoff_idx = 0;
                    continue;
                }
                let delay = BACKOFF_SCHEDULE_MS[backoff_idx.min(BACKOFF_SCHEDULE_MS.len() - 1)];
                std::thread::sleep(Duration::from_millis(delay));
                backoff_idx = (backoff_idx + 1).min(BACKOFF_SCHEDULE_MS.len() - 1);
            }
        })
    }

    /// Signal the consumer thread to perform one final drain and exit.
    pub fn shut_down(&self) {
        self.done.store(true, Ordering::Release);
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
    use std::sync::atomic::AtomicUsize;

    fn new_stash(arena: &Arena) -> LogStash<'_> {
        let header_ptr = arena
            .allocate(std::mem::size_of::<LogStashHeader>() as u64)
            .unwrap();
        unsafe {
            let header = header_ptr
                .cast::<LogStashHeader>()
                .resolve(arena.base_ptr());
            (*header).init();
            LogStash::attach(arena, header_ptr.cast())
        }
    }

    #[test]
    fn push_then_drain_delivers_in_fifo_order() {
        let arena = Arena::create(&format!("stash-test-fifo-{}", std::process::id()), 1 << 16).unwrap();
        let stash = new_stash(&arena);

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        stash.register("collector", Box::new(move |_lvl, _module, msg| {
            seen_cb.lock().unwrap().push(msg.to_string());
        }));

        stash.push(LogLevel::Info, "mod", "first").unwrap();
        stash.push(LogLevel::Info, "mod", "second").unwrap();
        stash.push(LogLevel::Info, "mod", "third").unwrap();

        assert_eq!(stash.drain(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
        assert!(stash.is_empty());
    }

    #[test]
    fn registration_by_name_is_idempotent() {
        let arena = Arena::create(&format!("stash-test-idem-{}", std::process::id()), 1 << 16).unwrap();
        let stash = new_stash(&arena);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_a = Arc::clone(&calls);
        stash.register("cb", Box::new(move |_, _, _| {
            calls_a.fetch_add(1, Ordering::Relaxed);
        }));
        let calls_b = Arc::clone(&calls);
        stash.register("cb", Box::new(move |_, _, _| {
            calls_b.fetch_add(100, Ordering::Relaxed);
        }));

        stash.push(LogLevel::Warn, "m", "x").unwrap();
        stash.drain();
        // Only the second registration should have fired, exactly once.
        assert_eq!(calls.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn overlong_strings_are_truncated_not_rejected() {
        let arena = Arena::create(&format!("stash-test-trunc-{}", std::process::id()), 1 << 16).unwrap();
        let stash = new_stash(&arena);
        let long_message = "m".repeat(LOG_MESSAGE_CAPACITY + 50);
        assert!(stash.push(LogLevel::Debug, "mod", &long_message).is_ok());
        assert_eq!(stash.drain(), 1);
    }
}
