//! A spin mutex that can live inside the shared arena.
//!
//! Ordinary OS mutexes (`std::sync::Mutex`) are not valid across the
//! injector/target process boundary: their internal state may reference
//! kernel objects private to one process. The arena instead embeds this
//! lock-free spin lock directly in its bytes, matching the original
//! `SpinMutex` used by the allocator, store and log stash.
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Raw, `#[repr(C)]`-compatible spin lock state. Embed this field directly
/// in an arena struct; pair it with [`SpinMutexGuard::lock`]/`unlock` below.
#[repr(transparent)]
pub struct RawSpinMutex {
    state: AtomicU32,
}

impl RawSpinMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    pub fn lock(&self) {
        let mut spins: u64 = 0;
        while self
            .state
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// # Safety
    /// Caller must hold the lock.
    pub fn unlock(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

impl Default for RawSpinMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A host-side, `Send`/`Sync` convenience wrapper pairing a [`RawSpinMutex`]
/// with the data it protects, for structures that live in process-local
/// memory (as opposed to the arena, where the raw field embeds directly).
pub struct SpinMutex<T> {
    raw: RawSpinMutex,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpinMutex::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.raw.lock();
        SpinMutexGuard { mutex: self }
    }
}

pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn mutual_exclusion_under_contention() {
        let counter = Arc::new(SpinMutex::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *counter.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8000);
    }
}
