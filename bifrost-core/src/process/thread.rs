//! Per-thread suspend/resume and the scoped "freeze everyone else" guard
//! used both for suspended-launch bookkeeping (C4) and hook patching (C5).
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentThreadId, OpenThread, ResumeThread, SuspendThread, THREAD_SUSPEND_RESUME,
};

use bifrost_common::{Error, Result};

/// An owned handle to a single OS thread.
pub struct Thread {
    handle: HANDLE,
    tid: u32,
}

impl Thread {
    /// Open thread `tid` for suspend/resume access.
    pub fn open(tid: u32) -> Result<Self> {
        let handle = unsafe { OpenThread(THREAD_SUSPEND_RESUME, 0, tid) };
        if handle.is_null() {
            return Err(Error::TargetUnavailable(format!(
                "could not open thread {tid} for suspend/resume"
            )));
        }
        Ok(Self { handle, tid })
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    /// Increment the thread's suspend count.
    pub fn suspend(&self) -> Result<()> {
        let prev = unsafe { SuspendThread(self.handle) };
        if prev == u32::MAX {
            return Err(Error::TargetUnavailable(format!(
                "SuspendThread failed for tid {}",
                self.tid
            )));
        }
        log::trace!("suspended tid {} (previous count {prev})", self.tid);
        Ok(())
    }

    /// Decrement the thread's suspend count.
    pub fn resume(&self) -> Result<()> {
        let prev = unsafe { ResumeThread(self.handle) };
        if prev == u32::MAX {
            return Err(Error::TargetUnavailable(format!(
                "ResumeThread failed for tid {}",
                self.tid
            )));
        }
        log::trace!("resumed tid {} (previous count {prev})", self.tid);
        Ok(())
    }

    /// Enumerate every thread ID belonging to `pid`, via a toolhelp snapshot
    /// (same mechanism the original `Process` class uses to find its
    /// representative thread).
    pub fn enumerate_tids(pid: u32) -> Result<Vec<u32>> {
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
        if snapshot == windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE {
            return Err(Error::TargetUnavailable(
                "CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD) failed".to_string(),
            ));
        }

        let mut entry: THREADENTRY32 = unsafe { std::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<THREADENTRY32>() as u32;
        let mut tids = Vec::new();

        unsafe {
            if Thread32First(snapshot, &mut entry) != 0 {
                loop {
                    if entry.th32OwnerProcessID == pid {
                        tids.push(entry.th32ThreadID);
                    }
                    if Thread32Next(snapshot, &mut entry) == 0 {
                        break;
                    }
                }
            }
            CloseHandle(snapshot);
        }
        Ok(tids)
    }

    /// Suspend every thread of `pid` except the calling thread, returning
    /// the opened handles so the caller can resume them later.
    pub fn suspend_all_except_current(pid: u32) -> Result<Vec<Thread>> {
        let current = unsafe { GetCurrentThreadId() };
        let mut suspended = Vec::new();
        for tid in Self::enumerate_tids(pid)? {
            if tid == current {
                continue;
            }
            let thread = Thread::open(tid)?;
            thread.suspend()?;
            suspended.push(thread);
        }
        Ok(suspended)
    }

    pub fn resume_all(threads: &[Thread]) {
        for thread in threads {
            if let Err(err) = thread.resume() {
                log::warn!("failed to resume tid {}: {err}", thread.tid);
            }
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

unsafe impl Send for Thread {}

/// RAII guard that suspends every other thread in the current process on
/// construction and resumes them on drop, even on early-return/panic
/// unwind paths (spec §4.5: "exposed as a scoped guard so early-exit paths
/// unwind correctly").
pub struct ThreadSuspender {
    suspended: Vec<Thread>,
}

impl ThreadSuspender {
    pub fn freeze_process(pid: u32) -> Result<Self> {
        Ok(Self {
            suspended: Thread::suspend_all_except_current(pid)?,
        })
    }
}

impl Drop for ThreadSuspender {
    fn drop(&mut self) {
        Thread::resume_all(&self.suspended);
    }
}
