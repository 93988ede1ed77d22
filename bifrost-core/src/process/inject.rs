//! Remote injection (C4 `inject`): write the parameter block into the
//! target, load the bootstrap module via a `LoadLibraryW` remote thread,
//! then call one of its named entry points via a second remote thread.
use std::ffi::c_void;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, MODULEENTRY32W, TH32CS_SNAPMODULE,
    TH32CS_SNAPMODULE32,
};
use windows_sys::Win32::System::LibraryLoader::{
    FreeLibrary, GetModuleHandleW, GetProcAddress, LoadLibraryW,
};
use windows_sys::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{
    CreateRemoteThread, GetExitCodeThread, WaitForSingleObject,
};

use bifrost_common::{Error, Result};

fn wide_null(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Entry points a bootstrap (and, by the same contract, a plugin) module
/// exports (spec §6).
#[derive(Copy, Clone, Debug)]
pub enum EntryPoint {
    Setup,
    Teardown,
    Message,
    Help,
}

impl EntryPoint {
    fn symbol(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Teardown => "teardown",
            Self::Message => "message",
            Self::Help => "help",
        }
    }
}

struct RemoteAlloc {
    process: HANDLE,
    addr: *mut c_void,
}

impl RemoteAlloc {
    fn new(process: HANDLE, size: usize, protect: u32) -> Result<Self> {
        let addr = unsafe {
            VirtualAllocEx(
                process,
                std::ptr::null(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                protect,
            )
        };
        if addr.is_null() {
            return Err(Error::TargetUnavailable(
                "VirtualAllocEx failed in target process".to_string(),
            ));
        }
        Ok(Self { process, addr })
    }
}

impl Drop for RemoteAlloc {
    fn drop(&mut self) {
        unsafe {
            VirtualFreeEx(self.process, self.addr, 0, MEM_RELEASE);
        }
    }
}

fn write_remote_bytes(process: HANDLE, remote: *mut c_void, bytes: &[u8]) -> Result<()> {
    let ok = unsafe {
        windows_sys::Win32::System::Diagnostics::Debug::WriteProcessMemory(
            process,
            remote,
            bytes.as_ptr() as *const c_void,
            bytes.len(),
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(Error::TargetUnavailable(
            "WriteProcessMemory failed".to_string(),
        ));
    }
    Ok(())
}

/// Run `start_routine(arg)` as a new thread inside `process` and wait up to
/// `timeout_ms` for it to finish, returning its exit code.
fn run_remote_thread(
    process: HANDLE,
    start_routine: *const c_void,
    arg: *mut c_void,
    timeout_ms: u32,
) -> Result<u32> {
    let handle = unsafe {
        CreateRemoteThread(
            process,
            std::ptr::null(),
            0,
            Some(std::mem::transmute::<
                *const c_void,
                unsafe extern "system" fn(*mut c_void) -> u32,
            >(start_routine)),
            arg,
            0,
            std::ptr::null_mut(),
        )
    };
    if handle.is_null() {
        return Err(Error::TargetUnavailable(
            "CreateRemoteThread failed".to_string(),
        ));
    }

    let wait = unsafe { WaitForSingleObject(handle, timeout_ms) };
    if wait == WAIT_TIMEOUT {
        unsafe { CloseHandle(handle) };
        return Err(Error::RemoteExecutionTimeout(timeout_ms));
    }
    if wait != WAIT_OBJECT_0 {
        unsafe { CloseHandle(handle) };
        return Err(Error::TargetUnavailable(
            "WaitForSingleObject on remote thread returned an unexpected status".to_string(),
        ));
    }

    let mut exit_code = 0u32;
    unsafe {
        GetExitCodeThread(handle, &mut exit_code);
        CloseHandle(handle);
    }
    Ok(exit_code)
}

/// Load `dll_path` into `process` via a remote `LoadLibraryW` call and
/// return the resulting module base address, as an opaque `u64` (an
/// `HMODULE` is the remote thread's exit code per spec §4.4 step 3).
pub fn load_library_remote(process: HANDLE, dll_path: &str, timeout_ms: u32) -> Result<u64> {
    let path_wide = wide_null(dll_path);
    let path_bytes = unsafe {
        std::slice::from_raw_parts(path_wide.as_ptr() as *const u8, path_wide.len() * 2)
    };

    // A writable+executable region, matching the original's allocation for
    // the path buffer passed to the `LoadLibraryW` remote thread.
    let remote_path = RemoteAlloc::new(process, path_bytes.len(), PAGE_EXECUTE_READWRITE)?;
    write_remote_bytes(process, remote_path.addr, path_bytes)?;

    let kernel32 = wide_null("kernel32.dll");
    let kernel32_handle = unsafe { GetModuleHandleW(kernel32.as_ptr()) };
    let load_library_w = unsafe {
        GetProcAddress(kernel32_handle, c"LoadLibraryW".as_ptr() as *const u8)
    };
    let Some(load_library_w) = load_library_w else {
        return Err(Error::TargetUnavailable(
            "could not resolve LoadLibraryW in this process".to_string(),
        ));
    };

    let exit_code = run_remote_thread(
        process,
        load_library_w as *const c_void,
        remote_path.addr,
        timeout_ms,
    )?;
    if exit_code == 0 {
        return Err(Error::RemoteExecutionFailed(exit_code));
    }
    Ok(exit_code as u64)
}

/// Locate `module_name`'s base address inside `pid` via a toolhelp module
/// snapshot.
pub fn remote_module_base(pid: u32, module_name: &str) -> Result<u64> {
    let snapshot =
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, pid) };
    if snapshot == windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE {
        return Err(Error::TargetUnavailable(
            "CreateToolhelp32Snapshot(TH32CS_SNAPMODULE) failed".to_string(),
        ));
    }

    let mut entry: MODULEENTRY32W = unsafe { std::mem::zeroed() };
    entry.dwSize = std::mem::size_of::<MODULEENTRY32W>() as u32;
    let mut found = None;

    unsafe {
        if Module32FirstW(snapshot, &mut entry) != 0 {
            loop {
                let name = String::from_utf16_lossy(
                    &entry.szModule[..entry.szModule.iter().position(|&c| c == 0).unwrap_or(0)],
                );
                if name.eq_ignore_ascii_case(module_name) {
                    found = Some(entry.modBaseAddr as u64);
                    break;
                }
                if Module32NextW(snapshot, &mut entry) == 0 {
                    break;
                }
            }
        }
        CloseHandle(snapshot);
    }

    found.ok_or_else(|| {
        Error::TargetUnavailable(format!("module `{module_name}` not found in target"))
    })
}

/// Write `text` into a freshly allocated read-write remote region and
/// return its address, for use as a parameter-block or argument buffer.
pub fn write_remote_param_block(process: HANDLE, text: &str) -> Result<RemoteParamBlock> {
    let bytes: Vec<u8> = text.bytes().chain(std::iter::once(0)).collect();
    let remote = RemoteAlloc::new(process, bytes.len(), PAGE_READWRITE)?;
    write_remote_bytes(process, remote.addr, &bytes)?;
    Ok(RemoteParamBlock { alloc: remote })
}

/// An allocated, written parameter block in the target's address space,
/// freed on drop (spec §4.4 step 6).
pub struct RemoteParamBlock {
    alloc: RemoteAlloc,
}

impl RemoteParamBlock {
    pub fn addr(&self) -> *mut c_void {
        self.alloc.addr
    }
}

/// Call `entry` inside `module_base` via a remote thread, passing
/// `param.addr()` as the argument.
///
/// `dll_path` is the same path used to load the module into the target: we
/// load it a second time into our own process (a plain `LoadLibraryW`, not
/// mapped into the target) purely to ask the loader where `entry` lives
/// relative to the module's own base, via `GetProcAddress`. That
/// offset — not the absolute address — is what we rebase onto
/// `module_base`, since a module's internal layout is identical regardless
/// of which address it gets mapped at.
pub fn call_entry_point(
    process: HANDLE,
    module_base: u64,
    dll_path: &str,
    entry: EntryPoint,
    param: &RemoteParamBlock,
    timeout_ms: u32,
) -> Result<u32> {
    let rva = resolve_export_rva(dll_path, entry)?;
    let address = (module_base + rva) as *const c_void;

    run_remote_thread(process, address, param.addr(), timeout_ms)
}

/// Resolve `entry`'s byte offset from its own module's base by loading the
/// DLL locally and diffing `GetProcAddress`'s result against the local
/// module handle.
fn resolve_export_rva(dll_path: &str, entry: EntryPoint) -> Result<u64> {
    let path_wide = wide_null(dll_path);
    let local = unsafe { LoadLibraryW(path_wide.as_ptr()) };
    if local.is_null() {
        return Err(Error::TargetUnavailable(format!(
            "could not locally load `{dll_path}` to resolve its exports"
        )));
    }

    let symbol_cstr = std::ffi::CString::new(entry.symbol()).expect("entry point name has no NUL");
    let proc = unsafe { GetProcAddress(local, symbol_cstr.as_ptr() as *const u8) };
    let result = match proc {
        Some(addr) => Ok(addr as u64 - local as u64),
        None => Err(Error::TargetUnavailable(format!(
            "export `{}` not found in `{dll_path}`",
            entry.symbol()
        ))),
    };

    unsafe {
        FreeLibrary(local);
    }
    result
}
