//! Symbol resolution for diagnostics (C5). Opt-in via `HookConfig::debug`;
//! addresses are cached to symbol names, and trampoline / jump-table
//! addresses are translated back to the function they redirect, with a
//! `[trampoline]` / `[jump-table]` suffix, matching the original
//! `HookDebugger`.
use std::collections::HashMap;
use std::sync::Mutex;

use windows_sys::Win32::Foundation::GetCurrentProcess;
use windows_sys::Win32::System::Diagnostics::Debug::{SymCleanup, SymFromAddr, SymInitialize, SYMBOL_INFO};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Redirect {
    Trampoline,
    JumpTable,
}

struct State {
    symbol_cache: HashMap<u64, String>,
    redirects: HashMap<u64, (u64, Redirect)>,
}

/// Per-process symbol resolver. Construction is cheap; [`Debugger::enable`]
/// does the real `SymInitialize` work and is only called when debug mode
/// is on (spec §4.5).
pub struct Debugger {
    enabled: bool,
    verbose: bool,
    state: Mutex<State>,
}

impl Debugger {
    pub fn new(enabled: bool, verbose: bool) -> Self {
        Self {
            enabled,
            verbose,
            state: Mutex::new(State {
                symbol_cache: HashMap::new(),
                redirects: HashMap::new(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Initialize DbgHelp symbol loading for the current process.
    pub fn enable(&self) -> bifrost_common::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let ok = unsafe { SymInitialize(GetCurrentProcess(), std::ptr::null(), 1) };
        if ok == 0 {
            return Err(bifrost_common::Error::TargetUnavailable(
                "SymInitialize failed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn disable(&self) -> bifrost_common::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let ok = unsafe { SymCleanup(GetCurrentProcess()) };
        if ok == 0 {
            return Err(bifrost_common::Error::TargetUnavailable(
                "SymCleanup failed".to_string(),
            ));
        }
        Ok(())
    }

    /// Remember that `trampoline` is a detour to `target`, so later symbol
    /// lookups on `trampoline` resolve to `target`'s name with a
    /// `[trampoline]` suffix.
    pub fn register_trampoline(&self, trampoline: *const (), target: *const ()) {
        self.state
            .lock()
            .unwrap()
            .redirects
            .insert(trampoline as u64, (target as u64, Redirect::Trampoline));
    }

    pub fn unregister_trampoline(&self, trampoline: *const ()) {
        self.state.lock().unwrap().redirects.remove(&(trampoline as u64));
    }

    pub fn register_jump_table(&self, table_entry: *const (), target: *const ()) {
        self.state
            .lock()
            .unwrap()
            .redirects
            .insert(table_entry as u64, (target as u64, Redirect::JumpTable));
    }

    pub fn unregister_jump_table(&self, table_entry: *const ()) {
        self.state.lock().unwrap().redirects.remove(&(table_entry as u64));
    }

    /// Resolve `addr` to a human-readable name for logging. When debug mode
    /// is off this is just a hex address (cheap, matching the original's
    /// fallback).
    pub fn symbol_name(&self, addr: *const ()) -> String {
        let addr = addr as u64;
        if !self.enabled {
            return format!("{addr:#010x}");
        }

        let mut state = self.state.lock().unwrap();
        if let Some((target, kind)) = state.redirects.get(&addr).copied() {
            let base = self.resolve_cached(&mut state, target);
            let suffix = match kind {
                Redirect::Trampoline => "[trampoline]",
                Redirect::JumpTable => "[jump-table]",
            };
            return format!("{base} {suffix}");
        }
        self.resolve_cached(&mut state, addr)
    }

    fn resolve_cached(&self, state: &mut State, addr: u64) -> String {
        if let Some(name) = state.symbol_cache.get(&addr) {
            return name.clone();
        }
        let name = self.resolve_via_dbghelp(addr).unwrap_or_else(|| format!("{addr:#010x}"));
        state.symbol_cache.insert(addr, name.clone());
        name
    }

    fn resolve_via_dbghelp(&self, addr: u64) -> Option<String> {
        const MAX_SYM_NAME: usize = 2000;
        let mut buffer = vec![0u8; std::mem::size_of::<SYMBOL_INFO>() + MAX_SYM_NAME];
        let info = buffer.as_mut_ptr() as *mut SYMBOL_INFO;
        unsafe {
            (*info).SizeOfStruct = std::mem::size_of::<SYMBOL_INFO>() as u32;
            (*info).MaxNameLen = MAX_SYM_NAME as u32;

            let mut displacement: u64 = 0;
            let ok = SymFromAddr(GetCurrentProcess(), addr, &mut displacement, info);
            if ok == 0 {
                if self.verbose {
                    log::debug!("SymFromAddr failed for {addr:#010x}");
                }
                return None;
            }

            let name_len = (*info).NameLen as usize;
            let name_ptr = (*info).Name.as_ptr();
            let name_bytes = std::slice::from_raw_parts(name_ptr as *const u8, name_len);
            Some(String::from_utf8_lossy(name_bytes).into_owned())
        }
    }
}
