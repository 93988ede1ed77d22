//! Hook engine (C5): consults the build-time identifier table to resolve a
//! hook site, then installs or extends a priority chain at that site using
//! [`cfunction::CFunctionHook`] / [`vtable::VTableHook`] for the real patch
//! and [`jump_table::JumpTable`] for each chain hop, wrapping every mutation
//! in a [`process::thread::ThreadSuspender`] so no other thread in the
//! process observes a half-rewired chain (spec §4.5).
pub mod cfunction;
pub mod debugger;
pub mod jump_table;
pub mod vtable;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Mutex;

use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

use bifrost_common::{Error, HookIdentifier, HookKind, Result};

use crate::config::HookConfig;
use crate::process::thread::ThreadSuspender;
use cfunction::CFunctionHook;
use debugger::Debugger;
use jump_table::JumpTable;
use vtable::VTableHook;

fn wide_null(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Where a hook site's real patch lands: a resolved C function address, or
/// a vtable base plus slot index (supplied by the caller, since the
/// identifier table cannot know a live object's vtable pointer).
enum InstallTarget {
    CFunction(*const ()),
    VTable { base: *const (), index: usize },
}

impl InstallTarget {
    /// A representative address for diagnostics logging only.
    fn log_address(&self) -> *const () {
        match *self {
            InstallTarget::CFunction(addr) => addr,
            InstallTarget::VTable { base, index } => unsafe { (base as *const u64).add(index) as *const () },
        }
    }
}

/// The real, underlying patch installed at a hook site: either a detour
/// over a C function or an overwritten vtable slot. Exactly one of these
/// exists per site regardless of how many plugins are chained onto it.
enum RawInstall {
    CFunction(CFunctionHook),
    VTable(VTableHook),
}

impl RawInstall {
    fn install(target: InstallTarget, redirect_to: *const ()) -> Result<Self> {
        match target {
            InstallTarget::CFunction(addr) => {
                let mut hook = unsafe { CFunctionHook::new(addr, redirect_to)? };
                hook.enable()?;
                Ok(RawInstall::CFunction(hook))
            }
            InstallTarget::VTable { base, index } => {
                let hook = unsafe { VTableHook::new(base, index, redirect_to as u64)? };
                Ok(RawInstall::VTable(hook))
            }
        }
    }

    /// The address to call to reach the real, unmodified behavior: the
    /// detour's trampoline, or the vtable slot's original value.
    fn real_original(&self) -> u64 {
        match self {
            RawInstall::CFunction(hook) => hook.trampoline() as u64,
            RawInstall::VTable(hook) => hook.original(),
        }
    }
}

/// One plugin's registration in a site's priority chain.
struct Entry {
    token: u32,
    priority: i32,
    replacement: u64,
    /// Stub this entry's replacement calls through to reach the next lower
    /// priority entry (or the real original, if this is the last one).
    next_stub: JumpTable,
}

/// An active hook site: the real patch plus zero or more chained entries,
/// highest priority first.
struct HookSite {
    raw: RawInstall,
    /// Fixed install point the real patch redirects to; its target is
    /// rewritten to the current highest-priority entry whenever the chain
    /// changes, so the real patch itself is never touched again.
    head_stub: JumpTable,
    entries: Vec<Entry>,
    next_token: u32,
    /// The detour trampoline's address, if this site is a `CFunction` hook,
    /// registered with the debugger so later symbol lookups resolve it back
    /// to the hooked function.
    trampoline: Option<u64>,
}

impl HookSite {
    fn install(target: InstallTarget) -> Result<Self> {
        let head_stub = JumpTable::new()?;
        let raw = RawInstall::install(target, head_stub.entry_point())?;
        let trampoline = match &raw {
            RawInstall::CFunction(hook) => Some(hook.trampoline() as u64),
            RawInstall::VTable(_) => None,
        };
        Ok(Self {
            raw,
            head_stub,
            entries: Vec::new(),
            next_token: 0,
            trampoline,
        })
    }

    /// Recompute every stub's target from the current, priority-sorted
    /// entry list. Called after every insert/remove.
    fn rewire(&mut self) {
        let real_original = self.raw.real_original();
        if self.entries.is_empty() {
            self.head_stub.restore(real_original as *const ());
            return;
        }
        self.head_stub
            .set_target(self.entries[0].replacement as *const ());
        for i in 0..self.entries.len() {
            let next = self
                .entries
                .get(i + 1)
                .map(|e| e.replacement)
                .unwrap_or(real_original);
            self.entries[i].next_stub.set_target(next as *const ());
        }
    }

    /// Insert `replacement` at `priority` (higher runs first) and return
    /// (registration token, address to call for "the next hook or the
    /// original").
    fn insert(&mut self, replacement: u64, priority: i32) -> Result<(u32, *const ())> {
        let token = self.next_token;
        self.next_token += 1;
        let position = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            Entry {
                token,
                priority,
                replacement,
                next_stub: JumpTable::new()?,
            },
        );
        self.rewire();
        Ok((token, self.entries[position].next_stub.entry_point()))
    }

    /// Remove the entry registered as `token`, returning its `next_stub`
    /// entry point (useful for un-registering it from the debugger) if it
    /// existed.
    fn remove(&mut self, token: u32) -> Option<*const ()> {
        let index = self.entries.iter().position(|e| e.token == token)?;
        let removed = self.entries.remove(index);
        self.rewire();
        Some(removed.next_stub.entry_point())
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A token identifying one chained registration at a site, returned by
/// [`HookEngine::set_hook`]/[`HookEngine::set_vtable_hook`] and required by
/// [`HookEngine::remove_hook`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HookToken {
    id: u32,
    token: u32,
}

impl HookToken {
    /// Reconstruct a token from its raw `(id, token)` pair, for callers that
    /// round-trip it across an FFI boundary (a plugin holds the pair, not
    /// the opaque type) instead of a live `HookToken` value.
    pub fn from_raw(id: u32, token: u32) -> Self {
        Self { id, token }
    }

    pub fn into_raw(self) -> (u32, u32) {
        (self.id, self.token)
    }
}

/// The C5 orchestrator: one per process, owning every active hook site.
pub struct HookEngine {
    identifiers: HashMap<u32, HookIdentifier>,
    sites: Mutex<HashMap<u32, HookSite>>,
    debugger: Debugger,
}

impl HookEngine {
    pub fn new(identifiers: Vec<HookIdentifier>, config: &HookConfig) -> Self {
        Self {
            identifiers: identifiers.into_iter().map(|ident| (ident.id, ident)).collect(),
            sites: Mutex::new(HashMap::new()),
            debugger: Debugger::new(config.debug, config.verbose_dbghelp),
        }
    }

    pub fn enable_diagnostics(&self) -> Result<()> {
        self.debugger.enable()
    }

    fn lookup(&self, id: u32) -> Result<&HookIdentifier> {
        self.identifiers
            .get(&id)
            .ok_or_else(|| Error::TargetUnavailable(format!("no hook identifier registered for id {id}")))
    }

    fn resolve_cfunction(&self, ident: &HookIdentifier) -> Result<*const ()> {
        let module_wide = wide_null(&ident.module);
        let handle = unsafe { GetModuleHandleW(module_wide.as_ptr()) };
        if handle.is_null() {
            return Err(Error::TargetUnavailable(format!(
                "module `{}` is not loaded in this process",
                ident.module
            )));
        }
        let symbol = CString::new(ident.symbol.as_str()).map_err(|_| {
            Error::TargetUnavailable(format!("symbol name `{}` has an embedded NUL", ident.symbol))
        })?;
        let addr = unsafe { GetProcAddress(handle, symbol.as_ptr() as *const u8) };
        addr.map(|f| f as *const ()).ok_or_else(|| {
            Error::TargetUnavailable(format!("symbol `{}` not found in `{}`", ident.symbol, ident.module))
        })
    }

    /// Install or extend the chain at `id`, a `CFunction` hook site,
    /// resolving its target address from the identifier table. Returns a
    /// token plus the address to call to reach the next entry/original.
    pub fn set_hook(&self, id: u32, replacement: *const (), priority: i32) -> Result<(HookToken, *const ())> {
        let ident = self.lookup(id)?;
        if ident.kind != HookKind::CFunction {
            return Err(Error::TargetUnavailable(format!(
                "hook id {id} is not a CFunction site"
            )));
        }
        let target = self.resolve_cfunction(ident)?;
        self.install(id, InstallTarget::CFunction(target), replacement, priority)
    }

    /// Install or extend the chain at `id`, a `VTableSlot` hook site.
    /// `vtable_base` and `index` are supplied by the caller since the
    /// identifier table cannot know an object instance's vtable pointer
    /// ahead of time.
    pub fn set_vtable_hook(
        &self,
        id: u32,
        vtable_base: *const (),
        index: usize,
        replacement: *const (),
        priority: i32,
    ) -> Result<(HookToken, *const ())> {
        let ident = self.lookup(id)?;
        if ident.kind != HookKind::VTableSlot {
            return Err(Error::TargetUnavailable(format!(
                "hook id {id} is not a VTableSlot site"
            )));
        }
        self.install(
            id,
            InstallTarget::VTable { base: vtable_base, index },
            replacement,
            priority,
        )
    }

    fn install(
        &self,
        id: u32,
        target: InstallTarget,
        replacement: *const (),
        priority: i32,
    ) -> Result<(HookToken, *const ())> {
        let current_pid = std::process::id();
        let mut sites = self.sites.lock().unwrap();

        if !sites.contains_key(&id) {
            let _guard = ThreadSuspender::freeze_process(current_pid)?;
            let log_addr = target.log_address();
            let site = HookSite::install(target)?;
            if self.debugger.is_enabled() {
                log::debug!("installed hook site {id} at {}", self.debugger.symbol_name(log_addr));
                if let Some(trampoline) = site.trampoline {
                    self.debugger
                        .register_trampoline(trampoline as *const (), log_addr);
                }
            }
            sites.insert(id, site);
        }

        let site = sites.get_mut(&id).expect("site was just inserted or already present");
        let _guard = ThreadSuspender::freeze_process(current_pid)?;
        let (token, call_through) = site.insert(replacement as u64, priority)?;
        if self.debugger.is_enabled() {
            self.debugger.register_jump_table(call_through, replacement);
        }
        Ok((HookToken { id, token }, call_through))
    }

    /// Remove a previously installed chain entry. The last entry removed
    /// from a site leaves the real patch installed but its head stub
    /// rewritten to jump straight at the original behavior, matching the
    /// original's preference for leaving detours in place rather than
    /// re-patching while still restoring passthrough semantics.
    pub fn remove_hook(&self, handle: HookToken) -> Result<()> {
        let current_pid = std::process::id();
        let mut sites = self.sites.lock().unwrap();
        let Some(site) = sites.get_mut(&handle.id) else {
            return Err(Error::TargetUnavailable(format!(
                "hook id {} has no active site",
                handle.id
            )));
        };

        let _guard = ThreadSuspender::freeze_process(current_pid)?;
        let Some(entry_point) = site.remove(handle.token) else {
            return Err(Error::TargetUnavailable(format!(
                "hook token {:?} was not registered",
                handle
            )));
        };
        if self.debugger.is_enabled() {
            self.debugger.unregister_jump_table(entry_point);
        }
        if site.is_empty() {
            log::trace!("hook site {} has no remaining chain entries", handle.id);
        }
        Ok(())
    }
}

impl Drop for HookEngine {
    /// Unregister every site's trampoline so a debugger instance reused
    /// past this engine's lifetime does not keep resolving stale addresses.
    fn drop(&mut self) {
        if !self.debugger.is_enabled() {
            return;
        }
        for site in self.sites.lock().unwrap().values() {
            if let Some(trampoline) = site.trampoline {
                self.debugger.unregister_trampoline(trampoline as *const ());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_identifiers() -> Vec<HookIdentifier> {
        vec![HookIdentifier {
            id: 1,
            name: "sample".to_string(),
            module: "kernel32.dll".to_string(),
            kind: HookKind::CFunction,
            symbol: "Sleep".to_string(),
        }]
    }

    #[test]
    fn set_hook_rejects_wrong_kind() {
        let mut identifiers = sample_identifiers();
        identifiers[0].kind = HookKind::VTableSlot;
        let engine = HookEngine::new(identifiers, &HookConfig::default());
        let err = engine.set_hook(1, std::ptr::null(), 0).unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable(_)));
    }

    #[test]
    fn set_hook_rejects_unknown_id() {
        let engine = HookEngine::new(sample_identifiers(), &HookConfig::default());
        let err = engine.set_hook(99, std::ptr::null(), 0).unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable(_)));
    }

    #[test]
    fn remove_hook_rejects_unregistered_token() {
        let engine = HookEngine::new(sample_identifiers(), &HookConfig::default());
        let err = engine
            .remove_hook(HookToken { id: 1, token: 0 })
            .unwrap_err();
        assert!(matches!(err, Error::TargetUnavailable(_)));
    }
}
