//! Plugin lifecycle: load/unload plugin DLLs by the same four-entry-point
//! contract the bootstrap module itself is called through (spec §6), and
//! route `PluginMessageParam` requests to an already-loaded plugin's
//! `message` export.
use std::collections::HashMap;
use std::ffi::{c_void, CString};

use windows_sys::Win32::Foundation::HMODULE;
use windows_sys::Win32::System::LibraryLoader::{FreeLibrary, GetProcAddress, LoadLibraryW};

use bifrost_core::shared::Storage;
use bifrost_core::{PluginLoadParam, PluginMessageParam, PluginUnloadParam, StorageValue};

fn record_last_error(storage: &Storage<'_>, identifier: &str, detail: impl std::fmt::Display) {
    let _ = storage.set(&format!("bfl.last_error.{identifier}"), StorageValue::String(detail.to_string()));
}

type EntryFn = unsafe extern "system" fn(*mut c_void) -> u32;

fn wide_null(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

unsafe fn resolve(module: HMODULE, symbol: &str) -> Option<EntryFn> {
    let name = CString::new(symbol).ok()?;
    let addr = GetProcAddress(module, name.as_ptr() as *const u8)?;
    Some(std::mem::transmute::<_, EntryFn>(addr))
}

struct LoadedPlugin {
    module: HMODULE,
    teardown: Option<EntryFn>,
    message: Option<EntryFn>,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, LoadedPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_all(&mut self, request: &PluginLoadParam, storage: &Storage<'_>) {
        for plugin in &request.plugins {
            if self.plugins.contains_key(&plugin.identifier) && !plugin.force_load {
                log::warn!("plugin `{}` is already loaded, skipping (force_load not set)", plugin.identifier);
                continue;
            }
            if let Some(existing) = self.plugins.remove(&plugin.identifier) {
                Self::unload_one(&plugin.identifier, existing, storage);
            }
            self.load_one(&plugin.identifier, &plugin.path, &plugin.arguments);
        }
    }

    fn load_one(&mut self, identifier: &str, path: &str, arguments: &str) {
        let path_wide = wide_null(path);
        let module = unsafe { LoadLibraryW(path_wide.as_ptr()) };
        if module.is_null() {
            log::error!("plugin `{identifier}`: failed to load `{path}`");
            return;
        }

        let Some(setup) = (unsafe { resolve(module, "setup") }) else {
            log::error!("plugin `{identifier}`: `{path}` has no `setup` export");
            unsafe {
                FreeLibrary(module);
            }
            return;
        };
        let teardown = unsafe { resolve(module, "teardown") };
        let message = unsafe { resolve(module, "message") };

        let argument_cstr = CString::new(arguments).unwrap_or_default();
        let rc = unsafe { setup(argument_cstr.as_ptr() as *mut c_void) };
        if rc != 0 {
            log::error!("plugin `{identifier}`: setup returned {rc}");
            unsafe {
                FreeLibrary(module);
            }
            return;
        }

        log::info!("plugin `{identifier}` loaded from `{path}`");
        self.plugins.insert(identifier.to_string(), LoadedPlugin { module, teardown, message });
    }

    /// Unload the requested plugins, returning `true` only if every one of
    /// them tore down cleanly. A failure detail is written into the shared
    /// store under `bfl.last_error.<identifier>` for the caller to inspect.
    pub fn unload(&mut self, request: &PluginUnloadParam, storage: &Storage<'_>) -> bool {
        if request.unload_all {
            return self.unload_all(storage);
        }
        let mut all_ok = true;
        for identifier in &request.plugins {
            if let Some(plugin) = self.plugins.remove(identifier) {
                all_ok &= Self::unload_one(identifier, plugin, storage);
            } else {
                all_ok = false;
                log::warn!("unload: plugin `{identifier}` is not loaded");
                record_last_error(storage, identifier, "unload requested but plugin is not loaded");
            }
        }
        all_ok
    }

    pub fn unload_all(&mut self, storage: &Storage<'_>) -> bool {
        let mut all_ok = true;
        for (identifier, plugin) in self.plugins.drain() {
            all_ok &= Self::unload_one(&identifier, plugin, storage);
        }
        all_ok
    }

    /// Tear a single plugin down, returning whether `teardown` reported
    /// success (or had nothing to report). The caller decides whether a
    /// `false` result should fail the overall unload request.
    fn unload_one(identifier: &str, plugin: LoadedPlugin, storage: &Storage<'_>) -> bool {
        let ok = match plugin.teardown {
            Some(teardown) => {
                let rc = unsafe { teardown(std::ptr::null_mut()) };
                if rc != 0 {
                    log::error!("plugin `{identifier}`: teardown returned {rc}");
                    record_last_error(storage, identifier, format!("teardown returned {rc}"));
                }
                rc == 0
            }
            None => true,
        };
        unsafe {
            FreeLibrary(plugin.module);
        }
        if ok {
            log::info!("plugin `{identifier}` unloaded");
        }
        ok
    }

    pub fn dispatch_message(&self, request: &PluginMessageParam) -> u32 {
        let Some(plugin) = self.plugins.get(&request.plugin_identifier) else {
            log::warn!("message: plugin `{}` is not loaded", request.plugin_identifier);
            return 1;
        };
        let Some(message_fn) = plugin.message else {
            log::warn!("message: plugin `{}` has no `message` export", request.plugin_identifier);
            return 1;
        };
        let text = CString::new(request.message.as_str()).unwrap_or_default();
        unsafe { message_fn(text.as_ptr() as *mut c_void) }
    }
}
