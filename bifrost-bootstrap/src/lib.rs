//! The module injected into a target process. Exports the four entry
//! points an injector or a loaded plugin calls via a remote/local thread
//! (`setup`, `teardown`, `message`, `help`), plus a small host API
//! (`bifrost_set_hook`, `bifrost_remove_hook`, `bifrost_log`) a plugin
//! resolves with `GetProcAddress` against this module's own handle, the
//! same local-load-and-resolve technique the injector uses to find a
//! bootstrap module's exports in the first place.
mod identifiers_generated;
mod plugin;

use std::ffi::{c_void, CStr};
use std::sync::{Mutex, OnceLock};

use bifrost_core::{HookConfig, HookEngine, InjectorParam, PluginRequest, SharedContext};

use plugin::PluginRegistry;

struct BootstrapState {
    context: SharedContext,
    engine: HookEngine,
    plugins: PluginRegistry,
}

static STATE: OnceLock<Mutex<Option<BootstrapState>>> = OnceLock::new();

fn state_cell() -> &'static Mutex<Option<BootstrapState>> {
    STATE.get_or_init(|| Mutex::new(None))
}

/// Read a NUL-terminated UTF-8 string out of a parameter-block pointer
/// written by the injector (spec §4.4 step 4) or by a sibling in-process
/// call. Returns `None` on a null pointer or invalid UTF-8 rather than
/// panicking across the FFI boundary.
unsafe fn read_param_text<'a>(param: *mut c_void) -> Option<&'a str> {
    if param.is_null() {
        return None;
    }
    CStr::from_ptr(param as *const i8).to_str().ok()
}

/// The hook identifier table, generated from `hooks.toml` by
/// `cargo xtask gen-identifiers` and checked in as `identifiers_generated.rs`.
fn identifiers() -> Vec<bifrost_core::HookIdentifier> {
    identifiers_generated::identifiers()
}

#[no_mangle]
pub extern "system" fn setup(param: *mut c_void) -> u32 {
    let _ = env_logger::try_init();
    let Some(text) = (unsafe { read_param_text(param) }) else {
        log::error!("setup: missing or invalid parameter block");
        return 1;
    };

    let injector_param = match InjectorParam::deserialize(text) {
        Ok(p) => p,
        Err(err) => {
            log::error!("setup: failed to decode injector parameters: {err}");
            return 1;
        }
    };

    let context = match SharedContext::open(&injector_param.shared_memory_name, injector_param.shared_memory_size) {
        Ok(c) => c,
        Err(err) => {
            log::error!("setup: failed to attach to shared arena `{}`: {err}", injector_param.shared_memory_name);
            return 1;
        }
    };

    let config = HookConfig::load();
    let engine = HookEngine::new(identifiers(), &config);
    if config.debug {
        if let Err(err) = engine.enable_diagnostics() {
            log::warn!("setup: symbol diagnostics unavailable: {err}");
        }
    }

    let mut plugins = PluginRegistry::new();
    if !injector_param.custom_argument.is_empty() {
        if let Ok(PluginRequest::Load(load)) = PluginRequest::deserialize(&injector_param.custom_argument) {
            plugins.load_all(&load, &context.storage());
        }
    }

    *state_cell().lock().unwrap() = Some(BootstrapState { context, engine, plugins });
    log::info!("bootstrap attached to pid {}", injector_param.pid);
    0
}

#[no_mangle]
pub extern "system" fn teardown(_param: *mut c_void) -> u32 {
    let mut guard = state_cell().lock().unwrap();
    if let Some(mut state) = guard.take() {
        state.plugins.unload_all();
        log::info!("bootstrap tearing down");
    }
    0
}

#[no_mangle]
pub extern "system" fn message(param: *mut c_void) -> u32 {
    let Some(text) = (unsafe { read_param_text(param) }) else {
        log::error!("message: missing or invalid parameter block");
        return 1;
    };

    let request = match PluginRequest::deserialize(text) {
        Ok(r) => r,
        Err(err) => {
            log::error!("message: failed to decode request: {err}");
            return 1;
        }
    };

    let mut guard = state_cell().lock().unwrap();
    let Some(state) = guard.as_mut() else {
        log::error!("message: bootstrap is not set up");
        return 1;
    };

    let storage = state.context.storage();
    match request {
        PluginRequest::Load(load) => {
            state.plugins.load_all(&load, &storage);
            0
        }
        PluginRequest::Unload(unload) => {
            if state.plugins.unload(&unload, &storage) {
                0
            } else {
                1
            }
        }
        PluginRequest::Message(msg) => state.plugins.dispatch_message(&msg),
    }
}

#[no_mangle]
pub extern "system" fn help(_param: *mut c_void) -> u32 {
    log::info!("bifrost-bootstrap: setup/teardown/message/help, plus bifrost_set_hook/bifrost_remove_hook/bifrost_log for plugins");
    0
}

/// Host API: a plugin resolves this by name from the bootstrap module's own
/// handle and calls it to register a hook at `id`. Writes the address the
/// plugin should call to reach the next chain entry (or the real original)
/// into `*out_call_through` and returns the packed `(id, token)` pair as two
/// `u32`s via `out_token_id`/`out_token_token`, or a negative value on error.
#[no_mangle]
pub extern "system" fn bifrost_set_hook(
    id: u32,
    replacement: *const c_void,
    priority: i32,
    out_call_through: *mut *const c_void,
    out_token_token: *mut u32,
) -> i32 {
    let guard = state_cell().lock().unwrap();
    let Some(state) = guard.as_ref() else {
        return -1;
    };
    match state.engine.set_hook(id, replacement as *const (), priority) {
        Ok((token, call_through)) => {
            unsafe {
                if !out_call_through.is_null() {
                    *out_call_through = call_through as *const c_void;
                }
                if !out_token_token.is_null() {
                    *out_token_token = token.into_raw().1;
                }
            }
            0
        }
        Err(err) => {
            log::warn!("bifrost_set_hook({id}): {err}");
            -1
        }
    }
}

#[no_mangle]
pub extern "system" fn bifrost_remove_hook(id: u32, token: u32) -> i32 {
    let guard = state_cell().lock().unwrap();
    let Some(state) = guard.as_ref() else {
        return -1;
    };
    match state.engine.remove_hook(bifrost_core::HookToken::from_raw(id, token)) {
        Ok(()) => 0,
        Err(err) => {
            log::warn!("bifrost_remove_hook({id}, {token}): {err}");
            -1
        }
    }
}

#[no_mangle]
pub extern "system" fn bifrost_log(level: u32, msg_ptr: *const u8, msg_len: u32) {
    let Some(level) = bifrost_common::LogLevel::from_u32(level) else {
        return;
    };
    let message = unsafe { std::slice::from_raw_parts(msg_ptr, msg_len as usize) };
    let Ok(message) = std::str::from_utf8(message) else {
        return;
    };
    match level {
        bifrost_common::LogLevel::Trace => log::trace!("[plugin] {message}"),
        bifrost_common::LogLevel::Debug => log::debug!("[plugin] {message}"),
        bifrost_common::LogLevel::Info => log::info!("[plugin] {message}"),
        bifrost_common::LogLevel::Warn => log::warn!("[plugin] {message}"),
        bifrost_common::LogLevel::Error => log::error!("[plugin] {message}"),
        bifrost_common::LogLevel::Disable => {}
    }
}
