//! C-function hooking (C5): install a detour over an exported or
//! address-resolved function, grounded on the original `CFunctionHook`
//! (a thin wrapper over MinHook's create/enable/disable/remove). We use
//! `retour::RawDetour` as the Rust equivalent since hook targets are
//! resolved at runtime rather than known at compile time.
use retour::RawDetour;

use bifrost_common::{Error, Result};

/// One installed detour over a single C function. The chain's tail element
/// owns this; earlier elements are jump-table stubs (see
/// [`super::jump_table::JumpTable`]) chained in front of it.
pub struct CFunctionHook {
    detour: RawDetour,
    target: u64,
    enabled: bool,
}

impl CFunctionHook {
    /// Build (but do not yet enable) a detour redirecting calls at `target`
    /// to `replacement`.
    ///
    /// # Safety
    /// `target` must be a valid, executable function pointer with a calling
    /// convention and argument count matching `replacement`; both must
    /// remain valid for the hook's lifetime.
    pub unsafe fn new(target: *const (), replacement: *const ()) -> Result<Self> {
        let detour = RawDetour::new(target as *const (), replacement as *const ()).map_err(|e| {
            log::warn!("RawDetour::new failed for {:#x}: {e}", target as u64);
            Error::TargetUnavailable(format!("could not build detour at {:#x}", target as u64))
        })?;
        Ok(Self {
            detour,
            target: target as u64,
            enabled: false,
        })
    }

    /// Activate the detour. Errors here (typically insufficient patch space
    /// near `target`) are fatal per spec §4.5.
    pub fn enable(&mut self) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        unsafe { self.detour.enable() }.map_err(|e| {
            log::warn!("detour enable failed at {:#x}: {e}", self.target);
            Error::PatchSpaceTooSmall(self.target)
        })?;
        self.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        unsafe { self.detour.disable() }.map_err(|e| {
            log::warn!("detour disable failed at {:#x}: {e}", self.target);
            Error::ProtectionChangeFailed(self.target)
        })?;
        self.enabled = false;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The trampoline that calls through to the original function, to be
    /// wired in as the next chain hop's "original" target.
    pub fn trampoline(&self) -> *const () {
        self.detour.trampoline() as *const ()
    }
}

impl Drop for CFunctionHook {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(err) = unsafe { self.detour.disable() } {
                log::warn!("failed to disable detour on drop: {err}");
            }
        }
    }
}
