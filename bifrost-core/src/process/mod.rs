//! Process controller (C4): launch, open-by-pid, or open-by-name a target
//! process; drive the two-step remote injection dance; manage
//! suspended-launch thread bookkeeping.
pub mod inject;
pub mod thread;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, OpenProcess, TerminateProcess, WaitForSingleObject,
    CREATE_SUSPENDED, PROCESS_ALL_ACCESS, PROCESS_INFORMATION, STARTUPINFOW, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};

use bifrost_common::{Error, Result};
pub use inject::EntryPoint;
use thread::Thread;

fn wide_null(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// How the controller obtained its process handle, kept so `kill` knows
/// whether it is allowed to terminate the process (spec §4.4's failure
/// semantics only permit killing processes *we* launched).
enum Origin {
    Launched,
    Opened,
}

/// An owned handle to the target process plus the thread IDs the injector
/// needs to track across a suspended launch.
pub struct ProcessController {
    handle: HANDLE,
    pid: u32,
    origin: Origin,
    /// Thread IDs present at launch time, recorded before injection so only
    /// these are resumed afterward (spec §4.4's "prevents racing the main
    /// thread").
    pre_existing_tids: Vec<u32>,
}

impl ProcessController {
    /// Spawn `exe_path` with `args`. When `suspended` is true the main
    /// thread is created suspended and not resumed by this call; the
    /// caller resumes via [`Self::resume_pre_existing_threads`] after
    /// injection completes.
    pub fn launch(exe_path: &str, args: &[String], suspended: bool) -> Result<Self> {
        let mut command_line = wide_null(&Self::build_command_line(exe_path, args));
        let mut startup_info: STARTUPINFOW = unsafe { std::mem::zeroed() };
        startup_info.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
        let mut process_info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

        let flags = if suspended { CREATE_SUSPENDED } else { 0 };
        let ok = unsafe {
            CreateProcessW(
                std::ptr::null(),
                command_line.as_mut_ptr(),
                std::ptr::null(),
                std::ptr::null(),
                0,
                flags,
                std::ptr::null(),
                std::ptr::null(),
                &startup_info,
                &mut process_info,
            )
        };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            return Err(Error::TargetUnavailable(format!(
                "CreateProcessW failed for `{exe_path}` (error {code})"
            )));
        }

        let pid = process_info.dwProcessId;
        unsafe {
            CloseHandle(process_info.hThread);
        }

        let pre_existing_tids = thread::Thread::enumerate_tids(pid).unwrap_or_default();
        Ok(Self {
            handle: process_info.hProcess,
            pid,
            origin: Origin::Launched,
            pre_existing_tids,
        })
    }

    fn build_command_line(exe_path: &str, args: &[String]) -> String {
        let mut cmd = format!("\"{exe_path}\"");
        for arg in args {
            cmd.push(' ');
            if arg.contains(' ') {
                cmd.push_str(&format!("\"{arg}\""));
            } else {
                cmd.push_str(arg);
            }
        }
        cmd
    }

    /// Open an already-running process by PID.
    pub fn open_by_pid(pid: u32) -> Result<Self> {
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, pid) };
        if handle.is_null() {
            return Err(Error::TargetUnavailable(format!(
                "OpenProcess failed for pid {pid}"
            )));
        }
        Ok(Self {
            handle,
            pid,
            origin: Origin::Opened,
            pre_existing_tids: Vec::new(),
        })
    }

    /// Open an already-running process by executable name, failing if more
    /// than one process matches (spec §4.4).
    pub fn open_by_name(name: &str) -> Result<Self> {
        let candidates = Self::find_pids_by_name(name)?;
        match candidates.as_slice() {
            [] => Err(Error::TargetUnavailable(format!(
                "no running process named `{name}`"
            ))),
            [pid] => Self::open_by_pid(*pid),
            many => Err(Error::ProcessAmbiguous(many.to_vec())),
        }
    }

    fn find_pids_by_name(name: &str) -> Result<Vec<u32>> {
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if snapshot == windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE {
            return Err(Error::TargetUnavailable(
                "CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS) failed".to_string(),
            ));
        }

        let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;
        let mut pids = Vec::new();

        unsafe {
            if Process32FirstW(snapshot, &mut entry) != 0 {
                loop {
                    let exe_name = String::from_utf16_lossy(
                        &entry.szExeFile[..entry.szExeFile.iter().position(|&c| c == 0).unwrap_or(0)],
                    );
                    if exe_name.eq_ignore_ascii_case(name) {
                        pids.push(entry.th32ProcessID);
                    }
                    if Process32NextW(snapshot, &mut entry) == 0 {
                        break;
                    }
                }
            }
            CloseHandle(snapshot);
        }
        Ok(pids)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn handle(&self) -> HANDLE {
        self.handle
    }

    /// Resume exactly the threads recorded at launch time (no-op for
    /// attached-by-pid/name processes, which never suspended anything).
    pub fn resume_pre_existing_threads(&self) {
        for tid in &self.pre_existing_tids {
            if let Ok(thread) = Thread::open(*tid) {
                let _ = thread.resume();
            }
        }
    }

    /// Wait up to `timeout_ms` for the process to exit, returning its exit
    /// code.
    pub fn wait(&self, timeout_ms: u32) -> Result<u32> {
        let wait = unsafe { WaitForSingleObject(self.handle, timeout_ms) };
        if wait == WAIT_TIMEOUT {
            return Err(Error::RemoteExecutionTimeout(timeout_ms));
        }
        if wait != WAIT_OBJECT_0 {
            return Err(Error::TargetUnavailable(
                "WaitForSingleObject on target process returned an unexpected status".to_string(),
            ));
        }
        let mut code = 0u32;
        unsafe {
            GetExitCodeProcess(self.handle, &mut code);
        }
        Ok(code)
    }

    /// Poll without blocking: `None` if still running.
    pub fn poll(&self) -> Option<u32> {
        let mut code = 0u32;
        unsafe {
            GetExitCodeProcess(self.handle, &mut code);
        }
        const STILL_ACTIVE: u32 = 259;
        if code == STILL_ACTIVE {
            None
        } else {
            Some(code)
        }
    }

    /// Terminate the process. Permitted regardless of origin, but the
    /// controller only does so automatically on launch failure or a timed
    /// out/failed injection of a process it launched (spec §4.4).
    pub fn kill(&self) -> Result<()> {
        let ok = unsafe { TerminateProcess(self.handle, 1) };
        if ok == 0 {
            return Err(Error::TargetUnavailable(format!(
                "TerminateProcess failed for pid {}",
                self.pid
            )));
        }
        Ok(())
    }

    fn kill_if_launched(&self) {
        if matches!(self.origin, Origin::Launched) {
            if let Err(err) = self.kill() {
                log::warn!("failed to kill launched process {}: {err}", self.pid);
            }
        }
    }

    /// Run the full injection dance from spec §4.4: load the bootstrap,
    /// resolve its base, write the parameter block, and call `setup`.
    pub fn inject(
        &self,
        bootstrap_dll_path: &str,
        bootstrap_module_name: &str,
        param_text: &str,
        timeout_ms: u32,
    ) -> Result<()> {
        let exit_code = inject::load_library_remote(self.handle, bootstrap_dll_path, timeout_ms);
        let exit_code = match exit_code {
            Ok(code) => code,
            Err(err) => {
                self.kill_if_launched();
                return Err(err);
            }
        };
        let _ = exit_code;

        let module_base = match inject::remote_module_base(self.pid, bootstrap_module_name) {
            Ok(base) => base,
            Err(err) => {
                self.kill_if_launched();
                return Err(err);
            }
        };

        let param_block = match inject::write_remote_param_block(self.handle, param_text) {
            Ok(block) => block,
            Err(err) => {
                self.kill_if_launched();
                return Err(err);
            }
        };

        let status = inject::call_entry_point(
            self.handle,
            module_base,
            bootstrap_dll_path,
            EntryPoint::Setup,
            &param_block,
            timeout_ms,
        );

        match status {
            Ok(0) => Ok(()),
            Ok(nonzero) => {
                self.kill_if_launched();
                Err(Error::RemoteExecutionFailed(nonzero))
            }
            Err(err @ Error::RemoteExecutionTimeout(_)) => {
                self.kill_if_launched();
                Err(err)
            }
            Err(err) => {
                self.kill_if_launched();
                Err(err)
            }
        }
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

/// Kill a process by PID, independent of any live [`ProcessController`]
/// (mirrors the original free function used by the CLI's `--kill` path).
pub fn kill_by_pid(pid: u32) -> Result<()> {
    ProcessController::open_by_pid(pid)?.kill()
}

/// Kill every process matching `name` (mirrors the original's
/// `KillProcess(name)` free function).
pub fn kill_by_name(name: &str) -> Result<()> {
    for pid in ProcessController::find_pids_by_name(name)? {
        kill_by_pid(pid)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_command_line_quotes_args_with_spaces() {
        let cmd = ProcessController::build_command_line(
            "C:\\target.exe",
            &["plain".to_string(), "has space".to_string()],
        );
        assert_eq!(cmd, "\"C:\\target.exe\" plain \"has space\"");
    }
}
