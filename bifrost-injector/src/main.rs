//! Thin launcher: perform the injection dance and exit, printing the
//! outcome. Unlike `bifrostd` this does not create a shared arena, serve a
//! status API, or wait for the target — it's for scripted one-shot
//! injection against a target that manages its own lifetime (or is already
//! running with a shared arena created by something else).
use clap::Parser;

use bifrost_core::process::ProcessController;
use bifrost_core::InjectorParam;

#[derive(Parser, Debug)]
#[command(name = "bifrost-injector", about = "Inject the bootstrap module into a target process")]
struct Args {
    /// Path to the executable to launch. Mutually exclusive with --pid/--name.
    #[arg(long)]
    launch: Option<String>,

    /// Arguments passed to the launched executable.
    #[arg(long, value_delimiter = ' ')]
    launch_args: Vec<String>,

    /// Attach to an already-running process by PID.
    #[arg(long)]
    pid: Option<u32>,

    /// Attach to an already-running process by executable name.
    #[arg(long)]
    name: Option<String>,

    /// Path to the bootstrap DLL to inject.
    #[arg(long)]
    bootstrap: String,

    /// Module name the bootstrap DLL registers under in the target.
    #[arg(long, default_value = "bifrost_bootstrap.dll")]
    bootstrap_module: String,

    /// Name of an already-existing shared arena the target should attach to.
    #[arg(long, default_value = "bifrost")]
    shared_memory_name: String,

    /// Size in bytes of that shared arena.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    shared_memory_size: u64,

    /// Milliseconds to wait for each remote-thread step before failing.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u32,

    /// Leave newly launched targets suspended instead of resuming them.
    #[arg(long)]
    leave_suspended: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let controller = match (&args.launch, args.pid, &args.name) {
        (Some(exe), None, None) => ProcessController::launch(exe, &args.launch_args, true)?,
        (None, Some(pid), None) => ProcessController::open_by_pid(pid)?,
        (None, None, Some(name)) => ProcessController::open_by_name(name)?,
        _ => anyhow::bail!("exactly one of --launch, --pid, or --name must be given"),
    };

    let param = InjectorParam {
        shared_memory_name: args.shared_memory_name,
        shared_memory_size: args.shared_memory_size,
        pid: controller.pid(),
        working_directory: std::env::current_dir()
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .unwrap_or_default(),
        custom_argument: String::new(),
    };

    controller.inject(&args.bootstrap, &args.bootstrap_module, &param.serialize(), args.timeout_ms)?;
    if !args.leave_suspended {
        controller.resume_pre_existing_threads();
    }

    println!("injected `{}` into pid {}", args.bootstrap, controller.pid());
    Ok(())
}
