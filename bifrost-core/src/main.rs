//! `bifrostd`: the injector-side daemon. Parses the launch/attach CLI
//! surface, opens or creates the shared arena, launches or attaches to the
//! target and injects the bootstrap module, then serves the local status
//! HTTP surface until the target exits.
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use bifrost_core::api::{self, ApiState};
use bifrost_core::diagnostics::Diagnostics;
use bifrost_core::process::ProcessController;
use bifrost_core::{HookConfig, InjectorParam, Metrics, SharedContext};

#[derive(Parser, Debug)]
#[command(name = "bifrostd", about = "Inject plugins into a target process")]
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

    /// Milliseconds to wait for each remote-thread step before failing.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u32,

    /// Local address the status HTTP surface listens on.
    #[arg(long, default_value = "127.0.0.1:7404")]
    listen: String,

    /// Skip serving the status HTTP surface entirely.
    #[arg(long)]
    no_api: bool,
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = HookConfig::load();
    let metrics = Arc::new(Metrics::new());
    let diagnostics = Arc::new(Diagnostics::new());

    let controller = match (&args.launch, args.pid, &args.name) {
        (Some(exe), None, None) => {
            log::info!("launching `{exe}` suspended for injection");
            ProcessController::launch(exe, &args.launch_args, true).context("launch target process")?
        }
        (None, Some(pid), None) => {
            log::info!("attaching to pid {pid}");
            ProcessController::open_by_pid(pid).context("open target process by pid")?
        }
        (None, None, Some(name)) => {
            log::info!("attaching to process named `{name}`");
            ProcessController::open_by_name(name).context("open target process by name")?
        }
        _ => anyhow::bail!("exactly one of --launch, --pid, or --name must be given"),
    };

    let shared_memory_name = env_or_default("SHARED_MEMORY_NAME", &config.shared_memory_name);
    let shared_memory_size = std::env::var("SHARED_MEMORY_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(config.shared_memory_size);

    let context = SharedContext::create(&shared_memory_name, shared_memory_size).context("create shared context")?;
    log::info!(
        "shared arena `{shared_memory_name}` ready ({} bytes free)",
        context.arena().num_free_bytes()
    );

    let param = InjectorParam {
        shared_memory_name: shared_memory_name.clone(),
        shared_memory_size,
        pid: controller.pid(),
        working_directory: std::env::current_dir()
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .unwrap_or_default(),
        custom_argument: String::new(),
    };
    let param_text = param.serialize();

    controller
        .inject(&args.bootstrap, &args.bootstrap_module, &param_text, args.timeout_ms)
        .context("inject bootstrap module")?;
    controller.resume_pre_existing_threads();
    metrics.set_hooks_installed(0);

    log::info!("bootstrap injected into pid {}", controller.pid());

    if !args.no_api {
        let listen = args.listen.clone();
        let state = ApiState {
            metrics: metrics.clone(),
            diagnostics: diagnostics.clone(),
            arena_free_bytes: Arc::new({
                let arena = context.arena().clone();
                move || arena.num_free_bytes()
            }),
        };
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&listen).await {
                Ok(listener) => listener,
                Err(err) => {
                    log::warn!("status API disabled: failed to bind {listen}: {err}");
                    return;
                }
            };
            log::info!("status API listening on http://{listen}");
            if let Err(err) = axum::serve(listener, api::router(state)).await {
                log::warn!("status API server exited: {err}");
            }
        });
    }

    let exit_code = controller.wait(u32::MAX).context("wait for target process")?;
    log::info!("target process exited with code {exit_code}");
    drop(context);
    Ok(())
}
