pub mod api;
pub mod arena;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod hooks;
pub mod metrics;
pub mod process;
pub mod shared;
pub mod sink;
pub mod spin_mutex;

pub use arena::Arena;
pub use codec::{InjectorParam, PluginLoadParam, PluginMessageParam, PluginRequest, PluginToLoad, PluginUnloadParam};
pub use config::HookConfig;
pub use diagnostics::{DiagnosticEvent, Diagnostics};
pub use hooks::{HookEngine, HookToken};
pub use metrics::Metrics;
pub use shared::SharedContext;

pub use bifrost_common::{Error, HookIdentifier, HookKind, LogLevel, Ptr, StorageValue};

/// Result alias matching [`bifrost_common::error::Result`], re-exported so
/// downstream crates only need one import.
pub type Result<T> = bifrost_common::error::Result<T>;
