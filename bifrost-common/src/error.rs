/// The ten error kinds from spec §7, independent of which side of the
/// injector/target boundary raised them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("patch space too small at {0:#x}")]
    PatchSpaceTooSmall(u64),

    #[error("failed to change page protection at {0:#x}")]
    ProtectionChangeFailed(u64),

    #[error("remote execution timed out after {0}ms")]
    RemoteExecutionTimeout(u32),

    #[error("remote execution failed with exit code {0}")]
    RemoteExecutionFailed(u32),

    #[error("failed to decode parameter block: missing field `{0}`")]
    ParameterDecode(String),

    #[error("arena exhausted: requested {requested}, {available} available")]
    ArenaExhausted { requested: u64, available: u64 },

    #[error("arena size mismatch: attached {attached}, created {created}")]
    ArenaMismatch { attached: u64, created: u64 },

    #[error("process name ambiguous, candidates: {0:?}")]
    ProcessAmbiguous(Vec<u32>),

    #[error("hook id {0} already registered")]
    DuplicateRegistration(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
