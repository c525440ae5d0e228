use std::process::ExitStatus;

pub type DeployResult<T> = Result<T, DeployError>;

/// The error taxonomy: each variant is a *kind*, not a wire type, and
/// carries enough context to print a human-readable diagnosis.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Configuration failed preflight. Never reaches any external system.
    #[error("validation error: {field}: {rule}")]
    Validation { field: String, rule: String },

    /// Credentials rejected by a cloud, DNS, or repository provider.
    #[error("auth error ({provider}): {action}")]
    Auth { provider: String, action: String },

    /// A provider reports a hard account limit.
    #[error("quota error ({provider}): {quota} (consider requesting a limit increase)")]
    Quota { provider: String, quota: String },

    /// Timeouts, 5xx, or "not yet visible" responses, surfaced only once
    /// internal retries are exhausted.
    #[error("transient cloud error ({provider}) after {attempts} attempts: {message}")]
    TransientCloud {
        provider: String,
        attempts: u32,
        message: String,
    },

    /// DNS did not converge, or an identity role was not visible, within
    /// its deadline.
    #[error("propagation did not complete within {deadline_secs}s: {what}")]
    Propagation { what: String, deadline_secs: u64 },

    /// SSH connect/exec failures, after the Broker has already tried every
    /// known Connection Identity.
    #[error("connectivity error: {0} (run `outpost recover` to use the out-of-band channel)")]
    Connectivity(String),

    /// An internal hardening invariant (I1-I3) failed. Fatal; hardening
    /// state is not advanced past the last successful checkpoint.
    #[error("hardening invariant violated: {0}")]
    HardeningInvariantViolation(String),

    /// A remote command returned a non-zero exit with unexpected stderr.
    #[error("remote command failed (exit {exit_code}): {command}\n{stderr_tail}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        stderr_tail: String,
    },

    #[error("command failed: {command}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("SSH connection failed: {0}")]
    SshFailed(String),

    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("DNS error: {0}")]
    DnsError(String),

    #[error("environment variable missing: {0}")]
    EnvMissing(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("container '{0}' did not become healthy after {1} attempts")]
    HealthcheckTimeout(String, u32),

    #[error("deployment already in progress for this project (state.lock held)")]
    LockHeld,

    /// A process interrupt (SIGINT) was honoured at a phase boundary;
    /// in-flight work completed, state was snapshotted, and the run
    /// exited cleanly for a later `resume`.
    #[error("deployment cancelled by user; state saved, run `outpost resume` to continue")]
    Cancelled,

    /// Resume's "stale local state" check found neither
    /// the start nor the terminal Connection Identity reachable. The
    /// Broker path is exhausted; only the out-of-band Recovery Channel
    /// can proceed from here.
    #[error("host unreachable on any known identity: {0} (run `outpost recover`)")]
    RecoveryRequired(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    /// Maps an error to the process exit code from the CLI surface
    /// (0 success, 1 validation, 2 cloud, 3 connectivity, 4 cancelled,
    /// 5 recovery required).
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => 1,
            Self::Connectivity(_) => 3,
            Self::Cancelled => 4,
            Self::RecoveryRequired(_) => 5,
            _ => 2,
        }
    }
}
