use std::path::Path;

use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Targets used to route `tracing` events to the right log file under
/// `logs/`. Modules emit with
/// `tracing::info!(target: logging::DEPLOYMENT, ...)` etc.
pub const DEPLOYMENT: &str = "outpost::deployment";
pub const SSH: &str = "outpost::ssh";
pub const SECURITY: &str = "outpost::security";

/// Guards that must stay alive for the lifetime of the process — dropping
/// one stops its non-blocking writer thread and silently truncates the
/// log.
pub struct LoggingGuards {
    _deployment: tracing_appender::non_blocking::WorkerGuard,
    _ssh: tracing_appender::non_blocking::WorkerGuard,
    _security: tracing_appender::non_blocking::WorkerGuard,
}

/// Wires up the three per-project log files plus a stderr layer for
/// interactive progress, mirroring the `logs/deployment-<ts>.log`,
/// `logs/ssh-<ts>.log`, `logs/security-<ts>.log` layout.
pub fn init(project_dir: &Path, run_ts: &str) -> std::io::Result<LoggingGuards> {
    let logs_dir = project_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)?;

    let (deployment_writer, deployment_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(
            &logs_dir,
            format!("deployment-{run_ts}.log"),
        ));
    let (ssh_writer, ssh_guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        &logs_dir,
        format!("ssh-{run_ts}.log"),
    ));
    let (security_writer, security_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(
            &logs_dir,
            format!("security-{run_ts}.log"),
        ));

    let deployment_layer = fmt::layer()
        .with_writer(deployment_writer)
        .with_ansi(false)
        .with_filter(filter_fn(|meta| meta.target() == DEPLOYMENT));
    let ssh_layer = fmt::layer()
        .with_writer(ssh_writer)
        .with_ansi(false)
        .with_filter(filter_fn(|meta| meta.target() == SSH));
    let security_layer = fmt::layer()
        .with_writer(security_writer)
        .with_ansi(false)
        .with_filter(filter_fn(|meta| meta.target() == SECURITY));

    let registry = tracing_subscriber::registry()
        .with(deployment_layer)
        .with(ssh_layer)
        .with(security_layer);

    // Best-effort: a second call to `init` within one process (e.g. in a
    // test harness) would panic on the global default, so ignore the
    // error rather than crash a resumed run.
    let _ = registry.try_init();

    Ok(LoggingGuards {
        _deployment: deployment_guard,
        _ssh: ssh_guard,
        _security: security_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let _guards = init(dir.path(), "19700101").unwrap();

        tracing::info!(target: DEPLOYMENT, "phase started");
        tracing::info!(target: SSH, "command executed");
        tracing::info!(target: SECURITY, "hardening step completed");

        // Give the non-blocking writer threads a moment to flush.
        std::thread::sleep(std::time::Duration::from_millis(200));

        assert!(dir.path().join("logs/deployment-19700101.log").exists());
        assert!(dir.path().join("logs/ssh-19700101.log").exists());
        assert!(dir.path().join("logs/security-19700101.log").exists());
    }
}
