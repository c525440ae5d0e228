use std::fmt;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::cmd;
use crate::error::{DeployError, DeployResult};
use crate::logging;

/// A `(host, port, username, credential)` triple uniquely identifying how
/// to reach the host. The Hardening
/// State Machine mutates this as it moves the host from the cloud
/// default user on 22 to the project's deployment user on its custom
/// port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key_path: String,
}

impl ConnectionIdentity {
    #[must_use]
    pub fn new(host: &str, port: u16, username: &str, private_key_path: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            private_key_path: private_key_path.to_string(),
        }
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// The result of one remote command execution, logged verbatim (minus
/// redaction) to the session log.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One live SSH session bound to a single `ConnectionIdentity`. Holds no
/// state beyond the identity it was opened with — `SshBroker` is the
/// thing that knows which session is "current" and invalidates this one
/// on any identity change.
pub struct SshSession {
    identity: ConnectionIdentity,
}

impl SshSession {
    #[must_use]
    pub const fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Execute a command on the remote host and capture output, exit
    /// code, and duration. Every call is logged to the append-only SSH
    /// session log with redacted stdout/stderr, independent of whether
    /// the command itself succeeds.
    pub fn exec(&self, command: &str) -> DeployResult<ExecOutput> {
        let args = self.build_ssh_args(command);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let started = Instant::now();
        let result = cmd::spawn_checked("ssh", &refs);
        let duration = started.elapsed();

        match result {
            Ok(output) => {
                let out = ExecOutput {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    duration,
                };
                tracing::debug!(
                    target: logging::SSH,
                    identity = %self.identity,
                    command = %redact(command),
                    exit_code = out.exit_code,
                    duration_ms = out.duration.as_millis() as u64,
                    stdout = %redact(&out.stdout),
                    stderr = %redact(&out.stderr),
                    "remote command executed",
                );
                Ok(out)
            }
            Err(e) => {
                tracing::warn!(target: logging::SSH, identity = %self.identity, command = %redact(command), error = %e, "remote command could not be spawned");
                Err(e)
            }
        }
    }

    /// Execute a command on the remote host interactively (used for the
    /// small number of steps where the user benefits from streamed
    /// output, e.g. the docker image load in the Application phase).
    pub fn exec_interactive(&self, command: &str) -> DeployResult<()> {
        let args = self.build_ssh_args(command);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run_interactive("ssh", &refs)
    }

    /// Copy a local file to the remote host.
    pub fn scp_to(&self, local_path: &str, remote_path: &str) -> DeployResult<()> {
        let mut args = self.scp_base_args();
        let dest = format!("{}:{remote_path}", self.destination());
        args.push(local_path.to_string());
        args.push(dest);

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run_interactive("scp", &refs)
    }

    /// Upload file content via a staging path, then an atomic rename on
    /// the remote side, and `chmod` to `mode`.
    pub fn upload(&self, content: &str, remote_path: &str, mode: &str) -> DeployResult<()> {
        let staging = format!("{remote_path}.upload.{}", std::process::id());
        let command = format!("cat > {staging}");
        let args = self.build_ssh_args(&command);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run_with_stdin("ssh", &refs, content.as_bytes())?;

        let finalize = format!("chmod {mode} {staging} && mv -f {staging} {remote_path}");
        let out = self.exec(&finalize)?;
        if out.success() {
            Ok(())
        } else {
            Err(DeployError::RemoteCommand {
                command: finalize,
                exit_code: out.exit_code,
                stderr_tail: tail(&out.stderr, 20),
            })
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.identity.username, self.identity.host)
    }

    fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = self.ssh_base_args();
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    fn ssh_base_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-p".to_string(),
            self.identity.port.to_string(),
            "-i".to_string(),
            self.identity.private_key_path.clone(),
        ]
    }

    fn scp_base_args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-P".to_string(),
            self.identity.port.to_string(),
            "-i".to_string(),
            self.identity.private_key_path.clone(),
        ]
    }
}

/// Backoff schedule for `connect`: exponential starting at 2s, capped at
/// 30s.
fn backoff_schedule(max_attempts: u32) -> impl Iterator<Item = Duration> {
    (0..max_attempts).map(|attempt| {
        let secs = 2u64.saturating_pow(attempt + 1).min(30);
        Duration::from_secs(secs)
    })
}

/// Owns the "current" `SshSession` and abstracts identity changes from
/// the Hardening and Remote-Command components. A session
/// handle obtained from `exec`/`upload` here always reflects whichever
/// identity `switch_identity` last succeeded with; `SshBroker` refuses to
/// hand out the old one once a switch has happened.
pub struct SshBroker {
    current: Option<SshSession>,
    max_connect_attempts: u32,
}

impl SshBroker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: None,
            max_connect_attempts: 5,
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts;
        self
    }

    /// Connects with exponential backoff. Does not touch
    /// `self.current` — callers decide when a successful connect becomes
    /// "the" session via `switch_identity`, preserving the rule
    /// (atomic identity swap: the Broker's notion of current identity
    /// only updates after a successful connect with the new one).
    pub fn connect(&self, identity: ConnectionIdentity) -> DeployResult<SshSession> {
        let mut last_err = None;
        for delay in backoff_schedule(self.max_connect_attempts) {
            if delay > Duration::ZERO {
                thread::sleep(delay);
            }
            let session = SshSession { identity: identity.clone() };
            match session.exec("true") {
                Ok(out) if out.success() => return Ok(session),
                Ok(out) => {
                    last_err = Some(DeployError::Connectivity(format!(
                        "connected to {identity} but `true` exited {}: {}",
                        out.exit_code, out.stderr
                    )));
                }
                Err(e) => last_err = Some(e),
            }
        }

        let err = last_err.unwrap_or_else(|| {
            DeployError::Connectivity(format!("failed to connect to {identity}"))
        });
        tracing::warn!(target: logging::SSH, identity = %identity, error = %err, "connect exhausted retry budget");
        Err(err)
    }

    /// "Waiting for host to become reachable" inner loop, run once after
    /// initial VM launch, for up to 5 minutes.
    pub fn wait_reachable(&self, identity: &ConnectionIdentity, max_wait: Duration) -> DeployResult<SshSession> {
        let deadline = Instant::now() + max_wait;
        let interval = Duration::from_secs(10);
        loop {
            if let Ok(session) = self.connect(identity.clone()) {
                return Ok(session);
            }
            if Instant::now() >= deadline {
                return Err(DeployError::Connectivity(format!(
                    "{identity} not reachable within {}s of VM launch",
                    max_wait.as_secs()
                )));
            }
            thread::sleep(interval);
        }
    }

    /// One-shot `whoami` with a short timeout, used to figure out which
    /// identity is currently live, used by both connectivity checks and
    /// the "stale local state" resume policy.
    #[must_use]
    pub fn test(identity: &ConnectionIdentity) -> bool {
        let session = SshSession { identity: identity.clone() };
        session.exec("whoami").is_ok_and(|out| out.success())
    }

    /// Disconnects the old session (a no-op for our process-per-call SSH
    /// model — there's no persistent socket to close) and makes
    /// `identity` current, but only once a connection using it has
    /// actually succeeded.
    pub fn switch_identity(&mut self, identity: ConnectionIdentity) -> DeployResult<&SshSession> {
        let session = self.connect(identity)?;
        self.current = Some(session);
        Ok(self.current.as_ref().expect("just set"))
    }

    /// The current session, if any. Returns `ConnectivityError` rather
    /// than panicking when no identity has been established yet.
    pub fn current(&self) -> DeployResult<&SshSession> {
        self.current
            .as_ref()
            .ok_or_else(|| DeployError::Connectivity("no active SSH session".into()))
    }
}

impl Default for SshBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Masks common credential shapes (`key=...`, `token: ...`, `Bearer ...`,
/// and bare long alphanumeric secrets) before a command or its output
/// reaches the session log. Not a substitute for `upload`'s mode-0700 staging of
/// DNS-01 hook scripts — this only protects the log file.
fn redact(text: &str) -> String {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"(?i)((?:api[_-]?key|token|secret|password)\s*[:=]\s*)(\S+)").expect("valid regex"),
            Regex::new(r"(?i)(Authorization:\s*Bearer\s+)(\S+)").expect("valid regex"),
        ]
    });
    let mut redacted = text.to_string();
    for pattern in patterns {
        redacted = pattern.replace_all(&redacted, "$1[REDACTED]").into_owned();
    }
    redacted
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display() {
        let id = ConnectionIdentity::new("1.2.3.4", 2847, "deploy", "/home/u/.ssh/id");
        assert_eq!(id.to_string(), "deploy@1.2.3.4:2847");
    }

    #[test]
    fn backoff_is_exponential_then_capped() {
        let delays: Vec<Duration> = backoff_schedule(6).collect();
        assert_eq!(delays[0], Duration::from_secs(2));
        assert_eq!(delays[1], Duration::from_secs(4));
        assert_eq!(delays[2], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(30));
        assert_eq!(delays[5], Duration::from_secs(30));
    }

    #[test]
    fn broker_current_errors_before_any_connect() {
        let broker = SshBroker::new();
        assert!(broker.current().is_err());
    }

    #[test]
    fn tail_keeps_last_n_lines() {
        let text = "a\nb\nc\nd\ne";
        assert_eq!(tail(text, 2), "d\ne");
        assert_eq!(tail(text, 100), text);
    }

    #[test]
    fn redact_masks_key_value_credentials() {
        let masked = redact("export CF_DNS_API_TOKEN=sekret123 && curl");
        assert!(!masked.contains("sekret123"));
        assert!(masked.contains("TOKEN=[REDACTED]"));
    }

    #[test]
    fn redact_masks_bearer_header() {
        let masked = redact("Authorization: Bearer abcdef.ghijkl");
        assert!(!masked.contains("abcdef.ghijkl"));
        assert!(masked.contains("Bearer [REDACTED]"));
    }

    #[test]
    fn redact_leaves_ordinary_output_untouched() {
        assert_eq!(redact("drwxr-xr-x 2 root root 4096"), "drwxr-xr-x 2 root root 4096");
    }

    #[test]
    fn exec_output_success() {
        let out = ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_secs(1),
        };
        assert!(out.success());
    }
}
