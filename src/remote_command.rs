use std::collections::HashMap;

use crate::error::{DeployError, DeployResult};
use crate::ssh::SshSession;

/// Idempotent shell operations run over an `SshSession`.
/// Every operation here is safe to run twice: `install_packages` checks
/// before installing, `append_once` checks before appending, and so on.
pub struct RemoteCommands;

impl RemoteCommands {
    /// Install packages via the distro's package manager, skipping ones
    /// already present.
    pub fn install_packages(ssh: &SshSession, packages: &[&str]) -> DeployResult<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let list = packages.join(" ");
        let command = format!(
            "DEBIAN_FRONTEND=noninteractive apt-get update -qq && \
             DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {list}"
        );
        Self::run_checked(ssh, &command)
    }

    /// Write `content` to `remote_path` atomically (staged then
    /// renamed), setting `mode`. Overwrites unconditionally — the
    /// idempotency is that writing the same content twice leaves the
    /// same result.
    pub fn write_file(ssh: &SshSession, remote_path: &str, content: &str, mode: &str) -> DeployResult<()> {
        ssh.upload(content, remote_path, mode)
    }

    /// Append `line` to `remote_path` only if it isn't already present,
    /// used for things like `sshd_config` directives and `sysctl.conf`
    /// entries that must not be duplicated across resumed runs.
    pub fn append_once(ssh: &SshSession, remote_path: &str, line: &str) -> DeployResult<()> {
        let escaped = shell_escape(line);
        let command = format!(
            "grep -qxF {escaped} {remote_path} 2>/dev/null || echo {escaped} >> {remote_path}"
        );
        Self::run_checked(ssh, &command)
    }

    /// Enable and start a systemd unit, or reload it if already running
    /// (used by the hardening phase's "reconfigure, don't restart"
    /// rule for `sshd`).
    pub fn enable_service(ssh: &SshSession, unit: &str) -> DeployResult<()> {
        let command = format!("systemctl enable --now {unit}");
        Self::run_checked(ssh, &command)
    }

    /// Reload (not restart) a running unit, preserving existing
    /// connections while it picks up a config change.
    pub fn reload_service(ssh: &SshSession, unit: &str) -> DeployResult<()> {
        let command = format!("systemctl reload {unit}");
        Self::run_checked(ssh, &command)
    }

    /// Render a `templates/<name>.sh.tmpl` file, substituting
    /// `{{var}}` placeholders from `vars`, and return the rendered
    /// script text. Unresolved placeholders are left as an error
    /// rather than silently passed through, since a missing variable
    /// in a hardening or cert script is always a caller bug.
    pub fn render_template(template: &str, vars: &HashMap<&str, &str>) -> DeployResult<String> {
        let mut rendered = template.to_string();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        }

        if let Some(start) = rendered.find("{{") {
            let end = rendered[start..].find("}}").map(|i| start + i + 2);
            let snippet = end.map_or(&rendered[start..], |e| &rendered[start..e]);
            return Err(DeployError::Validation {
                field: "template".into(),
                rule: format!("unresolved placeholder {snippet}"),
            });
        }

        Ok(rendered)
    }

    /// Run `command` and turn a nonzero exit into `RemoteCommand`. Shared
    /// by the hardening, TLS, and application modules so every remote
    /// step fails the same way.
    pub(crate) fn run_checked(ssh: &SshSession, command: &str) -> DeployResult<()> {
        let out = ssh.exec(command)?;
        if out.success() {
            Ok(())
        } else {
            Err(DeployError::RemoteCommand {
                command: command.to_string(),
                exit_code: out.exit_code,
                stderr_tail: out.stderr,
            })
        }
    }
}

fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_template_substitutes_vars() {
        let mut vars = HashMap::new();
        vars.insert("port", "2847");
        vars.insert("user", "deploy");
        let template = "Port {{port}}\nAllowUsers {{user}}\n";
        let rendered = RemoteCommands::render_template(template, &vars).unwrap();
        assert_eq!(rendered, "Port 2847\nAllowUsers deploy\n");
    }

    #[test]
    fn render_template_errors_on_unresolved_placeholder() {
        let vars = HashMap::new();
        let result = RemoteCommands::render_template("Port {{port}}", &vars);
        assert!(result.is_err());
    }

    #[test]
    fn shell_escape_handles_single_quotes() {
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }
}
