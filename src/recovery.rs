use crate::cmd;
use crate::error::{DeployError, DeployResult};

/// Out-of-band shell to the VM, mediated by the cloud vendor's control
/// plane rather than a direct TCP connection to the host.
/// Used only when the Broker cannot reach the host with any known
/// identity; never part of the normal-path hardening sequence.
pub struct RecoveryChannel {
    droplet_id: String,
}

/// A fixed recovery script run once over the channel: reset the SSH
/// daemon to a permissive baseline, re-open port 22 in the host
/// firewall, and emit a signal the Broker can detect on its next
/// connect attempt.
const RECOVERY_SCRIPT: &str = r"
set -e
rm -f /etc/ssh/sshd_config.d/99-outpost.conf
cp /etc/ssh/sshd_config.backup.* /etc/ssh/sshd_config 2>/dev/null || true
systemctl reload ssh || systemctl restart ssh
command -v ufw >/dev/null 2>&1 && ufw allow 22/tcp || true
echo OUTPOST_RECOVERY_OK
";

impl RecoveryChannel {
    #[must_use]
    pub fn new(droplet_id: &str) -> Self {
        Self {
            droplet_id: droplet_id.to_string(),
        }
    }

    /// Runs the fixed recovery script over `doctl compute ssh --ssh-command`,
    /// which only requires the identity role attached to the VM — no SSH
    /// key or network path to the host's sshd is needed.
    pub fn run_recovery(&self) -> DeployResult<()> {
        let output = cmd::run(
            "doctl",
            &[
                "compute",
                "ssh",
                &self.droplet_id,
                "--ssh-command",
                RECOVERY_SCRIPT,
            ],
        )?;

        if output.contains("OUTPOST_RECOVERY_OK") {
            Ok(())
        } else {
            Err(DeployError::Connectivity(format!(
                "recovery channel ran but did not confirm success: {output}"
            )))
        }
    }

    /// Runs an arbitrary command over the recovery channel, used to
    /// retrieve the emergency key material written at VM creation time
    /// when the primary recovery script path itself needs debugging.
    pub fn run_command(&self, command: &str) -> DeployResult<String> {
        cmd::run(
            "doctl",
            &["compute", "ssh", &self.droplet_id, "--ssh-command", command],
        )
    }

    /// Reads the emergency public key stored on the VM at creation
    /// time, in a path only root can read, via the recovery channel —
    /// confirms the alternate recovery path (direct SSH as root with
    /// the matching local private key) is still viable.
    pub fn read_emergency_key(&self) -> DeployResult<String> {
        self.run_command("cat /root/.outpost-emergency-key.pub 2>/dev/null")
    }
}

/// Cloud-init `user_data` that authorizes `public_key` for root login
/// and drops a copy at a root-only path: an alternate recovery path
/// for when even the vendor's out-of-band shell is
/// unreachable, so an operator holding the matching private key can SSH
/// in directly as root.
#[must_use]
pub fn emergency_key_user_data(public_key: &str) -> String {
    [
        "#cloud-config".to_string(),
        "ssh_authorized_keys:".to_string(),
        format!("  - {public_key}"),
        "write_files:".to_string(),
        "  - path: /root/.outpost-emergency-key.pub".to_string(),
        "    permissions: '0600'".to_string(),
        "    content: |".to_string(),
        format!("      {public_key}"),
        String::new(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_script_resets_daemon_and_signals() {
        assert!(RECOVERY_SCRIPT.contains("99-outpost.conf"));
        assert!(RECOVERY_SCRIPT.contains("OUTPOST_RECOVERY_OK"));
    }

    #[test]
    fn channel_stores_droplet_id() {
        let channel = RecoveryChannel::new("123456");
        assert_eq!(channel.droplet_id, "123456");
    }

    #[test]
    fn emergency_key_user_data_embeds_public_key() {
        let rendered = emergency_key_user_data("ssh-ed25519 AAAA...");
        assert!(rendered.starts_with("#cloud-config"));
        assert!(rendered.contains("ssh-ed25519 AAAA..."));
        assert!(rendered.contains("/root/.outpost-emergency-key.pub"));
    }
}
