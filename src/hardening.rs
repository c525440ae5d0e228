use crate::cloud::CloudResourceManager;
use crate::cmd;
use crate::config::{AuthMethod, SecurityConfig};
use crate::error::{DeployError, DeployResult};
use crate::remote_command::RemoteCommands;
use crate::ssh::{ConnectionIdentity, SshBroker, SshSession};
use crate::state::HardeningCheckpoint;

const SSHD_TEMPLATE: &str = include_str!("../templates/sshd_outpost.conf.tmpl");
const JAIL_TEMPLATE: &str = include_str!("../templates/jail_sshd.local.tmpl");
const AUTO_UPGRADES_TEMPLATE: &str = include_str!("../templates/20auto-upgrades.tmpl");

/// Everything the state machine needs to know about the target host and
/// the project's hardening choices (the `security.*` config block).
pub struct HardeningPlan {
    pub host: String,
    pub os_default_user: String,
    pub initial_private_key_path: String,
    pub deployment_user: String,
    pub custom_port: u16,
    pub auth_method: AuthMethod,
    pub firewall_id: String,
    /// Local path of the keypair generated for the deployment user;
    /// `.pub` appended gives the public key.
    pub deploy_key_path: String,
    pub security: SecurityConfigFlags,
}

/// The three independently-toggleable hardening features.
#[derive(Debug, Clone, Copy)]
pub struct SecurityConfigFlags {
    pub firewall_enabled: bool,
    pub ips_enabled: bool,
    pub auto_updates_enabled: bool,
}

impl From<&SecurityConfig> for SecurityConfigFlags {
    fn from(security: &SecurityConfig) -> Self {
        Self {
            firewall_enabled: security.firewall.enabled,
            ips_enabled: security.ips.enabled,
            auto_updates_enabled: security.auto_updates.enabled,
        }
    }
}

impl HardeningPlan {
    #[must_use]
    pub fn start_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::new(&self.host, 22, &self.os_default_user, &self.initial_private_key_path)
    }

    #[must_use]
    pub fn terminal_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::new(
            &self.host,
            self.custom_port,
            &self.deployment_user,
            &self.deploy_key_path,
        )
    }
}

/// Drives the host from the cloud-default identity to the hardened
/// terminal identity, one checkpointed step at a time.
///
/// Each public `step_*` method performs exactly one transition in the
/// state diagram and is safe to call only when the matching checkpoint
/// flag is unset; `run` sequences them and persists the checkpoint after
/// every step via `persist`, satisfying I2.
pub struct HardeningMachine<'a> {
    cloud: &'a CloudResourceManager,
    plan: &'a HardeningPlan,
}

impl<'a> HardeningMachine<'a> {
    #[must_use]
    pub const fn new(cloud: &'a CloudResourceManager, plan: &'a HardeningPlan) -> Self {
        Self { cloud, plan }
    }

    /// Runs every not-yet-completed step in order, persisting the
    /// checkpoint after each one via `persist`. `broker` ends up holding
    /// whichever identity is current when `run` returns — the terminal
    /// identity on full success, or the still-valid identity the last
    /// completed step left behind on an early, retryable failure.
    pub fn run(
        &self,
        broker: &mut SshBroker,
        checkpoint: &mut HardeningCheckpoint,
        mut persist: impl FnMut(&HardeningCheckpoint) -> DeployResult<()>,
    ) -> DeployResult<()> {
        if !checkpoint.key_generated {
            self.step_key_generated()?;
            checkpoint.key_generated = true;
            persist(checkpoint)?;
        }

        if !checkpoint.user_created {
            let old_session = broker.connect(self.plan.start_identity())?;
            self.step_user_created(&old_session)?;
            checkpoint.user_created = true;
            persist(checkpoint)?;
        }

        if !checkpoint.new_identity_verified_22 {
            self.step_new_identity_verified_22(broker)?;
            checkpoint.new_identity_verified_22 = true;
            persist(checkpoint)?;
        }

        if !checkpoint.firewall_new_port_open {
            self.step_firewall_new_port_open()?;
            checkpoint.firewall_new_port_open = true;
            persist(checkpoint)?;
        }

        if !checkpoint.daemon_reconfigured {
            let port22_session = broker.connect(self.plan.start_identity())?;
            self.step_daemon_reconfigured(&port22_session)?;
            checkpoint.daemon_reconfigured = true;
            persist(checkpoint)?;
        }

        if !checkpoint.new_identity_verified_custom {
            self.step_new_identity_verified_custom(broker)?;
            checkpoint.new_identity_verified_custom = true;
            persist(checkpoint)?;
        }

        if !checkpoint.firewall_old_port_closed {
            self.step_firewall_old_port_closed()?;
            checkpoint.firewall_old_port_closed = true;
            persist(checkpoint)?;
        }

        if !checkpoint.host_firewall_enabled {
            self.step_host_firewall_enabled(broker.current()?)?;
            checkpoint.host_firewall_enabled = true;
            persist(checkpoint)?;
        }

        if !checkpoint.ips_enabled {
            if let Err(e) = self.step_ips_enabled(broker.current()?) {
                tracing::warn!(target: crate::logging::SECURITY, error = %e, "ips_enabled step failed, continuing (non-fatal)");
            }
            checkpoint.ips_enabled = true;
            persist(checkpoint)?;
        }

        if !checkpoint.auto_updates_enabled {
            if let Err(e) = self.step_auto_updates_enabled(broker.current()?) {
                tracing::warn!(target: crate::logging::SECURITY, error = %e, "auto_updates_enabled step failed, continuing (non-fatal)");
            }
            checkpoint.auto_updates_enabled = true;
            persist(checkpoint)?;
        }

        Ok(())
    }

    /// `start -> key_generated`: a local key pair exists for the
    /// deployment identity. Idempotent — skips generation if the file
    /// is already there from a prior, interrupted run.
    fn step_key_generated(&self) -> DeployResult<()> {
        if std::path::Path::new(&self.plan.deploy_key_path).exists() {
            return Ok(());
        }
        cmd::run(
            "ssh-keygen",
            &[
                "-t",
                "ed25519",
                "-N",
                "",
                "-f",
                &self.plan.deploy_key_path,
                "-C",
                "outpost-deploy",
            ],
        )?;
        Ok(())
    }

    /// `key_generated -> user_created`: deployment user exists, has
    /// `~/.ssh/authorized_keys` with the new public key, a sudoers
    /// snippet, and the app/logs directories.
    fn step_user_created(&self, session: &SshSession) -> DeployResult<()> {
        let user = &self.plan.deployment_user;
        let public_key = std::fs::read_to_string(format!("{}.pub", self.plan.deploy_key_path))?;
        let public_key = public_key.trim();

        RemoteCommands::run_checked(
            session,
            &format!("id -u {user} >/dev/null 2>&1 || useradd -m -s /bin/bash {user}"),
        )?;
        RemoteCommands::run_checked(session, &format!("mkdir -p /home/{user}/.ssh"))?;
        RemoteCommands::append_once(
            session,
            &format!("/home/{user}/.ssh/authorized_keys"),
            public_key,
        )?;
        RemoteCommands::run_checked(
            session,
            &format!(
                "chown -R {user}:{user} /home/{user}/.ssh && \
                 chmod 700 /home/{user}/.ssh && \
                 chmod 600 /home/{user}/.ssh/authorized_keys"
            ),
        )?;
        RemoteCommands::write_file(
            session,
            &format!("/etc/sudoers.d/{user}"),
            &format!("{user} ALL=(ALL) NOPASSWD:ALL\n"),
            "440",
        )?;
        RemoteCommands::run_checked(
            session,
            &format!(
                "mkdir -p /opt/outpost/app /opt/outpost/logs && \
                 chown -R {user}:{user} /opt/outpost"
            ),
        )?;
        Ok(())
    }

    /// `user_created -> new_identity_verified_22`: the new identity
    /// works, still on port 22.
    fn step_new_identity_verified_22(&self, broker: &SshBroker) -> DeployResult<()> {
        let candidate = ConnectionIdentity::new(
            &self.plan.host,
            22,
            &self.plan.deployment_user,
            &self.plan.deploy_key_path,
        );
        let session = broker.connect(candidate)?;
        let out = session.exec("whoami")?;
        if out.success() && out.stdout.trim() == self.plan.deployment_user {
            Ok(())
        } else {
            Err(DeployError::HardeningInvariantViolation(format!(
                "new identity verification on port 22 failed: {}",
                out.stderr
            )))
        }
    }

    /// `new_identity_verified_22 -> firewall_new_port_open`: the cloud
    /// firewall admits the custom port, ahead of the daemon listening
    /// on it.
    fn step_firewall_new_port_open(&self) -> DeployResult<()> {
        self.cloud.open_firewall_port(&self.plan.firewall_id, self.plan.custom_port)
    }

    /// `firewall_new_port_open -> daemon_reconfigured`: the host SSH
    /// daemon now listens on the custom port with root login and
    /// password auth disabled per `auth_method`. Issues a reload, not a
    /// restart, over the still-open port-22 `session` so the current
    /// connection survives.
    fn step_daemon_reconfigured(&self, session: &SshSession) -> DeployResult<()> {
        let backup_ts = chrono::Utc::now().timestamp();
        RemoteCommands::run_checked(
            session,
            &format!("cp /etc/ssh/sshd_config /etc/ssh/sshd_config.backup.{backup_ts}"),
        )?;

        let password_auth = match self.plan.auth_method {
            AuthMethod::KeysOnly => "no",
            AuthMethod::KeysAndPassword => "yes",
        };
        let mut vars = std::collections::HashMap::new();
        let port = self.plan.custom_port.to_string();
        vars.insert("port", port.as_str());
        vars.insert("password_auth", password_auth);
        vars.insert("user", self.plan.deployment_user.as_str());
        let rendered = RemoteCommands::render_template(SSHD_TEMPLATE, &vars)?;

        RemoteCommands::write_file(
            session,
            "/etc/ssh/sshd_config.d/99-outpost.conf",
            &rendered,
            "644",
        )?;
        RemoteCommands::reload_service(session, "ssh")?;
        Ok(())
    }

    /// `daemon_reconfigured -> new_identity_verified_custom`: the new
    /// identity is proven to work on the custom port. On failure, the
    /// still-open port-22 session is used to restore the pre-change
    /// daemon config and reload, leaving state unadvanced (I3).
    fn step_new_identity_verified_custom(&self, broker: &mut SshBroker) -> DeployResult<()> {
        let candidate = self.plan.terminal_identity();
        match broker.switch_identity(candidate) {
            Ok(session) => {
                let out = session.exec("whoami")?;
                if out.success() && out.stdout.trim() == self.plan.deployment_user {
                    Ok(())
                } else {
                    self.rollback_daemon_config(broker)?;
                    Err(DeployError::HardeningInvariantViolation(
                        "new identity verification on custom port returned unexpected output"
                            .into(),
                    ))
                }
            }
            Err(e) => {
                self.rollback_daemon_config(broker)?;
                Err(DeployError::HardeningInvariantViolation(format!(
                    "new identity verification on custom port failed: {e}"
                )))
            }
        }
    }

    fn rollback_daemon_config(&self, broker: &SshBroker) -> DeployResult<()> {
        let port22 = broker.connect(self.plan.start_identity())?;
        RemoteCommands::run_checked(
            &port22,
            "rm -f /etc/ssh/sshd_config.d/99-outpost.conf && systemctl reload ssh",
        )?;
        Ok(())
    }

    /// `new_identity_verified_custom -> firewall_old_port_closed`: the
    /// cloud firewall no longer admits port 22. Per I1, the caller only
    /// reaches this step once the new identity has been exercised on
    /// the custom port (enforced by the strict ordering in `run`).
    fn step_firewall_old_port_closed(&self) -> DeployResult<()> {
        self.cloud.close_firewall_port(&self.plan.firewall_id, 22)
    }

    /// `firewall_old_port_closed -> host_firewall_enabled`: host
    /// firewall active, default-deny, admitting the custom SSH port
    /// plus 80/443. The self-lockout guard inserts the allow-rule for
    /// the currently-connected port before flipping to default-deny.
    fn step_host_firewall_enabled(&self, session: &SshSession) -> DeployResult<()> {
        if !self.plan.security.firewall_enabled {
            return Ok(());
        }
        RemoteCommands::run_checked(session, "command -v ufw >/dev/null 2>&1 || apt-get install -y -qq ufw")?;
        RemoteCommands::run_checked(session, &format!("ufw allow {}/tcp", self.plan.custom_port))?;
        RemoteCommands::run_checked(session, "ufw allow 80/tcp")?;
        RemoteCommands::run_checked(session, "ufw allow 443/tcp")?;
        RemoteCommands::run_checked(session, "ufw default deny incoming")?;
        RemoteCommands::run_checked(session, "ufw --force enable")?;
        Ok(())
    }

    /// `host_firewall_enabled -> ips_enabled`: the intrusion-prevention
    /// daemon watches the custom SSH port, not 22.
    fn step_ips_enabled(&self, session: &SshSession) -> DeployResult<()> {
        if !self.plan.security.ips_enabled {
            return Ok(());
        }
        RemoteCommands::install_packages(session, &["fail2ban"])?;

        let mut vars = std::collections::HashMap::new();
        let port = self.plan.custom_port.to_string();
        vars.insert("port", port.as_str());
        let rendered = RemoteCommands::render_template(JAIL_TEMPLATE, &vars)?;
        RemoteCommands::write_file(session, "/etc/fail2ban/jail.d/sshd.local", &rendered, "644")?;
        RemoteCommands::enable_service(session, "fail2ban")?;
        RemoteCommands::reload_service(session, "fail2ban")?;
        Ok(())
    }

    /// `ips_enabled -> auto_updates_enabled`: unattended security
    /// updates configured.
    fn step_auto_updates_enabled(&self, session: &SshSession) -> DeployResult<()> {
        if !self.plan.security.auto_updates_enabled {
            return Ok(());
        }
        RemoteCommands::install_packages(session, &["unattended-upgrades"])?;
        RemoteCommands::write_file(
            session,
            "/etc/apt/apt.conf.d/20auto-upgrades",
            AUTO_UPGRADES_TEMPLATE,
            "644",
        )?;
        RemoteCommands::enable_service(session, "unattended-upgrades")?;
        Ok(())
    }
}

/// *Stale local state* resume policy: test both the
/// start and terminal identities and continue from whichever works.
/// Neither working means the normal Broker path is exhausted and the
/// caller should hand over to the Recovery Channel (§4.9).
#[must_use]
pub fn resolve_resumable_identity(plan: &HardeningPlan) -> Option<ConnectionIdentity> {
    let terminal = plan.terminal_identity();
    if SshBroker::test(&terminal) {
        return Some(terminal);
    }
    let start = plan.start_identity();
    if SshBroker::test(&start) {
        return Some(start);
    }
    None
}
