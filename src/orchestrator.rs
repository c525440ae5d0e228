use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::caddy::Caddy;
use crate::cert::CertificatePipeline;
use crate::cloud::{CloudResourceManager, Ensured};
use crate::cmd;
use crate::config::{ApplicationConfig, Config};
use crate::dns::cloudflare::Cloudflare;
use crate::dns::ovh::Ovh;
use crate::dns::{self, DnsProvider};
use crate::error::{DeployError, DeployResult};
use crate::hardening::{HardeningMachine, HardeningPlan, SecurityConfigFlags};
use crate::ledger::{Ledger, ResourceKind, ResourceRecord};
use crate::lock::ProjectLock;
use crate::project::Project;
use crate::recovery::{emergency_key_user_data, RecoveryChannel};
use crate::ssh::SshBroker;
use crate::state::{DeploymentState, HardeningCheckpoint, Phase, SCHEMA_VERSION};

const DNS_PROPAGATION_DEADLINE: Duration = Duration::from_secs(30 * 60);
const HOST_REACHABLE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Drives a single project's deployment through its six phases
/// as a checkpointed, resumable state machine. One instance per
/// project directory, one project directory per deployment.
pub struct Orchestrator {
    project_dir: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs a process-wide SIGINT handler that flips this
    /// orchestrator's cancellation flag. `drive` checks the flag at every
    /// phase boundary, the only point an interrupt is honoured at, and
    /// exits with `DeployError::Cancelled`
    /// once the in-flight phase has finished and state is snapshotted.
    /// A second call from another `Orchestrator` in the same process is a
    /// silent no-op: `ctrlc` only allows one global handler.
    pub fn install_signal_handler(&self) {
        let cancel = Arc::clone(&self.cancel);
        let _ = ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        });
    }

    /// Runs to completion, creating a fresh `DeploymentState` if none is
    /// persisted yet, or continuing an interrupted one otherwise. This is
    /// also what backs `resume` — the only difference is that `resume`
    /// refuses to start a project from scratch.
    pub fn apply(&self, config: &Config) -> DeployResult<()> {
        config.validate().map_err(|mut errors| errors.remove(0))?;

        self.install_signal_handler();
        let _lock = ProjectLock::acquire(&self.project_dir)?;

        let mut state = match DeploymentState::load(&self.project_dir)? {
            Some(state) => state,
            None => DeploymentState::new(self.new_project(config)?),
        };

        self.drive(&mut state, config)
    }

    /// Continues an interrupted deployment. Fails if no `state.json`
    /// exists yet — use `apply` for a first run.
    pub fn resume(&self, config: &Config) -> DeployResult<()> {
        config.validate().map_err(|mut errors| errors.remove(0))?;

        self.install_signal_handler();
        let _lock = ProjectLock::acquire(&self.project_dir)?;

        let mut state = DeploymentState::load(&self.project_dir)?.ok_or_else(|| {
            DeployError::Validation {
                field: "state.json".into(),
                rule: "no prior deployment found to resume; run `outpost apply` first".into(),
            }
        })?;

        self.drive(&mut state, config)
    }

    /// Tears down every ledger-recorded resource this deployment created,
    /// in reverse creation order, then removes `state.json`. Resources
    /// the ledger marked as merely adopted (`we_created_it == false`) are
    /// left untouched.
    pub fn destroy(&self) -> DeployResult<()> {
        let _lock = ProjectLock::acquire(&self.project_dir)?;

        let mut state = DeploymentState::load(&self.project_dir)?.ok_or_else(|| {
            DeployError::Validation {
                field: "state.json".into(),
                rule: "no deployment found for this project".into(),
            }
        })?;

        let cloud = CloudResourceManager::new(state.project.clone());

        for kind in state.ledger.destroy_order() {
            let Some(record) = state.ledger.lookup(&kind).cloned() else {
                continue;
            };
            if !record.we_created_it {
                tracing::info!(target: crate::logging::DEPLOYMENT, kind = ?kind, "skipping destroy of adopted resource");
                state.ledger.forget(&kind);
                continue;
            }

            self.destroy_one(&cloud, &kind, &record.provider_id)?;
            state.ledger.forget(&kind);
            state.save(&self.project_dir)?;
        }

        let state_path = self.project_dir.join("state.json");
        if state_path.exists() {
            std::fs::remove_file(&state_path)?;
        }

        Ok(())
    }

    fn destroy_one(&self, cloud: &CloudResourceManager, kind: &ResourceKind, provider_id: &str) -> DeployResult<()> {
        match kind {
            ResourceKind::DnsRecord(domain) => Cloudflare::new(domain)
                .delete_a_record()
                .or_else(|_| Ovh::new(domain).delete_a_record()),
            ResourceKind::Vm => cloud.destroy_vm(provider_id),
            ResourceKind::IdentityRoleProfile | ResourceKind::IdentityRole => cloud.destroy_identity_role(provider_id),
            ResourceKind::ObjectStore => cloud.destroy_object_store(provider_id),
            ResourceKind::FirewallGroup => cloud.destroy_firewall(provider_id),
            ResourceKind::KeyPair => cloud.destroy_key_pair(provider_id),
        }
    }

    /// Prints a human-readable summary of the current phase, hardening
    /// progress, and ledger contents to stdout.
    pub fn status(&self) -> DeployResult<()> {
        match DeploymentState::load(&self.project_dir)? {
            None => println!("no deployment found for this project"),
            Some(state) => {
                println!("project: {}", state.project.name);
                println!("phase: {:?}", state.phase);
                println!("hardened: {}", state.hardening_checkpoint.hardened());
                println!("certificates issued: {}", state.tls_state.certificates.len());
                println!("ledger entries: {}", state.ledger.len());
                if let Some(err) = &state.last_error {
                    println!("last error: {err}");
                }
            }
        }
        Ok(())
    }

    /// Drives the out-of-band Recovery Channel against the ledger-recorded
    /// VM when the Broker cannot reach the host with any known identity.
    pub fn recover(&self) -> DeployResult<()> {
        let state = DeploymentState::load(&self.project_dir)?.ok_or_else(|| {
            DeployError::Validation {
                field: "state.json".into(),
                rule: "no deployment found for this project".into(),
            }
        })?;

        let vm = state.ledger.lookup(&ResourceKind::Vm).ok_or_else(|| {
            DeployError::Validation {
                field: "ledger".into(),
                rule: "no VM recorded; nothing to recover".into(),
            }
        })?;

        RecoveryChannel::new(&vm.provider_id).run_recovery()
    }

    fn new_project(&self, config: &Config) -> DeployResult<Project> {
        let salt = Project::new_salt(now_unix());
        Project::new(
            &config.project.name,
            &config.project.region,
            config.infrastructure.operating_system,
            salt,
        )
    }

    /// Runs every phase from `state.phase` to `Completed`, persisting
    /// `state.json` at every boundary.
    fn drive(&self, state: &mut DeploymentState, config: &Config) -> DeployResult<()> {
        loop {
            let result = match state.phase {
                Phase::Init => Ok(()),
                Phase::Infra => self.run_infra(state, config),
                Phase::Hardening => self.run_hardening(state, config),
                Phase::Dns => self.run_dns(state, config),
                Phase::Tls => self.run_tls(state, config),
                Phase::Application => self.run_application(state, config),
                Phase::Completed => return Ok(()),
            };

            if let Err(e) = result {
                state.last_error = Some(e.to_string());
                state.save(&self.project_dir)?;
                return Err(e);
            }

            state.phase = state.phase.next().expect("Completed handled above");
            state.last_error = None;
            state.save(&self.project_dir)?;

            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!(target: crate::logging::DEPLOYMENT, phase = ?state.phase, "interrupt honoured at phase boundary, state saved");
                return Err(DeployError::Cancelled);
            }
        }
    }

    /// Infrastructure phase: brings every cloud resource
    /// into existence via the idempotent `ensure_*` calls and records each
    /// in the ledger, keyed so a later resumed run skips what already
    /// exists.
    fn run_infra(&self, state: &mut DeploymentState, config: &Config) -> DeployResult<()> {
        CloudResourceManager::check_prerequisites()?;
        let cloud = CloudResourceManager::new(state.project.clone());

        let ssh_dir = Self::ssh_key_dir()?;
        let initial_key_path = ssh_dir.join(format!("{}-initial", state.project.name));
        ensure_local_keypair(&initial_key_path)?;
        let initial_public_key_path = format!("{}.pub", initial_key_path.display());

        let key_pair = cloud.ensure_key_pair(&initial_public_key_path)?;
        record_ensured(&mut state.ledger, ResourceKind::KeyPair, &key_pair, |d| d.provider_id.clone());

        let firewall = cloud.ensure_firewall_group(&[22, config.security.ssh.custom_port, 80, 443])?;
        record_ensured(&mut state.ledger, ResourceKind::FirewallGroup, &firewall, |d| d.provider_id.clone());

        let store = cloud.ensure_object_store(&config.project.region)?;
        record_ensured(&mut state.ledger, ResourceKind::ObjectStore, &store, |d| d.provider_id.clone());

        let role = cloud.ensure_identity_role()?;
        record_ensured(&mut state.ledger, ResourceKind::IdentityRole, &role, |d| d.provider_id.clone());

        let emergency_key_path = ssh_dir.join(format!("{}-emergency", state.project.name));
        ensure_local_keypair(&emergency_key_path)?;
        let emergency_public_key =
            std::fs::read_to_string(format!("{}.pub", emergency_key_path.display()))?;
        let user_data = emergency_key_user_data(emergency_public_key.trim());

        let key_pair_id = key_pair.into_inner().provider_id;
        let firewall_id = firewall.into_inner().provider_id;

        let vm = cloud.ensure_vm(
            &config.infrastructure.instance_class,
            config.infrastructure.operating_system.image_slug(),
            &key_pair_id,
            &firewall_id,
            &user_data,
        )?;
        let vm_descriptor = vm.into_inner();
        let vm_record = ResourceRecord::created(vm_descriptor.provider_id.clone())
            .with_attr("public_ipv4", vm_descriptor.public_ipv4.clone());
        state.ledger.record(ResourceKind::Vm, vm_record);

        let broker = SshBroker::new();
        let start_identity = crate::ssh::ConnectionIdentity::new(
            &vm_descriptor.public_ipv4,
            22,
            config.infrastructure.operating_system.default_user(),
            &initial_key_path.display().to_string(),
        );
        broker.wait_reachable(&start_identity, HOST_REACHABLE_DEADLINE)?;

        Ok(())
    }

    /// Hardening phase: runs the full `HardeningMachine`
    /// sequence, persisting the checkpoint after every step rather than
    /// only at the phase boundary, so an interruption mid-hardening
    /// resumes at the exact step it left off on.
    fn run_hardening(&self, state: &mut DeploymentState, config: &Config) -> DeployResult<()> {
        let cloud = CloudResourceManager::new(state.project.clone());
        let host = self.vm_ip(state)?;
        let ssh_dir = Self::ssh_key_dir()?;

        let plan = HardeningPlan {
            host,
            os_default_user: config.infrastructure.operating_system.default_user().to_string(),
            initial_private_key_path: ssh_dir.join(format!("{}-initial", state.project.name)).display().to_string(),
            deployment_user: config.security.ssh.deployment_user.clone(),
            custom_port: config.security.ssh.custom_port,
            auth_method: config.security.ssh.auth_method,
            firewall_id: self.firewall_id(state)?,
            deploy_key_path: ssh_dir.join(format!("{}-deploy", state.project.name)).display().to_string(),
            security: SecurityConfigFlags::from(&config.security),
        };

        let mut checkpoint = state.hardening_checkpoint;

        // Stale local state: once a second identity may
        // plausibly exist on the host, a resumed run can't assume the
        // Broker's usual connect-and-retry will land on the right one.
        // Confirm at least one of the two known identities is actually
        // live before handing off to the machine; neither being
        // reachable means the Broker path is exhausted.
        if checkpoint.user_created && crate::hardening::resolve_resumable_identity(&plan).is_none() {
            return Err(DeployError::RecoveryRequired(plan.host.clone()));
        }

        let machine = HardeningMachine::new(&cloud, &plan);
        let mut broker = SshBroker::new();

        let project_dir = self.project_dir.clone();
        let snapshot_base = StateSnapshotBase::from(&*state);
        let persist = move |checkpoint: &HardeningCheckpoint| {
            snapshot_base.clone().with_hardening(*checkpoint).save(&project_dir)
        };

        machine.run(&mut broker, &mut checkpoint, persist)?;
        state.hardening_checkpoint = checkpoint;

        Ok(())
    }

    /// DNS phase: upserts an A record per domain when a
    /// provider is configured, then waits for global resolution so the
    /// Certificate Pipeline's HTTP-01 challenge is guaranteed to reach
    /// this host.
    fn run_dns(&self, state: &mut DeploymentState, config: &Config) -> DeployResult<()> {
        if config.domains.is_empty() {
            return Ok(());
        }

        let vm_ip = self.vm_ip(state)?;

        if let Some(provider_cfg) = &config.tls.dns_provider {
            for domain in &config.domains {
                if state.ledger.lookup(&ResourceKind::DnsRecord(domain.name.clone())).is_some() {
                    continue;
                }
                let record_id = match provider_cfg.name.as_str() {
                    "cloudflare" => Cloudflare::new(&domain.name).upsert_a_record(&vm_ip)?,
                    "ovh" => Ovh::new(&domain.name).upsert_a_record(&vm_ip)?,
                    other => {
                        return Err(DeployError::Validation {
                            field: "tls.dns_provider.name".into(),
                            rule: format!("unsupported dns provider '{other}'"),
                        })
                    }
                };
                state
                    .ledger
                    .record(ResourceKind::DnsRecord(domain.name.clone()), ResourceRecord::created(record_id));
            }
        }

        for domain in &config.domains {
            if domain.wildcard {
                continue;
            }
            let resolved = dns::wait_for_global_resolution(&domain.name, &vm_ip, DNS_PROPAGATION_DEADLINE)?;
            if !resolved {
                return Err(DeployError::Propagation {
                    what: format!("DNS for {}", domain.name),
                    deadline_secs: DNS_PROPAGATION_DEADLINE.as_secs(),
                });
            }
        }

        Ok(())
    }

    /// TLS phase: drives the Certificate Pipeline over the
    /// terminal SSH identity, persisting `tls_state` after every issued
    /// certificate.
    fn run_tls(&self, state: &mut DeploymentState, config: &Config) -> DeployResult<()> {
        if config.domains.is_empty() {
            return Ok(());
        }

        let email = config.tls.email.as_deref().ok_or_else(|| DeployError::Validation {
            field: "tls.email".into(),
            rule: "required when domains is non-empty".into(),
        })?;

        let session = self.connect_terminal(state, config)?;
        let pipeline = CertificatePipeline::new(email, config.tls.dns_provider.as_ref());

        let project_dir = self.project_dir.clone();
        let snapshot_base = StateSnapshotBase::from(&*state);
        let persist = move |tls_state: &crate::state::TlsState| {
            snapshot_base.clone().with_tls(tls_state.clone()).save(&project_dir)
        };

        pipeline.run(&session, &config.domains, &mut state.tls_state, persist)
    }

    /// Application phase, the final one: installs the container
    /// runtime, materializes the configured application source, and
    /// brings the compose project up behind Caddy.
    fn run_application(&self, state: &mut DeploymentState, config: &Config) -> DeployResult<()> {
        let session = self.connect_terminal(state, config)?;

        let domains: Vec<String> = config.domains.iter().map(|d| d.name.clone()).collect();
        let mut caddy = Caddy::new().security_headers().gzip();
        if !matches!(config.application, ApplicationConfig::Placeholder) {
            caddy = caddy.reverse_proxy(&format!("{}:8080", state.project.name));
        }
        if !domains.is_empty() {
            caddy = caddy.hsts();
        }

        let deployment = crate::application::ApplicationDeployment::new(&state.project.name);
        deployment.deploy(&session, &config.application, &domains, &state.tls_state.certificates, &caddy)
    }

    fn connect_terminal(&self, state: &DeploymentState, config: &Config) -> DeployResult<crate::ssh::SshSession> {
        let ssh_dir = Self::ssh_key_dir()?;
        let identity = crate::ssh::ConnectionIdentity::new(
            &self.vm_ip(state)?,
            config.security.ssh.custom_port,
            &config.security.ssh.deployment_user,
            &ssh_dir.join(format!("{}-deploy", state.project.name)).display().to_string(),
        );
        SshBroker::new().connect(identity)
    }

    fn vm_ip(&self, state: &DeploymentState) -> DeployResult<String> {
        state
            .ledger
            .lookup(&ResourceKind::Vm)
            .and_then(|r| r.attributes.get("public_ipv4"))
            .cloned()
            .ok_or_else(|| DeployError::Validation {
                field: "ledger".into(),
                rule: "no VM with a recorded public_ipv4; run the infrastructure phase first".into(),
            })
    }

    fn firewall_id(&self, state: &DeploymentState) -> DeployResult<String> {
        state
            .ledger
            .lookup(&ResourceKind::FirewallGroup)
            .map(|r| r.provider_id.clone())
            .ok_or_else(|| DeployError::Validation {
                field: "ledger".into(),
                rule: "no firewall group recorded; run the infrastructure phase first".into(),
            })
    }

    fn ssh_key_dir() -> DeployResult<PathBuf> {
        let home = std::env::var("HOME").map_err(|_| DeployError::EnvMissing("HOME".into()))?;
        Ok(PathBuf::from(home).join(".ssh"))
    }
}

/// Everything in `DeploymentState` except the one field a given
/// persist closure is actually updating, captured by value so the
/// closure doesn't need a live `&mut DeploymentState` — which would
/// conflict with the `&mut HardeningCheckpoint` / `&mut TlsState`
/// already borrowed out of it for the duration of `run`.
#[derive(Clone)]
struct StateSnapshotBase {
    project: Project,
    ledger: Ledger,
    phase: Phase,
    hardening_checkpoint: HardeningCheckpoint,
    tls_state: crate::state::TlsState,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&DeploymentState> for StateSnapshotBase {
    fn from(state: &DeploymentState) -> Self {
        Self {
            project: state.project.clone(),
            ledger: state.ledger.clone(),
            phase: state.phase,
            hardening_checkpoint: state.hardening_checkpoint,
            tls_state: state.tls_state.clone(),
            created_at: state.created_at,
        }
    }
}

impl StateSnapshotBase {
    fn with_hardening(mut self, checkpoint: HardeningCheckpoint) -> DeploymentState {
        self.hardening_checkpoint = checkpoint;
        self.into_state()
    }

    fn with_tls(mut self, tls_state: crate::state::TlsState) -> DeploymentState {
        self.tls_state = tls_state;
        self.into_state()
    }

    fn into_state(self) -> DeploymentState {
        DeploymentState {
            schema_version: SCHEMA_VERSION,
            project: self.project,
            phase: self.phase,
            ledger: self.ledger,
            hardening_checkpoint: self.hardening_checkpoint,
            tls_state: self.tls_state,
            created_at: self.created_at,
            updated_at: self.created_at,
            last_error: None,
        }
    }
}

/// Records an `Ensured<T>` outcome in the ledger. `Existing` and
/// `Created` both mean the resource is ours (a name match only ever
/// happens for our own salted name); only `Adopted` — a pre-existing
/// resource matched by fingerprint under a different name — is marked
/// `we_created_it = false` so destroy leaves it alone.
fn record_ensured<T>(ledger: &mut Ledger, kind: ResourceKind, ensured: &Ensured<T>, provider_id: impl Fn(&T) -> String) {
    let id = provider_id(match ensured {
        Ensured::Existing(v) | Ensured::Created(v) | Ensured::Adopted(v) => v,
    });
    let record = if matches!(ensured, Ensured::Adopted(_)) {
        ResourceRecord::adopted(id)
    } else {
        ResourceRecord::created(id)
    };
    ledger.record(kind, record);
}

fn ensure_local_keypair(path: &Path) -> DeployResult<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    cmd::run(
        "ssh-keygen",
        &[
            "-t",
            "ed25519",
            "-N",
            "",
            "-f",
            &path.display().to_string(),
            "-C",
            "outpost",
        ],
    )?;
    Ok(())
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
