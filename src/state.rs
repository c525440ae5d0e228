use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::ledger::Ledger;
use crate::project::Project;

/// Current `DeploymentState` on-disk format. Bumped whenever a field is
/// added or reinterpreted; reading an unrecognized version is a
/// `ValidationError`, not a panic, so an old state file never gets
/// silently misread after an upgrade.
pub const SCHEMA_VERSION: u32 = 1;

/// Phases run in strict sequence: Credentials validation (§4.8's preflight,
/// folded into `init`) → Infrastructure → Hardening → DNS → TLS →
/// Application → Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Infra,
    Hardening,
    Dns,
    Tls,
    Application,
    Completed,
}

impl Phase {
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Infra),
            Self::Infra => Some(Self::Hardening),
            Self::Hardening => Some(Self::Dns),
            Self::Dns => Some(Self::Tls),
            Self::Tls => Some(Self::Application),
            Self::Application => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

/// Monotone checkpoint flags for the Security Hardening State Machine.
/// Each flag corresponds to an externally observable
/// effect on the host; once set it is never cleared. Field
/// order mirrors the transition order in the state diagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardeningCheckpoint {
    pub key_generated: bool,
    pub user_created: bool,
    pub new_identity_verified_22: bool,
    pub firewall_new_port_open: bool,
    pub daemon_reconfigured: bool,
    pub new_identity_verified_custom: bool,
    pub firewall_old_port_closed: bool,
    pub host_firewall_enabled: bool,
    pub ips_enabled: bool,
    pub auto_updates_enabled: bool,
}

impl HardeningCheckpoint {
    #[must_use]
    pub const fn hardened(self) -> bool {
        self.key_generated
            && self.user_created
            && self.new_identity_verified_22
            && self.firewall_new_port_open
            && self.daemon_reconfigured
            && self.new_identity_verified_custom
            && self.firewall_old_port_closed
            && self.host_firewall_enabled
            && self.ips_enabled
            && self.auto_updates_enabled
    }

    /// Merges `other` in, keeping any flag already set (monotone: a flag
    /// already `true` is never flipped back to `false`).
    pub fn merge(&mut self, other: Self) {
        self.key_generated |= other.key_generated;
        self.user_created |= other.user_created;
        self.new_identity_verified_22 |= other.new_identity_verified_22;
        self.firewall_new_port_open |= other.firewall_new_port_open;
        self.daemon_reconfigured |= other.daemon_reconfigured;
        self.new_identity_verified_custom |= other.new_identity_verified_custom;
        self.firewall_old_port_closed |= other.firewall_old_port_closed;
        self.host_firewall_enabled |= other.host_firewall_enabled;
        self.ips_enabled |= other.ips_enabled;
        self.auto_updates_enabled |= other.auto_updates_enabled;
    }
}

/// One certificate issued by the Certificate Pipeline: the SANs it
/// covers and where its files live on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub cert_path: String,
    pub key_path: String,
    pub sans: Vec<String>,
}

/// Result of the Certificate Pipeline, persisted so a resumed run skips
/// straight to the renewal-timer step once a certificate is already on
/// record. The pipeline issues exactly one multi-SAN certificate per
/// Domain Plan, so this holds at most one entry once TLS has completed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsState {
    pub certificates: Vec<IssuedCertificate>,
    pub renewal_timer_installed: bool,
}

impl TlsState {
    /// True once a single issued certificate's SAN set equals exactly
    /// `all_domains` (order-independent) — the single-multi-SAN-cert
    /// contract the Certificate Pipeline is required to uphold.
    #[must_use]
    pub fn covers_all(&self, all_domains: &[String]) -> bool {
        self.certificates.iter().any(|c| {
            c.sans.len() == all_domains.len() && all_domains.iter().all(|d| c.sans.contains(d))
        })
    }
}

/// Top-level object written after every phase boundary and after every
/// hardening step transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    pub schema_version: u32,
    pub project: Project,
    pub phase: Phase,
    pub ledger: Ledger,
    pub hardening_checkpoint: HardeningCheckpoint,
    pub tls_state: TlsState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_error: Option<String>,
}

impl DeploymentState {
    #[must_use]
    pub fn new(project: Project) -> Self {
        let now = chrono::Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            project,
            phase: Phase::Init,
            ledger: Ledger::new(),
            hardening_checkpoint: HardeningCheckpoint::default(),
            tls_state: TlsState::default(),
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Loads `state.json` from `project_dir`. Absence is not an error —
    /// callers distinguish "no prior state" (fresh apply) from a read
    /// failure via `Option`.
    pub fn load(project_dir: &Path) -> DeployResult<Option<Self>> {
        let path = project_dir.join("state.json");
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let state: Self = serde_json::from_str(&content)?;

        if state.schema_version != SCHEMA_VERSION {
            return Err(DeployError::Validation {
                field: "state.schema_version".into(),
                rule: format!(
                    "unsupported state schema {} (expected {SCHEMA_VERSION}); \
                     this state file was written by an incompatible version",
                    state.schema_version
                ),
            });
        }

        Ok(Some(state))
    }

    /// Writes `state.json` via write-to-temp-then-rename so the document
    /// is always fsync-consistent.
    pub fn save(&mut self, project_dir: &Path) -> DeployResult<()> {
        self.updated_at = chrono::Utc::now();

        std::fs::create_dir_all(project_dir)?;
        let serialized = serde_json::to_string_pretty(self)?;

        let mut tmp = tempfile::NamedTempFile::new_in(project_dir)?;
        tmp.write_all(serialized.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(project_dir.join("state.json"))
            .map_err(|e| DeployError::Other(format!("failed to persist state.json: {e}")))?;

        Ok(())
    }

    /// The phase the orchestrator must resume at: the first one that
    /// hasn't completed.
    #[must_use]
    pub fn resume_phase(&self) -> Phase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::OperatingSystem;

    fn project() -> Project {
        Project::new("demo", "nyc1", OperatingSystem::Ubuntu22, "00000001".into()).unwrap()
    }

    #[test]
    fn phase_sequence() {
        assert_eq!(Phase::Init.next(), Some(Phase::Infra));
        assert_eq!(Phase::Application.next(), Some(Phase::Completed));
        assert_eq!(Phase::Completed.next(), None);
    }

    #[test]
    fn hardened_requires_all_flags() {
        let mut cp = HardeningCheckpoint::default();
        assert!(!cp.hardened());
        cp.key_generated = true;
        cp.user_created = true;
        cp.new_identity_verified_22 = true;
        cp.firewall_new_port_open = true;
        cp.daemon_reconfigured = true;
        cp.new_identity_verified_custom = true;
        cp.firewall_old_port_closed = true;
        cp.host_firewall_enabled = true;
        cp.ips_enabled = true;
        cp.auto_updates_enabled = true;
        assert!(cp.hardened());
    }

    #[test]
    fn merge_is_monotone() {
        let mut cp = HardeningCheckpoint {
            key_generated: true,
            ..Default::default()
        };
        cp.merge(HardeningCheckpoint::default());
        assert!(cp.key_generated, "merging in an unset flag must not clear an already-set one");
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = DeploymentState::new(project());
        state.phase = Phase::Hardening;
        state.save(dir.path()).unwrap();

        let loaded = DeploymentState::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.phase, Phase::Hardening);
        assert_eq!(loaded.project.name, "demo");
    }

    #[test]
    fn load_missing_state_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DeploymentState::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn tls_state_covers_all_requires_one_cert_matching_the_whole_plan() {
        let mut tls = TlsState::default();
        let domains = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        assert!(!tls.covers_all(&domains));

        tls.certificates.push(IssuedCertificate {
            cert_path: "/etc/certs/a.pem".into(),
            key_path: "/etc/certs/a.key".into(),
            sans: vec!["a.example.com".into()],
        });
        assert!(!tls.covers_all(&domains), "a single-SAN cert must not satisfy a two-domain plan");

        tls.certificates[0].sans.push("b.example.com".into());
        assert!(tls.covers_all(&domains));
    }

    #[test]
    fn tls_state_covers_all_is_order_independent() {
        let mut tls = TlsState::default();
        tls.certificates.push(IssuedCertificate {
            cert_path: "/etc/certs/combined.pem".into(),
            key_path: "/etc/certs/combined.key".into(),
            sans: vec!["b.example.com".into(), "a.example.com".into()],
        });
        let domains = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        assert!(tls.covers_all(&domains));
    }

    #[test]
    fn load_rejects_wrong_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = DeploymentState::new(project());
        state.schema_version = SCHEMA_VERSION + 1;
        let serialized = serde_json::to_string(&state).unwrap();
        std::fs::write(dir.path().join("state.json"), serialized).unwrap();

        let err = DeploymentState::load(dir.path()).unwrap_err();
        assert!(matches!(err, DeployError::Validation { .. }));
    }
}
