use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::project::OperatingSystem;

/// Ports the preflight refuses as a custom SSH port even though they're
/// outside the reserved `<1024` range — these are the ports the Security
/// Hardening State Machine's own firewall rules and the Application
/// phase's reverse proxy already claim.
const WELL_KNOWN_REJECTED_PORTS: &[u16] = &[22, 80, 443, 3306, 5432, 6379, 8080];

/// The typed configuration document. Deserialized with
/// `serde_yaml`; every recognized key has an explicit field here instead
/// of a dynamic fallback-chain style lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub domains: Vec<DomainEntry>,
    #[serde(default)]
    pub tls: TlsConfig,
    pub application: ApplicationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InfrastructureConfig {
    #[serde(default = "default_os")]
    pub operating_system: OperatingSystem,
    #[serde(default = "default_instance_class")]
    pub instance_class: String,
    #[serde(default = "default_root_volume_gb")]
    pub root_volume_gb: u32,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            operating_system: default_os(),
            instance_class: default_instance_class(),
            root_volume_gb: default_root_volume_gb(),
        }
    }
}

const fn default_os() -> OperatingSystem {
    OperatingSystem::Ubuntu22
}

fn default_instance_class() -> String {
    "s-1vcpu-1gb".to_string()
}

const fn default_root_volume_gb() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub ssh: SshConfig,
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub ips: IpsConfig,
    #[serde(default)]
    pub auto_updates: AutoUpdatesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub deployment_user: String,
    pub custom_port: u16,
    #[serde(default = "default_auth_method")]
    pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    KeysOnly,
    KeysAndPassword,
}

const fn default_auth_method() -> AuthMethod {
    AuthMethod::KeysOnly
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IpsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for IpsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoUpdatesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AutoUpdatesConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

const fn default_true() -> bool {
    true
}

/// One entry of the Domain Plan. `challenge = auto` is
/// resolved by the Certificate Pipeline classifier at validate-time:
/// wildcard entries always resolve to `Dns`, everything else to `Http`
/// unless the user pinned `dns` explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEntry {
    pub name: String,
    #[serde(default)]
    pub challenge: ChallengeChoice,
    #[serde(default)]
    pub wildcard: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeChoice {
    Http,
    Dns,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Challenge {
    Http,
    Dns,
}

impl DomainEntry {
    /// Resolves `challenge: auto`: wildcard
    /// or an explicit `dns` pin uses DNS-01, everything else HTTP-01.
    #[must_use]
    pub const fn resolved_challenge(&self) -> Challenge {
        match self.challenge {
            ChallengeChoice::Dns => Challenge::Dns,
            ChallengeChoice::Http => Challenge::Http,
            ChallengeChoice::Auto => {
                if self.wildcard {
                    Challenge::Dns
                } else {
                    Challenge::Http
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    pub email: Option<String>,
    #[serde(default)]
    pub dns_provider: Option<DnsProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsProviderConfig {
    pub name: String,
    pub credentials: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ApplicationConfig {
    Git {
        repo: String,
        #[serde(default = "default_branch")]
        branch: String,
        #[serde(default)]
        dockerfile: Option<String>,
    },
    ContainerImage {
        image: String,
    },
    Placeholder,
}

fn default_branch() -> String {
    "main".to_string()
}

fn slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]{1,61}[a-z0-9]$").expect("valid regex"))
}

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\*\.)?([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,}$")
            .expect("valid regex")
    })
}

/// Object-store bucket names (used by `cloud::ensure_object_store`) follow
/// the common cloud-vendor bucket naming rules: lowercase, digits,
/// hyphens and dots, 3-63 chars, must start/end alphanumeric.
fn bucket_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("valid regex")
    })
}

impl Config {
    /// Parses a YAML configuration document. Parse errors are never
    /// cloud-touching — they map to `DeployError::Yaml`.
    pub fn from_yaml(content: &str) -> DeployResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Runs the full synchronous preflight before a deployment starts. Returns
    /// every violation found rather than stopping at the first, so a
    /// misconfigured project can be fixed in one pass. Never touches the
    /// cloud, the DNS provider, or the host.
    pub fn validate(&self) -> Result<(), Vec<DeployError>> {
        let mut errors = Vec::new();

        if !slug_regex().is_match(&self.project.name) {
            errors.push(DeployError::Validation {
                field: "project.name".into(),
                rule: "must be a DNS-safe slug: lowercase letters, digits, \
                       hyphens, 3-63 chars, starting with a letter"
                    .into(),
            });
        }

        if self.project.region.trim().is_empty() {
            errors.push(DeployError::Validation {
                field: "project.region".into(),
                rule: "must not be empty".into(),
            });
        }

        let port = self.security.ssh.custom_port;
        if !(1024..=65535).contains(&port) {
            errors.push(DeployError::Validation {
                field: "security.ssh.custom_port".into(),
                rule: "must be in 1024-65535".into(),
            });
        } else if WELL_KNOWN_REJECTED_PORTS.contains(&port) {
            errors.push(DeployError::Validation {
                field: "security.ssh.custom_port".into(),
                rule: format!("must not be 22 or a well-known service port ({port})"),
            });
        }

        let user = self.security.ssh.deployment_user.trim();
        if user.is_empty() || user == "root" || user == self.project_os_default_user() {
            errors.push(DeployError::Validation {
                field: "security.ssh.deployment_user".into(),
                rule: "must not be root or the OS default user".into(),
            });
        }

        let object_store_name = format!("{}-store", self.project.name);
        if !bucket_name_regex().is_match(&object_store_name) {
            errors.push(DeployError::Validation {
                field: "project.name".into(),
                rule: format!(
                    "derived object-store name '{object_store_name}' violates the \
                     cloud vendor's bucket naming rules"
                ),
            });
        }

        for (i, domain) in self.domains.iter().enumerate() {
            if !domain_regex().is_match(&domain.name) {
                errors.push(DeployError::Validation {
                    field: format!("domains[{i}].name"),
                    rule: format!("'{}' is not a syntactically valid domain", domain.name),
                });
            }
            if domain.wildcard && domain.resolved_challenge() != Challenge::Dns {
                errors.push(DeployError::Validation {
                    field: format!("domains[{i}].challenge"),
                    rule: "wildcard domains must use the dns challenge".into(),
                });
            }
            if domain.resolved_challenge() == Challenge::Dns && self.tls.dns_provider.is_none() {
                errors.push(DeployError::Validation {
                    field: "tls.dns_provider".into(),
                    rule: format!(
                        "domain '{}' requires dns-01 but no dns_provider is configured",
                        domain.name
                    ),
                });
            }
        }

        if !self.domains.is_empty() && self.tls.email.is_none() {
            errors.push(DeployError::Validation {
                field: "tls.email".into(),
                rule: "required when domains is non-empty".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn project_os_default_user(&self) -> &'static str {
        self.infrastructure.operating_system.default_user()
    }
}
