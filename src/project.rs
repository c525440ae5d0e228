use regex::Regex;
use std::sync::OnceLock;

use crate::error::{DeployError, DeployResult};
use crate::ledger::ResourceKind;

/// Operating system image family a VM can be provisioned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingSystem {
    Ubuntu22,
    Debian12,
}

impl OperatingSystem {
    /// `doctl compute image list-distribution` slug this OS maps to.
    #[must_use]
    pub const fn image_slug(self) -> &'static str {
        match self {
            Self::Ubuntu22 => "ubuntu-22-04-x64",
            Self::Debian12 => "debian-12-x64",
        }
    }

    /// Cloud-vendor default login user for a freshly booted image.
    #[must_use]
    pub const fn default_user(self) -> &'static str {
        match self {
            Self::Ubuntu22 => "root",
            Self::Debian12 => "root",
        }
    }
}

fn slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]{1,61}[a-z0-9]$").expect("valid regex"))
}

/// One deployment target: one project = one host.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Project {
    pub name: String,
    pub region: String,
    pub operating_system: OperatingSystem,
    /// 8-digit truncated timestamp salted into globally-unique resource
    /// names (object store, key pair, firewall group). Fixed at project
    /// creation so the same project always derives the same names.
    pub name_salt: String,
}

impl Project {
    /// Validates the slug and builds a `Project`. `name_salt` should come
    /// from a previously-persisted `DeploymentState` on resume, or be
    /// freshly derived (see `new_salt`) on first apply.
    pub fn new(
        name: &str,
        region: &str,
        operating_system: OperatingSystem,
        name_salt: String,
    ) -> DeployResult<Self> {
        if !slug_regex().is_match(name) {
            return Err(DeployError::Validation {
                field: "project.name".into(),
                rule: "must be a DNS-safe slug: lowercase letters, digits, \
                       hyphens, 3-63 chars, starting with a letter"
                    .into(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            region: region.to_string(),
            operating_system,
            name_salt,
        })
    }

    /// Truncated 8-digit timestamp used to salt globally-unique resource
    /// names, avoiding collisions in namespaces like object storage.
    #[must_use]
    pub fn new_salt(unix_timestamp: u64) -> String {
        format!("{:08}", unix_timestamp % 100_000_000)
    }

    /// Derives a cloud-facing resource name for `kind`, salted with
    /// `name_salt` so re-running `apply` against the same project never
    /// collides with another project's resources in a globally-unique
    /// namespace.
    #[must_use]
    pub fn resource_name(&self, kind: &ResourceKind) -> String {
        match kind {
            ResourceKind::KeyPair => format!("{}-key-{}", self.name, self.name_salt),
            ResourceKind::FirewallGroup => format!("{}-fw-{}", self.name, self.name_salt),
            ResourceKind::ObjectStore => format!("{}-store-{}", self.name, self.name_salt),
            ResourceKind::IdentityRole => format!("{}-role-{}", self.name, self.name_salt),
            ResourceKind::IdentityRoleProfile => {
                format!("{}-role-profile-{}", self.name, self.name_salt)
            }
            ResourceKind::Vm => self.name.clone(),
            ResourceKind::DnsRecord(domain) => domain.clone(),
        }
    }

    /// The fixed tag applied to every cloud resource this project creates,
    /// used by the Cloud Resource Manager to recognize its own resources.
    #[must_use]
    pub fn managed_by_tag(&self) -> String {
        format!("managed-by:outpost,project:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_safe_slug() {
        assert!(Project::new("demo", "nyc1", OperatingSystem::Ubuntu22, "00000001".into()).is_ok());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(Project::new("Demo", "nyc1", OperatingSystem::Ubuntu22, "00000001".into()).is_err());
    }

    #[test]
    fn rejects_leading_digit() {
        assert!(Project::new("1demo", "nyc1", OperatingSystem::Ubuntu22, "00000001".into()).is_err());
    }

    #[test]
    fn rejects_too_short() {
        assert!(Project::new("ab", "nyc1", OperatingSystem::Ubuntu22, "00000001".into()).is_err());
    }

    #[test]
    fn salt_is_eight_digits() {
        let salt = Project::new_salt(1_730_000_123);
        assert_eq!(salt.len(), 8);
    }

    #[test]
    fn resource_names_are_salted() {
        let p = Project::new("demo", "nyc1", OperatingSystem::Ubuntu22, "12345678".into()).unwrap();
        assert_eq!(p.resource_name(&ResourceKind::KeyPair), "demo-key-12345678");
        assert_eq!(p.resource_name(&ResourceKind::Vm), "demo");
    }

    #[test]
    fn image_slugs() {
        assert_eq!(OperatingSystem::Ubuntu22.image_slug(), "ubuntu-22-04-x64");
        assert_eq!(OperatingSystem::Debian12.image_slug(), "debian-12-x64");
    }
}
