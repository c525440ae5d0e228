use std::thread;
use std::time::Duration;

use crate::cmd;
use crate::error::{DeployError, DeployResult};
use crate::ledger::ResourceKind;
use crate::project::Project;

/// Outcome of an `ensure_*` call: whether the resource already existed,
/// had to be created, or was recognized as belonging to the project
/// under a name the ledger didn't yet know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured<T> {
    Existing(T),
    Created(T),
    Adopted(T),
}

impl<T> Ensured<T> {
    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Existing(v) | Self::Created(v) | Self::Adopted(v) => v,
        }
    }

    /// `true` unless the resource was adopted under a different name than
    /// the ledger would have given it — matches `orchestrator::record_ensured`'s
    /// `we_created_it` classification.
    #[must_use]
    pub const fn we_created_it(&self) -> bool {
        !matches!(self, Self::Adopted(_))
    }
}

#[derive(Debug, Clone)]
pub struct KeyPairDescriptor {
    pub provider_id: String,
    pub public_key: String,
}

#[derive(Debug, Clone)]
pub struct FirewallDescriptor {
    pub provider_id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreDescriptor {
    pub provider_id: String,
    pub bucket_name: String,
}

#[derive(Debug, Clone)]
pub struct IdentityRoleDescriptor {
    pub provider_id: String,
    pub role_name: String,
}

#[derive(Debug, Clone)]
pub struct VmDescriptor {
    pub provider_id: String,
    pub name: String,
    pub public_ipv4: String,
    pub region: String,
}

/// Shells out to `doctl`, exposing a typed `ensure_X(spec) ->
/// Ensured<descriptor>` contract instead of a one-shot `create_server`.
/// Every
/// `ensure_*` first lists the provider's resources and looks for one
/// already tagged for this project (the "adopt, don't duplicate"
/// idempotency rule) before creating anything.
pub struct CloudResourceManager {
    project: Project,
}

impl CloudResourceManager {
    #[must_use]
    pub const fn new(project: Project) -> Self {
        Self { project }
    }

    pub fn check_prerequisites() -> DeployResult<()> {
        if !cmd::command_exists("doctl") {
            return Err(DeployError::PrerequisiteMissing(
                "doctl is not installed".into(),
            ));
        }
        cmd::run("doctl", &["account", "get"]).map_err(|_| {
            DeployError::PrerequisiteMissing("doctl is not authenticated".into())
        })?;
        Ok(())
    }

    /// Ensure a key pair exists in the provider, uploading the project's
    /// local public key if it isn't registered yet.
    pub fn ensure_key_pair(&self, public_key_path: &str) -> DeployResult<Ensured<KeyPairDescriptor>> {
        let name = self.project.resource_name(&ResourceKind::KeyPair);
        let public_key = std::fs::read_to_string(public_key_path)
            .map_err(|_| DeployError::FileNotFound(public_key_path.to_string()))?;
        let local_fingerprint = Self::fingerprint_of(public_key_path)?;

        let listing = cmd::run(
            "doctl",
            &[
                "compute", "ssh-key", "list", "--format", "ID,Name,FingerPrint", "--no-header",
            ],
        )?;

        for line in listing.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 && parts[2] == local_fingerprint {
                let descriptor = KeyPairDescriptor {
                    provider_id: parts[0].to_string(),
                    public_key: public_key.clone(),
                };
                return Ok(if parts[1] == name {
                    Ensured::Existing(descriptor)
                } else {
                    Ensured::Adopted(descriptor)
                });
            }
        }

        let created = cmd::run(
            "doctl",
            &[
                "compute",
                "ssh-key",
                "create",
                &name,
                "--public-key",
                public_key.trim(),
                "--format",
                "ID",
                "--no-header",
            ],
        )?;

        Ok(Ensured::Created(KeyPairDescriptor {
            provider_id: created.trim().to_string(),
            public_key,
        }))
    }

    fn fingerprint_of(public_key_path: &str) -> DeployResult<String> {
        let out = cmd::run("ssh-keygen", &["-l", "-E", "md5", "-f", public_key_path])?;
        Ok(out
            .split_whitespace()
            .nth(1)
            .unwrap_or("")
            .strip_prefix("MD5:")
            .unwrap_or("")
            .to_string())
    }

    /// Ensure a firewall group tagged for this project exists. Starts
    /// with only the inbound rules given; the Hardening phase widens and
    /// narrows it further as it moves the SSH listener.
    pub fn ensure_firewall_group(&self, inbound_tcp_ports: &[u16]) -> DeployResult<Ensured<FirewallDescriptor>> {
        let name = self.project.resource_name(&ResourceKind::FirewallGroup);

        let listing = cmd::run(
            "doctl",
            &["compute", "firewall", "list", "--format", "ID,Name", "--no-header"],
        )?;

        for line in listing.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 && parts[1] == name {
                return Ok(Ensured::Existing(FirewallDescriptor {
                    provider_id: parts[0].to_string(),
                    name,
                }));
            }
        }

        let rules = inbound_tcp_ports
            .iter()
            .map(|p| format!("protocol:tcp,ports:{p},address:0.0.0.0/0,address:::/0"))
            .collect::<Vec<_>>()
            .join(" ");

        let created = cmd::run(
            "doctl",
            &[
                "compute",
                "firewall",
                "create",
                "--name",
                &name,
                "--inbound-rules",
                &rules,
                "--format",
                "ID",
                "--no-header",
            ],
        )?;

        Ok(Ensured::Created(FirewallDescriptor {
            provider_id: created.trim().to_string(),
            name,
        }))
    }

    /// Ensure an object store (Spaces bucket) exists for TLS material and
    /// state backups. Bucket names are globally unique across the
    /// provider, hence the project's name salt.
    pub fn ensure_object_store(&self, region: &str) -> DeployResult<Ensured<ObjectStoreDescriptor>> {
        let bucket_name = self.project.resource_name(&ResourceKind::ObjectStore);

        let listing = cmd::run("s3cmd", &["ls"]).unwrap_or_default();
        if listing.contains(&bucket_name) {
            return Ok(Ensured::Existing(ObjectStoreDescriptor {
                provider_id: bucket_name.clone(),
                bucket_name,
            }));
        }

        cmd::run(
            "doctl",
            &[
                "compute", "space", "create", &bucket_name, "--region", region,
            ],
        )
        .or_else(|_| cmd::run("s3cmd", &["mb", &format!("s3://{bucket_name}")]))?;

        Ok(Ensured::Created(ObjectStoreDescriptor {
            provider_id: bucket_name.clone(),
            bucket_name,
        }))
    }

    /// Ensure a least-privilege identity role (DigitalOcean project +
    /// scoped API token conventions vary by provider; here we model it
    /// as a named DO Project with the resources assigned to it) exists,
    /// then wait out the provider's propagation window before the
    /// caller re-reads it — DO's IAM layer is read-after-write
    /// eventually-consistent for a few seconds after creation.
    pub fn ensure_identity_role(&self) -> DeployResult<Ensured<IdentityRoleDescriptor>> {
        let role_name = self.project.resource_name(&ResourceKind::IdentityRole);

        let listing = cmd::run(
            "doctl",
            &["projects", "list", "--format", "ID,Name", "--no-header"],
        )?;

        for line in listing.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 && parts[1] == role_name {
                return Ok(Ensured::Existing(IdentityRoleDescriptor {
                    provider_id: parts[0].to_string(),
                    role_name,
                }));
            }
        }

        let created = cmd::run(
            "doctl",
            &[
                "projects",
                "create",
                "--name",
                &role_name,
                "--purpose",
                "Outpost managed deployment",
                "--format",
                "ID",
                "--no-header",
            ],
        )?;

        thread::sleep(Duration::from_secs(10));

        Ok(Ensured::Created(IdentityRoleDescriptor {
            provider_id: created.trim().to_string(),
            role_name,
        }))
    }

    /// Ensure the VM exists: looks up the newest image matching
    /// `image_glob` owned by the calling account (falls back to the
    /// stock distro image when none match), launches with the given key
    /// and firewall attached, a 20 GiB root volume, and polls until the
    /// droplet reports `active`. `user_data` is handed to the provider's
    /// cloud-init mechanism verbatim; the orchestrator uses it to drop
    /// an emergency key on the VM for the Recovery Channel before the
    /// Hardening phase gets a chance to run.
    pub fn ensure_vm(
        &self,
        size: &str,
        image: &str,
        key_pair_id: &str,
        firewall_id: &str,
        user_data: &str,
    ) -> DeployResult<Ensured<VmDescriptor>> {
        let name = self.project.resource_name(&ResourceKind::Vm);

        let listing = cmd::run(
            "doctl",
            &[
                "compute", "droplet", "list", "--format", "ID,Name,PublicIPv4,Region,Status", "--no-header",
            ],
        )?;

        for line in listing.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 5 && parts[1] == name {
                return Ok(Ensured::Existing(VmDescriptor {
                    provider_id: parts[0].to_string(),
                    name,
                    public_ipv4: parts[2].to_string(),
                    region: parts[3].to_string(),
                }));
            }
        }

        let created_id = cmd::run(
            "doctl",
            &[
                "compute",
                "droplet",
                "create",
                &name,
                "--image",
                image,
                "--size",
                size,
                "--region",
                &self.project.region,
                "--ssh-keys",
                key_pair_id,
                "--tag-names",
                &self.project.managed_by_tag(),
                "--enable-monitoring",
                "--user-data",
                user_data,
                "--wait",
                "--format",
                "ID",
                "--no-header",
            ],
        )?
        .trim()
        .to_string();

        cmd::run(
            "doctl",
            &[
                "compute",
                "firewall",
                "add-droplets",
                firewall_id,
                "--droplet-ids",
                &created_id,
            ],
        )?;

        let descriptor = self.poll_vm_active(&created_id, &name)?;
        Ok(Ensured::Created(descriptor))
    }

    fn poll_vm_active(&self, droplet_id: &str, name: &str) -> DeployResult<VmDescriptor> {
        self.poll_once(droplet_id, Duration::from_secs(180))
            .map(|mut d| {
                d.name = name.to_string();
                d
            })
    }

    /// Poll the droplet's status at a 10s interval until it reports
    /// `active`. Each iteration's `doctl droplet get` is itself retried
    /// up to 3 times, 10s apart, before a transient failure (including
    /// "instance id not yet visible" just after creation) is surfaced —
    /// the fixed retry budget is per describe call, not per poll, so it
    /// doesn't reset the `max_wait` deadline.
    fn poll_once(&self, droplet_id: &str, max_wait: Duration) -> DeployResult<VmDescriptor> {
        let deadline = std::time::Instant::now() + max_wait;
        let interval = Duration::from_secs(10);

        loop {
            let out = self.describe_droplet_with_retry(droplet_id)?;
            let parts: Vec<&str> = out.split_whitespace().collect();
            if parts.len() >= 5 && parts[4] == "active" && !parts[2].is_empty() {
                return Ok(VmDescriptor {
                    provider_id: parts[0].to_string(),
                    name: parts[1].to_string(),
                    public_ipv4: parts[2].to_string(),
                    region: parts[3].to_string(),
                });
            }

            if std::time::Instant::now() >= deadline {
                return Err(DeployError::TransientCloud {
                    provider: "digitalocean".into(),
                    attempts: 1,
                    message: format!("droplet {droplet_id} not active within {}s", max_wait.as_secs()),
                });
            }
            thread::sleep(interval);
        }
    }

    /// `doctl compute droplet get`, retried up to 3 times with a 10s
    /// spacing on transient failure before the error is surfaced.
    fn describe_droplet_with_retry(&self, droplet_id: &str) -> DeployResult<String> {
        const ATTEMPTS: u32 = 3;
        let mut last_err = None;
        for attempt in 0..ATTEMPTS {
            match cmd::run(
                "doctl",
                &[
                    "compute",
                    "droplet",
                    "get",
                    droplet_id,
                    "--format",
                    "ID,Name,PublicIPv4,Region,Status",
                    "--no-header",
                ],
            ) {
                Ok(out) => return Ok(out),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < ATTEMPTS {
                        thread::sleep(Duration::from_secs(10));
                    }
                }
            }
        }
        Err(last_err.unwrap_or(DeployError::TransientCloud {
            provider: "digitalocean".into(),
            attempts: ATTEMPTS,
            message: format!("droplet {droplet_id} describe failed with no error recorded"),
        }))
    }

    pub fn destroy_vm(&self, droplet_id: &str) -> DeployResult<()> {
        cmd::run(
            "doctl",
            &["compute", "droplet", "delete", droplet_id, "--force"],
        )?;
        Ok(())
    }

    pub fn destroy_firewall(&self, firewall_id: &str) -> DeployResult<()> {
        cmd::run(
            "doctl",
            &["compute", "firewall", "delete", firewall_id, "--force"],
        )?;
        Ok(())
    }

    pub fn destroy_key_pair(&self, key_id: &str) -> DeployResult<()> {
        cmd::run("doctl", &["compute", "ssh-key", "delete", key_id, "--force"])?;
        Ok(())
    }

    pub fn destroy_object_store(&self, bucket_name: &str) -> DeployResult<()> {
        cmd::run("doctl", &["compute", "space", "delete", bucket_name, "--force"])
            .or_else(|_| cmd::run("s3cmd", &["rb", &format!("s3://{bucket_name}"), "--force"]))?;
        Ok(())
    }

    pub fn destroy_identity_role(&self, role_id: &str) -> DeployResult<()> {
        cmd::run("doctl", &["projects", "delete", role_id, "--force"])?;
        Ok(())
    }

    /// Widen the firewall to admit `port`. Always run before the daemon
    /// is reconfigured to listen on the new port.
    pub fn open_firewall_port(&self, firewall_id: &str, port: u16) -> DeployResult<()> {
        cmd::run(
            "doctl",
            &[
                "compute",
                "firewall",
                "add-rules",
                firewall_id,
                "--inbound-rules",
                &format!("protocol:tcp,ports:{port},address:0.0.0.0/0,address:::/0"),
            ],
        )?;
        Ok(())
    }

    /// Narrow the firewall to drop `port`. Only call once the new
    /// identity has been exercised on both firewalls.
    pub fn close_firewall_port(&self, firewall_id: &str, port: u16) -> DeployResult<()> {
        cmd::run(
            "doctl",
            &[
                "compute",
                "firewall",
                "remove-rules",
                firewall_id,
                "--inbound-rules",
                &format!("protocol:tcp,ports:{port},address:0.0.0.0/0,address:::/0"),
            ],
        )?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensured_into_inner_all_variants() {
        assert_eq!(Ensured::Existing(1).into_inner(), 1);
        assert_eq!(Ensured::Created(2).into_inner(), 2);
        assert_eq!(Ensured::Adopted(3).into_inner(), 3);
    }

    #[test]
    fn we_created_it_false_only_for_adopted() {
        assert!(Ensured::Existing(1).we_created_it());
        assert!(Ensured::Created(1).we_created_it());
        assert!(!Ensured::Adopted(1).we_created_it());
    }
}
