use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Everything the orchestrator can create: the set of keys in the
/// Resource Ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    KeyPair,
    FirewallGroup,
    ObjectStore,
    IdentityRole,
    IdentityRoleProfile,
    Vm,
    /// Keyed by FQDN, so more than one domain's A record can coexist.
    DnsRecord(String),
}

/// One entry in the ledger: a provider-assigned id plus enough metadata to
/// describe, adopt, or destroy the resource later without re-deriving it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub provider_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// `false` means this resource pre-existed and was adopted; destroy
    /// must never delete it.
    pub we_created_it: bool,
    pub attributes: HashMap<String, String>,
}

impl ResourceRecord {
    #[must_use]
    pub fn created(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            created_at: chrono::Utc::now(),
            we_created_it: true,
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn adopted(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            created_at: chrono::Utc::now(),
            we_created_it: false,
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The sole authority on "what this deployment owns". Durable; written as
/// part of `DeploymentState`. Not a lock — concurrent invocations are
/// guarded separately by `crate::lock::ProjectLock`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    records: HashMap<ResourceKind, ResourceRecord>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. Overwrites silently if `kind` was already
    /// present — callers are expected to `lookup` first when idempotence
    /// matters (the `ensure_X` three-valued return does this for them).
    pub fn record(&mut self, kind: ResourceKind, record: ResourceRecord) {
        self.records.insert(kind, record);
    }

    #[must_use]
    pub fn lookup(&self, kind: &ResourceKind) -> Option<&ResourceRecord> {
        self.records.get(kind)
    }

    /// Removes `kind` after a successful destroy. No-op if absent.
    pub fn forget(&mut self, kind: &ResourceKind) {
        self.records.remove(kind);
    }

    #[must_use]
    pub fn snapshot(&self) -> HashMap<ResourceKind, ResourceRecord> {
        self.records.clone()
    }

    pub fn restore(&mut self, snapshot: HashMap<ResourceKind, ResourceRecord>) {
        self.records = snapshot;
    }

    /// All kinds present, in the order destroy must reverse: DNS records,
    /// then VM, then the identity/role/profile/store/firewall/key-pair
    /// chain, mirroring creation order.
    #[must_use]
    pub fn destroy_order(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<ResourceKind> = self.records.keys().cloned().collect();
        kinds.sort_by_key(|k| std::cmp::Reverse(creation_rank(k)));
        kinds
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Creation order used by `ensure_X` calls in the Cloud Resource Manager;
/// destroy walks this in reverse.
const fn creation_rank(kind: &ResourceKind) -> u8 {
    match kind {
        ResourceKind::KeyPair => 0,
        ResourceKind::FirewallGroup => 1,
        ResourceKind::ObjectStore => 2,
        ResourceKind::IdentityRole => 3,
        ResourceKind::IdentityRoleProfile => 4,
        ResourceKind::Vm => 5,
        ResourceKind::DnsRecord(_) => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_lookup() {
        let mut ledger = Ledger::new();
        ledger.record(ResourceKind::KeyPair, ResourceRecord::created("key-123"));
        let rec = ledger.lookup(&ResourceKind::KeyPair).unwrap();
        assert_eq!(rec.provider_id, "key-123");
        assert!(rec.we_created_it);
    }

    #[test]
    fn forget_removes() {
        let mut ledger = Ledger::new();
        ledger.record(ResourceKind::Vm, ResourceRecord::created("vm-1"));
        ledger.forget(&ResourceKind::Vm);
        assert!(ledger.lookup(&ResourceKind::Vm).is_none());
    }

    #[test]
    fn adopted_resources_are_flagged() {
        let rec = ResourceRecord::adopted("fw-existing");
        assert!(!rec.we_created_it);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut ledger = Ledger::new();
        ledger.record(ResourceKind::KeyPair, ResourceRecord::created("key-123"));
        let snap = ledger.snapshot();

        let mut other = Ledger::new();
        other.restore(snap);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn destroy_order_is_reverse_of_creation() {
        let mut ledger = Ledger::new();
        ledger.record(ResourceKind::KeyPair, ResourceRecord::created("k"));
        ledger.record(ResourceKind::Vm, ResourceRecord::created("v"));
        ledger.record(
            ResourceKind::DnsRecord("example.com".into()),
            ResourceRecord::created("d"),
        );

        let order = ledger.destroy_order();
        assert_eq!(order[0], ResourceKind::DnsRecord("example.com".into()));
        assert_eq!(order[1], ResourceKind::Vm);
        assert_eq!(order[2], ResourceKind::KeyPair);
    }

    #[test]
    fn dns_records_keyed_by_fqdn() {
        let mut ledger = Ledger::new();
        ledger.record(
            ResourceKind::DnsRecord("a.example.com".into()),
            ResourceRecord::created("rec-1"),
        );
        ledger.record(
            ResourceKind::DnsRecord("b.example.com".into()),
            ResourceRecord::created("rec-2"),
        );
        assert_eq!(ledger.len(), 2);
    }
}
