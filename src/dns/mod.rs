pub mod cloudflare;
pub mod ovh;

use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::cmd;
use crate::error::DeployResult;

/// A DNS provider that can create, update, and delete A records, plus
/// the TXT records `_acme-challenge` needs for DNS-01 validation.
pub trait DnsProvider {
    /// The fully-qualified domain name managed by this provider.
    fn domain(&self) -> &str;

    /// Create or update an A record pointing to `ip`. Returns the
    /// provider's record id, recorded in the ledger so destroy can
    /// address it directly instead of searching by name again.
    fn upsert_a_record(&self, ip: &str) -> DeployResult<String>;

    /// Delete the A record for this domain.
    fn delete_a_record(&self) -> DeployResult<()>;

    /// Create a `_acme-challenge.<domain>` TXT record with `value`,
    /// for DNS-01 certificate validation. Returns the record id.
    fn upsert_txt_record(&self, value: &str) -> DeployResult<String>;

    /// Delete the `_acme-challenge` TXT record for this domain.
    fn delete_txt_record(&self) -> DeployResult<()>;
}

/// Poll authoritative and public resolvers for `fqdn` until two
/// consecutive checks at least 30s apart both see `expected_ipv4`, or
/// `deadline` elapses. Guards against a resolver serving a cached,
/// stale answer that happens to match on the first try.
///
/// Returns `Ok(true)` once agreement is reached twice, `Ok(false)` if
/// `deadline` elapses without it.
pub fn wait_for_global_resolution(
    fqdn: &str,
    expected_ipv4: &str,
    deadline: Duration,
) -> DeployResult<bool> {
    let start = Instant::now();
    let poll_interval = Duration::from_secs(30);
    let mut consecutive_agreements = 0;

    while start.elapsed() < deadline {
        if resolves_to(fqdn, expected_ipv4) {
            consecutive_agreements += 1;
            if consecutive_agreements >= 2 {
                return Ok(true);
            }
        } else {
            consecutive_agreements = 0;
        }

        if start.elapsed() + poll_interval >= deadline {
            break;
        }
        sleep(poll_interval);
    }

    Ok(false)
}

/// Queries both an authoritative nameserver for `fqdn`'s zone and a
/// public resolver; only agreement from both counts as
/// a resolved poll, guarding against a public resolver serving a
/// stale cached answer while the authoritative server already reflects
/// the new record (or vice versa).
fn resolves_to(fqdn: &str, expected_ipv4: &str) -> bool {
    let public_ok = query_a(fqdn, "8.8.8.8").iter().any(|ip| ip == expected_ipv4);
    let authoritative_ok = authoritative_nameserver(fqdn)
        .map(|ns| query_a(fqdn, &ns).iter().any(|ip| ip == expected_ipv4))
        .unwrap_or(public_ok);
    public_ok && authoritative_ok
}

fn query_a(fqdn: &str, resolver: &str) -> Vec<String> {
    cmd::run("dig", &[&format!("@{resolver}"), "+short", "A", fqdn])
        .map(|out| out.lines().map(str::trim).map(str::to_string).collect())
        .unwrap_or_default()
}

/// First nameserver `dig` reports authoritative for `fqdn`'s zone, or
/// `None` if the lookup itself fails (propagation polling then falls
/// back to the public resolver alone rather than blocking forever on a
/// transient NS lookup failure).
fn authoritative_nameserver(fqdn: &str) -> Option<String> {
    let (zone, _) = split_domain(fqdn);
    let out = cmd::run("dig", &["+short", "NS", &zone]).ok()?;
    out.lines()
        .next()
        .map(|line| line.trim().trim_end_matches('.').to_string())
        .filter(|ns| !ns.is_empty())
}

/// Split an FQDN into (zone, subdomain).
///
/// Example: `"app.example.com"` -> `("example.com", "app")`
///
/// If the domain has no subdomain (e.g. `"example.com"`), the
/// subdomain is returned as an empty string.
#[must_use]
pub fn split_domain(fqdn: &str) -> (String, String) {
    let parts: Vec<&str> = fqdn.split('.').collect();
    if parts.len() <= 2 {
        return (fqdn.to_string(), String::new());
    }
    let zone = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
    let subdomain = parts[..parts.len() - 2].join(".");
    (zone, subdomain)
}
