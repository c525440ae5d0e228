use std::collections::HashMap;

use crate::config::{Challenge, DnsProviderConfig, DomainEntry};
use crate::error::{DeployError, DeployResult};
use crate::remote_command::RemoteCommands;
use crate::ssh::SshSession;
use crate::state::{IssuedCertificate, TlsState};

const DNS01_CLOUDFLARE_AUTH: &str = include_str!("../templates/dns01_cloudflare_auth.sh.tmpl");
const DNS01_CLOUDFLARE_CLEANUP: &str = include_str!("../templates/dns01_cloudflare_cleanup.sh.tmpl");
const DNS01_OVH_AUTH: &str = include_str!("../templates/dns01_ovh_auth.sh.tmpl");
const DNS01_OVH_CLEANUP: &str = include_str!("../templates/dns01_ovh_cleanup.sh.tmpl");

/// One domain's challenge classification, recorded as metadata only —
/// the pipeline always issues a single multi-SAN certificate for the
/// whole Domain Plan, escalating every name to DNS-01 the moment any one
/// of them requires it (DNS-01 validates non-wildcard names just as
/// well as HTTP-01 does).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainClassification {
    pub name: String,
    pub challenge: Challenge,
}

/// Classifies each domain in the Domain Plan by the challenge type it
/// would use on its own (apex/simple subdomains: HTTP-01; wildcard or
/// explicit dns-only entries: DNS-01). This is metadata for the caller —
/// `overall_challenge` decides what the pipeline actually requests.
#[must_use]
pub fn classify(domains: &[DomainEntry]) -> Vec<DomainClassification> {
    domains
        .iter()
        .map(|domain| DomainClassification {
            name: domain.name.clone(),
            challenge: domain.resolved_challenge(),
        })
        .collect()
}

/// The challenge type for the single certificate request covering
/// `classifications`: DNS-01 the moment any domain needs it, HTTP-01
/// only when every domain is happy with it.
#[must_use]
fn overall_challenge(classifications: &[DomainClassification]) -> Challenge {
    if classifications.iter().any(|d| d.challenge == Challenge::Dns) {
        Challenge::Dns
    } else {
        Challenge::Http
    }
}

/// Picks the auth/cleanup hook template pair for `provider.name`. A
/// pure lookup, kept separate from `upload_hooks` so an unsupported
/// provider name is rejected before any session I/O happens.
fn select_hook_templates(provider: &DnsProviderConfig) -> DeployResult<(&'static str, &'static str)> {
    match provider.name.as_str() {
        "cloudflare" => Ok((DNS01_CLOUDFLARE_AUTH, DNS01_CLOUDFLARE_CLEANUP)),
        "ovh" => Ok((DNS01_OVH_AUTH, DNS01_OVH_CLEANUP)),
        other => Err(DeployError::Validation {
            field: "tls.dns_provider.name".into(),
            rule: format!("unsupported dns provider '{other}' for dns-01"),
        }),
    }
}

/// Drives the Certificate Pipeline over an already-open
/// session on the hardened host. Runs after the DNS phase, so every
/// HTTP-01 domain in the plan already resolves to the VM's address
/// (the "domain validation gate" is the DNS phase's own
/// `wait_for_global_resolution`, not re-checked here).
pub struct CertificatePipeline<'a> {
    pub email: &'a str,
    pub dns_provider: Option<&'a DnsProviderConfig>,
}

impl<'a> CertificatePipeline<'a> {
    #[must_use]
    pub const fn new(email: &'a str, dns_provider: Option<&'a DnsProviderConfig>) -> Self {
        Self { email, dns_provider }
    }

    /// Issues the one multi-SAN certificate covering the whole Domain
    /// Plan, persisting `tls_state` right after so a resumed run skips
    /// straight to the renewal-timer step once it's there. Per-domain
    /// http/dns classification is recorded metadata only — `run` always
    /// requests a single certificate whose SAN set is the full plan.
    pub fn run(
        &self,
        session: &SshSession,
        domains: &[DomainEntry],
        tls_state: &mut TlsState,
        mut persist: impl FnMut(&TlsState) -> DeployResult<()>,
    ) -> DeployResult<()> {
        if domains.is_empty() {
            return Ok(());
        }

        self.ensure_certbot_installed(session)?;

        let classifications = classify(domains);
        let all_domains: Vec<String> = classifications.iter().map(|d| d.name.clone()).collect();

        if !tls_state.covers_all(&all_domains) {
            let cert = match overall_challenge(&classifications) {
                Challenge::Http => self.issue_http(session, &all_domains)?,
                Challenge::Dns => self.issue_dns(session, &all_domains)?,
            };

            tls_state.certificates.push(cert);
            persist(tls_state)?;
        }

        if !tls_state.renewal_timer_installed {
            self.install_renewal_timer(session)?;
            tls_state.renewal_timer_installed = true;
            persist(tls_state)?;
        }

        Ok(())
    }

    fn ensure_certbot_installed(&self, session: &SshSession) -> DeployResult<()> {
        RemoteCommands::install_packages(session, &["certbot"])
    }

    /// HTTP-01: `certbot certonly --standalone` binds port 80 itself.
    /// This only works because the Certificate Pipeline runs before the
    /// Application phase starts Caddy — nothing else is listening on 80
    /// yet.
    fn issue_http(&self, session: &SshSession, domains: &[String]) -> DeployResult<IssuedCertificate> {
        let d_args = domains
            .iter()
            .map(|d| format!("-d {d}"))
            .collect::<Vec<_>>()
            .join(" ");
        let command = format!(
            "certbot certonly --standalone --non-interactive --agree-tos -m {} {d_args}",
            self.email
        );
        RemoteCommands::run_checked(session, &command)?;
        Ok(self.descriptor_for(domains))
    }

    /// DNS-01: renders the provider-specific auth/cleanup hook scripts
    /// (which embed the provider credentials in an access-restricted
    /// file), uploads them mode 0700, and drives
    /// certbot's manual plugin with them.
    fn issue_dns(&self, session: &SshSession, domains: &[String]) -> DeployResult<IssuedCertificate> {
        let provider = self.dns_provider.ok_or_else(|| {
            DeployError::Validation {
                field: "tls.dns_provider".into(),
                rule: "dns-01 challenge requested but no dns_provider is configured".into(),
            }
        })?;
        let (auth_tmpl, cleanup_tmpl) = select_hook_templates(provider)?;

        let (auth_path, cleanup_path) = self.upload_hooks(session, provider, auth_tmpl, cleanup_tmpl)?;

        let d_args = domains
            .iter()
            .map(|d| format!("-d '{d}'"))
            .collect::<Vec<_>>()
            .join(" ");
        let command = format!(
            "certbot certonly --manual --preferred-challenges dns \
             --manual-auth-hook {auth_path} --manual-cleanup-hook {cleanup_path} \
             --non-interactive --agree-tos -m {} {d_args}",
            self.email
        );
        RemoteCommands::run_checked(session, &command)?;
        Ok(self.descriptor_for(domains))
    }

    /// Renders and uploads the auth/cleanup hook scripts for
    /// `provider.name`, returning their remote paths. Mode 0700: these
    /// files embed the provider's API credentials verbatim.
    fn upload_hooks(
        &self,
        session: &SshSession,
        provider: &DnsProviderConfig,
        auth_tmpl: &str,
        cleanup_tmpl: &str,
    ) -> DeployResult<(String, String)> {
        let vars: HashMap<&str, &str> = provider
            .credentials
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let auth_rendered = RemoteCommands::render_template(auth_tmpl, &vars)?;
        let cleanup_rendered = RemoteCommands::render_template(cleanup_tmpl, &vars)?;

        let auth_path = "/etc/outpost/dns01-auth.sh".to_string();
        let cleanup_path = "/etc/outpost/dns01-cleanup.sh".to_string();

        RemoteCommands::run_checked(session, "mkdir -p /etc/outpost")?;
        RemoteCommands::write_file(session, &auth_path, &auth_rendered, "700")?;
        RemoteCommands::write_file(session, &cleanup_path, &cleanup_rendered, "700")?;

        Ok((auth_path, cleanup_path))
    }

    fn descriptor_for(&self, domains: &[String]) -> IssuedCertificate {
        let lineage = &domains[0];
        IssuedCertificate {
            cert_path: format!("/etc/letsencrypt/live/{lineage}/fullchain.pem"),
            key_path: format!("/etc/letsencrypt/live/{lineage}/privkey.pem"),
            sans: domains.to_vec(),
        }
    }

    /// Installs the daily renewal timer. The
    /// certbot Debian/Ubuntu package already ships a `certbot.timer`
    /// unit that runs `certbot renew` twice daily; enabling it is
    /// idempotent the same way `RemoteCommands::enable_service` always
    /// is.
    fn install_renewal_timer(&self, session: &SshSession) -> DeployResult<()> {
        RemoteCommands::enable_service(session, "certbot.timer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str, challenge: crate::config::ChallengeChoice, wildcard: bool) -> DomainEntry {
        DomainEntry {
            name: name.to_string(),
            challenge,
            wildcard,
        }
    }

    #[test]
    fn classify_single_http_domain() {
        use crate::config::ChallengeChoice::Auto;
        let domains = vec![domain("example.com", Auto, false)];
        let classifications = classify(&domains);
        assert_eq!(classifications.len(), 1);
        assert_eq!(classifications[0].challenge, Challenge::Http);
        assert_eq!(classifications[0].name, "example.com");
    }

    #[test]
    fn classify_keeps_per_domain_challenge_for_mixed_plan() {
        use crate::config::ChallengeChoice::Auto;
        let domains = vec![
            domain("api.example.com", Auto, false),
            domain("*.example.com", Auto, true),
        ];
        let classifications = classify(&domains);
        assert_eq!(classifications.len(), 2);
        assert_eq!(classifications[0].challenge, Challenge::Http);
        assert_eq!(classifications[1].challenge, Challenge::Dns);
    }

    #[test]
    fn overall_challenge_is_dns_when_any_domain_needs_it() {
        use crate::config::ChallengeChoice::Auto;
        let domains = vec![
            domain("api.example.com", Auto, false),
            domain("*.example.com", Auto, true),
        ];
        assert_eq!(overall_challenge(&classify(&domains)), Challenge::Dns);
    }

    #[test]
    fn overall_challenge_is_http_when_every_domain_is_http() {
        use crate::config::ChallengeChoice::Auto;
        let domains = vec![
            domain("example.com", Auto, false),
            domain("www.example.com", Auto, false),
        ];
        assert_eq!(overall_challenge(&classify(&domains)), Challenge::Http);
    }

    #[test]
    fn classify_empty_plan_is_empty() {
        assert!(classify(&[]).is_empty());
    }

    #[test]
    fn descriptor_uses_first_domain_as_lineage() {
        let pipeline = CertificatePipeline::new("a@example.com", None);
        let cert = pipeline.descriptor_for(&["example.com".to_string(), "www.example.com".to_string()]);
        assert_eq!(cert.cert_path, "/etc/letsencrypt/live/example.com/fullchain.pem");
        assert_eq!(cert.sans.len(), 2);
    }

    #[test]
    fn select_hook_templates_rejects_unsupported_provider() {
        let provider = DnsProviderConfig {
            name: "route53".into(),
            credentials: HashMap::new(),
        };
        let err = select_hook_templates(&provider).unwrap_err();
        assert!(matches!(err, DeployError::Validation { field, .. } if field == "tls.dns_provider.name"));
    }

    #[test]
    fn select_hook_templates_accepts_cloudflare_and_ovh() {
        let cf = DnsProviderConfig { name: "cloudflare".into(), credentials: HashMap::new() };
        let ovh = DnsProviderConfig { name: "ovh".into(), credentials: HashMap::new() };
        assert!(select_hook_templates(&cf).is_ok());
        assert!(select_hook_templates(&ovh).is_ok());
    }
}
