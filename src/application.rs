use crate::app::App;
use crate::caddy::Caddy;
use crate::caddyfile;
use crate::compose;
use crate::config::ApplicationConfig;
use crate::error::{DeployError, DeployResult};
use crate::remote_command::RemoteCommands;
use crate::ssh::SshSession;
use crate::state::IssuedCertificate;

/// Where the rendered compose project and application sources live on
/// the host. Fixed layout, already created by
/// `hardening::step_user_created`.
pub const REMOTE_DIR: &str = "/opt/outpost/app";

/// Drives the final Application phase: installs
/// the container runtime, materializes the image per
/// `application.source`, renders `docker-compose.yml` and the
/// `Caddyfile`, and brings the stack up. Same docker-then-compose-up
/// shape as a local build-and-transfer deploy, generalized to a remote
/// git clone/build so the Application phase doesn't require Docker on
/// the operator's own machine.
pub struct ApplicationDeployment<'a> {
    pub project_name: &'a str,
}

impl<'a> ApplicationDeployment<'a> {
    #[must_use]
    pub const fn new(project_name: &'a str) -> Self {
        Self { project_name }
    }

    /// Runs the phase end to end: install Docker, materialize the
    /// image, render and upload the compose project, bring it up, and
    /// wait for every service with a healthcheck to report healthy.
    pub fn deploy(
        &self,
        session: &SshSession,
        application: &ApplicationConfig,
        domains: &[String],
        certificates: &[IssuedCertificate],
        reverse_proxy: &Caddy,
    ) -> DeployResult<()> {
        self.install_docker(session)?;

        let app = self.materialize(session, application)?;
        let apps: Vec<App> = app.into_iter().collect();

        RemoteCommands::run_checked(session, &format!("mkdir -p {REMOTE_DIR}"))?;

        let compose_text = compose::render(&apps, reverse_proxy);
        RemoteCommands::write_file(
            session,
            &format!("{REMOTE_DIR}/docker-compose.yml"),
            &compose_text,
            "644",
        )?;

        let caddyfile_text = render_caddyfile(reverse_proxy, domains, certificates);
        RemoteCommands::write_file(
            session,
            &format!("{REMOTE_DIR}/Caddyfile"),
            &caddyfile_text,
            "644",
        )?;

        RemoteCommands::run_checked(
            session,
            &format!("cd {REMOTE_DIR} && docker compose up -d --remove-orphans"),
        )?;

        for app in &apps {
            if app.healthcheck.is_some() {
                self.wait_healthy(session, &app.name)?;
            }
        }

        Ok(())
    }

    fn install_docker(&self, session: &SshSession) -> DeployResult<()> {
        RemoteCommands::run_checked(
            session,
            "command -v docker >/dev/null 2>&1 || \
             (curl -fsSL https://get.docker.com | sh && systemctl enable --now docker)",
        )
    }

    /// Builds the single `App` this phase deploys, or `None` for the
    /// placeholder source (Caddy alone answers with a static 200).
    fn materialize(&self, session: &SshSession, application: &ApplicationConfig) -> DeployResult<Option<App>> {
        match application {
            ApplicationConfig::Git { repo, branch, dockerfile } => {
                let src_dir = format!("{REMOTE_DIR}/src");
                RemoteCommands::run_checked(
                    session,
                    &format!(
                        "rm -rf {src_dir} && git clone --depth 1 --branch {branch} {repo} {src_dir}"
                    ),
                )?;
                let dockerfile_name = dockerfile.as_deref().unwrap_or("Dockerfile");
                RemoteCommands::run_checked(
                    session,
                    &format!(
                        "cd {src_dir} && docker build -f {dockerfile_name} -t {}:latest .",
                        self.project_name
                    ),
                )?;
                Ok(Some(
                    App::new(self.project_name)
                        .expose(8080)
                        .healthcheck("curl -f http://localhost:8080/ || exit 1")
                        .source(repo, branch),
                ))
            }
            ApplicationConfig::ContainerImage { image } => {
                RemoteCommands::run_checked(
                    session,
                    &format!("docker pull {image} && docker tag {image} {}:latest", self.project_name),
                )?;
                Ok(Some(
                    App::new(self.project_name)
                        .expose(8080)
                        .healthcheck("curl -f http://localhost:8080/ || exit 1"),
                ))
            }
            ApplicationConfig::Placeholder => Ok(None),
        }
    }

    /// Polls `docker inspect`'s health status for `container` until it
    /// reports healthy or the attempt budget runs out.
    fn wait_healthy(&self, session: &SshSession, container: &str) -> DeployResult<()> {
        const MAX_ATTEMPTS: u32 = 30;
        for attempt in 0..MAX_ATTEMPTS {
            let out = session.exec(&format!(
                "docker inspect --format='{{{{.State.Health.Status}}}}' {container} 2>/dev/null"
            ))?;
            if out.stdout.trim() == "healthy" {
                return Ok(());
            }
            if attempt + 1 < MAX_ATTEMPTS {
                std::thread::sleep(std::time::Duration::from_secs(5));
            }
        }
        Err(DeployError::HealthcheckTimeout(container.to_string(), MAX_ATTEMPTS))
    }
}

/// Assembles the final Caddyfile text. The Certificate Pipeline issues
/// one multi-SAN certificate for the whole Domain Plan, so this
/// ordinarily renders a single site block; it still renders one block
/// per certificate and concatenates them when handed more than one —
/// Caddyfiles are simply a sequence of site blocks, so this composes
/// without touching `caddyfile::render_multi`'s one-address-list
/// contract.
#[must_use]
pub fn render_caddyfile(reverse_proxy: &Caddy, domains: &[String], certificates: &[IssuedCertificate]) -> String {
    if domains.is_empty() {
        return caddyfile::render_multi(reverse_proxy, &[":80".to_string()]);
    }

    if certificates.is_empty() {
        return caddyfile::render_multi(reverse_proxy, domains);
    }

    certificates
        .iter()
        .map(|cert| {
            let site = reverse_proxy.clone().tls_cert(&cert.cert_path, &cert.key_path);
            caddyfile::render_multi(&site, &cert.sans)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_caddyfile_without_domains_binds_port_80() {
        let caddy = Caddy::new().reverse_proxy("demo:8080");
        let rendered = render_caddyfile(&caddy, &[], &[]);
        assert!(rendered.contains(":80"));
    }

    #[test]
    fn render_caddyfile_single_certificate_covers_all_domains() {
        let caddy = Caddy::new().reverse_proxy("demo:8080");
        let domains = vec!["example.com".to_string(), "www.example.com".to_string()];
        let certs = vec![IssuedCertificate {
            cert_path: "/etc/outpost/certs/demo.pem".into(),
            key_path: "/etc/outpost/certs/demo.key".into(),
            sans: domains.clone(),
        }];
        let rendered = render_caddyfile(&caddy, &domains, &certs);
        assert!(rendered.contains("example.com"));
        assert!(rendered.contains("www.example.com"));
        assert!(rendered.contains("tls"));
    }

    #[test]
    fn render_caddyfile_renders_one_block_per_certificate_when_given_several() {
        // The pipeline only ever hands this function one certificate
        // today, but the render step itself stays general over however
        // many it's given.
        let caddy = Caddy::new().reverse_proxy("demo:8080");
        let domains = vec!["api.example.com".to_string(), "other.example.com".to_string()];
        let certs = vec![
            IssuedCertificate {
                cert_path: "/etc/outpost/certs/a.pem".into(),
                key_path: "/etc/outpost/certs/a.key".into(),
                sans: vec!["api.example.com".into()],
            },
            IssuedCertificate {
                cert_path: "/etc/outpost/certs/b.pem".into(),
                key_path: "/etc/outpost/certs/b.key".into(),
                sans: vec!["other.example.com".into()],
            },
        ];
        let rendered = render_caddyfile(&caddy, &domains, &certs);
        assert!(rendered.contains("/etc/outpost/certs/a.pem"));
        assert!(rendered.contains("/etc/outpost/certs/b.pem"));
    }
}
