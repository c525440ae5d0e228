/// Defines the application container: image, environment,
/// volumes, health checks, and exposed ports.
///
/// # Example
///
/// ```
/// use outpost::App;
///
/// let app = App::new("my-service")
///     .dockerfile("Dockerfile")
///     .env("SERVER_HOST", "0.0.0.0")
///     .env("SERVER_PORT", "3000")
///     .volume("app-data", "/app/data")
///     .healthcheck("curl -f http://localhost:3000/")
///     .expose(3000);
///
/// assert_eq!(app.name, "my-service");
/// assert_eq!(app.expose, vec![3000]);
/// ```
#[derive(Debug, Clone)]
pub struct App {
    pub name: String,
    pub dockerfile: String,
    pub platform: String,
    pub build_args: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub env_file: Option<String>,
    pub volumes: Vec<(String, String)>,
    pub expose: Vec<u16>,
    /// Host:container port mappings, distinct from `expose` (which is
    /// container-network-only). Used for services that need a port
    /// reachable from outside Caddy, e.g. a database exposed for a
    /// one-off migration.
    pub ports: Vec<(u16, u16)>,
    pub healthcheck: Option<String>,
    /// Set when the application is built from a git repository: the
    /// Application phase clones `source_repo` at `source_branch` before
    /// building `dockerfile`.
    pub source_repo: Option<String>,
    pub source_branch: String,
}

impl App {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dockerfile: "Dockerfile".to_string(),
            platform: "linux/amd64".to_string(),
            build_args: Vec::new(),
            env: Vec::new(),
            env_file: None,
            volumes: Vec::new(),
            expose: Vec::new(),
            ports: Vec::new(),
            healthcheck: None,
            source_repo: None,
            source_branch: "main".to_string(),
        }
    }

    #[must_use]
    pub fn dockerfile(mut self, path: &str) -> Self {
        self.dockerfile = path.to_string();
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: &str) -> Self {
        self.platform = platform.to_string();
        self
    }

    #[must_use]
    pub fn build_arg(mut self, key: &str, value: &str) -> Self {
        self.build_args.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn env_file(mut self, path: &str) -> Self {
        self.env_file = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn volume(mut self, name: &str, mount: &str) -> Self {
        self.volumes.push((name.to_string(), mount.to_string()));
        self
    }

    #[must_use]
    pub fn expose(mut self, port: u16) -> Self {
        self.expose.push(port);
        self
    }

    /// Publish `host_port` on the VM mapped to `container_port`,
    /// distinct from `expose` (which stays inside the compose network).
    #[must_use]
    pub fn port(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push((host_port, container_port));
        self
    }

    #[must_use]
    pub fn healthcheck(mut self, cmd: &str) -> Self {
        self.healthcheck = Some(cmd.to_string());
        self
    }

    /// Marks this app as built from a git checkout: the Application
    /// phase clones `repo` at `branch` before building `self.dockerfile`.
    #[must_use]
    pub fn source(mut self, repo: &str, branch: &str) -> Self {
        self.source_repo = Some(repo.to_string());
        self.source_branch = branch.to_string();
        self
    }

    /// The in-network address Caddy reverse-proxies to: this service's
    /// name on the first port it exposes. Panics-free: an app with no
    /// exposed port yields `name:0`, which is a configuration error the
    /// Application phase's own preflight (not this builder) should catch.
    #[must_use]
    pub fn upstream(&self) -> String {
        format!("{}:{}", self.name, self.expose.first().copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_uses_first_exposed_port() {
        let app = App::new("api").expose(8000).expose(8001);
        assert_eq!(app.upstream(), "api:8000");
    }

    #[test]
    fn port_mappings_accumulate() {
        let app = App::new("db").port(15432, 5432).port(16379, 6379);
        assert_eq!(app.ports, vec![(15432, 5432), (16379, 6379)]);
    }

    #[test]
    fn source_sets_repo_and_branch() {
        let app = App::new("web").source("https://example.com/repo.git", "release");
        assert_eq!(app.source_repo.as_deref(), Some("https://example.com/repo.git"));
        assert_eq!(app.source_branch, "release");
    }

    #[test]
    fn default_branch_is_main() {
        let app = App::new("web");
        assert_eq!(app.source_branch, "main");
    }
}
