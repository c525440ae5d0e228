use std::path::Path;

use docker_compose_types::{
    Compose, ComposeNetworks, ComposeVolume, DependsCondition, DependsOnOptions, Environment,
    Healthcheck, HealthcheckTest, Labels, MapOrEmpty, NetworkSettings, Networks, Ports, Service,
    Services, TopLevelVolumes, Volumes,
};
use indexmap::IndexMap;

use crate::app::App;
use crate::caddy::Caddy;

/// Render a complete `docker-compose.yml` for one or more `App`s sharing
/// a single `Caddy` reverse proxy. All services join one network, named
/// after the first app — this is what lets `Caddy`'s `route`/
/// `reverse_proxy` directives address every app by service name.
#[must_use]
pub fn render(apps: &[App], caddy: &Caddy) -> String {
    let mut services = IndexMap::new();
    let network_name = network_name(apps);

    if caddy.has_upstreams() {
        services.insert("caddy".to_string(), Some(caddy_service(apps, caddy, &network_name)));
    }

    for app in apps {
        services.insert(app.name.clone(), Some(app_service(app, &network_name)));
    }

    let compose = Compose {
        services: Services(services),
        volumes: top_level_volumes(apps, caddy),
        networks: network(&network_name),
        ..Default::default()
    };

    serde_yaml::to_string(&compose).expect("failed to serialize compose")
}

fn network_name(apps: &[App]) -> String {
    apps.first().map_or_else(|| "app-network".to_string(), |a| format!("{}-network", a.name))
}

fn caddy_service(apps: &[App], caddy: &Caddy, network_name: &str) -> Service {
    let mut depends = IndexMap::new();
    for app in apps {
        depends.insert(app.name.clone(), DependsCondition::service_healthy());
    }

    let mut volumes = vec![
        Volumes::Simple("./Caddyfile:/etc/caddy/Caddyfile:ro".to_string()),
        Volumes::Simple("caddy-data:/data".to_string()),
        Volumes::Simple("caddy-config:/config".to_string()),
    ];
    for (name, mount) in &caddy.volumes {
        volumes.push(Volumes::Simple(format!("{name}:{mount}")));
    }

    Service {
        image: Some("caddy:2-alpine".to_string()),
        container_name: Some("caddy".to_string()),
        restart: Some("unless-stopped".to_string()),
        ports: Ports::Short(vec!["80:80".to_string(), "443:443".to_string()]),
        volumes,
        depends_on: DependsOnOptions::Conditional(depends),
        networks: Networks::Simple(vec![network_name.to_string()]),
        ..Default::default()
    }
}

fn app_service(app: &App, network_name: &str) -> Service {
    let expose: Vec<String> = app.expose.iter().map(ToString::to_string).collect();
    let ports: Vec<String> = app
        .ports
        .iter()
        .map(|(host, container)| format!("{host}:{container}"))
        .collect();

    let env_file = app.env_file.as_ref().map(|ef| {
        let name = Path::new(ef)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(ef);
        docker_compose_types::StringOrList::Simple(name.to_string())
    });

    let environment = if app.env.is_empty() {
        Environment::default()
    } else {
        Environment::List(app.env.iter().map(|(k, v)| format!("{k}={v}")).collect())
    };

    let volumes: Vec<Volumes> = app
        .volumes
        .iter()
        .map(|(name, mount)| Volumes::Simple(format!("{name}:{mount}")))
        .collect();

    let healthcheck = app.healthcheck.as_ref().map(|cmd| Healthcheck {
        test: Some(HealthcheckTest::Multiple(vec![
            "CMD".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            cmd.clone(),
        ])),
        interval: Some("30s".to_string()),
        timeout: Some("10s".to_string()),
        retries: 3,
        start_period: Some("10s".to_string()),
        ..Default::default()
    });

    Service {
        image: Some(format!("{}:latest", app.name)),
        container_name: Some(app.name.clone()),
        restart: Some("unless-stopped".to_string()),
        expose,
        ports: Ports::Short(ports),
        env_file,
        environment,
        volumes,
        healthcheck,
        networks: Networks::Simple(vec![network_name.to_string()]),
        ..Default::default()
    }
}

fn local_volume() -> ComposeVolume {
    ComposeVolume {
        driver: Some("local".to_string()),
        driver_opts: IndexMap::new(),
        external: None,
        labels: Labels::default(),
        name: None,
    }
}

/// A compose top-level volume must be a *named* volume; anything that
/// looks like a path (`./...`, `/...`) is a bind mount and must not be
/// declared at the top level.
fn is_bind_mount(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('/')
}

fn top_level_volumes(apps: &[App], caddy: &Caddy) -> TopLevelVolumes {
    let mut vols = IndexMap::new();

    for app in apps {
        for (name, _) in &app.volumes {
            if !is_bind_mount(name) {
                vols.insert(name.clone(), MapOrEmpty::Map(local_volume()));
            }
        }
    }

    if caddy.has_upstreams() {
        let local = MapOrEmpty::Map(local_volume());
        vols.insert("caddy-data".to_string(), local.clone());
        vols.insert("caddy-config".to_string(), local);
        for (name, _) in &caddy.volumes {
            if !is_bind_mount(name) {
                vols.insert(name.clone(), MapOrEmpty::Map(local_volume()));
            }
        }
    }

    TopLevelVolumes(vols)
}

fn network(network_name: &str) -> ComposeNetworks {
    let mut nets = IndexMap::new();
    nets.insert(
        network_name.to_string(),
        MapOrEmpty::Map(NetworkSettings {
            driver: Some("bridge".to_string()),
            ..Default::default()
        }),
    );
    ComposeNetworks(nets)
}
