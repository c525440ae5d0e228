//! Single-tenant deployment orchestrator for Rust.
//!
//! Outpost takes a project from nothing to a hardened, TLS-terminated,
//! running application on a single VM, driven entirely by a typed YAML
//! [`Config`](config::Config) document. No SDKs: every cloud, SSH, and
//! DNS operation shells out to a real CLI (`doctl`, `ssh`, `dig`,
//! `certbot`) the same way an operator would by hand.
//!
//! # Overview
//!
//! A deployment is a [`Orchestrator`](orchestrator::Orchestrator) walking
//! a fixed, checkpointed phase sequence:
//!
//! 1. **Infrastructure** - the [`CloudResourceManager`](cloud::CloudResourceManager)
//!    idempotently ensures a key pair, firewall, object store, identity
//!    role, and VM exist, recording each in the [`Ledger`](ledger::Ledger).
//! 2. **Hardening** - the [`HardeningMachine`](hardening::HardeningMachine)
//!    moves the host from its cloud-default root/port-22 identity to the
//!    project's deployment user on a custom port, one checkpointed step
//!    at a time.
//! 3. **DNS** - a [`DnsProvider`](dns::DnsProvider) (Cloudflare or OVH)
//!    points the Domain Plan's records at the VM and the orchestrator
//!    waits for global resolution.
//! 4. **TLS** - the [`CertificatePipeline`](cert::CertificatePipeline)
//!    issues certificates via certbot, HTTP-01 or DNS-01 per domain.
//! 5. **Application** - the image is materialized (`git`, a registry
//!    pull, or a placeholder), `docker-compose.yml` and a `Caddyfile`
//!    are rendered and brought up.
//!
//! Every phase boundary, and every hardening step, persists
//! [`DeploymentState`](state::DeploymentState) to `state.json` via
//! write-to-temp-then-rename, so an interrupted run resumes exactly
//! where it left off.
//!
//! # CLI
//!
//! ```sh
//! outpost apply --config outpost.yaml --project-dir ./demo
//! outpost resume --config outpost.yaml --project-dir ./demo
//! outpost status --project-dir ./demo
//! outpost destroy --project-dir ./demo
//! outpost recover --project-dir ./demo
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod app;
pub mod application;
pub mod caddy;
pub mod caddyfile;
pub mod cert;
pub mod cloud;
pub mod cmd;
pub mod compose;
pub mod config;
pub mod dns;
pub mod error;
pub mod hardening;
pub mod ledger;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod project;
pub mod recovery;
pub mod remote_command;
pub mod ssh;
pub mod state;

pub use app::App;
pub use caddy::Caddy;
pub use cert::CertificatePipeline;
pub use cloud::CloudResourceManager;
pub use config::Config;
pub use dns::cloudflare::Cloudflare;
pub use dns::ovh::Ovh;
pub use dns::ovh::OvhCredentials;
pub use dns::ovh::parse_ini_value;
pub use error::{DeployError, DeployResult};
pub use hardening::HardeningMachine;
pub use ledger::Ledger;
pub use orchestrator::Orchestrator;
pub use project::Project;
pub use state::DeploymentState;
