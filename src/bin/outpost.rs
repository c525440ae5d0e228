use std::path::PathBuf;

use clap::{Parser, Subcommand};
use outpost::config::Config;
use outpost::orchestrator::Orchestrator;

/// Single-tenant deployment orchestrator.
#[derive(Parser)]
#[command(name = "outpost")]
#[command(about = "Provision, harden, and deploy a single-tenant application")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a deployment to completion, starting fresh or resuming a
    /// prior interrupted run.
    Apply {
        #[arg(long, default_value = "outpost.yaml")]
        config: PathBuf,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Continue an interrupted deployment. Fails if no prior run exists.
    Resume {
        #[arg(long, default_value = "outpost.yaml")]
        config: PathBuf,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Tear down every resource this deployment created.
    Destroy {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Print the current phase, hardening progress, and ledger.
    Status {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Run the out-of-band Recovery Channel against the VM.
    Recover {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}

fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    Ok(Config::from_yaml(&content)?)
}

fn project_dir_of(command: &Command) -> &PathBuf {
    match command {
        Command::Apply { project_dir, .. }
        | Command::Resume { project_dir, .. }
        | Command::Destroy { project_dir }
        | Command::Status { project_dir }
        | Command::Recover { project_dir } => project_dir,
    }
}

fn main() {
    let cli = Cli::parse();

    let run_ts = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
    // Held for the rest of `main` so the non-blocking log writers stay
    // alive until the process exits, so the per-concern log files keep
    // receiving writes for the whole run.
    let _logging_guards = outpost::logging::init(project_dir_of(&cli.command), &run_ts)
        .unwrap_or_else(|e| {
            eprintln!("warning: failed to initialize log files: {e}");
            std::process::exit(2);
        });

    let result = match &cli.command {
        Command::Apply { config, project_dir } => {
            load_config(config).map_err(Into::into).and_then(|cfg| {
                Orchestrator::new(project_dir.clone()).apply(&cfg).map_err(Into::into)
            })
        }
        Command::Resume { config, project_dir } => {
            load_config(config).map_err(Into::into).and_then(|cfg| {
                Orchestrator::new(project_dir.clone()).resume(&cfg).map_err(Into::into)
            })
        }
        Command::Destroy { project_dir } => {
            Orchestrator::new(project_dir.clone()).destroy().map_err(Into::into)
        }
        Command::Status { project_dir } => {
            Orchestrator::new(project_dir.clone()).status().map_err(Into::into)
        }
        Command::Recover { project_dir } => {
            Orchestrator::new(project_dir.clone()).recover().map_err(Into::into)
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        let exit_code = err
            .downcast_ref::<outpost::error::DeployError>()
            .map_or(2, outpost::error::DeployError::exit_code);
        std::process::exit(exit_code);
    }
}
