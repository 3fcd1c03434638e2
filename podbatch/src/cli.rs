// SPDX-License-Identifier: MIT

//! Command line front end of the `podbatch` binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{debug, info};

use ctr_parallel::{Context, Controller, Dispatcher};

use crate::config::{CliOverrides, EngineConfig};
use crate::container::{parse_signal, ContainerOps};
use crate::pod::{Pod, PodError, PodManager};
use crate::runtime::OciCliRuntime;

const EXIT_USAGE: u8 = 2;
const EXIT_FAILURE: u8 = 125;

const DEFAULT_POD_NAME: &str = "default";

#[derive(Debug, Parser)]
#[command(name = "podbatch", author, version, about)]
struct Args {
    /// JSON configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Maximum number of runtime invocations running at the same time
    #[arg(long = "max-workers", value_name = "N")]
    max_workers: Option<usize>,

    /// OCI runtime binary
    #[arg(long, value_name = "PATH")]
    runtime: Option<PathBuf>,

    /// State directory of the OCI runtime
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Give up on containers still waiting for a worker after this many seconds
    #[arg(long = "acquire-timeout", value_name = "SECS")]
    acquire_timeout: Option<u64>,

    /// Log filter (error, warn, info, debug); RUST_LOG takes precedence
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stop containers, killing them once the timeout expires
    Stop {
        /// Seconds to wait before SIGKILL
        #[arg(short = 't', long = "time", value_name = "SECS")]
        timeout: Option<u64>,

        /// Remove runtime state after stopping
        #[arg(long)]
        cleanup: bool,

        #[command(flatten)]
        targets: Targets,
    },
    /// Send a signal to running containers
    Kill {
        #[arg(short = 's', long, default_value = "SIGKILL")]
        signal: String,

        #[command(flatten)]
        targets: Targets,
    },
    /// Freeze running containers
    Pause {
        #[command(flatten)]
        targets: Targets,
    },
    /// Thaw paused containers
    Unpause {
        #[command(flatten)]
        targets: Targets,
    },
    /// Remove runtime state of created or stopped containers
    Cleanup {
        #[command(flatten)]
        targets: Targets,
    },
}

impl Command {
    fn targets(&self) -> &Targets {
        match self {
            Command::Stop { targets, .. }
            | Command::Kill { targets, .. }
            | Command::Pause { targets }
            | Command::Unpause { targets }
            | Command::Cleanup { targets } => targets,
        }
    }
}

#[derive(Debug, ClapArgs)]
struct Targets {
    /// Act on every container the runtime knows about
    #[arg(short = 'a', long)]
    all: bool,

    /// Name used for the group in log and error messages
    #[arg(long, value_name = "NAME")]
    pod: Option<String>,

    /// Container IDs
    ids: Vec<String>,
}

fn validate_args(args: &Args) -> Result<(), String> {
    let targets = args.command.targets();
    match (targets.all, targets.ids.is_empty()) {
        (true, false) => return Err("--all and container IDs may not be used together".into()),
        (false, true) => return Err("specify at least one container ID or --all".into()),
        _ => {}
    }

    if let Command::Kill { signal, .. } = &args.command {
        parse_signal(signal).map_err(|e| e.to_string())?;
    }

    if let Some(pod) = &targets.pod {
        if pod.is_empty() {
            return Err("--pod must not be empty".into());
        }
    }

    Ok(())
}

/// Parses the process arguments, runs the requested operation and maps the
/// outcome to the exit status.
pub fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {e}");
        return ExitCode::from(EXIT_USAGE);
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PodError>() {
                Some(PodError::PartialFailure { errors, .. }) => {
                    let mut ids: Vec<_> = errors.keys().collect();
                    ids.sort();
                    for id in ids {
                        eprintln!("Error: {id}: {:#}", errors[id]);
                    }
                }
                _ => eprintln!("Error: {e:#}"),
            }
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = EngineConfig::resolve(
        args.config.as_deref(),
        CliOverrides {
            max_workers: args.max_workers,
            runtime: args.runtime,
            runtime_root: args.root,
            acquire_timeout: args.acquire_timeout,
        },
    )?;
    debug!("Using configuration {config:?}");

    let controller = Arc::new(Controller::new());
    controller.set_limit(config.max_workers).map_err(|_| {
        anyhow!(
            "maximum workers must be set to a positive number (got {})",
            config.max_workers
        )
    })?;
    let dispatcher = Arc::new(Dispatcher::new(controller)?);

    let mut runtime = OciCliRuntime::new(&config.runtime).with_stop_timeout(config.stop_timeout());
    if let Some(root) = &config.runtime_root {
        runtime = runtime.with_root(root);
    }
    let manager = PodManager::new(Arc::new(runtime), dispatcher.clone());

    let targets = args.command.targets();
    let ids = if targets.all {
        manager
            .runtime()
            .list()
            .context("failed to list containers")?
    } else {
        targets.ids.clone()
    };
    let pod = Pod::new(
        targets.pod.as_deref().unwrap_or(DEFAULT_POD_NAME),
        ids,
    );
    info!("Processing {} containers of pod {}", pod.containers.len(), pod.name);

    let ctx = match config.acquire_timeout() {
        Some(timeout) => Context::background().with_timeout(timeout),
        None => Context::background(),
    };

    let result = match &args.command {
        Command::Stop {
            timeout, cleanup, ..
        } => manager.stop(&ctx, &pod, timeout.map(Duration::from_secs), *cleanup),
        Command::Kill { signal, .. } => manager.kill(&ctx, &pod, parse_signal(signal)?),
        Command::Pause { .. } => manager.pause(&ctx, &pod),
        Command::Unpause { .. } => manager.unpause(&ctx, &pod),
        Command::Cleanup { .. } => manager.cleanup(&ctx, &pod),
    };

    // containers without an error are reported as done
    let failed = match &result {
        Err(PodError::PartialFailure { errors, .. }) => Some(errors),
        Err(PodError::Job(_)) => None,
        Ok(()) => None,
    };
    if !matches!(result, Err(PodError::Job(_))) {
        for id in &pod.containers {
            if failed.map_or(true, |errors| !errors.contains_key(id)) {
                println!("{id}");
            }
        }
    }

    dispatcher.wait_until_finished();
    result.map_err(anyhow::Error::from)
}
