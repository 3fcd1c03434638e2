// SPDX-License-Identifier: MIT
//
// Stand-in for a runc-compatible runtime. Containers are JSON files below
// --root; processes are never started.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use podbatch::container::ContainerStatus;
use podbatch_tests::fake_oci::{FakeContainer, FakeOciRoot};

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value = "/run/fake-oci")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    State {
        id: String,
    },
    List {
        #[arg(long, default_value = "table")]
        format: String,
    },
    Kill {
        id: String,
        #[arg(default_value = "SIGTERM")]
        signal: String,
    },
    Pause {
        id: String,
    },
    Resume {
        id: String,
    },
    Delete {
        id: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    let root = FakeOciRoot::new(args.root);
    match run(&root, args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load(root: &FakeOciRoot, id: &str) -> anyhow::Result<FakeContainer> {
    root.read(id)?
        .ok_or_else(|| anyhow::anyhow!("container {id} does not exist"))
}

fn run(root: &FakeOciRoot, command: Command) -> anyhow::Result<()> {
    match command {
        Command::State { id } => {
            let container = load(root, &id)?;
            println!(
                "{}",
                serde_json::json!({ "id": container.id, "status": container.status })
            );
        }
        Command::List { format } => {
            anyhow::ensure!(format == "json", "unsupported format {format}");
            let containers = root.list()?;
            if containers.is_empty() {
                println!("null");
            } else {
                let states: Vec<_> = containers
                    .iter()
                    .map(|c| serde_json::json!({ "id": c.id, "status": c.status }))
                    .collect();
                println!("{}", serde_json::Value::Array(states));
            }
        }
        Command::Kill { id, signal } => {
            let mut container = load(root, &id)?;
            // runc signals the init process of created containers too
            if container.status == ContainerStatus::Stopped {
                anyhow::bail!("container not running");
            }
            let signal = signal.trim_start_matches("SIG").to_string();
            match signal.as_str() {
                "KILL" | "9" => container.status = ContainerStatus::Stopped,
                "TERM" | "15" if !container.ignore_term => {
                    if container.status != ContainerStatus::Paused {
                        container.status = ContainerStatus::Stopped;
                    }
                }
                _ => {}
            }
            container.signals.push(signal);
            root.write(&container)?;
        }
        Command::Pause { id } => {
            let mut container = load(root, &id)?;
            anyhow::ensure!(
                container.status == ContainerStatus::Running,
                "container not running"
            );
            container.status = ContainerStatus::Paused;
            root.write(&container)?;
        }
        Command::Resume { id } => {
            let mut container = load(root, &id)?;
            anyhow::ensure!(
                container.status == ContainerStatus::Paused,
                "container not paused"
            );
            container.status = ContainerStatus::Running;
            root.write(&container)?;
        }
        Command::Delete { id } => {
            let container = load(root, &id)?;
            anyhow::ensure!(
                container.status != ContainerStatus::Running,
                "cannot delete container {id} that is not stopped"
            );
            root.remove(&id)?;
        }
    }
    Ok(())
}
