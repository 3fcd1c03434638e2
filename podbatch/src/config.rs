// SPDX-License-Identifier: MIT

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Engine settings. Precedence: built-in defaults, then the config file,
/// then command line flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of container operations running at the same time.
    pub max_workers: usize,
    /// OCI runtime binary (`runc`, `crun`, ...).
    pub runtime: PathBuf,
    /// State directory handed to the runtime as `--root`.
    pub runtime_root: Option<PathBuf>,
    /// Seconds to wait after SIGTERM before SIGKILL.
    pub stop_timeout: u64,
    /// Seconds a batch may wait for free workers before giving up.
    pub acquire_timeout: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            runtime: PathBuf::from("runc"),
            runtime_root: None,
            stop_timeout: 10,
            acquire_timeout: None,
        }
    }
}

/// Three workers per CPU plus one.
pub fn default_max_workers() -> usize {
    let cpus = thread::available_parallelism().map_or(1, |n| n.get());
    cpus * 3 + 1
}

/// Values given on the command line; `None` keeps the configured value.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub max_workers: Option<usize>,
    pub runtime: Option<PathBuf>,
    pub runtime_root: Option<PathBuf>,
    pub acquire_timeout: Option<u64>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Loads `path` if given, otherwise starts from the defaults, then applies
    /// the command line.
    pub fn resolve(path: Option<&Path>, cli: CliOverrides) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.merge_cli(cli);
        Ok(config)
    }

    pub fn merge_cli(&mut self, cli: CliOverrides) {
        if let Some(max_workers) = cli.max_workers {
            self.max_workers = max_workers;
        }
        if let Some(runtime) = cli.runtime {
            self.runtime = runtime;
        }
        if cli.runtime_root.is_some() {
            self.runtime_root = cli.runtime_root;
        }
        if cli.acquire_timeout.is_some() {
            self.acquire_timeout = cli.acquire_timeout;
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert!(config.max_workers >= 4);
        assert_eq!(config.max_workers % 3, 1);
        assert_eq!(config.runtime, PathBuf::from("runc"));
        assert_eq!(config.stop_timeout(), Duration::from_secs(10));
        assert_eq!(config.acquire_timeout(), None);
    }

    #[test]
    fn file_then_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "max_workers": 2, "runtime": "crun", "stop_timeout": 3 }}"#
        )
        .unwrap();

        let config = EngineConfig::resolve(
            Some(file.path()),
            CliOverrides {
                max_workers: Some(5),
                runtime_root: Some("/run/test".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.max_workers, 5);
        assert_eq!(config.runtime, PathBuf::from("crun"));
        assert_eq!(config.runtime_root, Some(PathBuf::from("/run/test")));
        assert_eq!(config.stop_timeout, 3);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_works": 2 }}"#).unwrap();
        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse config file"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = EngineConfig::load(Path::new("/nonexistent/podbatch.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/podbatch.json"));
    }
}
