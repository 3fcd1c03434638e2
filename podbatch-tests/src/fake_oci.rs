// SPDX-License-Identifier: MIT

//! On-disk state of the `fake-oci` test runtime: one JSON file per container
//! below the directory passed as `--root`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use podbatch::container::ContainerStatus;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub status: ContainerStatus,

    /// The container keeps running after SIGTERM.
    #[serde(default)]
    pub ignore_term: bool,

    /// Signals delivered through `kill`, oldest first.
    #[serde(default)]
    pub signals: Vec<String>,
}

impl FakeContainer {
    pub fn new(id: &str, status: ContainerStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            ignore_term: false,
            signals: Vec::new(),
        }
    }

    pub fn ignoring_sigterm(mut self) -> Self {
        self.ignore_term = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakeOciRoot {
    dir: PathBuf,
}

impl FakeOciRoot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn write(&self, container: &FakeContainer) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(container)?;
        fs::write(self.path(&container.id), json)
    }

    pub fn read(&self, id: &str) -> io::Result<Option<FakeContainer>> {
        match fs::read(self.path(id)) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn remove(&self, id: &str) -> io::Result<()> {
        fs::remove_file(self.path(id))
    }

    pub fn list(&self) -> io::Result<Vec<FakeContainer>> {
        let mut containers = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(containers),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                containers.push(serde_json::from_slice(&fs::read(&path)?)?);
            }
        }
        containers.sort_by(|a: &FakeContainer, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    /// Creates a container in the given status.
    pub fn seed(&self, id: &str, status: ContainerStatus) -> io::Result<()> {
        self.write(&FakeContainer::new(id, status))
    }

    pub fn status(&self, id: &str) -> Option<ContainerStatus> {
        self.read(id).ok().flatten().map(|c| c.status)
    }
}
