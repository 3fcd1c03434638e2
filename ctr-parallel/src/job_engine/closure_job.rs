// SPDX-License-Identifier: MIT

use crate::job_engine::job::Job;

pub struct ClosureJob {
    desc: String,
    f: Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>,
}

impl ClosureJob {
    pub fn new<F>(desc: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            desc: desc.into(),
            f: Box::new(f),
        }
    }
}

impl Job for ClosureJob {
    fn desc(&self) -> &str {
        &self.desc
    }

    fn run(self: Box<Self>) -> anyhow::Result<()> {
        (self.f)()
    }
}
