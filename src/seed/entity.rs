use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// The name the loader gives the implicit module that owns any SQL appearing
/// before the first `--# MODULE:` comment.
pub const INIT_MODULE_NAME: &str = "(init)";

/// A named, file-backed unit of content change. See SPEC_FULL.md §3.
#[derive(Clone, Debug)]
pub struct Seed {
    name: String,
    path: PathBuf,
}

impl Seed {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Seed {
            name: name.into(),
            path,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Which worker(s) a [`SeedModule`] is pinned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerAffinity {
    /// `WorkerId == 0`: any single worker may take it.
    Any,
    /// `WorkerId == -1`: replicated so every worker executes its own copy.
    Every,
    /// `WorkerId > 0`: pinned to exactly that worker.
    Worker(u32),
}

impl WorkerAffinity {
    pub fn can_take(self, worker_id: u32) -> bool {
        match self {
            WorkerAffinity::Any => true,
            WorkerAffinity::Every => true,
            WorkerAffinity::Worker(pinned) => pinned == worker_id,
        }
    }
}

/// One unit of work within a seed: a name, a worker-affinity hint, the SQL
/// batches to execute, and the topics it provides/requires of other modules
/// in the same seed. Name and topic comparisons are case-insensitive.
#[derive(Clone, Debug)]
pub struct SeedModule {
    name: String,
    worker_affinity: WorkerAffinity,
    batches: Vec<String>,
    provides: BTreeSet<String>,
    requires: BTreeSet<String>,
}

impl SeedModule {
    pub fn new(name: impl Into<String>) -> Self {
        SeedModule {
            name: name.into(),
            worker_affinity: WorkerAffinity::Any,
            batches: Vec::new(),
            provides: BTreeSet::new(),
            requires: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_affinity(&self) -> WorkerAffinity {
        self.worker_affinity
    }

    pub fn set_worker_affinity(&mut self, affinity: WorkerAffinity) {
        self.worker_affinity = affinity;
    }

    pub fn batches(&self) -> &[String] {
        &self.batches
    }

    pub fn push_batch(&mut self, sql: String) {
        self.batches.push(sql);
    }

    pub fn provides(&self) -> &BTreeSet<String> {
        &self.provides
    }

    pub fn requires(&self) -> &BTreeSet<String> {
        &self.requires
    }

    pub fn add_provides(&mut self, topics: impl IntoIterator<Item = String>) {
        self.provides.extend(topics.into_iter().map(|t| t.to_ascii_lowercase()));
    }

    pub fn add_requires(&mut self, topics: impl IntoIterator<Item = String>) {
        self.requires.extend(topics.into_iter().map(|t| t.to_ascii_lowercase()));
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(|b| b.trim().is_empty())
    }
}

/// A [`Seed`] paired with the ordered list of modules parsed out of its
/// `_Main.sql`.
#[derive(Clone, Debug)]
pub struct LoadedSeed {
    seed: Seed,
    modules: Vec<SeedModule>,
}

impl LoadedSeed {
    pub fn new(seed: Seed, modules: Vec<SeedModule>) -> Self {
        LoadedSeed { seed, modules }
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn modules(&self) -> &[SeedModule] {
        &self.modules
    }
}
