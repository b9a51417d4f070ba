use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::info;
use uuid::Uuid;

use crate::connection::TargetConnection;
use crate::error::{Error, Kind};
use crate::migration::{compare_names, Migration, MigrationState};
use crate::phase::Phase;
use crate::target::Target;

#[derive(Clone, Copy, Debug)]
struct SimEntry {
    hash_index: usize,
    state: MigrationState,
}

/// Shared simulated-state map keyed by `(target identity, lowercased name)`,
/// per SPEC_FULL.md §4.12. Cheap to clone and share across every overlay
/// constructed for the same session, the way the teacher's drivers wrap a
/// thin handle over a shared client (`drivers/tokio_postgres.rs`).
#[derive(Clone, Default)]
pub struct WhatIfState {
    hashes: Arc<Mutex<Vec<String>>>,
    entries: Arc<Mutex<HashMap<(usize, String), SimEntry>>>,
}

impl WhatIfState {
    pub fn new() -> Self {
        WhatIfState::default()
    }

    fn record(&self, target: &Target, name: &str, hash: &str, state: MigrationState) {
        let hash_index = {
            let mut hashes = self.hashes.lock().unwrap();
            hashes.push(hash.to_string());
            hashes.len() - 1
        };
        let key = (target.identity(), name.to_ascii_lowercase());
        self.entries
            .lock()
            .unwrap()
            .insert(key, SimEntry { hash_index, state });
    }

    fn lookup(&self, target: &Target, name: &str) -> Option<SimEntry> {
        let key = (target.identity(), name.to_ascii_lowercase());
        self.entries.lock().unwrap().get(&key).copied()
    }

    fn hash_of(&self, entry: SimEntry) -> String {
        self.hashes.lock().unwrap()[entry.hash_index].clone()
    }
}

/// Wraps a real target connection and overlays simulated migration state on
/// top of it, performing no writes of its own. Grounded on the driver
/// wrapper shape in `drivers/tokio_postgres.rs`, generalized to decorate any
/// [`TargetConnection`] rather than own a concrete client.
pub struct WhatIfOverlay<C: TargetConnection> {
    inner: C,
    target: Target,
    state: WhatIfState,
}

impl<C: TargetConnection> WhatIfOverlay<C> {
    pub fn new(inner: C, target: Target, state: WhatIfState) -> Self {
        WhatIfOverlay {
            inner,
            target,
            state,
        }
    }
}

#[async_trait]
impl<C: TargetConnection> TargetConnection for WhatIfOverlay<C> {
    async fn initialize_migration_support(&mut self) -> Result<(), Error> {
        info!("{}: would initialize migration support", self.target);
        Ok(())
    }

    async fn get_applied_migrations(
        &mut self,
        min_name: Option<&str>,
    ) -> Result<Vec<Migration>, Error> {
        let mut real = self.inner.get_applied_migrations(min_name).await?;

        for migration in real.iter_mut() {
            if let Some(entry) = self.state.lookup(&self.target, migration.name()) {
                migration.set_state(entry.state);
            }
        }

        let present: std::collections::HashSet<String> = real
            .iter()
            .map(|m| m.name().to_ascii_lowercase())
            .collect();

        let entries_snapshot: Vec<((usize, String), SimEntry)> = self
            .state
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|((target_id, _), _)| *target_id == self.target.identity())
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        for ((_, name), entry) in entries_snapshot {
            if !present.contains(&name) {
                real.push(Migration::applied_only(
                    name,
                    self.state.hash_of(entry),
                    entry.state,
                ));
            }
        }

        real.sort_by(|a, b| compare_names(a.name(), b.name()));
        Ok(real)
    }

    async fn execute_migration_content(
        &mut self,
        name: &str,
        hash: &str,
        phase: Phase,
        _sql: &str,
    ) -> Result<(), Error> {
        let target_state = match phase {
            Phase::Pre => MigrationState::AppliedPre,
            Phase::Core => MigrationState::AppliedCore,
            Phase::Post => MigrationState::AppliedPost,
        };

        if let Some(existing) = self.state.lookup(&self.target, name) {
            if target_state <= existing.state {
                return Err(Error::new(Kind::SimulationOutOfOrder(name.to_string()), None));
            }
        }

        info!("{}: would execute migration \"{name}\" phase {phase}", self.target);
        self.state.record(&self.target, name, hash, target_state);
        Ok(())
    }

    async fn prepare_seed_worker(&mut self, _run_id: Uuid, worker_id: u32) -> Result<(), Error> {
        info!("{}: would prepare connection (worker {worker_id})", self.target);
        Ok(())
    }

    async fn execute_seed_batch(&mut self, sql: &str) -> Result<(), Error> {
        let first_line = sql.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        info!(
            "{}: would execute batch beginning with: {}",
            self.target,
            first_line.trim()
        );
        Ok(())
    }
}
