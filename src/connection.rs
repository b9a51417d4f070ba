use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Error;
use crate::migration::Migration;
use crate::phase::Phase;
use crate::target::Target;

/// A live or simulated connection to one target. The session picks which
/// implementation to construct per SPEC_FULL.md §9's `TargetConnection`
/// design note: a real `Sql` connection (see `drivers::tokio_postgres`/
/// `drivers::rusqlite`), a [`crate::whatif::WhatIfOverlay`] wrapping one, or
/// a `Null` connection that performs no I/O at all. Shaped like the
/// teacher's `executor::{Executor, AsyncExecutor}` trait boundary.
#[async_trait]
pub trait TargetConnection: Send + Sync {
    /// Creates/updates the `_deploy.Migration` registration table. Called
    /// once per target at the start of the Pre phase.
    async fn initialize_migration_support(&mut self) -> Result<(), Error>;

    /// Reads the registration table, filtered to rows with state < 3 (not
    /// fully applied) or name ≥ `min_name`.
    async fn get_applied_migrations(&mut self, min_name: Option<&str>)
        -> Result<Vec<Migration>, Error>;

    /// Executes one phase's content for one migration and records it in the
    /// registration table.
    async fn execute_migration_content(
        &mut self,
        name: &str,
        hash: &str,
        phase: Phase,
        sql: &str,
    ) -> Result<(), Error>;

    /// Prepares a seed worker's own connection before it starts dequeueing.
    async fn prepare_seed_worker(&mut self, run_id: Uuid, worker_id: u32) -> Result<(), Error>;

    /// Executes one seed module's batch of SQL text.
    async fn execute_seed_batch(&mut self, sql: &str) -> Result<(), Error>;
}

/// A connection that performs no I/O and reports nothing applied. Used where
/// a shell host wants plan/validate output with no database reachable at
/// all, distinct from the what-if overlay which still reads real state.
pub struct NullConnection {
    target: Target,
}

impl NullConnection {
    pub fn new(target: Target) -> Self {
        NullConnection { target }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

#[async_trait]
impl TargetConnection for NullConnection {
    async fn initialize_migration_support(&mut self) -> Result<(), Error> {
        Ok(())
    }

    async fn get_applied_migrations(
        &mut self,
        _min_name: Option<&str>,
    ) -> Result<Vec<Migration>, Error> {
        Ok(Vec::new())
    }

    async fn execute_migration_content(
        &mut self,
        _name: &str,
        _hash: &str,
        _phase: Phase,
        _sql: &str,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn prepare_seed_worker(&mut self, _run_id: Uuid, _worker_id: u32) -> Result<(), Error> {
        Ok(())
    }

    async fn execute_seed_batch(&mut self, _sql: &str) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_connection_reports_nothing_applied() {
        let mut conn = NullConnection::new(Target::new("memory", None));
        conn.initialize_migration_support().await.unwrap();
        let applied = conn.get_applied_migrations(None).await.unwrap();
        assert!(applied.is_empty());
        conn.execute_migration_content("m", "H", Phase::Pre, "select 1;")
            .await
            .unwrap();
    }
}
