use async_trait::async_trait;
use rusqlite::Connection as RqlConnection;
use uuid::Uuid;

use crate::connection::TargetConnection;
use crate::error::{Error, Kind};
use crate::migration::{Migration, MigrationState};
use crate::phase::Phase;
use crate::target::Target;

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS _deploy_migration (name TEXT PRIMARY KEY, hash TEXT NOT NULL, state INTEGER NOT NULL)";
const SELECT_APPLIED: &str =
    "SELECT name, hash, state FROM _deploy_migration WHERE state < 3 OR name >= ?1 ORDER BY name";
const UPSERT: &str = "INSERT INTO _deploy_migration (name, hash, state) VALUES (?1, ?2, ?3) \
    ON CONFLICT (name) DO UPDATE SET hash = excluded.hash, state = excluded.state";

fn state_code(phase: Phase) -> i32 {
    match phase {
        Phase::Pre => MigrationState::AppliedPre.code(),
        Phase::Core => MigrationState::AppliedCore.code(),
        Phase::Post => MigrationState::AppliedPost.code(),
    }
}

fn wrap(msg: &str, err: rusqlite::Error) -> Error {
    Error::new(Kind::Connection(msg.to_string(), Box::new(err)), None)
}

/// [`TargetConnection`] over a `rusqlite::Connection`. Grounded on the
/// teacher's `Executor`/`QuerySchemaHistory` impls for `rusqlite::Connection`
/// in `drivers/rusqlite.rs`. `rusqlite` has no async API, so every call below
/// blocks its executor thread for the duration of the statement, the same
/// tradeoff the teacher's sync driver makes one layer up at the trait level.
pub struct RusqliteConnection {
    target: Target,
    connection: RqlConnection,
}

impl RusqliteConnection {
    pub fn new(target: Target, connection: RqlConnection) -> Self {
        RusqliteConnection { target, connection }
    }
}

#[async_trait]
impl TargetConnection for RusqliteConnection {
    async fn initialize_migration_support(&mut self) -> Result<(), Error> {
        self.connection
            .execute_batch(CREATE_TABLE)
            .map_err(|err| wrap("failed to create registration table", err))
    }

    async fn get_applied_migrations(
        &mut self,
        min_name: Option<&str>,
    ) -> Result<Vec<Migration>, Error> {
        let min_name = min_name.unwrap_or("");
        let mut stmt = self
            .connection
            .prepare(SELECT_APPLIED)
            .map_err(|err| wrap("failed to prepare registration query", err))?;
        let mut rows = stmt
            .query([min_name])
            .map_err(|err| wrap("failed to read registration table", err))?;

        let mut applied = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| wrap("failed to read registration row", err))?
        {
            let name: String = row.get(0).map_err(|err| wrap("malformed registration row", err))?;
            let hash: String = row.get(1).map_err(|err| wrap("malformed registration row", err))?;
            let code: i32 = row.get(2).map_err(|err| wrap("malformed registration row", err))?;
            let state = MigrationState::from_code(code).unwrap_or(MigrationState::NotApplied);
            applied.push(Migration::applied_only(name, hash, state));
        }
        Ok(applied)
    }

    async fn execute_migration_content(
        &mut self,
        name: &str,
        hash: &str,
        phase: Phase,
        sql: &str,
    ) -> Result<(), Error> {
        let code = state_code(phase);
        let tx = self
            .connection
            .transaction()
            .map_err(|err| wrap("failed to start migration transaction", err))?;
        tx.execute_batch(sql)
            .map_err(|err| wrap("failed to execute migration content", err))?;
        tx.execute(UPSERT, rusqlite::params![name, hash, code])
            .map_err(|err| wrap("failed to update registration table", err))?;
        tx.commit()
            .map_err(|err| wrap("failed to commit migration transaction", err))
    }

    async fn prepare_seed_worker(&mut self, run_id: Uuid, worker_id: u32) -> Result<(), Error> {
        log::info!("{}: seed worker {worker_id} starting (run {run_id})", self.target);
        Ok(())
    }

    async fn execute_seed_batch(&mut self, sql: &str) -> Result<(), Error> {
        self.connection
            .execute_batch(sql)
            .map_err(|err| wrap("failed to execute seed batch", err))
    }
}
