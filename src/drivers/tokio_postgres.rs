use async_trait::async_trait;
use tokio_postgres::Client;
use uuid::Uuid;

use crate::connection::TargetConnection;
use crate::error::{Error, WrapDeployError};
use crate::migration::{Migration, MigrationState};
use crate::phase::Phase;
use crate::target::Target;

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS _deploy";
const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS _deploy.\"Migration\" (\
    \"Name\" text PRIMARY KEY, \"Hash\" text NOT NULL, \"State\" integer NOT NULL)";
const SELECT_APPLIED: &str =
    "SELECT \"Name\", \"Hash\", \"State\" FROM _deploy.\"Migration\" WHERE \"State\" < 3 OR \"Name\" >= $1 ORDER BY \"Name\"";
const UPSERT: &str = "INSERT INTO _deploy.\"Migration\" (\"Name\", \"Hash\", \"State\") VALUES ($1, $2, $3) \
    ON CONFLICT (\"Name\") DO UPDATE SET \"Hash\" = excluded.\"Hash\", \"State\" = excluded.\"State\"";

fn state_code(phase: Phase) -> i32 {
    match phase {
        Phase::Pre => MigrationState::AppliedPre.code(),
        Phase::Core => MigrationState::AppliedCore.code(),
        Phase::Post => MigrationState::AppliedPost.code(),
    }
}

/// [`TargetConnection`] over a live `tokio_postgres::Client`. Grounded on the
/// teacher's `AsyncExecutor`/`AsyncQuerySchemaHistory` impls for `Client` in
/// `drivers/tokio_postgres.rs`: transactional batch execution, a row-by-row
/// read into owned [`Migration`] values.
pub struct TokioPostgresConnection {
    target: Target,
    client: Client,
}

impl TokioPostgresConnection {
    pub fn new(target: Target, client: Client) -> Self {
        TokioPostgresConnection { target, client }
    }
}

#[async_trait]
impl TargetConnection for TokioPostgresConnection {
    async fn initialize_migration_support(&mut self) -> Result<(), Error> {
        self.client
            .batch_execute(CREATE_SCHEMA)
            .await
            .deploy_err("failed to create _deploy schema", None)?;
        self.client
            .batch_execute(CREATE_TABLE)
            .await
            .deploy_err("failed to create registration table", None)
    }

    async fn get_applied_migrations(
        &mut self,
        min_name: Option<&str>,
    ) -> Result<Vec<Migration>, Error> {
        let min_name = min_name.unwrap_or("");
        let rows = self
            .client
            .query(SELECT_APPLIED, &[&min_name])
            .await
            .deploy_err("failed to read registration table", None)?;

        let mut applied = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get(0);
            let hash: String = row.get(1);
            let code: i32 = row.get(2);
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
            .client
            .transaction()
            .await
            .deploy_err("failed to start migration transaction", None)?;
        tx.batch_execute(sql)
            .await
            .deploy_err("failed to execute migration content", None)?;
        tx.execute(UPSERT, &[&name, &hash, &code])
            .await
            .deploy_err("failed to update registration table", None)?;
        tx.commit()
            .await
            .deploy_err("failed to commit migration transaction", None)
    }

    async fn prepare_seed_worker(&mut self, run_id: Uuid, worker_id: u32) -> Result<(), Error> {
        log::info!("{}: seed worker {worker_id} starting (run {run_id})", self.target);
        self.client
            .batch_execute("SELECT 1")
            .await
            .deploy_err("failed to prepare seed worker connection", None)
    }

    async fn execute_seed_batch(&mut self, sql: &str) -> Result<(), Error> {
        self.client
            .batch_execute(sql)
            .await
            .deploy_err("failed to execute seed batch", None)
    }
}
