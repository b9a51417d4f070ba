use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::connection::TargetConnection;
use crate::console::{Console, ProblemSeverity};
use crate::error::{Error, Kind, PartialReport};
use crate::limiter::{Limiter, TargetParallelism};
use crate::merge::merge_migrations;
use crate::migration::Migration;
use crate::phase::Phase;
use crate::plan::{plan_migrations, MigrationPlan};
use crate::resolve::resolve_references;
use crate::target::Target;
use crate::target_log::TargetLog;
use crate::validate::validate_plan;

/// Outcome of a completed `ApplyAsync` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded,
    Incomplete,
    Failed,
}

/// One applicator per (session, target), per SPEC_FULL.md §4.8. Owns the
/// discovered-on-disk migrations and everything needed to merge, plan,
/// validate, and apply them against one target for one phase.
pub struct Applicator {
    target: Target,
    defined: Vec<Migration>,
    console: Arc<dyn Console>,
    parallelism: TargetParallelism,
    log_dir: PathBuf,
    allow_content_in_core_phase: bool,
}

impl Applicator {
    pub fn new(
        target: Target,
        defined: Vec<Migration>,
        console: Arc<dyn Console>,
        parallelism: TargetParallelism,
        log_dir: PathBuf,
        allow_content_in_core_phase: bool,
    ) -> Self {
        Applicator {
            target,
            defined,
            console,
            parallelism,
            log_dir,
            allow_content_in_core_phase,
        }
    }

    /// The atomic operation described by SPEC_FULL.md §4.8 steps 1-12.
    pub async fn apply_async(
        &self,
        connection: &mut dyn TargetConnection,
        phase: Phase,
        cancellation: &CancellationToken,
    ) -> Result<Disposition, Error> {
        let start = Instant::now();
        let started_at = SystemTime::now();
        let label = format!("{phase}");
        let mut log = TargetLog::create(&self.log_dir, &self.target, &label)?;
        log.write_header(&self.target, phase, started_at)?;

        self.console.report_starting(&self.target);

        let mut applied_count = 0usize;
        let result = self
            .apply_inner(connection, phase, cancellation, &mut log, &mut applied_count)
            .await;

        let disposition = match &result {
            Ok(disposition) => *disposition,
            Err(err) if err.is_cancelled() => Disposition::Incomplete,
            Err(_) => Disposition::Failed,
        };

        let elapsed = start.elapsed();
        self.console
            .report_applied(&self.target, applied_count, elapsed);
        if let Err(err) = log.close(applied_count, elapsed) {
            warn!("{}: failed to close target log: {err}", self.target);
        }

        match result {
            Ok(_) => Ok(disposition),
            Err(err) => Err(err.with_report(PartialReport::new(applied_count))),
        }
    }

    async fn apply_inner(
        &self,
        connection: &mut dyn TargetConnection,
        phase: Phase,
        cancellation: &CancellationToken,
        log: &mut TargetLog,
        applied_count: &mut usize,
    ) -> Result<Disposition, Error> {
        let min_name = self.defined.first().map(|m| m.name().to_string());
        let applied = connection
            .get_applied_migrations(min_name.as_deref())
            .await?;

        let mut merged = merge_migrations(self.defined.clone(), applied)?;
        resolve_references(&mut merged);
        let mut plan = plan_migrations(merged);

        if plan.is_empty() {
            log.write_line("Nothing to do.")?;
            return Ok(Disposition::Succeeded);
        }

        if !validate_plan(&mut plan, phase, &self.target.to_string()) {
            self.report_diagnostics(&plan);
            self.console.report_problem(
                &self.target,
                ProblemSeverity::Error,
                "migration validation failed",
            );
            let error_count = plan
                .migrations()
                .iter()
                .flat_map(|m| m.diagnostics())
                .filter(|d| d.is_error())
                .count();
            return Err(Error::new(
                Kind::ValidationFailed(self.target.to_string(), error_count),
                None,
            ));
        }

        if plan.is_core_required() && !self.allow_content_in_core_phase {
            self.console.report_problem(
                &self.target,
                ProblemSeverity::Error,
                "plan requires core-phase content, which is not allowed for this session",
            );
            return Err(Error::new(
                Kind::CoreNotAllowed(self.target.to_string()),
                None,
            ));
        }

        log.write_table(&plan)?;

        let items = plan.get_items(phase);
        if items.is_empty() {
            log.write_line("Nothing to do for the current phase.")?;
            return Ok(Disposition::Succeeded);
        }

        if phase == Phase::Pre {
            connection.initialize_migration_support().await?;
        }

        for item in items {
            if cancellation.is_cancelled() {
                self.console.report_problem(
                    &self.target,
                    ProblemSeverity::Warning,
                    "deployment was cancelled",
                );
                return Err(Error::new(
                    Kind::Cancelled,
                    Some(PartialReport::new(*applied_count)),
                ));
            }

            let migration = plan.migration(item.migration_index);
            let name = migration.name().to_string();
            let hash = migration.hash().to_string();
            let sql = migration.phase_content(item.content_phase).sql.clone();

            self.console.report_applying(&self.target, &name);

            let scope = self.parallelism.actions.begin_scope(cancellation).await?;
            let outcome = connection
                .execute_migration_content(&name, &hash, item.content_phase, &sql)
                .await;
            drop(scope);
            outcome?;

            if plan.counts_toward_applied(item) {
                *applied_count += 1;
            }
        }

        Ok(Disposition::Succeeded)
    }

    fn report_diagnostics(&self, plan: &MigrationPlan) {
        for migration in plan.migrations() {
            for diagnostic in migration.diagnostics() {
                let severity = if diagnostic.is_error() {
                    ProblemSeverity::Error
                } else {
                    ProblemSeverity::Warning
                };
                self.console
                    .report_problem(&self.target, severity, &diagnostic.message);
            }
        }
    }
}
