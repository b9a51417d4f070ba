use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{error, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::applicator::{Applicator, Disposition};
use crate::connection::TargetConnection;
use crate::console::Console;
use crate::error::{Error, Kind};
use crate::limiter::{GlobalParallelism, TargetGroupParallelism};
use crate::migration::Migration;
use crate::phase::{Phase, PhaseSet};
use crate::target::{Target, TargetGroup};

pub use crate::connection_factory::ConnectionFactory;

/// Owns discovery results, enabled phases, and the console/connection
/// collaborators for a deployment run, per SPEC_FULL.md §4.9.
///
/// `begin_applying` registers a group to run in every remaining enabled
/// phase; groups accumulate across calls until `complete_applying` is
/// awaited, at which point the target set freezes and phases run in order,
/// sequentially, across every registered group.
pub struct Session {
    defined: Vec<Migration>,
    enabled_phases: PhaseSet,
    allow_content_in_core_phase: bool,
    max_error_count: usize,
    console: Arc<dyn Console>,
    connection_factory: Arc<dyn ConnectionFactory>,
    global_parallelism: GlobalParallelism,
    log_dir: PathBuf,
    cancellation: CancellationToken,
    groups: Mutex<Vec<TargetGroup>>,
    error_count: AtomicUsize,
}

impl Session {
    pub fn new(
        defined: Vec<Migration>,
        enabled_phases: PhaseSet,
        allow_content_in_core_phase: bool,
        max_error_count: usize,
        console: Arc<dyn Console>,
        connection_factory: Arc<dyn ConnectionFactory>,
        global_parallelism: GlobalParallelism,
        log_dir: PathBuf,
    ) -> Self {
        Session {
            defined,
            enabled_phases,
            allow_content_in_core_phase,
            max_error_count,
            console,
            connection_factory,
            global_parallelism,
            log_dir,
            cancellation: CancellationToken::new(),
            groups: Mutex::new(Vec::new()),
            error_count: AtomicUsize::new(0),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Registers `group` to run in every remaining enabled phase. Legal only
    /// before `complete_applying` has been awaited.
    pub fn begin_applying(&self, group: TargetGroup) {
        self.groups.lock().unwrap().push(group);
    }

    /// Opens a short-lived connection and reads the registration table,
    /// for shell-host preview. Does not affect session state.
    pub async fn get_registered_migrations(&self, target: &Target) -> Result<Vec<Migration>, Error> {
        let mut connection = self.connection_factory.connect(target).await?;
        connection.get_applied_migrations(None).await
    }

    /// Runs every enabled phase, in order, across every registered group.
    /// Phase N+1 does not begin until every target in every group has
    /// finished phase N. Returns once every phase has drained; rethrows any
    /// accumulated error, aggregating more than one into a single wrapper.
    pub async fn complete_applying(&self) -> Result<(), Error> {
        let groups: Vec<TargetGroup> = self.groups.lock().unwrap().drain(..).collect();
        let mut accumulated: Vec<Error> = Vec::new();
        let mut saw_non_cancellation_error = false;

        for phase in self.enabled_phases.iter() {
            if self.cancellation.is_cancelled() {
                break;
            }

            let mut tasks: JoinSet<Result<Disposition, Error>> = JoinSet::new();

            for group in &groups {
                let group_parallelism = Arc::new(TargetGroupParallelism::new(&self.global_parallelism, group));
                for target in group.targets() {
                    let target = target.clone();
                    let defined = self.defined.clone();
                    let console = self.console.clone();
                    let connection_factory = self.connection_factory.clone();
                    let group_parallelism = group_parallelism.clone();
                    let log_dir = self.log_dir.clone();
                    let allow_core = self.allow_content_in_core_phase;
                    let cancellation = self.cancellation.clone();

                    tasks.spawn(async move {
                        let _target_scope = group_parallelism.begin_target_scope(&cancellation).await?;
                        let mut connection = connection_factory.connect(&target).await?;
                        let applicator = Applicator::new(
                            target,
                            defined,
                            console,
                            group_parallelism.target_parallelism(),
                            log_dir,
                            allow_core,
                        );
                        applicator
                            .apply_async(connection.as_mut(), phase, &cancellation)
                            .await
                    });
                }
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(_disposition)) => {}
                    Ok(Err(err)) => {
                        if err.is_cancelled() {
                            accumulated.push(err);
                        } else {
                            saw_non_cancellation_error = true;
                            let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
                            accumulated.push(err);
                            if count > self.max_error_count {
                                warn!("error count {count} exceeds MaxErrorCount, cancelling session");
                                self.cancellation.cancel();
                            }
                        }
                    }
                    Err(join_err) => {
                        error!("applicator task panicked: {join_err}");
                        saw_non_cancellation_error = true;
                        accumulated.push(Error::new(
                            Kind::Connection(
                                "applicator task panicked".to_string(),
                                Box::new(std::io::Error::other(join_err.to_string())),
                            ),
                            None,
                        ));
                    }
                }
            }

            if saw_non_cancellation_error {
                break;
            }
        }

        finish(accumulated, saw_non_cancellation_error)
    }
}

fn finish(mut accumulated: Vec<Error>, saw_non_cancellation_error: bool) -> Result<(), Error> {
    if saw_non_cancellation_error {
        accumulated.retain(|e| !e.is_cancelled());
    }

    match accumulated.len() {
        0 => Ok(()),
        1 => Err(accumulated.remove(0)),
        n => Err(Error::new(Kind::Aggregate(n, Box::new(accumulated.remove(0))), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NullConnection;
    use crate::limiter::SemaphoreLimiter;

    struct NullFactory;

    #[async_trait]
    impl ConnectionFactory for NullFactory {
        async fn connect(&self, target: &Target) -> Result<Box<dyn TargetConnection>, Error> {
            Ok(Box::new(NullConnection::new(target.clone())))
        }
    }

    fn global() -> GlobalParallelism {
        GlobalParallelism::new(4, 4)
    }

    #[tokio::test]
    async fn session_with_no_groups_completes_immediately() {
        let tmp = tempfile::TempDir::new().unwrap();
        let session = Session::new(
            vec![],
            PhaseSet::all(),
            false,
            0,
            Arc::new(crate::console::LoggingConsole),
            Arc::new(NullFactory),
            global(),
            tmp.path().to_path_buf(),
        );
        session.complete_applying().await.unwrap();
    }

    #[tokio::test]
    async fn applies_across_every_target_in_a_group() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut m = Migration::applied_only(
            "a",
            "H".into(),
            crate::migration::MigrationState::NotApplied,
        );
        m.phase_content_mut(Phase::Pre).sql = "select 1;".into();
        m.set_content_loaded(true);
        m.set_path(std::path::PathBuf::from("a/_Main.sql"));

        let session = Session::new(
            vec![m],
            PhaseSet::all(),
            false,
            0,
            Arc::new(crate::console::LoggingConsole),
            Arc::new(NullFactory),
            global(),
            tmp.path().to_path_buf(),
        );
        let group = TargetGroup::new(
            vec![Target::new("a", None), Target::new("b", None)],
            None,
            0,
            0,
        );
        session.begin_applying(group);
        session.complete_applying().await.unwrap();
    }

    #[tokio::test]
    async fn cancelling_mid_run_surfaces_a_cancellation_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let session = Session::new(
            vec![],
            PhaseSet::all(),
            false,
            0,
            Arc::new(crate::console::LoggingConsole),
            Arc::new(NullFactory),
            global(),
            tmp.path().to_path_buf(),
        );
        session.cancel();
        let group = TargetGroup::new(vec![Target::new("a", None)], None, 0, 0);
        session.begin_applying(group);
        let result = session.complete_applying().await;
        assert!(result.is_ok() || result.unwrap_err().is_cancelled());
    }

    #[allow(dead_code)]
    fn silence_unused_import_warning() -> Arc<dyn crate::limiter::Limiter> {
        SemaphoreLimiter::new(1)
    }
}
