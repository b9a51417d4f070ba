use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connection_factory::ConnectionFactory;
use crate::console::{Console, ProblemSeverity};
use crate::error::{Error, Kind};
use crate::limiter::{Limiter, TargetParallelism};
use crate::seed::entity::LoadedSeed;
use crate::seed::queue::{expand_to_queue_items, DependencyQueue};
use crate::target::Target;

/// Drives one seed against one target with a pool of workers, per
/// SPEC_FULL.md §4.11. Grounded on the semaphore-gated `tokio::spawn` worker
/// fan-out in `other_examples/4a76ad5a_bixority-pg-migrate__src-phases.rs.rs`,
/// generalized from a flat task list to a topic-ordered dependency queue.
pub struct SeedApplicator {
    target: Target,
    console: Arc<dyn Console>,
    parallelism: TargetParallelism,
    worker_count: u32,
}

impl SeedApplicator {
    pub fn new(
        target: Target,
        console: Arc<dyn Console>,
        parallelism: TargetParallelism,
        worker_count: u32,
    ) -> Self {
        SeedApplicator {
            target,
            console,
            parallelism,
            worker_count: worker_count.max(1),
        }
    }

    /// Populates the queue, validates it, then spawns `worker_count` worker
    /// tasks, each with its own connection and a fresh ordinal `workerId`
    /// starting at 1, sharing one `runId` for the whole invocation. Returns
    /// the number of modules applied, or the first non-cancellation error
    /// any worker raised (fail-fast: the queue is cleared so the remaining
    /// workers drain without doing further work).
    pub async fn apply_async(
        &self,
        connection_factory: Arc<dyn ConnectionFactory>,
        seed: &LoadedSeed,
        cancellation: &CancellationToken,
    ) -> Result<usize, Error> {
        let items = expand_to_queue_items(seed.modules(), self.worker_count);
        let queue = Arc::new(DependencyQueue::new(items));

        let validation_errors = queue.validate();
        if !validation_errors.is_empty() {
            for err in &validation_errors {
                self.console
                    .report_problem(&self.target, ProblemSeverity::Error, &err.to_string());
            }
            return Err(Error::new(
                Kind::ValidationFailed(self.target.to_string(), validation_errors.len()),
                None,
            ));
        }

        let run_id = Uuid::new_v4();
        let applied_count = Arc::new(AtomicUsize::new(0));
        let mut tasks: JoinSet<Result<(), Error>> = JoinSet::new();

        for worker_id in 1..=self.worker_count {
            let queue = queue.clone();
            let connection_factory = connection_factory.clone();
            let target = self.target.clone();
            let console = self.console.clone();
            let actions: Arc<dyn Limiter> = self.parallelism.actions.clone();
            let cancellation = cancellation.clone();
            let applied_count = applied_count.clone();

            tasks.spawn(async move {
                let outcome = run_worker(
                    worker_id,
                    run_id,
                    &target,
                    connection_factory.as_ref(),
                    &queue,
                    actions.as_ref(),
                    &console,
                    &cancellation,
                    &applied_count,
                )
                .await;

                if let Err(err) = &outcome {
                    if !err.is_cancelled() {
                        queue.clear();
                    }
                }
                outcome
            });
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(Error::new(
                            Kind::Connection(
                                "seed worker task panicked".to_string(),
                                Box::new(std::io::Error::other(join_err.to_string())),
                            ),
                            None,
                        ));
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(applied_count.load(Ordering::SeqCst)),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    worker_id: u32,
    run_id: Uuid,
    target: &Target,
    connection_factory: &dyn ConnectionFactory,
    queue: &DependencyQueue,
    actions: &dyn Limiter,
    console: &Arc<dyn Console>,
    cancellation: &CancellationToken,
    applied_count: &AtomicUsize,
) -> Result<(), Error> {
    let mut connection = connection_factory.connect(target).await?;

    let scope = actions.begin_scope(cancellation).await?;
    let prepared = connection.prepare_seed_worker(run_id, worker_id).await;
    drop(scope);
    prepared?;

    loop {
        let Some(item) = queue.dequeue(worker_id, cancellation).await else {
            return Ok(());
        };

        console.report_applying(target, item.name());

        for batch in item.module().batches() {
            let scope = actions.begin_scope(cancellation).await?;
            let outcome = connection.execute_seed_batch(batch).await;
            drop(scope);
            outcome?;
        }

        applied_count.fetch_add(1, Ordering::SeqCst);
        queue.complete(&item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NullConnection;
    use crate::limiter::SemaphoreLimiter;
    use crate::seed::entity::{Seed, SeedModule};
    use async_trait::async_trait;

    struct NullFactory;

    #[async_trait]
    impl ConnectionFactory for NullFactory {
        async fn connect(&self, target: &Target) -> Result<Box<dyn crate::connection::TargetConnection>, Error> {
            Ok(Box::new(NullConnection::new(target.clone())))
        }
    }

    fn parallelism() -> TargetParallelism {
        TargetParallelism {
            actions: SemaphoreLimiter::new(4) as Arc<dyn Limiter>,
            max_actions_per_target: 4,
        }
    }

    fn loaded_seed(modules: Vec<SeedModule>) -> LoadedSeed {
        LoadedSeed::new(Seed::new("s", std::path::PathBuf::from("s/_Main.sql")), modules)
    }

    #[tokio::test]
    async fn applies_every_module_and_counts_them() {
        let mut a = SeedModule::new("a");
        a.push_batch("select 1;".to_string());
        let mut b = SeedModule::new("b");
        b.add_requires(vec!["x".to_string()]);
        b.push_batch("select 2;".to_string());
        let mut a_providing = a.clone();
        a_providing.add_provides(vec!["x".to_string()]);

        let seed = loaded_seed(vec![a_providing, b]);
        let target = Target::new("memory", None);
        let applicator = SeedApplicator::new(
            target,
            Arc::new(crate::console::LoggingConsole),
            parallelism(),
            2,
        );
        let cancel = CancellationToken::new();
        let applied = applicator
            .apply_async(Arc::new(NullFactory), &seed, &cancel)
            .await
            .unwrap();
        assert_eq!(applied, 2);
    }

    #[tokio::test]
    async fn invalid_graph_fails_before_spawning_workers() {
        let mut m = SeedModule::new("a");
        m.add_requires(vec!["missing".to_string()]);
        let seed = loaded_seed(vec![m]);
        let target = Target::new("memory", None);
        let applicator = SeedApplicator::new(
            target,
            Arc::new(crate::console::LoggingConsole),
            parallelism(),
            1,
        );
        let cancel = CancellationToken::new();
        let result = applicator.apply_async(Arc::new(NullFactory), &seed, &cancel).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_seed_applies_nothing() {
        let seed = loaded_seed(vec![]);
        let target = Target::new("memory", None);
        let applicator = SeedApplicator::new(
            target,
            Arc::new(crate::console::LoggingConsole),
            parallelism(),
            1,
        );
        let cancel = CancellationToken::new();
        let applied = applicator
            .apply_async(Arc::new(NullFactory), &seed, &cancel)
            .await
            .unwrap();
        assert_eq!(applied, 0);
    }
}
