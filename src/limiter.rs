use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Kind};
use crate::target::TargetGroup;

/// A held scope on one or more [`Limiter`]s. Dropping releases every permit
/// it holds; calling [`LimiterScope::release`] more than once is a no-op,
/// per SPEC_FULL.md §4.1.
pub struct LimiterScope {
    permits: Option<Vec<OwnedSemaphorePermit>>,
}

impl LimiterScope {
    fn single(permit: OwnedSemaphorePermit) -> Self {
        LimiterScope {
            permits: Some(vec![permit]),
        }
    }

    fn combine(mut a: LimiterScope, b: LimiterScope) -> Self {
        let mut permits = a.permits.take().unwrap_or_default();
        if let Some(mut other) = b.permits {
            permits.append(&mut other);
        }
        LimiterScope {
            permits: Some(permits),
        }
    }

    pub fn release(&mut self) {
        self.permits.take();
    }
}

/// A counting semaphore with an effective limit, grounded on the
/// `tokio::sync::Semaphore` + `tokio_util::sync::CancellationToken`
/// acquire/spawn pattern in `other_examples/4a76ad5a_bixority-pg-migrate__src-phases.rs.rs`.
#[async_trait]
pub trait Limiter: Send + Sync {
    async fn begin_scope(&self, cancellation: &CancellationToken) -> Result<LimiterScope, Error>;
    fn effective_limit(&self) -> usize;
}

pub struct SemaphoreLimiter {
    semaphore: Arc<Semaphore>,
    effective_limit: usize,
}

impl SemaphoreLimiter {
    pub fn new(effective_limit: usize) -> Arc<Self> {
        Arc::new(SemaphoreLimiter {
            semaphore: Arc::new(Semaphore::new(effective_limit.max(1))),
            effective_limit,
        })
    }
}

#[async_trait]
impl Limiter for SemaphoreLimiter {
    async fn begin_scope(&self, cancellation: &CancellationToken) -> Result<LimiterScope, Error> {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(Error::new(Kind::Cancelled, None)),
            permit = self.semaphore.clone().acquire_owned() => {
                permit
                    .map(LimiterScope::single)
                    .map_err(|_| Error::new(Kind::Cancelled, None))
            }
        }
    }

    fn effective_limit(&self) -> usize {
        self.effective_limit
    }
}

/// Wraps two limiters; acquiring the composite acquires both in order and
/// releases both on scope drop. Effective limit is the minimum of the two.
pub struct CompositeLimiter {
    outer: Arc<dyn Limiter>,
    inner: Arc<dyn Limiter>,
}

impl CompositeLimiter {
    pub fn new(outer: Arc<dyn Limiter>, inner: Arc<dyn Limiter>) -> Arc<Self> {
        Arc::new(CompositeLimiter { outer, inner })
    }
}

#[async_trait]
impl Limiter for CompositeLimiter {
    async fn begin_scope(&self, cancellation: &CancellationToken) -> Result<LimiterScope, Error> {
        let outer_scope = self.outer.begin_scope(cancellation).await?;
        let inner_scope = self.inner.begin_scope(cancellation).await?;
        Ok(LimiterScope::combine(outer_scope, inner_scope))
    }

    fn effective_limit(&self) -> usize {
        self.outer.effective_limit().min(self.inner.effective_limit())
    }
}

/// The fleet-wide parallelism budget: one limiter for `max_actions`, plus the
/// per-target action ceiling every group's own limit is clamped against.
pub struct GlobalParallelism {
    actions: Arc<SemaphoreLimiter>,
    max_actions_per_target: usize,
}

impl GlobalParallelism {
    pub fn new(max_actions: usize, max_actions_per_target: usize) -> Self {
        let max_actions = resolve_zero(max_actions);
        let max_actions_per_target = resolve_zero(max_actions_per_target).min(max_actions);
        GlobalParallelism {
            actions: SemaphoreLimiter::new(max_actions),
            max_actions_per_target,
        }
    }

    pub fn actions(&self) -> Arc<dyn Limiter> {
        self.actions.clone() as Arc<dyn Limiter>
    }

    pub fn max_actions_per_target(&self) -> usize {
        self.max_actions_per_target
    }
}

/// A view handed to each target's applicator: the (possibly composite)
/// action limiter to acquire before every SQL round-trip, and the clamped
/// per-target action ceiling.
pub struct TargetParallelism {
    pub actions: Arc<dyn Limiter>,
    pub max_actions_per_target: usize,
}

/// Derives a per-group parallelism budget from the global one: a dedicated
/// target-scope limiter (size `max_parallelism`), and an action limiter that
/// composes the group's own limit with the global one only when the group is
/// stricter.
pub struct TargetGroupParallelism {
    targets: Arc<SemaphoreLimiter>,
    actions: Arc<dyn Limiter>,
    max_actions_per_target: usize,
}

impl TargetGroupParallelism {
    pub fn new(global: &GlobalParallelism, group: &TargetGroup) -> Self {
        let targets = SemaphoreLimiter::new(group.max_parallelism());
        let max_actions_per_target = group
            .max_parallelism_per_target()
            .min(global.max_actions_per_target());

        let actions: Arc<dyn Limiter> = if group.max_parallelism_per_target() < global.max_actions_per_target()
        {
            CompositeLimiter::new(
                SemaphoreLimiter::new(group.max_parallelism_per_target()),
                global.actions(),
            )
        } else {
            global.actions()
        };

        TargetGroupParallelism {
            targets,
            actions,
            max_actions_per_target,
        }
    }

    pub async fn begin_target_scope(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<LimiterScope, Error> {
        self.targets.begin_scope(cancellation).await
    }

    pub fn target_parallelism(&self) -> TargetParallelism {
        TargetParallelism {
            actions: self.actions.clone(),
            max_actions_per_target: self.max_actions_per_target,
        }
    }
}

fn resolve_zero(value: usize) -> usize {
    if value == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        value
    }
}
