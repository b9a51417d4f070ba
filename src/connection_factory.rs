use async_trait::async_trait;

use crate::connection::TargetConnection;
use crate::error::Error;
use crate::target::Target;

/// Builds a connection for one target. Implemented by the concrete drivers
/// (`drivers::tokio_postgres`, `drivers::rusqlite`) and by the what-if
/// overlay factory used when `IsWhatIfMode` is set. Shared between
/// [`crate::session::Session`] and [`crate::seed::applicator::SeedApplicator`]
/// since both need to open a fresh connection per task.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, target: &Target) -> Result<Box<dyn TargetConnection>, Error>;
}
