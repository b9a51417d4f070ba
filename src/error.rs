use std::fmt;
use std::path::PathBuf;

use thiserror::Error as TError;

/// The outcome of a completed or partially-completed deployment, attached to
/// an [`Error`] so callers can see what was applied before the failure.
#[derive(Clone, Debug, Default)]
pub struct PartialReport {
    applied_count: usize,
}

impl PartialReport {
    pub fn new(applied_count: usize) -> Self {
        Self { applied_count }
    }

    pub fn applied_count(&self) -> usize {
        self.applied_count
    }
}

/// An error surfaced by the deployment engine.
#[derive(Debug)]
pub struct Error {
    kind: Box<Kind>,
    report: Option<PartialReport>,
}

impl Error {
    pub fn new(kind: Kind, report: Option<PartialReport>) -> Error {
        Error {
            kind: Box::new(kind),
            report,
        }
    }

    pub fn report(&self) -> Option<&PartialReport> {
        self.report.as_ref()
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// `true` for a cancellation raised by the session's own token, as opposed
    /// to any other failure. Used to implement the cancellation-suppression
    /// rule in `Session::complete_applying`.
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.kind, Kind::Cancelled)
    }

    /// Attach a partial report if one isn't already set, consuming self.
    pub fn with_report(mut self, report: PartialReport) -> Self {
        if self.report.is_none() {
            self.report = Some(report);
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

/// Enum listing the possible failure kinds raised by the deployment engine, one
/// variant per case named in SPEC_FULL.md §7.
#[derive(Debug, TError)]
pub enum Kind {
    #[error("migration \"{0}\" declares a dependency on itself")]
    SelfDependency(String),

    #[error("migration \"{0}\" depends on \"{1}\", which must run later in the sequence")]
    DependencyOutOfOrder(String, String),

    #[error("migration \"{0}\" depends on \"{1}\", which was not found")]
    DependencyNotFound(String, String),

    #[error(
        "migration \"{0}\" has a hash of {1} which differs from the hash recorded when it was \
         applied ({2}); revert the file to its applied content or update the registration row \
         manually"
    )]
    HashChanged(String, String, String),

    #[error("migration \"{0}\" has code that must be applied in an earlier phase first")]
    PhaseOutOfOrder(String),

    #[error(
        "migration \"{0}\" is only partially applied on {1}, but code for the migration was not \
         found"
    )]
    MissingOnDisk(String, String),

    #[error("migration \"{0}\" is registered on {1} but is not applied in any phase")]
    NeverApplied(String, String),

    #[error("validation failed for {0}: {1} error(s)")]
    ValidationFailed(String, usize),

    #[error("plan requires core-phase content on {0}, which is not allowed for this session")]
    CoreNotAllowed(String),

    #[error("seed topic \"{0}\" is required by module \"{1}\" but is not provided by any module")]
    UnprovidedTopic(String, String),

    #[error("seed module dependency graph contains a cycle through \"{0}\"")]
    DependencyCycle(String),

    #[error("migration name must look like a directory name on disk")]
    InvalidMigrationName,

    #[error("invalid migrations path {0}: {1}")]
    InvalidPath(PathBuf, std::io::Error),

    #[error("invalid migration file at path {0}: {1}")]
    InvalidMigrationFile(PathBuf, std::io::Error),

    #[error("error parsing config: {0}")]
    ConfigError(String),

    #[error("invalid seed file at path {0}: {1}")]
    InvalidSeedFile(PathBuf, String),

    #[error("deployment was cancelled")]
    Cancelled,

    #[error("cannot simulate applying \"{0}\" in a phase at or before its already-simulated phase")]
    SimulationOutOfOrder(String),

    #[error("{0}")]
    Connection(String, #[source] Box<dyn std::error::Error + Sync + Send>),

    #[error("{0} error(s) occurred during deployment")]
    Aggregate(usize, #[source] Box<Error>),
}

/// Helper trait for annotating a connection/IO `Result` with a deployment-engine
/// message and the partial report accumulated so far.
pub trait WrapDeployError<T, E> {
    fn deploy_err(self, msg: &str, applied_count: Option<usize>) -> Result<T, Error>;
}

impl<T, E> WrapDeployError<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn deploy_err(self, msg: &str, applied_count: Option<usize>) -> Result<T, Error> {
        match self {
            Ok(v) => Ok(v),
            Err(err) => Err(Error {
                kind: Box::new(Kind::Connection(msg.into(), Box::new(err))),
                report: applied_count.map(PartialReport::new),
            }),
        }
    }
}
