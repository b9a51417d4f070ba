pub mod applicator;
#[cfg(feature = "config")]
pub mod config;
pub mod connection;
pub mod connection_factory;
pub mod console;
pub mod discover;
pub mod drivers;
pub mod error;
pub mod limiter;
pub mod loader;
pub mod merge;
pub mod migration;
pub mod phase;
pub mod plan;
pub mod resolve;
pub mod seed;
pub mod session;
pub mod target;
pub mod target_log;
pub mod validate;
pub mod whatif;

pub use crate::applicator::{Applicator, Disposition};
pub use crate::connection::{NullConnection, TargetConnection};
pub use crate::connection_factory::ConnectionFactory;
pub use crate::console::{Console, LoggingConsole, ProblemSeverity};
pub use crate::error::{Error, Kind, PartialReport, WrapDeployError};
pub use crate::migration::{compare_names, Migration, MigrationState};
pub use crate::phase::{Phase, PhaseSet};
pub use crate::plan::{MigrationPlan, PlanItem};
pub use crate::session::Session;
pub use crate::target::{Target, TargetGroup};
pub use crate::whatif::{WhatIfOverlay, WhatIfState};

#[cfg(feature = "rusqlite")]
pub use rusqlite;

#[cfg(feature = "tokio-postgres")]
pub use tokio_postgres;
