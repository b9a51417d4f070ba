use log::{error, info, warn};

use crate::target::Target;

/// Severity of a problem reported through [`Console::report_problem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProblemSeverity {
    Warning,
    Error,
}

/// Structured progress callbacks the engine calls while applying a plan. The
/// engine never writes to stdout itself; a host turns these into terminal
/// output. Named per SPEC_FULL.md §7.
pub trait Console: Send + Sync {
    fn report_starting(&self, target: &Target);
    fn report_applying(&self, target: &Target, migration_name: &str);
    fn report_applied(&self, target: &Target, applied_count: usize, elapsed: std::time::Duration);
    fn report_problem(&self, target: &Target, severity: ProblemSeverity, message: &str);
}

/// Default [`Console`] for local development and tests, routing through the
/// `log` crate the way the teacher's `traits/` modules log directly via
/// `log::info!`/`log::error!` rather than through a callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingConsole;

impl Console for LoggingConsole {
    fn report_starting(&self, target: &Target) {
        info!("{target}: starting");
    }

    fn report_applying(&self, target: &Target, migration_name: &str) {
        info!("{target}: applying {migration_name}");
    }

    fn report_applied(&self, target: &Target, applied_count: usize, elapsed: std::time::Duration) {
        info!(
            "{target}: applied {applied_count} migration(s) in {:.3} second(s)",
            elapsed.as_secs_f64()
        );
    }

    fn report_problem(&self, target: &Target, severity: ProblemSeverity, message: &str) {
        match severity {
            ProblemSeverity::Warning => warn!("{target}: {message}"),
            ProblemSeverity::Error => error!("{target}: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_console_does_not_panic_on_any_call() {
        let console = LoggingConsole;
        let target = Target::new("memory", None);
        console.report_starting(&target);
        console.report_applying(&target, "m1");
        console.report_applied(&target, 1, std::time::Duration::from_millis(5));
        console.report_problem(&target, ProblemSeverity::Warning, "careful");
        console.report_problem(&target, ProblemSeverity::Error, "bad");
    }
}
