use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{Error, Kind, WrapDeployError};
use crate::phase::Phase;
use crate::plan::MigrationPlan;
use crate::target::Target;

/// A small per-(target, phase-or-seed) UTF-8 log writer. Opens a file, writes
/// a fixed header, renders the pending-work table, and closes with the
/// "Applied N … in T.TTT second(s)." line, per SPEC_FULL.md §4.8/§6.
///
/// Writes go through plain `std::fs`/`std::io::Write`, matching the
/// teacher's direct-filesystem style (`util.rs`) rather than reaching for an
/// async file API for what is, on every target, a small, infrequent write.
pub struct TargetLog {
    file: File,
}

impl TargetLog {
    pub fn create(directory: &Path, target: &Target, label: &str) -> Result<Self, Error> {
        fs::create_dir_all(directory)
            .map_err(|err| Error::new(Kind::InvalidPath(directory.to_path_buf(), err), None))?;
        let path = log_path(directory, target, label);
        let file = File::create(&path)
            .map_err(|err| Error::new(Kind::InvalidPath(path.clone(), err), None))?;
        Ok(TargetLog { file })
    }

    pub fn write_header(
        &mut self,
        target: &Target,
        phase: Phase,
        started_at: SystemTime,
    ) -> Result<(), Error> {
        let epoch = started_at
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        writeln!(
            self.file,
            "Target: {target}\nPhase: {phase}\nProcess: pid={}\nMachine: {}\nStarted: {}.{:03}",
            std::process::id(),
            hostname(),
            epoch.as_secs(),
            epoch.subsec_millis(),
        )
        .deploy_err("failed writing target log header", None)?;
        writeln!(self.file).deploy_err("failed writing target log header", None)
    }

    /// Render the fixed-width pending-migration table: Name, Check, Progress,
    /// DependsOn, and a three-phase grid. The Core column widens with
    /// "Pre>"/">Post" sub-columns only when a migration actually has content
    /// shifted into Core.
    pub fn write_table(&mut self, plan: &MigrationPlan) -> Result<(), Error> {
        let widen_core = plan.has_pre_content_in_core() || plan.has_post_content_in_core();
        let core_header = if widen_core {
            "Pre> Core >Post"
        } else {
            "Core"
        };
        writeln!(
            self.file,
            "{:<24} {:<6} {:<10} {:<24} {:<5} {:<16} {:<5}",
            "Name", "Check", "Progress", "DependsOn", "Pre", core_header, "Post"
        )
        .deploy_err("failed writing target log table header", None)?;

        for migration in plan.migrations() {
            let depends_on = migration
                .depends_on()
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(",");
            let check = if migration.has_changed() { "CHANGED" } else { "ok" };
            let progress = format!("{:?}", migration.state());
            let pre = cell(!migration.phase_content(Phase::Pre).is_empty());
            let core = cell(!migration.phase_content(Phase::Core).is_empty());
            let post = cell(!migration.phase_content(Phase::Post).is_empty());
            writeln!(
                self.file,
                "{:<24} {:<6} {:<10} {:<24} {:<5} {:<16} {:<5}",
                migration.name(),
                check,
                progress,
                depends_on,
                pre,
                core,
                post
            )
            .deploy_err("failed writing target log table row", None)?;
        }

        writeln!(self.file).deploy_err("failed writing target log table", None)
    }

    pub fn write_line(&mut self, text: &str) -> Result<(), Error> {
        writeln!(self.file, "{text}").deploy_err("failed writing to target log", None)
    }

    /// Flush and write the closing summary line. Best-effort: failures here
    /// never mask a primary exception, so callers should log a closing
    /// failure rather than propagate it (SPEC_FULL.md §4.8 step 12).
    pub fn close(mut self, applied_count: usize, elapsed: Duration) -> Result<(), Error> {
        writeln!(
            self.file,
            "Applied {applied_count} migration(s) in {:.3} second(s).",
            elapsed.as_secs_f64()
        )
        .deploy_err("failed writing target log summary", None)?;
        self.file
            .flush()
            .deploy_err("failed flushing target log", None)
    }
}

fn cell(present: bool) -> &'static str {
    if present {
        "x"
    } else {
        ""
    }
}

fn log_path(directory: &Path, target: &Target, label: &str) -> PathBuf {
    let safe_name = target
        .database_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect::<String>();
    directory.join(format!("{safe_name}.{label}.log"))
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "(unknown machine)".to_string())
}
