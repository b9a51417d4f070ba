use crate::error::Kind;
use crate::migration::{compare_names, Diagnostic, MigrationState};
use crate::phase::Phase;
use crate::plan::MigrationPlan;

/// Validate a plan in the context of a current execution phase and a target
/// display name, per SPEC_FULL.md §4.7. Diagnostics are appended to each
/// migration's own diagnostics list. Returns `true` if no errors were added
/// (warnings are fine).
pub fn validate_plan(plan: &mut MigrationPlan, current_phase: Phase, target_display_name: &str) -> bool {
    let earliest_defined_name = plan
        .migrations()
        .iter()
        .filter(|m| m.path().is_some())
        .map(|m| m.name().to_string())
        .min_by(|a, b| compare_names(a, b));

    let mut has_errors = false;

    for index in 0..plan.migrations().len() {
        let earliest_phase = plan.earliest_execution_phase(index);
        let mut diagnostics = Vec::new();

        {
            let migration = &plan.migrations()[index];

            if migration.has_changed() && migration.state() != MigrationState::NotApplied {
                diagnostics.push(Diagnostic::error(
                    Kind::HashChanged(
                        migration.name().to_string(),
                        migration.hash().to_string(),
                        migration.previous_hash().unwrap_or("").to_string(),
                    )
                    .to_string(),
                ));
            }

            for dep in migration.depends_on() {
                if dep.name.eq_ignore_ascii_case(migration.name()) {
                    diagnostics.push(Diagnostic::error(
                        Kind::SelfDependency(migration.name().to_string()).to_string(),
                    ));
                    continue;
                }

                if compare_names(&dep.name, migration.name()) == std::cmp::Ordering::Greater {
                    diagnostics.push(Diagnostic::error(
                        Kind::DependencyOutOfOrder(migration.name().to_string(), dep.name.clone())
                            .to_string(),
                    ));
                    continue;
                }

                if dep.resolved_index.is_none() {
                    let is_within_history = earliest_defined_name
                        .as_deref()
                        .map(|earliest| compare_names(&dep.name, earliest) != std::cmp::Ordering::Less)
                        .unwrap_or(true);

                    if is_within_history {
                        diagnostics.push(Diagnostic::error(
                            Kind::DependencyNotFound(
                                migration.name().to_string(),
                                dep.name.clone(),
                            )
                            .to_string(),
                        ));
                    } else {
                        diagnostics.push(Diagnostic::warning(format!(
                            "migration \"{}\" depends on \"{}\", which is older than the earliest \
                             migration on disk. Ignoring.",
                            migration.name(),
                            dep.name
                        )));
                    }
                }
            }

            if let Some(earliest_phase) = earliest_phase {
                if earliest_phase < current_phase {
                    diagnostics.push(Diagnostic::error(
                        Kind::PhaseOutOfOrder(migration.name().to_string()).to_string(),
                    ));
                }
            }

            if migration.path().is_none() && earliest_phase.is_some() {
                match migration.state() {
                    MigrationState::AppliedPre | MigrationState::AppliedCore => {
                        diagnostics.push(Diagnostic::error(
                            Kind::MissingOnDisk(
                                migration.name().to_string(),
                                target_display_name.to_string(),
                            )
                            .to_string(),
                        ));
                    }
                    MigrationState::NotApplied => {
                        diagnostics.push(Diagnostic::error(
                            Kind::NeverApplied(
                                migration.name().to_string(),
                                target_display_name.to_string(),
                            )
                            .to_string(),
                        ));
                    }
                    MigrationState::AppliedPost => {}
                }
            }
        }

        has_errors |= diagnostics.iter().any(Diagnostic::is_error);
        let migration = &mut plan.migrations_mut()[index];
        for diagnostic in diagnostics {
            migration.push_diagnostic(diagnostic);
        }
    }

    !has_errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::DependsOn;
    use crate::plan::plan_migrations;
    use crate::phase::Phase;

    fn migration_with_pre(name: &str) -> crate::migration::Migration {
        let mut m = crate::migration::Migration::applied_only(
            name,
            "H".into(),
            MigrationState::NotApplied,
        );
        m.set_path(std::path::PathBuf::from(format!("{name}/_Main.sql")));
        m.phase_content_mut(Phase::Pre).sql = "select 1;".into();
        m
    }

    #[test]
    fn self_dependency_is_an_error() {
        let mut m = migration_with_pre("a");
        m.set_depends_on(vec![DependsOn::new("a")]);
        let mut plan = plan_migrations(vec![m]);
        let ok = validate_plan(&mut plan, Phase::Pre, "db");
        assert!(!ok);
        assert!(plan.migrations()[0].diagnostics()[0].is_error());
    }

    #[test]
    fn dependency_that_sorts_after_is_an_error() {
        let mut a = migration_with_pre("a");
        a.set_depends_on(vec![DependsOn {
            name: "z".into(),
            resolved_index: Some(1),
        }]);
        let z = migration_with_pre("z");
        let mut plan = plan_migrations(vec![a, z]);
        let ok = validate_plan(&mut plan, Phase::Pre, "db");
        assert!(!ok);
    }

    #[test]
    fn unresolved_dependency_within_history_is_an_error() {
        let mut a = migration_with_pre("b");
        a.set_depends_on(vec![DependsOn::new("ghost")]);
        let mut plan = plan_migrations(vec![a]);
        let ok = validate_plan(&mut plan, Phase::Pre, "db");
        assert!(!ok);
    }

    #[test]
    fn unresolved_dependency_older_than_history_is_a_warning() {
        let mut a = migration_with_pre("m");
        a.set_depends_on(vec![DependsOn::new("aaaa")]);
        let mut plan = plan_migrations(vec![a]);
        let ok = validate_plan(&mut plan, Phase::Pre, "db");
        assert!(ok);
        assert!(!plan.migrations()[0].diagnostics()[0].is_error());
    }

    #[test]
    fn hash_changed_after_partial_application_is_an_error() {
        let mut m = migration_with_pre("a");
        m.set_state(MigrationState::AppliedPre);
        m.set_has_changed(true);
        m.set_previous_hash(Some("OLD".into()));
        let mut plan = plan_migrations(vec![m]);
        let ok = validate_plan(&mut plan, Phase::Pre, "db");
        assert!(!ok);
    }

    #[test]
    fn missing_on_disk_for_partially_applied_migration_without_path() {
        let mut m = crate::migration::Migration::applied_only(
            "a",
            "H".into(),
            MigrationState::AppliedPre,
        );
        m.phase_content_mut(Phase::Post).sql = "select 1;".into();
        let mut plan = plan_migrations(vec![m]);
        let ok = validate_plan(&mut plan, Phase::Post, "db");
        assert!(!ok);
    }

    #[test]
    fn phase_out_of_order_when_earlier_pending_phase_exists() {
        let m = migration_with_pre("a");
        let mut plan = plan_migrations(vec![m]);
        let ok = validate_plan(&mut plan, Phase::Core, "db");
        assert!(!ok);
    }

    #[test]
    fn clean_plan_validates_without_errors() {
        let m = migration_with_pre("a");
        let mut plan = plan_migrations(vec![m]);
        let ok = validate_plan(&mut plan, Phase::Pre, "db");
        assert!(ok);
    }
}
