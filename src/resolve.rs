use std::collections::HashMap;

use crate::migration::Migration;

/// Build a case-insensitive name → index lookup and populate every
/// `DependsOn.resolved_index` for each migration's own dependency list, per
/// SPEC_FULL.md §4.5. Forward references and self-references resolve fine
/// here structurally; the validator is what rejects them semantically.
pub fn resolve_references(migrations: &mut [Migration]) {
    let mut index_by_name: HashMap<String, usize> = HashMap::new();
    for (index, migration) in migrations.iter().enumerate() {
        index_by_name.insert(migration.name().to_ascii_lowercase(), index);
    }

    for migration in migrations.iter_mut() {
        for dep in migration.depends_on_mut() {
            dep.resolved_index = index_by_name.get(&dep.name.to_ascii_lowercase()).copied();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{DependsOn, MigrationState};

    fn with_deps(name: &str, deps: &[&str]) -> Migration {
        let mut m = Migration::applied_only(name, "H".into(), MigrationState::NotApplied);
        m.set_depends_on(deps.iter().map(|d| DependsOn::new(*d)).collect());
        m
    }

    #[test]
    fn resolves_by_case_insensitive_name() {
        let mut migrations = vec![with_deps("Alpha", &[]), with_deps("Beta", &["ALPHA"])];
        resolve_references(&mut migrations);
        assert_eq!(migrations[1].depends_on()[0].resolved_index, Some(0));
    }

    #[test]
    fn unknown_dependency_stays_unresolved() {
        let mut migrations = vec![with_deps("Alpha", &["Ghost"])];
        resolve_references(&mut migrations);
        assert_eq!(migrations[0].depends_on()[0].resolved_index, None);
    }

    #[test]
    fn forward_reference_resolves_structurally() {
        let mut migrations = vec![with_deps("Alpha", &["Beta"]), with_deps("Beta", &[])];
        resolve_references(&mut migrations);
        assert_eq!(migrations[0].depends_on()[0].resolved_index, Some(1));
    }

    #[test]
    fn last_write_wins_on_duplicate_names() {
        let mut migrations = vec![
            with_deps("Dup", &[]),
            with_deps("Dup", &[]),
            with_deps("Referrer", &["dup"]),
        ];
        resolve_references(&mut migrations);
        assert_eq!(migrations[2].depends_on()[0].resolved_index, Some(1));
    }

    #[test]
    fn self_reference_resolves_to_own_index() {
        let mut migrations = vec![with_deps("Alpha", &["Alpha"])];
        resolve_references(&mut migrations);
        assert_eq!(migrations[0].depends_on()[0].resolved_index, Some(0));
    }
}
