use crate::error::Error;
use crate::loader::load_migration_content;
use crate::migration::{compare_names, Migration, MigrationState};

/// Ordered merge of the defined-on-disk sequence with the applied-in-db
/// sequence, per SPEC_FULL.md §4.4. Both inputs must already be sorted in the
/// case-insensitive ordinal order from §3 (as [`crate::discover::discover_migrations`]
/// and the registration-table reader both produce).
pub fn merge_migrations(
    defined: Vec<Migration>,
    applied: Vec<Migration>,
) -> Result<Vec<Migration>, Error> {
    let mut defined = defined.into_iter().peekable();
    let mut applied = applied.into_iter().peekable();
    let mut merged = Vec::new();

    loop {
        match (defined.peek(), applied.peek()) {
            (None, None) => break,
            (Some(_), None) => {
                let mut d = defined.next().unwrap();
                load_if_needed(&mut d)?;
                merged.push(d);
            }
            (None, Some(_)) => {
                let a = applied.next().unwrap();
                push_applied_only(&mut merged, a)?;
            }
            (Some(d), Some(a)) => match compare_names(d.name(), a.name()) {
                std::cmp::Ordering::Less => {
                    let mut d = defined.next().unwrap();
                    load_if_needed(&mut d)?;
                    merged.push(d);
                }
                std::cmp::Ordering::Greater => {
                    let a = applied.next().unwrap();
                    push_applied_only(&mut merged, a)?;
                }
                std::cmp::Ordering::Equal => {
                    let d = defined.next().unwrap();
                    let a = applied.next().unwrap();
                    merged.push(merge_both(d, a)?);
                }
            },
        }
    }

    Ok(merged)
}

fn load_if_needed(migration: &mut Migration) -> Result<(), Error> {
    if !migration.is_content_loaded() {
        load_migration_content(migration)?;
    }
    Ok(())
}

fn push_applied_only(merged: &mut Vec<Migration>, applied: Migration) -> Result<(), Error> {
    if applied.state() == MigrationState::AppliedPost {
        return Ok(());
    }
    merged.push(applied);
    Ok(())
}

/// Both a defined and an applied record exist for the same name: the defined
/// record's path/hash/content/dependencies win, layered onto the applied
/// record's state, per the merge rule in §4.4.
fn merge_both(defined: Migration, applied: Migration) -> Result<Migration, Error> {
    let mut enriched = applied;
    let has_changed = !applied_hash_is_empty(&enriched) && enriched.hash() != defined.hash();
    if has_changed {
        enriched.set_previous_hash(Some(enriched.hash().to_string()));
    }

    if let Some(path) = defined.path() {
        enriched.set_path(path.clone());
    }
    enriched.set_hash(defined.hash().to_string());
    for phase in crate::phase::Phase::ALL {
        *enriched.phase_content_mut(phase) = defined.phase_content(phase).clone();
    }
    enriched.set_depends_on(defined.depends_on().to_vec());
    enriched.set_content_loaded(defined.is_content_loaded());
    enriched.set_has_changed(has_changed);

    let fully_applied = enriched.state() == MigrationState::AppliedPost;
    if !fully_applied {
        load_if_needed(&mut enriched)?;
    }

    Ok(enriched)
}

fn applied_hash_is_empty(migration: &Migration) -> bool {
    migration.hash().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn defined_with_content(dir: &std::path::Path, name: &str, sql: &str) -> Migration {
        let mdir = dir.join(name);
        fs::create_dir_all(&mdir).unwrap();
        fs::write(mdir.join("_Main.sql"), sql).unwrap();
        let hash = crate::discover::hash_migration_directory(&mdir).unwrap();
        Migration::defined(name, mdir.join("_Main.sql"), hash)
    }

    #[test]
    fn defined_only_loads_content_and_is_included() {
        let tmp = TempDir::new().unwrap();
        let d = defined_with_content(tmp.path(), "m1", "select 1;");
        let merged = merge_migrations(vec![d], vec![]).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_content_loaded());
    }

    #[test]
    fn applied_only_fully_applied_is_dropped() {
        let a = Migration::applied_only("m1", "H".into(), MigrationState::AppliedPost);
        let merged = merge_migrations(vec![], vec![a]).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn applied_only_partial_is_kept_as_is() {
        let a = Migration::applied_only("m1", "H".into(), MigrationState::AppliedPre);
        let merged = merge_migrations(vec![], vec![a]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].state(), MigrationState::AppliedPre);
    }

    #[test]
    fn both_present_enriches_applied_and_flags_change() {
        let tmp = TempDir::new().unwrap();
        let d = defined_with_content(tmp.path(), "m1", "select 2;");
        let a = Migration::applied_only("m1", "OLDHASH".into(), MigrationState::AppliedPre);
        let merged = merge_migrations(vec![d.clone()], vec![a]).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(merged[0].has_changed());
        assert_eq!(merged[0].hash(), d.hash());
        assert_eq!(merged[0].state(), MigrationState::AppliedPre);
    }

    #[test]
    fn both_present_fully_applied_skips_content_loading() {
        let tmp = TempDir::new().unwrap();
        let d = defined_with_content(tmp.path(), "m1", "select 2;");
        let a = Migration::applied_only("m1", d.hash().to_string(), MigrationState::AppliedPost);
        let merged = merge_migrations(vec![d], vec![a]).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(!merged[0].has_changed());
        assert!(!merged[0].is_content_loaded());
    }

    #[test]
    fn merge_preserves_ordinal_order() {
        let tmp = TempDir::new().unwrap();
        let d1 = defined_with_content(tmp.path(), "a", "select 1;");
        let d2 = defined_with_content(tmp.path(), "z", "select 2;");
        let applied_mid = Migration::applied_only("m", "H".into(), MigrationState::AppliedPre);
        let merged = merge_migrations(vec![d1, d2], vec![applied_mid]).unwrap();
        let names: Vec<_> = merged.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }
}
