use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use crate::error::{Error, Kind};
use crate::migration::{compare_names, is_pseudo_name, Migration};
use crate::seed::entity::Seed;

const MAIN_SQL: &str = "_Main.sql";

/// Walk `<root>/Migrations`, as described in SPEC_FULL.md §4.2, returning an
/// ordered, immutable sequence of migrations with path and hash populated but
/// content not yet loaded.
///
/// Grounded on the teacher's `find_migration_files` in `util.rs` (WalkDir,
/// min/max depth, filter-map over directory entries) generalized from a flat
/// version-prefixed file convention to a directory-per-migration convention.
pub fn discover_migrations(
    root: impl AsRef<Path>,
    max_name: Option<&str>,
) -> Result<Vec<Migration>, Error> {
    let migrations_dir = root.as_ref().join("Migrations");
    if !migrations_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();

    for entry in WalkDir::new(&migrations_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => continue,
        };

        let in_range = is_pseudo_name(&name)
            || max_name
                .map(|max| compare_names(&name, max) != Ordering::Greater)
                .unwrap_or(true);
        if !in_range {
            continue;
        }

        let main_sql = entry.path().join(MAIN_SQL);
        if !main_sql.is_file() {
            continue;
        }

        let hash = hash_migration_directory(entry.path())?;
        migrations.push(Migration::defined(name, main_sql, hash));
    }

    migrations.sort();
    Ok(migrations)
}

/// Walk `<root>/Seeds`, one directory per seed, returning them in ordinal
/// name order. Mirrors `discover_migrations`'s directory-per-unit walk but
/// seeds have no hash or applied state: every seed is re-loaded from disk
/// each time it is applied.
pub fn discover_seeds(root: impl AsRef<Path>) -> Result<Vec<Seed>, Error> {
    let seeds_dir = root.as_ref().join("Seeds");
    if !seeds_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut seeds = Vec::new();
    for entry in WalkDir::new(&seeds_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => continue,
        };
        let main_sql = entry.path().join(MAIN_SQL);
        if !main_sql.is_file() {
            continue;
        }
        seeds.push(Seed::new(name, main_sql));
    }

    seeds.sort_by(|a, b| compare_names(a.name(), b.name()));
    Ok(seeds)
}

/// Compute the stable content hash for a migration directory: SHA-1 each
/// `*.sql` file, concatenate the digests in full-path ordinal order, then
/// SHA-1 the concatenation. Encoded as upper-case hex. This ordering is
/// load-bearing for cross-OS hash stability (SPEC_FULL.md §3).
pub fn hash_migration_directory(dir: &Path) -> Result<String, Error> {
    let mut sql_files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect();

    // Ordinal, case-sensitive comparison of the full path, not a locale-aware
    // sort: the spec calls this out explicitly as load-bearing.
    sql_files.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    let mut concatenated = Vec::new();
    for path in &sql_files {
        let bytes = std::fs::read(path).map_err(|err| {
            Error::new(Kind::InvalidMigrationFile(path.clone(), err), None)
        })?;
        let digest = Sha1::digest(&bytes);
        concatenated.extend_from_slice(&digest);
    }

    let final_digest = Sha1::digest(&concatenated);
    Ok(hex::encode_upper(final_digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn missing_migrations_dir_yields_empty() {
        let root = TempDir::new().unwrap();
        let result = discover_migrations(root.path(), None).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn discovers_and_orders_with_pseudo_migrations_at_the_ends() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Migrations/m2/_Main.sql", "select 2;");
        write(root.path(), "Migrations/m1/_Main.sql", "select 1;");
        write(root.path(), "Migrations/_Begin/_Main.sql", "begin;");
        write(root.path(), "Migrations/_End/_Main.sql", "end;");

        let migrations = discover_migrations(root.path(), None).unwrap();
        let names: Vec<_> = migrations.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["_Begin", "m1", "m2", "_End"]);
    }

    #[test]
    fn ignores_directories_without_main_sql() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Migrations/incomplete/readme.sql", "noop");
        let migrations = discover_migrations(root.path(), None).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn hash_is_stable_across_repeated_computation() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Migrations/m/_Main.sql", "select 1;");
        write(root.path(), "Migrations/m/extra.sql", "select 2;");

        let h1 = hash_migration_directory(&root.path().join("Migrations/m")).unwrap();
        let h2 = hash_migration_directory(&root.path().join("Migrations/m")).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 40);
        assert_eq!(h1, h1.to_uppercase());
    }

    #[test]
    fn discovers_seeds_in_ordinal_order() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Seeds/zeta/_Main.sql", "--# MODULE: m\nselect 1;");
        write(root.path(), "Seeds/alpha/_Main.sql", "--# MODULE: m\nselect 1;");
        let seeds = discover_seeds(root.path()).unwrap();
        let names: Vec<_> = seeds.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn max_name_excludes_later_migrations_but_keeps_pseudo() {
        let root = TempDir::new().unwrap();
        write(root.path(), "Migrations/a/_Main.sql", "1");
        write(root.path(), "Migrations/z/_Main.sql", "2");
        write(root.path(), "Migrations/_End/_Main.sql", "3");

        let migrations = discover_migrations(root.path(), Some("a")).unwrap();
        let names: Vec<_> = migrations.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["a", "_End"]);
    }
}
