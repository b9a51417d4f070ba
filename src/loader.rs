use std::path::Path;

use crate::error::{Error, Kind};
use crate::migration::Migration;
use crate::phase::Phase;

/// Fixed literal prefix every phase batch is wrapped with before being stored
/// on a [`crate::migration::PhaseContent`]. Declaring the batch this way lets
/// a driver recognize and safely re-issue a batch that spans multiple
/// statements, the way the teacher's drivers wrap content in a transaction
/// (`drivers/tokio_postgres.rs::execute`) before sending it.
pub const BATCH_PREFIX: &str = "-- deploy-engine: batch\n";

const PRE_MARKER: &str = "--# PRE";
const CORE_MARKER: &str = "--# CORE";
const POST_MARKER: &str = "--# POST";
const REQUIRES_PREFIX: &str = "--# REQUIRES:";

enum Section {
    Pre,
    Core,
    Post,
}

/// Read `_Main.sql` for `migration` and partition it into Pre/Core/Post
/// content, per SPEC_FULL.md §4.3. Requires `migration.path()` to be set.
pub fn load_migration_content(migration: &mut Migration) -> Result<(), Error> {
    let path = migration
        .path()
        .cloned()
        .ok_or_else(|| Error::new(Kind::InvalidMigrationName, None))?;

    if !path.is_file() {
        return Err(Error::new(
            Kind::InvalidPath(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "migration file not found"),
            ),
            None,
        ));
    }

    let text = std::fs::read_to_string(&path)
        .map_err(|err| Error::new(Kind::InvalidMigrationFile(path.clone(), err), None))?;

    let is_begin = migration.is_begin();
    let is_end = migration.is_end();

    let mut sections: Vec<(Section, String)> = Vec::new();
    let mut current = if is_begin {
        Section::Pre
    } else if is_end {
        Section::Post
    } else {
        Section::Core
    };
    let mut buffer = String::new();
    let mut requires: Vec<String> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed == PRE_MARKER && !is_begin && !is_end {
            sections.push((current, std::mem::take(&mut buffer)));
            current = Section::Pre;
            continue;
        }
        if trimmed == CORE_MARKER && !is_begin && !is_end {
            sections.push((current, std::mem::take(&mut buffer)));
            current = Section::Core;
            continue;
        }
        if trimmed == POST_MARKER && !is_begin && !is_end {
            sections.push((current, std::mem::take(&mut buffer)));
            current = Section::Post;
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix(REQUIRES_PREFIX) {
            requires.extend(
                rest.split_whitespace()
                    .map(str::to_string)
                    .filter(|s| !s.is_empty()),
            );
            continue;
        }

        buffer.push_str(line);
        buffer.push('\n');
    }
    sections.push((current, buffer));

    let mut pre = String::new();
    let mut core = String::new();
    let mut post = String::new();
    for (section, text) in sections {
        let target = match section {
            Section::Pre => &mut pre,
            Section::Core => &mut core,
            Section::Post => &mut post,
        };
        target.push_str(&text);
    }

    requires.sort_by_key(|s| s.to_ascii_lowercase());
    requires.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

    set_wrapped(migration, Phase::Pre, pre);
    set_wrapped(migration, Phase::Core, core);
    set_wrapped(migration, Phase::Post, post);
    migration.set_depends_on(
        requires
            .into_iter()
            .map(crate::migration::DependsOn::new)
            .collect(),
    );
    migration.set_content_loaded(true);

    Ok(())
}

fn set_wrapped(migration: &mut Migration, phase: Phase, sql: String) {
    let content = migration.phase_content_mut(phase);
    content.is_required = !sql.trim().is_empty();
    content.sql = if sql.trim().is_empty() {
        String::new()
    } else {
        format!("{BATCH_PREFIX}{sql}")
    };
}

/// A convenience used by callers that only have a directory path, matching
/// the shape of the teacher's `find_directory_migration_files`.
pub fn main_sql_path(migration_dir: &Path) -> std::path::PathBuf {
    migration_dir.join("_Main.sql")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discover::hash_migration_directory;
    use std::fs;
    use tempfile::TempDir;

    fn make_migration(name: &str, dir: &Path, sql: &str) -> Migration {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("_Main.sql"), sql).unwrap();
        let hash = hash_migration_directory(dir).unwrap();
        Migration::defined(name, dir.join("_Main.sql"), hash)
    }

    #[test]
    fn default_section_is_core_for_regular_migration() {
        let tmp = TempDir::new().unwrap();
        let mut m = make_migration("m", &tmp.path().join("m"), "select 1;\n");
        load_migration_content(&mut m).unwrap();
        assert!(m.phase_content(Phase::Core).sql.contains("select 1;"));
        assert!(m.phase_content(Phase::Pre).sql.is_empty());
        assert!(m.phase_content(Phase::Post).sql.is_empty());
    }

    #[test]
    fn splits_by_magic_comments() {
        let tmp = TempDir::new().unwrap();
        let sql = "--# PRE\nselect 'pre';\n--# CORE\nselect 'core';\n--# POST\nselect 'post';\n";
        let mut m = make_migration("m", &tmp.path().join("m"), sql);
        load_migration_content(&mut m).unwrap();
        assert!(m.phase_content(Phase::Pre).sql.contains("'pre'"));
        assert!(m.phase_content(Phase::Core).sql.contains("'core'"));
        assert!(m.phase_content(Phase::Post).sql.contains("'post'"));
    }

    #[test]
    fn unknown_magic_comment_passes_through() {
        let tmp = TempDir::new().unwrap();
        let sql = "--# WAT\nselect 1;\n";
        let mut m = make_migration("m", &tmp.path().join("m"), sql);
        load_migration_content(&mut m).unwrap();
        assert!(m.phase_content(Phase::Core).sql.contains("--# WAT"));
    }

    #[test]
    fn wrong_case_marker_passes_through_instead_of_splitting() {
        let tmp = TempDir::new().unwrap();
        let sql = "--# pre\nselect 1;\n--# Requires: alpha\nselect 2;\n";
        let mut m = make_migration("m", &tmp.path().join("m"), sql);
        load_migration_content(&mut m).unwrap();
        assert!(m.phase_content(Phase::Core).sql.contains("--# pre"));
        assert!(m.phase_content(Phase::Core).sql.contains("--# Requires: alpha"));
        assert!(m.phase_content(Phase::Pre).sql.is_empty());
        assert!(m.depends_on().is_empty());
    }

    #[test]
    fn requires_are_deduplicated_case_insensitively_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let sql = "--# REQUIRES: Bravo alpha\n--# REQUIRES: ALPHA charlie\nselect 1;\n";
        let mut m = make_migration("m", &tmp.path().join("m"), sql);
        load_migration_content(&mut m).unwrap();
        let names: Vec<_> = m.depends_on().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "Bravo", "charlie"]);
    }

    #[test]
    fn begin_pseudo_migration_routes_everything_to_pre() {
        let tmp = TempDir::new().unwrap();
        let mut m = make_migration("_Begin", &tmp.path().join("_Begin"), "select 1;\n");
        load_migration_content(&mut m).unwrap();
        assert!(m.phase_content(Phase::Pre).sql.contains("select 1;"));
        assert!(m.phase_content(Phase::Core).sql.is_empty());
    }

    #[test]
    fn end_pseudo_migration_routes_everything_to_post() {
        let tmp = TempDir::new().unwrap();
        let mut m = make_migration("_End", &tmp.path().join("_End"), "select 1;\n");
        load_migration_content(&mut m).unwrap();
        assert!(m.phase_content(Phase::Post).sql.contains("select 1;"));
        assert!(m.phase_content(Phase::Pre).sql.is_empty());
    }

    #[test]
    fn content_is_wrapped_with_fixed_prefix() {
        let tmp = TempDir::new().unwrap();
        let mut m = make_migration("m", &tmp.path().join("m"), "select 1;\n");
        load_migration_content(&mut m).unwrap();
        assert!(m.phase_content(Phase::Core).sql.starts_with(BATCH_PREFIX));
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut m = Migration::defined("m", tmp.path().join("missing/_Main.sql"), "H".into());
        assert!(load_migration_content(&mut m).is_err());
    }
}
