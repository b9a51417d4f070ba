use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Kind};
use crate::seed::entity::{LoadedSeed, Seed, SeedModule, WorkerAffinity, INIT_MODULE_NAME};

/// Matches a magic-comment line: `--# KEYWORD: argument`. Keywords and the
/// leading `--#` are case-insensitive; the argument is free text. Grounded on
/// the migration loader's marker-prefix matching in `loader.rs`, generalized
/// to a single regex since seed magic comments take an argument in the same
/// position every time.
fn magic_comment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*--#\s*(MODULE|PROVIDES|REQUIRES|WORKER)\s*:\s*(.*?)\s*$").unwrap()
    })
}

/// Tracks whether a scan position sits inside a string literal, a quoted
/// identifier, or a block comment, so magic comments are only recognized at
/// true line starts in plain SQL text, never inside a multi-line literal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    Plain,
    SingleQuote,
    DoubleQuote,
    BlockComment,
}

fn advance_scan_state(line: &str, mut state: ScanState) -> ScanState {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match state {
            ScanState::Plain => {
                if chars[i] == '\'' {
                    state = ScanState::SingleQuote;
                    i += 1;
                } else if chars[i] == '"' {
                    state = ScanState::DoubleQuote;
                    i += 1;
                } else if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                    state = ScanState::BlockComment;
                    i += 2;
                } else if chars[i] == '-' && chars.get(i + 1) == Some(&'-') {
                    break;
                } else {
                    i += 1;
                }
            }
            ScanState::SingleQuote => {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        i += 2;
                    } else {
                        state = ScanState::Plain;
                        i += 1;
                    }
                } else {
                    i += 1;
                }
            }
            ScanState::DoubleQuote => {
                if chars[i] == '"' {
                    if chars.get(i + 1) == Some(&'"') {
                        i += 2;
                    } else {
                        state = ScanState::Plain;
                        i += 1;
                    }
                } else {
                    i += 1;
                }
            }
            ScanState::BlockComment => {
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    state = ScanState::Plain;
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }
    }
    state
}

/// Read `seed`'s `_Main.sql` and split it into [`SeedModule`]s, per
/// SPEC_FULL.md §4.10/§6.
pub fn load_seed_content(seed: &Seed) -> Result<LoadedSeed, Error> {
    let text = std::fs::read_to_string(seed.path())
        .map_err(|err| Error::new(Kind::InvalidPath(seed.path().to_path_buf(), err), None))?;

    let mut modules = vec![SeedModule::new(INIT_MODULE_NAME)];
    let mut buffer = String::new();
    let mut state = ScanState::Plain;

    for line in text.lines() {
        if state == ScanState::Plain {
            if let Some(caps) = magic_comment().captures(line) {
                flush_batch(&mut modules, &mut buffer);
                apply_directive(&mut modules, &caps[1], &caps[2], seed.path())?;
                state = advance_scan_state(line, state);
                continue;
            }
        }

        buffer.push_str(line);
        buffer.push('\n');
        state = advance_scan_state(line, state);
    }
    flush_batch(&mut modules, &mut buffer);

    modules.retain(|m| !(m.name() == INIT_MODULE_NAME && m.is_empty()));

    Ok(LoadedSeed::new(seed.clone(), modules))
}

fn flush_batch(modules: &mut [SeedModule], buffer: &mut String) {
    if !buffer.trim().is_empty() {
        modules.last_mut().expect("at least one module always present").push_batch(std::mem::take(buffer));
    } else {
        buffer.clear();
    }
}

fn apply_directive(
    modules: &mut Vec<SeedModule>,
    keyword: &str,
    argument: &str,
    path: &std::path::Path,
) -> Result<(), Error> {
    match keyword.to_ascii_uppercase().as_str() {
        "MODULE" => {
            if argument.is_empty() {
                return Err(Error::new(
                    Kind::InvalidSeedFile(
                        path.to_path_buf(),
                        "MODULE: comment requires a module name".to_string(),
                    ),
                    None,
                ));
            }
            let mut parts = argument.split_whitespace();
            let name = parts.next().unwrap().to_string();
            let mut module = SeedModule::new(name);
            module.add_provides(parts.map(str::to_string));
            modules.push(module);
        }
        "PROVIDES" => {
            current_module(modules)?.add_provides(argument.split_whitespace().map(str::to_string));
        }
        "REQUIRES" => {
            current_module(modules)?.add_requires(argument.split_whitespace().map(str::to_string));
        }
        "WORKER" => {
            let affinity = match argument.trim().to_ascii_lowercase().as_str() {
                "any" => WorkerAffinity::Any,
                "all" => WorkerAffinity::Every,
                other => {
                    return Err(Error::new(
                        Kind::InvalidSeedFile(
                            path.to_path_buf(),
                            format!("WORKER: expects \"any\" or \"all\", found \"{other}\""),
                        ),
                        None,
                    ))
                }
            };
            current_module(modules)?.set_worker_affinity(affinity);
        }
        _ => unreachable!("magic_comment regex only matches known keywords"),
    }
    Ok(())
}

fn current_module(modules: &mut [SeedModule]) -> Result<&mut SeedModule, Error> {
    modules
        .last_mut()
        .ok_or_else(|| Error::new(Kind::InvalidSeedFile(std::path::PathBuf::new(), "no module open".into()), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_seed(dir: &std::path::Path, sql: &str) -> Seed {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join("_Main.sql");
        fs::write(&path, sql).unwrap();
        Seed::new("s", path)
    }

    #[test]
    fn sql_before_first_module_belongs_to_init() {
        let tmp = TempDir::new().unwrap();
        let seed = make_seed(&tmp.path().join("s"), "select 'init';\n");
        let loaded = load_seed_content(&seed).unwrap();
        assert_eq!(loaded.modules().len(), 1);
        assert_eq!(loaded.modules()[0].name(), INIT_MODULE_NAME);
    }

    #[test]
    fn module_boundaries_split_batches() {
        let tmp = TempDir::new().unwrap();
        let sql = "--# MODULE: a topicA\nselect 1;\n--# MODULE: b\n--# REQUIRES: topicA\nselect 2;\n";
        let seed = make_seed(&tmp.path().join("s"), sql);
        let loaded = load_seed_content(&seed).unwrap();
        let names: Vec<_> = loaded.modules().iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(loaded.modules()[0].provides().contains("topica"));
        assert!(loaded.modules()[1].requires().contains("topica"));
    }

    #[test]
    fn worker_all_sets_every_affinity() {
        let tmp = TempDir::new().unwrap();
        let sql = "--# MODULE: a\n--# WORKER: all\nselect 1;\n";
        let seed = make_seed(&tmp.path().join("s"), sql);
        let loaded = load_seed_content(&seed).unwrap();
        assert_eq!(loaded.modules()[0].worker_affinity(), WorkerAffinity::Every);
    }

    #[test]
    fn module_with_no_name_is_a_format_error() {
        let tmp = TempDir::new().unwrap();
        let sql = "--# MODULE:\nselect 1;\n";
        let seed = make_seed(&tmp.path().join("s"), sql);
        assert!(load_seed_content(&seed).is_err());
    }

    #[test]
    fn magic_comment_inside_block_comment_is_not_recognized() {
        let tmp = TempDir::new().unwrap();
        let sql = "/*\n--# MODULE: hidden\n*/\nselect 1;\n";
        let seed = make_seed(&tmp.path().join("s"), sql);
        let loaded = load_seed_content(&seed).unwrap();
        assert_eq!(loaded.modules().len(), 1);
        assert_eq!(loaded.modules()[0].name(), INIT_MODULE_NAME);
        assert!(loaded.modules()[0].batches()[0].contains("MODULE: hidden"));
    }
}
