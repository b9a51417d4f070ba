use std::cmp::Ordering;
use std::path::PathBuf;

use crate::phase::Phase;

pub const BEGIN_NAME: &str = "_Begin";
pub const END_NAME: &str = "_End";

/// Lifecycle state of a migration on one target, drawn from the registration
/// table's `State` column (`{0,1,2,3}`, see SPEC_FULL.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationState {
    NotApplied,
    AppliedPre,
    AppliedCore,
    AppliedPost,
}

impl MigrationState {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(MigrationState::NotApplied),
            1 => Some(MigrationState::AppliedPre),
            2 => Some(MigrationState::AppliedCore),
            3 => Some(MigrationState::AppliedPost),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            MigrationState::NotApplied => 0,
            MigrationState::AppliedPre => 1,
            MigrationState::AppliedCore => 2,
            MigrationState::AppliedPost => 3,
        }
    }

    /// `true` once the given phase's content is known to already be applied.
    pub fn has_completed(self, phase: Phase) -> bool {
        match phase {
            Phase::Pre => self >= MigrationState::AppliedPre,
            Phase::Core => self >= MigrationState::AppliedCore,
            Phase::Post => self >= MigrationState::AppliedPost,
        }
    }
}

/// One phase's SQL payload for a migration.
#[derive(Clone, Debug, Default)]
pub struct PhaseContent {
    pub is_required: bool,
    pub sql: String,
    /// Set by the planner; `None` until planning has run.
    pub planned_phase: Option<Phase>,
}

impl PhaseContent {
    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// An unresolved-until-resolve-pass pointer at another migration by name, per
/// the index-table design in SPEC_FULL.md §9 (no owning pointers, to sidestep
/// the cyclic-graph problem structurally).
#[derive(Clone, Debug)]
pub struct DependsOn {
    pub name: String,
    /// Populated by [`crate::resolve::resolve_references`].
    pub resolved_index: Option<usize>,
}

impl DependsOn {
    pub fn new(name: impl Into<String>) -> Self {
        DependsOn {
            name: name.into(),
            resolved_index: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// A named, hash-identified unit of schema change, partitioned into Pre/Core/
/// Post content. See SPEC_FULL.md §3.
#[derive(Clone, Debug)]
pub struct Migration {
    name: String,
    path: Option<PathBuf>,
    hash: String,
    state: MigrationState,
    pre: PhaseContent,
    core: PhaseContent,
    post: PhaseContent,
    depends_on: Vec<DependsOn>,
    diagnostics: Vec<Diagnostic>,
    has_changed: bool,
    is_content_loaded: bool,
    /// The hash recorded when this migration was applied, kept around only so
    /// the validator can quote it in the "hash changed" diagnostic after the
    /// merger has already overwritten `hash` with the on-disk value.
    previous_hash: Option<String>,
}

impl Migration {
    /// A migration known only from discovery: it has a path and a hash but no
    /// applied state yet.
    pub fn defined(name: impl Into<String>, path: PathBuf, hash: String) -> Self {
        Migration {
            name: name.into(),
            path: Some(path),
            hash,
            state: MigrationState::NotApplied,
            pre: PhaseContent::default(),
            core: PhaseContent::default(),
            post: PhaseContent::default(),
            depends_on: Vec::new(),
            diagnostics: Vec::new(),
            has_changed: false,
            is_content_loaded: false,
            previous_hash: None,
        }
    }

    /// A migration known only from the registration table: no path, content
    /// unknown, but its applied state matters to the merger and planner.
    pub fn applied_only(name: impl Into<String>, hash: String, state: MigrationState) -> Self {
        Migration {
            name: name.into(),
            path: None,
            hash,
            state,
            pre: PhaseContent::default(),
            core: PhaseContent::default(),
            post: PhaseContent::default(),
            depends_on: Vec::new(),
            diagnostics: Vec::new(),
            has_changed: false,
            is_content_loaded: false,
            previous_hash: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn set_state(&mut self, state: MigrationState) {
        debug_assert!(
            state >= self.state,
            "migration state must be monotonic within a session"
        );
        self.state = state;
    }

    pub fn phase_content(&self, phase: Phase) -> &PhaseContent {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Core => &self.core,
            Phase::Post => &self.post,
        }
    }

    pub fn phase_content_mut(&mut self, phase: Phase) -> &mut PhaseContent {
        match phase {
            Phase::Pre => &mut self.pre,
            Phase::Core => &mut self.core,
            Phase::Post => &mut self.post,
        }
    }

    pub fn depends_on(&self) -> &[DependsOn] {
        &self.depends_on
    }

    pub fn depends_on_mut(&mut self) -> &mut Vec<DependsOn> {
        &mut self.depends_on
    }

    pub fn set_depends_on(&mut self, depends_on: Vec<DependsOn>) {
        self.depends_on = depends_on;
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    pub fn set_has_changed(&mut self, has_changed: bool) {
        self.has_changed = has_changed;
    }

    pub fn previous_hash(&self) -> Option<&str> {
        self.previous_hash.as_deref()
    }

    pub fn set_previous_hash(&mut self, hash: Option<String>) {
        self.previous_hash = hash;
    }

    pub fn is_content_loaded(&self) -> bool {
        self.is_content_loaded
    }

    pub fn set_content_loaded(&mut self, loaded: bool) {
        self.is_content_loaded = loaded;
    }

    pub fn set_path(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    pub fn set_hash(&mut self, hash: String) {
        self.hash = hash;
    }

    /// `true` for the session-anchoring pseudo-migrations `_Begin`/`_End`.
    pub fn is_pseudo(&self) -> bool {
        is_pseudo_name(&self.name)
    }

    pub fn is_begin(&self) -> bool {
        self.name.eq_ignore_ascii_case(BEGIN_NAME)
    }

    pub fn is_end(&self) -> bool {
        self.name.eq_ignore_ascii_case(END_NAME)
    }

    /// The earliest phase this migration still has unapplied content for, or
    /// `None` if it is fully applied (or has no content at all).
    pub fn earliest_pending_phase(&self) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .find(|&phase| !self.state.has_completed(phase))
    }
}

pub fn is_pseudo_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(BEGIN_NAME) || name.eq_ignore_ascii_case(END_NAME)
}

/// Total, case-insensitive ordinal ordering with `_Begin` first and `_End`
/// last, per SPEC_FULL.md §3 and §8.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let rank = |name: &str| -> u8 {
        if name.eq_ignore_ascii_case(BEGIN_NAME) {
            0
        } else if name.eq_ignore_ascii_case(END_NAME) {
            2
        } else {
            1
        }
    };

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
        other => other,
    }
}

impl PartialEq for Migration {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Migration {}

impl PartialOrd for Migration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Migration {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_names(&self.name, &other.name)
    }
}
