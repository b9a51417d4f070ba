use std::collections::{HashMap, HashSet};

use crate::migration::Migration;
use crate::phase::Phase;

/// One scheduled unit of work: run `migration_index`'s `content_phase`
/// content during the plan's `execution_phase`. `content_phase` and
/// `execution_phase` only differ for content shifted into Core by a
/// cross-dependency (SPEC_FULL.md §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanItem {
    pub migration_index: usize,
    pub content_phase: Phase,
}

/// The output of the planner: an ordered schedule of work per execution
/// phase, built from a pending sequence with resolved references.
#[derive(Debug, Default)]
pub struct MigrationPlan {
    migrations: Vec<Migration>,
    pre: Vec<PlanItem>,
    core: Vec<PlanItem>,
    post: Vec<PlanItem>,
    is_core_required: bool,
    has_pre_content_in_core: bool,
    has_post_content_in_core: bool,
}

impl MigrationPlan {
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn migration(&self, index: usize) -> &Migration {
        &self.migrations[index]
    }

    pub fn pre(&self) -> &[PlanItem] {
        &self.pre
    }

    pub fn core(&self) -> &[PlanItem] {
        &self.core
    }

    pub fn post(&self) -> &[PlanItem] {
        &self.post
    }

    pub fn is_core_required(&self) -> bool {
        self.is_core_required
    }

    pub fn has_pre_content_in_core(&self) -> bool {
        self.has_pre_content_in_core
    }

    pub fn has_post_content_in_core(&self) -> bool {
        self.has_post_content_in_core
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.core.is_empty() && self.post.is_empty()
    }

    /// The scheduled items for one execution phase, in application order.
    pub fn get_items(&self, execution_phase: Phase) -> &[PlanItem] {
        match execution_phase {
            Phase::Pre => &self.pre,
            Phase::Core => &self.core,
            Phase::Post => &self.post,
        }
    }

    /// Per the applied-count convention resolved in SPEC_FULL.md §9: pseudo
    /// migrations are executed but excluded from the reported applied count.
    pub fn counts_toward_applied(&self, item: &PlanItem) -> bool {
        !self.migrations[item.migration_index].is_pseudo()
    }

    pub fn migrations_mut(&mut self) -> &mut [Migration] {
        &mut self.migrations
    }

    /// The earliest execution phase (Pre < Core < Post) that still has a
    /// scheduled item for this migration, used by the validator's
    /// phase-inapplicability rule.
    pub fn earliest_execution_phase(&self, index: usize) -> Option<Phase> {
        if self.pre.iter().any(|i| i.migration_index == index) {
            return Some(Phase::Pre);
        }
        if self.core.iter().any(|i| i.migration_index == index) {
            return Some(Phase::Core);
        }
        if self.post.iter().any(|i| i.migration_index == index) {
            return Some(Phase::Post);
        }
        None
    }
}

/// Build a [`MigrationPlan`] from a pending sequence with resolved
/// references, per the frontier-tracking algorithm in SPEC_FULL.md §4.6.
///
/// For each migration `M` with a dependency on `dep` whose Post has not
/// already completed in a prior session, `M`'s Pre content is shifted into
/// Core so it runs after `dep`'s Post (itself shifted into Core as
/// "early Post"). Pseudo-migrations never trigger this shift themselves,
/// per the Open Question resolution in SPEC_FULL.md §9 — `_Begin`'s natural
/// ordinal position already guarantees its Pre sorts first, and `_End`'s
/// guarantees its Post sorts last, so no special-casing of their position is
/// needed beyond excluding them from being a shift's trigger.
///
/// `migrations` must already be in ascending name order (so a dependency
/// always sits at a lower index than anything depending on it) — the single
/// forward pass below emits a forced-Pre migration's own Core content at its
/// source index, and only appends its shifted Pre once the iteration reaches
/// the dependency's index. Callers reach this already sorted via
/// `merge_migrations`/discovery order, and `validate_plan` separately rejects
/// a migration whose dependency name sorts after its own, so an
/// out-of-contract call here never reaches execution.
pub fn plan_migrations(migrations: Vec<Migration>) -> MigrationPlan {
    let mut forced_pre: HashSet<usize> = HashSet::new();
    let mut forced_post: HashSet<usize> = HashSet::new();
    let mut anchor_of: HashMap<usize, usize> = HashMap::new();

    for (index, migration) in migrations.iter().enumerate() {
        if migration.is_pseudo() {
            continue;
        }
        if migration.phase_content(Phase::Pre).is_empty() {
            continue;
        }
        if migration.state().has_completed(Phase::Pre) {
            continue;
        }

        let mut causing: Vec<usize> = Vec::new();
        for dep in migration.depends_on() {
            let Some(dep_index) = dep.resolved_index else {
                continue;
            };
            if dep_index == index {
                continue;
            }
            let dep_migration = &migrations[dep_index];
            if !dep_migration.state().has_completed(Phase::Post) {
                causing.push(dep_index);
            }
        }

        if let Some(&max_anchor) = causing.iter().max() {
            forced_pre.insert(index);
            for dep_index in causing {
                forced_post.insert(dep_index);
            }
            anchor_of.insert(index, max_anchor);
        }
    }

    let mut append_after: HashMap<usize, Vec<usize>> = HashMap::new();
    for (&index, &anchor) in &anchor_of {
        append_after.entry(anchor).or_default().push(index);
    }
    for successors in append_after.values_mut() {
        successors.sort_unstable();
    }

    let mut pre = Vec::new();
    let mut core = Vec::new();
    let mut post = Vec::new();
    let mut is_core_required = false;
    let mut has_pre_content_in_core = false;
    let mut has_post_content_in_core = false;

    for (index, migration) in migrations.iter().enumerate() {
        let pre_content = migration.phase_content(Phase::Pre);
        if !pre_content.is_empty() && !migration.state().has_completed(Phase::Pre) {
            if forced_pre.contains(&index) {
                has_pre_content_in_core = true;
            } else {
                pre.push(PlanItem {
                    migration_index: index,
                    content_phase: Phase::Pre,
                });
            }
        }

        let core_content = migration.phase_content(Phase::Core);
        if !core_content.is_empty() && !migration.state().has_completed(Phase::Core) {
            core.push(PlanItem {
                migration_index: index,
                content_phase: Phase::Core,
            });
            if !migration.is_pseudo() {
                is_core_required = true;
            }
        }

        let post_content = migration.phase_content(Phase::Post);
        if !post_content.is_empty() && !migration.state().has_completed(Phase::Post) {
            if forced_post.contains(&index) {
                core.push(PlanItem {
                    migration_index: index,
                    content_phase: Phase::Post,
                });
                has_post_content_in_core = true;
                if !migration.is_pseudo() {
                    is_core_required = true;
                }
            } else {
                post.push(PlanItem {
                    migration_index: index,
                    content_phase: Phase::Post,
                });
            }
        }

        if let Some(successors) = append_after.get(&index) {
            for &successor in successors {
                let successor_migration = &migrations[successor];
                if !successor_migration.phase_content(Phase::Pre).is_empty()
                    && !successor_migration.state().has_completed(Phase::Pre)
                {
                    core.push(PlanItem {
                        migration_index: successor,
                        content_phase: Phase::Pre,
                    });
                    if !successor_migration.is_pseudo() {
                        is_core_required = true;
                    }
                }
            }
        }
    }

    MigrationPlan {
        migrations,
        pre,
        core,
        post,
        is_core_required,
        has_pre_content_in_core,
        has_post_content_in_core,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{DependsOn, MigrationState};

    fn with_content(name: &str, pre: &str, core: &str, post: &str) -> Migration {
        let mut m = Migration::applied_only(name, "H".into(), MigrationState::NotApplied);
        m.phase_content_mut(Phase::Pre).sql = pre.to_string();
        m.phase_content_mut(Phase::Core).sql = core.to_string();
        m.phase_content_mut(Phase::Post).sql = post.to_string();
        m
    }

    #[test]
    fn unrelated_migrations_run_in_their_natural_phases() {
        let migrations = vec![with_content("a", "pre", "", "post")];
        let plan = plan_migrations(migrations);
        assert_eq!(plan.pre().len(), 1);
        assert_eq!(plan.post().len(), 1);
        assert!(plan.core().is_empty());
        assert!(!plan.is_core_required());
    }

    #[test]
    fn dependency_forces_both_sides_into_core() {
        let mut a = with_content("a", "pre-a", "", "");
        a.set_depends_on(vec![DependsOn {
            name: "b".into(),
            resolved_index: Some(1),
        }]);
        let b = with_content("b", "", "", "post-b");
        let plan = plan_migrations(vec![a, b]);

        assert!(plan.pre().is_empty());
        assert!(plan.post().is_empty());
        assert_eq!(plan.core().len(), 2);
        assert_eq!(plan.core()[0].migration_index, 1);
        assert_eq!(plan.core()[0].content_phase, Phase::Post);
        assert_eq!(plan.core()[1].migration_index, 0);
        assert_eq!(plan.core()[1].content_phase, Phase::Pre);
        assert!(plan.has_pre_content_in_core());
        assert!(plan.has_post_content_in_core());
    }

    #[test]
    fn dependency_already_fully_applied_does_not_force_a_shift() {
        let mut a = with_content("a", "pre-a", "", "");
        a.set_depends_on(vec![DependsOn {
            name: "b".into(),
            resolved_index: Some(1),
        }]);
        let b = Migration::applied_only("b", "H".into(), MigrationState::AppliedPost);
        let plan = plan_migrations(vec![a, b]);
        assert_eq!(plan.pre().len(), 1);
        assert!(plan.core().is_empty());
    }

    #[test]
    fn partially_applied_migration_skips_completed_phases() {
        let mut m = with_content("m", "pre", "core", "post");
        m.set_state(MigrationState::AppliedCore);
        let plan = plan_migrations(vec![m]);
        assert!(plan.pre().is_empty());
        assert!(plan.core().is_empty());
        assert_eq!(plan.post().len(), 1);
    }

    #[test]
    fn pseudo_migration_never_triggers_its_own_shift() {
        let mut begin = with_content("_Begin", "pre", "", "");
        begin.set_depends_on(vec![DependsOn {
            name: "a".into(),
            resolved_index: Some(1),
        }]);
        let a = with_content("a", "", "", "post-a");
        let plan = plan_migrations(vec![begin, a]);
        assert_eq!(plan.pre().len(), 1);
        assert_eq!(plan.pre()[0].migration_index, 0);
    }

    #[test]
    fn forward_dependency_places_dependency_post_before_dependent_pre() {
        let a = with_content("a", "", "", "post-a");
        let mut b = with_content("b", "pre-b", "", "");
        b.set_depends_on(vec![DependsOn {
            name: "a".into(),
            resolved_index: Some(0),
        }]);
        let plan = plan_migrations(vec![a, b]);
        assert_eq!(plan.core().len(), 2);
        assert_eq!(plan.core()[0].migration_index, 0);
        assert_eq!(plan.core()[0].content_phase, Phase::Post);
        assert_eq!(plan.core()[1].migration_index, 1);
        assert_eq!(plan.core()[1].content_phase, Phase::Pre);
    }

    #[test]
    fn core_required_reflects_non_pseudo_core_content_only() {
        let begin = with_content("_Begin", "", "begin-core", "");
        let plan = plan_migrations(vec![begin]);
        assert!(!plan.is_core_required());
    }
}
