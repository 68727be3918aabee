//! Visibility scoping: which tasks, epics, sprints, people and dailies an actor sees.
//!
//! Every listing goes through the same three-way split carried by [`Scope`]:
//! administrators see everything, visualizers see the work of their authorized
//! projects, and everyone else sees the work assigned to them. Derived lists (epics,
//! sprints, people) are computed from the visible task set so that filters never
//! reveal anything outside the actor's scope.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::actor::{Actor, AuthContext, Scope};
use crate::daily::Daily;
use crate::db::Database;
use crate::epic::Epic;
use crate::error::{BacklogError, Result};
use crate::fields::*;
use crate::project::Project;
use crate::sprint::Sprint;
use crate::task::Task;

/// Whether the actor is responsible for the task (assigned or legacy assignee).
pub fn is_responsible(task: &Task, actor_id: u64) -> bool {
    task.is_assigned(actor_id) || task.legacy_assignee() == Some(actor_id)
}

pub fn task_in_scope(db: &Database, ctx: &AuthContext, task: &Task) -> bool {
    match &ctx.scope {
        Scope::All => true,
        Scope::Projects(projects) => db.task_project(task).is_some_and(|p| projects.contains(&p)),
        Scope::Assigned(actor_id) => is_responsible(task, *actor_id),
    }
}

/// Tasks the actor may see, in store order.
pub fn visible_tasks<'a>(db: &'a Database, ctx: &AuthContext) -> Vec<&'a Task> {
    db.tasks.iter().filter(|t| task_in_scope(db, ctx, t)).collect()
}

/// Fetch a task, refusing it when outside the actor's scope.
pub fn require_task_visible<'a>(db: &'a Database, ctx: &AuthContext, task_id: u64) -> Result<&'a Task> {
    let task = db.task(task_id)?;
    if task_in_scope(db, ctx, task) {
        Ok(task)
    } else {
        tracing::warn!(actor = %ctx.actor.username, task_id, "task outside scope");
        Err(BacklogError::denied(format!("you are not authorized to view task {task_id}")))
    }
}

pub fn epic_in_scope(db: &Database, ctx: &AuthContext, epic: &Epic) -> bool {
    match &ctx.scope {
        Scope::All => true,
        Scope::Projects(projects) => epic.project_id.is_some_and(|p| projects.contains(&p)),
        Scope::Assigned(actor_id) => {
            epic.is_owner(*actor_id)
                || db.tasks.iter().any(|t| t.epic_id == Some(epic.id) && is_responsible(t, *actor_id))
        }
    }
}

/// Epics the actor may see, ordered by title, optionally restricted to one project.
pub fn visible_epics<'a>(db: &'a Database, ctx: &AuthContext, project: Option<u64>) -> Vec<&'a Epic> {
    let mut epics: Vec<&Epic> = db
        .epics
        .iter()
        .filter(|e| project.map_or(true, |p| e.project_id == Some(p)))
        .filter(|e| epic_in_scope(db, ctx, e))
        .collect();
    epics.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
    epics
}

/// Projects listed to the actor.
pub fn visible_projects<'a>(db: &'a Database, ctx: &AuthContext) -> Vec<&'a Project> {
    db.projects
        .iter()
        .filter(|p| match &ctx.scope {
            Scope::All => true,
            Scope::Projects(ids) => ids.contains(&p.id),
            Scope::Assigned(_) => visible_tasks(db, ctx).iter().any(|t| db.task_project(t) == Some(p.id)),
        })
        .collect()
}

/// People the actor may pick in a person filter. Members get none; they only
/// ever see themselves.
pub fn visible_members<'a>(db: &'a Database, ctx: &AuthContext) -> Vec<&'a Actor> {
    let mut members: Vec<&Actor> = match &ctx.scope {
        Scope::All => db.actors.iter().collect(),
        Scope::Projects(_) => {
            let ids: BTreeSet<u64> =
                visible_tasks(db, ctx).iter().flat_map(|t| t.assignee_ids.iter().copied()).collect();
            db.actors.iter().filter(|a| ids.contains(&a.id)).collect()
        }
        Scope::Assigned(_) => Vec::new(),
    };
    members.sort_by(|a, b| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()));
    members
}

/// Sprints the actor may pick in a filter, ordered by start date.
pub fn visible_sprints<'a>(db: &'a Database, ctx: &AuthContext) -> Vec<&'a Sprint> {
    let mut sprints: Vec<&Sprint> = if ctx.is_admin() {
        db.sprints.iter().collect()
    } else {
        let ids: BTreeSet<u64> = visible_tasks(db, ctx).iter().filter_map(|t| t.sprint_id).collect();
        db.sprints.iter().filter(|s| ids.contains(&s.id)).collect()
    };
    sprints.sort_by_key(|s| (s.start, s.id));
    sprints
}

pub fn daily_in_scope(db: &Database, ctx: &AuthContext, daily: &Daily) -> bool {
    match &ctx.scope {
        Scope::All => true,
        Scope::Projects(_) => visible_members(db, ctx).iter().any(|a| a.id == daily.actor_id),
        Scope::Assigned(actor_id) => daily.actor_id == *actor_id,
    }
}

/// Filters for task listings. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub person: Option<u64>,
    pub sprint: Option<u64>,
    pub epic: Option<u64>,
    pub project: Option<u64>,
    pub category: Option<Category>,
    pub state: Option<TaskState>,
    pub open: OpenFilter,
}

/// Visible tasks matching the filter, ordered by sprint start, category and title.
/// The person filter is ignored for actors who cannot filter by person.
pub fn filter_tasks<'a>(db: &'a Database, ctx: &AuthContext, filter: &TaskFilter) -> Vec<&'a Task> {
    let person = filter.person.filter(|_| ctx.can_filter_people());
    let mut tasks: Vec<&Task> = visible_tasks(db, ctx)
        .into_iter()
        .filter(|t| {
            if let Some(p) = person {
                if !is_responsible(t, p) {
                    return false;
                }
            }
            if filter.sprint.is_some() && t.sprint_id != filter.sprint {
                return false;
            }
            if filter.epic.is_some() && t.epic_id != filter.epic {
                return false;
            }
            if filter.project.is_some() && db.task_project(t) != filter.project {
                return false;
            }
            if filter.category.is_some_and(|c| t.category != c) {
                return false;
            }
            if filter.state.is_some_and(|s| t.state != s) {
                return false;
            }
            match filter.open {
                OpenFilter::Open => !t.completed,
                OpenFilter::Closed => t.completed,
                OpenFilter::All => true,
            }
        })
        .collect();
    sort_tasks(db, &mut tasks);
    tasks
}

/// Order by sprint start (tasks without a sprint last), then category, then title.
pub fn sort_tasks(db: &Database, tasks: &mut [&Task]) {
    tasks.sort_by_cached_key(|t| {
        let start = t.sprint_id.and_then(|s| db.sprint(s).ok()).map(|s| s.start).unwrap_or(NaiveDate::MAX);
        (start, t.category, t.title.to_lowercase(), t.id)
    });
}

/// Group already ordered tasks under a heading. Group order follows the heading.
pub fn group_tasks<'a>(db: &Database, tasks: &[&'a Task], by: GroupBy) -> BTreeMap<String, Vec<&'a Task>> {
    let mut groups: BTreeMap<String, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        let key = match by {
            GroupBy::Project => db
                .task_project(task)
                .and_then(|p| db.project(p).ok())
                .map(|p| p.code.clone())
                .unwrap_or_else(|| "(no project)".into()),
            GroupBy::Epic => task
                .epic_id
                .and_then(|e| db.epic(e).ok())
                .map(|e| e.label())
                .unwrap_or_else(|| "(no epic)".into()),
            GroupBy::Sprint => task
                .sprint_id
                .and_then(|s| db.sprint(s).ok())
                .map(|s| format!("{} {}", s.start, s.name))
                .unwrap_or_else(|| "(no sprint)".into()),
            GroupBy::None => String::new(),
        };
        groups.entry(key).or_default().push(task);
    }
    groups
}

/// Visible tasks bucketed into the four Eisenhower quadrants.
pub fn matrix<'a>(db: &'a Database, ctx: &AuthContext, filter: &TaskFilter) -> BTreeMap<Category, Vec<&'a Task>> {
    let mut quadrants: BTreeMap<Category, Vec<&Task>> = Category::ALL.iter().map(|c| (*c, Vec::new())).collect();
    for task in filter_tasks(db, ctx, filter) {
        quadrants.entry(task.category).or_default().push(task);
    }
    quadrants
}

/// Open tasks of one person. Only administrators may look at someone else's list.
pub fn open_tasks_for<'a>(db: &'a Database, ctx: &AuthContext, person: u64) -> Result<Vec<&'a Task>> {
    if person != ctx.actor_id() && !ctx.is_admin() {
        return Err(BacklogError::denied("only administrators can view another person's checklist"));
    }
    db.actor(person)?;
    let mut tasks: Vec<&Task> = db.tasks.iter().filter(|t| !t.completed && is_responsible(t, person)).collect();
    sort_tasks(db, &mut tasks);
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{d, Fixture};

    #[test]
    fn test_visualizer_without_grants_sees_no_tasks() {
        let mut fx = Fixture::new();
        let p = fx.project("CPS");
        let e = fx.epic("E", Some(p));
        fx.task("T", Some(e), None, &[]);
        let viewer = fx.actor("viewer", Role::Visualizer);
        assert!(visible_tasks(&fx.db, &fx.ctx(viewer)).is_empty());
    }

    #[test]
    fn test_three_way_split() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let viewer = fx.actor("viewer", Role::ProductOwner);
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let p1 = fx.project("CPS");
        let p2 = fx.project("NEUCONTA");
        let e1 = fx.epic("E1", Some(p1));
        let e2 = fx.epic("E2", Some(p2));
        let t1 = fx.task("a", Some(e1), None, &[ana]);
        let t2 = fx.task("b", Some(e2), None, &[bo]);
        let t3 = fx.task("c", None, None, &[ana, bo]);
        fx.grant(viewer, p1);

        let ids = |ctx: &AuthContext| visible_tasks(&fx.db, ctx).iter().map(|t| t.id).collect::<Vec<_>>();
        assert_eq!(ids(&fx.ctx(admin)), vec![t1, t2, t3]);
        assert_eq!(ids(&fx.ctx(viewer)), vec![t1]);
        assert_eq!(ids(&fx.ctx(ana)), vec![t1, t3]);
        assert_eq!(ids(&fx.ctx(bo)), vec![t2, t3]);
        assert!(require_task_visible(&fx.db, &fx.ctx(ana), t2).is_err());
    }

    #[test]
    fn test_members_dropdown_never_leaks_outside_scope() {
        let mut fx = Fixture::new();
        let viewer = fx.actor("viewer", Role::Visualizer);
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let p1 = fx.project("CPS");
        let p2 = fx.project("OTHER");
        let e1 = fx.epic("E1", Some(p1));
        let e2 = fx.epic("E2", Some(p2));
        fx.task("a", Some(e1), None, &[ana]);
        fx.task("b", Some(e2), None, &[bo]);
        fx.grant(viewer, p1);

        let names: Vec<_> = visible_members(&fx.db, &fx.ctx(viewer)).iter().map(|a| a.id).collect();
        assert_eq!(names, vec![ana]);
        assert!(visible_members(&fx.db, &fx.ctx(ana)).is_empty());
        let epics: Vec<_> = visible_epics(&fx.db, &fx.ctx(viewer), None).iter().map(|e| e.id).collect();
        assert_eq!(epics, vec![e1]);
    }

    #[test]
    fn test_member_sees_epics_they_own_or_work_in() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let owned = fx.epic("Owned", None);
        let worked = fx.epic("Worked", None);
        fx.epic("Foreign", None);
        fx.db.epic_mut(owned).unwrap().owner_ids = vec![ana];
        fx.task("t", Some(worked), None, &[ana]);
        let ids: Vec<_> = visible_epics(&fx.db, &fx.ctx(ana), None).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![owned, worked]);
    }

    #[test]
    fn test_filter_orders_by_sprint_category_title() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ana = fx.actor("ana", Role::Member);
        let early = fx.sprint(d(2025, 3, 1), d(2025, 3, 14));
        let late = fx.sprint(d(2025, 3, 15), d(2025, 3, 28));
        let t_late = fx.task("alpha", None, Some(late), &[ana]);
        let t_none = fx.task("beta", None, None, &[ana]);
        let t_early_b = fx.task("zeta", None, Some(early), &[]);
        let t_early_a = fx.task("omega", None, Some(early), &[ana]);
        fx.db.task_mut(t_early_b).unwrap().category = Category::NotUrgentImportant;

        let ctx = fx.ctx(admin);
        let ids: Vec<_> = filter_tasks(&fx.db, &ctx, &TaskFilter::default()).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![t_early_a, t_early_b, t_late, t_none]);

        let only_ana = TaskFilter { person: Some(ana), ..TaskFilter::default() };
        assert_eq!(filter_tasks(&fx.db, &ctx, &only_ana).len(), 3);

        fx.db.task_mut(t_none).unwrap().completed = true;
        let open = TaskFilter { open: OpenFilter::Open, ..TaskFilter::default() };
        assert_eq!(filter_tasks(&fx.db, &ctx, &open).len(), 3);
    }

    #[test]
    fn test_member_person_filter_is_ignored() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        fx.task("mine", None, None, &[ana]);
        fx.task("theirs", None, None, &[bo]);
        let filter = TaskFilter { person: Some(bo), ..TaskFilter::default() };
        let titles: Vec<_> = filter_tasks(&fx.db, &fx.ctx(ana), &filter).iter().map(|t| t.title.clone()).collect();
        assert_eq!(titles, vec!["mine"]);
    }

    #[test]
    fn test_grouping_and_matrix() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let p = fx.project("CPS");
        let e = fx.epic("Ledger", Some(p));
        fx.task("a", Some(e), None, &[]);
        let loose = fx.task("b", None, None, &[]);
        fx.db.task_mut(loose).unwrap().category = Category::NotUrgentNotImportant;
        let ctx = fx.ctx(admin);
        let tasks = filter_tasks(&fx.db, &ctx, &TaskFilter::default());
        let groups = group_tasks(&fx.db, &tasks, GroupBy::Project);
        assert_eq!(groups.keys().cloned().collect::<Vec<_>>(), vec!["(no project)", "CPS"]);

        let m = matrix(&fx.db, &ctx, &TaskFilter::default());
        assert_eq!(m.len(), 4);
        assert_eq!(m[&Category::UrgentImportant].len(), 1);
        assert_eq!(m[&Category::NotUrgentNotImportant].len(), 1);
        assert!(m[&Category::UrgentNotImportant].is_empty());
    }

    #[test]
    fn test_checklist_is_self_unless_admin() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        fx.task("open", None, None, &[ana]);
        let done = fx.task("done", None, None, &[ana]);
        fx.db.task_mut(done).unwrap().completed = true;
        assert_eq!(open_tasks_for(&fx.db, &fx.ctx(ana), ana).unwrap().len(), 1);
        assert_eq!(open_tasks_for(&fx.db, &fx.ctx(admin), ana).unwrap().len(), 1);
        assert!(matches!(open_tasks_for(&fx.db, &fx.ctx(bo), ana), Err(BacklogError::PermissionDenied(_))));
    }
}
