//! Epics: groupings of tasks under a project, with their own lifecycle and progress.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actor::AuthContext;
use crate::db::{next_id, Database};
use crate::error::{BacklogError, Checks, Result};
use crate::fields::*;
use crate::task::Task;
use crate::visibility::epic_in_scope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: u64,
    pub code: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kpis: String,
    pub docs_url: Option<String>,
    #[serde(default)]
    pub status: EpicStatus,
    #[serde(default)]
    pub priority: EpicPriority,
    pub project_id: Option<u64>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// 0-100 override of the computed progress.
    pub manual_progress: Option<u8>,
    #[serde(default)]
    pub owner_ids: Vec<u64>,
    #[serde(default)]
    pub sprint_ids: Vec<u64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Epic {
    /// Primary owner, defined only when the epic has exactly one owner.
    pub fn primary_owner(&self) -> Option<u64> {
        match self.owner_ids.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn is_owner(&self, actor_id: u64) -> bool {
        self.owner_ids.contains(&actor_id)
    }

    pub fn label(&self) -> String {
        match &self.code {
            Some(code) => format!("{code} - {}", self.title),
            None => self.title.clone(),
        }
    }

    /// Progress from completed tasks, rounded to two decimals.
    pub fn computed_progress<'a>(&self, tasks: impl IntoIterator<Item = &'a Task>) -> f64 {
        let (mut total, mut done) = (0usize, 0usize);
        for t in tasks.into_iter().filter(|t| t.epic_id == Some(self.id)) {
            total += 1;
            if t.completed {
                done += 1;
            }
        }
        if total == 0 {
            return 0.0;
        }
        (done as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
    }

    /// Manual override when set, otherwise computed progress.
    pub fn progress<'a>(&self, tasks: impl IntoIterator<Item = &'a Task>) -> f64 {
        match self.manual_progress {
            Some(p) => f64::from(p),
            None => self.computed_progress(tasks),
        }
    }
}

/// Input for creating or replacing an epic.
#[derive(Debug, Clone, Default)]
pub struct EpicDraft {
    pub code: Option<String>,
    pub title: String,
    pub description: String,
    pub kpis: String,
    pub docs_url: Option<String>,
    pub status: EpicStatus,
    pub priority: EpicPriority,
    pub project_id: Option<u64>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub manual_progress: Option<u8>,
    pub owner_ids: Vec<u64>,
    pub sprint_ids: Vec<u64>,
}

impl EpicDraft {
    /// Seed a draft from an existing epic so edits can change only some fields.
    pub fn from_epic(epic: &Epic) -> Self {
        EpicDraft {
            code: epic.code.clone(),
            title: epic.title.clone(),
            description: epic.description.clone(),
            kpis: epic.kpis.clone(),
            docs_url: epic.docs_url.clone(),
            status: epic.status,
            priority: epic.priority,
            project_id: epic.project_id,
            start: epic.start,
            end: epic.end,
            manual_progress: epic.manual_progress,
            owner_ids: epic.owner_ids.clone(),
            sprint_ids: epic.sprint_ids.clone(),
        }
    }
}

/// Validate a draft, returning the normalised code.
fn validate(db: &Database, draft: &EpicDraft, editing: Option<u64>) -> Result<Option<String>> {
    let mut checks = Checks::new();
    let title = draft.title.trim();
    checks.require(!title.is_empty(), "title", "the epic title is required");
    checks.require(
        !db.epics.iter().any(|e| Some(e.id) != editing && e.title.eq_ignore_ascii_case(title)),
        "title",
        format!("an epic titled '{title}' already exists"),
    );

    let code = draft.code.as_deref().map(|c| c.trim().to_uppercase()).filter(|c| !c.is_empty());
    if let Some(code) = &code {
        checks.require(
            !db.epics.iter().any(|e| Some(e.id) != editing && e.code.as_deref() == Some(code.as_str())),
            "code",
            format!("epic code '{code}' already exists"),
        );
    }

    if let (Some(start), Some(end)) = (draft.start, draft.end) {
        checks.require(start <= end, "end", "the start date cannot be after the end date");
    }
    if let Some(p) = draft.manual_progress {
        checks.require(p <= 100, "manual_progress", "manual progress must be between 0 and 100");
    }
    if let Some(pid) = draft.project_id {
        match db.project(pid) {
            Ok(p) => checks.require(p.active, "project", format!("project {} is inactive", p.code)),
            Err(_) => checks.require(false, "project", format!("project {pid} does not exist")),
        }
    }
    for owner in &draft.owner_ids {
        checks.require(db.actor(*owner).is_ok(), "owners", format!("actor {owner} does not exist"));
    }
    for sprint in &draft.sprint_ids {
        checks.require(db.sprint(*sprint).is_ok(), "sprints", format!("sprint {sprint} does not exist"));
    }
    checks.finish()?;
    Ok(code)
}

fn dedup(mut ids: Vec<u64>) -> Vec<u64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Create an epic. Admin-only.
pub fn create_epic(db: &mut Database, ctx: &AuthContext, draft: EpicDraft, now: NaiveDateTime) -> Result<u64> {
    ctx.require_admin("create epics")?;
    let code = validate(db, &draft, None)?;
    let id = next_id(&db.epics, |e| e.id);
    db.epics.push(Epic {
        id,
        code,
        title: draft.title.trim().to_string(),
        description: draft.description,
        kpis: draft.kpis,
        docs_url: draft.docs_url.filter(|u| !u.trim().is_empty()),
        status: draft.status,
        priority: draft.priority,
        project_id: draft.project_id,
        start: draft.start,
        end: draft.end,
        manual_progress: draft.manual_progress,
        owner_ids: dedup(draft.owner_ids),
        sprint_ids: dedup(draft.sprint_ids),
        created_at: now,
        updated_at: now,
    });
    info!(epic_id = id, "epic created");
    Ok(id)
}

/// Replace an epic's fields. Admin-only.
pub fn edit_epic(db: &mut Database, ctx: &AuthContext, id: u64, draft: EpicDraft, now: NaiveDateTime) -> Result<()> {
    ctx.require_admin("edit epics")?;
    db.epic(id)?;
    let code = validate(db, &draft, Some(id))?;
    let epic = db.epic_mut(id)?;
    epic.code = code;
    epic.title = draft.title.trim().to_string();
    epic.description = draft.description;
    epic.kpis = draft.kpis;
    epic.docs_url = draft.docs_url.filter(|u| !u.trim().is_empty());
    epic.status = draft.status;
    epic.priority = draft.priority;
    epic.project_id = draft.project_id;
    epic.start = draft.start;
    epic.end = draft.end;
    epic.manual_progress = draft.manual_progress;
    epic.owner_ids = dedup(draft.owner_ids);
    epic.sprint_ids = dedup(draft.sprint_ids);
    epic.updated_at = now;
    info!(epic_id = id, "epic edited");
    Ok(())
}

/// Delete an epic; its tasks are kept without an epic. Admin-only.
pub fn delete_epic(db: &mut Database, ctx: &AuthContext, id: u64) -> Result<Epic> {
    ctx.require_admin("delete epics")?;
    let pos = db.epics.iter().position(|e| e.id == id).ok_or_else(|| BacklogError::not_found("epic", id))?;
    let epic = db.epics.remove(pos);
    for task in db.tasks.iter_mut().filter(|t| t.epic_id == Some(id)) {
        task.epic_id = None;
    }
    info!(epic_id = id, "epic deleted");
    Ok(epic)
}

/// Aggregated view of one epic.
#[derive(Debug, Clone, PartialEq)]
pub struct EpicDetail {
    pub epic_id: u64,
    pub total: usize,
    pub completed: usize,
    pub by_state: BTreeMap<TaskState, usize>,
    pub computed_progress: f64,
    pub effective_progress: f64,
}

/// Detail of an epic the actor is allowed to see.
pub fn epic_detail(db: &Database, ctx: &AuthContext, id: u64) -> Result<EpicDetail> {
    let epic = db.epic(id)?;
    if !epic_in_scope(db, ctx, epic) {
        return Err(BacklogError::denied("you are not authorized to view this epic"));
    }
    let tasks: Vec<&Task> = db.tasks.iter().filter(|t| t.epic_id == Some(id)).collect();
    let mut by_state = BTreeMap::new();
    for t in &tasks {
        *by_state.entry(t.state).or_insert(0) += 1;
    }
    Ok(EpicDetail {
        epic_id: id,
        total: tasks.len(),
        completed: tasks.iter().filter(|t| t.completed).count(),
        by_state,
        computed_progress: epic.computed_progress(tasks.iter().copied()),
        effective_progress: epic.progress(tasks.iter().copied()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{d, Fixture};

    fn draft(title: &str) -> EpicDraft {
        EpicDraft { title: title.into(), ..EpicDraft::default() }
    }

    #[test]
    fn test_progress_manual_override_wins() {
        let mut fx = Fixture::new();
        let e = fx.epic("Epic", None);
        let t1 = fx.task("a", Some(e), None, &[]);
        fx.task("b", Some(e), None, &[]);
        fx.task("c", Some(e), None, &[]);
        fx.db.task_mut(t1).unwrap().completed = true;

        let epic = fx.db.epic(e).unwrap().clone();
        assert_eq!(epic.progress(&fx.db.tasks), 33.33);

        fx.db.epic_mut(e).unwrap().manual_progress = Some(80);
        let epic = fx.db.epic(e).unwrap();
        assert_eq!(epic.progress(&fx.db.tasks), 80.0);
        assert_eq!(epic.computed_progress(&fx.db.tasks), 33.33);
    }

    #[test]
    fn test_progress_without_tasks_is_zero() {
        let mut fx = Fixture::new();
        let e = fx.epic("Empty", None);
        assert_eq!(fx.db.epic(e).unwrap().progress(&fx.db.tasks), 0.0);
    }

    #[test]
    fn test_epic_validation() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ctx = fx.ctx(admin);
        create_epic(&mut fx.db, &ctx, EpicDraft { code: Some("neusi-001".into()), ..draft("Ledger") }, fx.now).unwrap();

        let mut bad = draft("ledger");
        bad.code = Some("NEUSI-001".into());
        bad.start = Some(d(2025, 5, 1));
        bad.end = Some(d(2025, 4, 1));
        bad.manual_progress = Some(120);
        match create_epic(&mut fx.db, &ctx, bad, fx.now) {
            Err(BacklogError::Validation(errs)) => {
                let fields: Vec<_> = errs.iter().map(|e| e.field).collect();
                assert_eq!(fields, vec!["title", "code", "end", "manual_progress"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.db.epics.len(), 1);
        assert_eq!(fx.db.epics[0].code.as_deref(), Some("NEUSI-001"));
    }

    #[test]
    fn test_edit_keeps_own_title_and_derives_primary_owner() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let owner = fx.actor("owner", Role::Member);
        let ctx = fx.ctx(admin);
        let id = create_epic(&mut fx.db, &ctx, draft("Payroll"), fx.now).unwrap();
        let mut edit = EpicDraft::from_epic(fx.db.epic(id).unwrap());
        edit.owner_ids = vec![owner];
        edit_epic(&mut fx.db, &ctx, id, edit, fx.now).unwrap();
        assert_eq!(fx.db.epic(id).unwrap().primary_owner(), Some(owner));

        let mut edit = EpicDraft::from_epic(fx.db.epic(id).unwrap());
        edit.owner_ids.push(admin);
        edit_epic(&mut fx.db, &ctx, id, edit, fx.now).unwrap();
        assert_eq!(fx.db.epic(id).unwrap().primary_owner(), None);
    }

    #[test]
    fn test_epic_admin_only_and_delete_detaches() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let member = fx.actor("member", Role::Member);
        let e = fx.epic("E", None);
        let t = fx.task("t", Some(e), None, &[member]);
        let ctx = fx.ctx(member);
        assert!(matches!(create_epic(&mut fx.db, &ctx, draft("X"), fx.now), Err(BacklogError::PermissionDenied(_))));
        assert!(matches!(delete_epic(&mut fx.db, &ctx, e), Err(BacklogError::PermissionDenied(_))));
        let ctx = fx.ctx(admin);
        delete_epic(&mut fx.db, &ctx, e).unwrap();
        assert_eq!(fx.db.task(t).unwrap().epic_id, None);
    }

    #[test]
    fn test_epic_detail_counts_and_scope() {
        let mut fx = Fixture::new();
        let member = fx.actor("member", Role::Member);
        let other = fx.actor("other", Role::Member);
        let e = fx.epic("E", None);
        let t1 = fx.task("a", Some(e), None, &[member]);
        fx.task("b", Some(e), None, &[other]);
        {
            let t = fx.db.task_mut(t1).unwrap();
            t.state = TaskState::Completed;
            t.completed = true;
        }
        let detail = epic_detail(&fx.db, &fx.ctx(member), e).unwrap();
        assert_eq!(detail.total, 2);
        assert_eq!(detail.completed, 1);
        assert_eq!(detail.by_state.get(&TaskState::Completed), Some(&1));
        assert_eq!(detail.by_state.get(&TaskState::New), Some(&1));
        assert_eq!(detail.effective_progress, 50.0);

        let stranger = fx.actor("stranger", Role::Member);
        assert!(matches!(epic_detail(&fx.db, &fx.ctx(stranger), e), Err(BacklogError::PermissionDenied(_))));
    }
}
