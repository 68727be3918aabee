//! Task lifecycle: creation, editing, state and category changes, closure and deletion.
//!
//! The quick change-state action accepts any of the four board states from any state,
//! as long as the caller is an administrator or responsible for the task. Closure is a
//! stricter transition that needs a report and an explicit confirmation token.

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::actor::AuthContext;
use crate::breakdown::{can_close_by_blocks, insert_blocks, plan_blocks, BlockDraft};
use crate::config::ClosureConfig;
use crate::db::{next_id, Database};
use crate::error::{BacklogError, Checks, ClosureRejection, Result};
use crate::fields::*;
use crate::task::{Evidence, Task};
use crate::visibility::is_responsible;

/// Input for a new task, optionally with its initial blocks.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub category: Category,
    pub state: TaskState,
    pub story_points: Option<u8>,
    pub epic_id: Option<u64>,
    pub sprint_id: Option<u64>,
    pub assignee_ids: Vec<u64>,
    pub blocks: Vec<BlockDraft>,
}

impl Default for TaskDraft {
    fn default() -> Self {
        TaskDraft {
            title: String::new(),
            description: String::new(),
            acceptance_criteria: String::new(),
            category: Category::UrgentImportant,
            state: TaskState::New,
            story_points: None,
            epic_id: None,
            sprint_id: None,
            assignee_ids: Vec::new(),
            blocks: Vec::new(),
        }
    }
}

/// Partial update of a task. `None` leaves a field untouched; for optional fields
/// `Some(None)` clears them.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub category: Option<Category>,
    pub state: Option<TaskState>,
    pub story_points: Option<Option<u8>>,
    pub epic_id: Option<Option<u64>>,
    pub sprint_id: Option<Option<u64>>,
    pub assignee_ids: Option<Vec<u64>>,
}

impl TaskPatch {
    /// Whether the patch touches anything besides the state.
    pub fn touches_details(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.acceptance_criteria.is_some()
            || self.category.is_some()
            || self.story_points.is_some()
            || self.epic_id.is_some()
            || self.sprint_id.is_some()
            || self.assignee_ids.is_some()
    }
}

/// Set the state and keep the completion fields consistent with it. A close date
/// already set is kept when the task is completed again.
pub fn apply_state(task: &mut Task, state: TaskState, now: NaiveDateTime) {
    task.state = state;
    if state == TaskState::Completed {
        task.completed = true;
        if task.closed_at.is_none() {
            task.closed_at = Some(now);
        }
    } else {
        task.completed = false;
        task.closed_at = None;
    }
    task.updated_at = now;
}

fn check_references(db: &Database, checks: &mut Checks, epic_id: Option<u64>, sprint_id: Option<u64>, assignees: &[u64]) {
    if let Some(e) = epic_id {
        checks.require(db.epic(e).is_ok(), "epic", format!("epic {e} does not exist"));
    }
    if let Some(s) = sprint_id {
        checks.require(db.sprint(s).is_ok(), "sprint", format!("sprint {s} does not exist"));
    }
    for a in assignees {
        checks.require(db.actor(*a).is_ok(), "assignees", format!("actor {a} does not exist"));
    }
}

/// Create a task and its initial blocks. Requires the create-tasks capability.
/// Nothing is stored unless the task and every block are valid.
pub fn create_task(db: &mut Database, ctx: &AuthContext, draft: TaskDraft, now: NaiveDateTime) -> Result<u64> {
    if !ctx.can(Capability::CreateTasks) {
        warn!(actor = %ctx.actor.username, "task creation refused");
        return Err(BacklogError::denied("your role cannot create tasks"));
    }
    let mut checks = Checks::new();
    let title = draft.title.trim().to_string();
    checks.require(!title.is_empty(), "title", "the task title is required");
    let story_points = checks.absorb(validate_story_points(draft.story_points)).flatten();
    check_references(db, &mut checks, draft.epic_id, draft.sprint_id, &draft.assignee_ids);
    let planned = plan_blocks(db, draft.sprint_id, &[], None, &draft.blocks, &mut checks);
    checks.finish()?;

    let id = next_id(&db.tasks, |t| t.id);
    let mut task = Task {
        id,
        title,
        description: draft.description,
        acceptance_criteria: draft.acceptance_criteria,
        category: draft.category,
        state: TaskState::New,
        story_points,
        epic_id: draft.epic_id,
        sprint_id: draft.sprint_id,
        assignee_ids: Vec::new(),
        completed: false,
        closed_at: None,
        closure_report: None,
        created_by: Some(ctx.actor_id()),
        created_at: now,
        updated_at: now,
    };
    task.set_assignees(draft.assignee_ids);
    apply_state(&mut task, draft.state, now);
    db.tasks.push(task);
    let blocks = insert_blocks(db, id, planned);
    info!(task_id = id, blocks = blocks.len(), by = %ctx.actor.username, "task created");
    Ok(id)
}

/// Edit a task. Administrators may change everything; responsible actors may only
/// change the state, whatever their role's capabilities.
pub fn edit_task(db: &mut Database, ctx: &AuthContext, task_id: u64, patch: TaskPatch, now: NaiveDateTime) -> Result<()> {
    let task = db.task(task_id)?;
    if !ctx.is_admin() && !is_responsible(task, ctx.actor_id()) {
        warn!(actor = %ctx.actor.username, task_id, "task edit refused");
        return Err(BacklogError::denied("only administrators or responsible actors can edit this task"));
    }
    if patch.touches_details() && !ctx.is_admin() {
        warn!(actor = %ctx.actor.username, task_id, "task detail edit refused");
        return Err(BacklogError::denied("responsible actors can only change the state of this task"));
    }

    let mut checks = Checks::new();
    if let Some(title) = &patch.title {
        checks.require(!title.trim().is_empty(), "title", "the task title is required");
    }
    if let Some(points) = patch.story_points {
        checks.absorb(validate_story_points(points));
    }
    let epic_id = patch.epic_id.unwrap_or(task.epic_id);
    let sprint_id = patch.sprint_id.unwrap_or(task.sprint_id);
    check_references(db, &mut checks, epic_id, sprint_id, patch.assignee_ids.as_deref().unwrap_or(&[]));
    if sprint_id != task.sprint_id {
        if let Some(sprint) = sprint_id.and_then(|s| db.sprint(s).ok()) {
            for b in db.task_blocks(task_id) {
                checks.require(
                    sprint.contains(b.start) && sprint.contains(b.end),
                    "sprint",
                    format!("{} ({} - {}) falls outside the new sprint", b.label(), b.start, b.end),
                );
            }
        }
    }
    checks.finish()?;

    let task = db.task_mut(task_id)?;
    if let Some(title) = patch.title {
        task.title = title.trim().to_string();
    }
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(criteria) = patch.acceptance_criteria {
        task.acceptance_criteria = criteria;
    }
    if let Some(category) = patch.category {
        task.category = category;
    }
    if let Some(points) = patch.story_points {
        task.story_points = points;
    }
    task.epic_id = epic_id;
    task.sprint_id = sprint_id;
    if let Some(assignees) = patch.assignee_ids {
        task.set_assignees(assignees);
    }
    if let Some(state) = patch.state {
        apply_state(task, state, now);
    }
    task.updated_at = now;
    info!(task_id, by = %ctx.actor.username, "task edited");
    Ok(())
}

fn require_admin_or_responsible(ctx: &AuthContext, task: &Task, action: &str) -> Result<()> {
    if ctx.is_admin() || is_responsible(task, ctx.actor_id()) {
        Ok(())
    } else {
        warn!(actor = %ctx.actor.username, task_id = task.id, action, "refused: not responsible");
        Err(BacklogError::denied(format!("only responsible actors or administrators can {action}")))
    }
}

/// Quick state change from the board. Returns the previous state. A non-empty note
/// when moving to in-progress is kept as evidence on the task.
pub fn change_state(
    db: &mut Database,
    ctx: &AuthContext,
    task_id: u64,
    state: TaskState,
    note: Option<&str>,
    now: NaiveDateTime,
) -> Result<TaskState> {
    let task = db.task(task_id)?;
    require_admin_or_responsible(ctx, task, "move this task")?;
    if !TaskState::BOARD.contains(&state) {
        return Err(BacklogError::invalid(
            "state",
            format!("'{}' cannot be set from the board; use new, in-progress, completed or blocked", state.label()),
        ));
    }

    let task = db.task_mut(task_id)?;
    let previous = task.state;
    apply_state(task, state, now);

    let note = note.map(str::trim).filter(|n| !n.is_empty());
    if let (TaskState::InProgress, Some(note)) = (state, note) {
        let id = next_id(&db.evidences, |e| e.id);
        db.evidences.push(Evidence {
            id,
            task_id,
            comment: Some(format!("[state note] {note}\n(from {} -> {})", previous.label(), state.label())),
            file: None,
            created_by: Some(ctx.actor_id()),
            created_at: now,
            updated_at: now,
        });
    }
    info!(task_id, from = ?previous, to = ?state, by = %ctx.actor.username, "task state changed");
    Ok(previous)
}

/// Move a task to another Eisenhower quadrant. Returns the previous category.
pub fn change_category(db: &mut Database, ctx: &AuthContext, task_id: u64, category: Category, now: NaiveDateTime) -> Result<Category> {
    let task = db.task(task_id)?;
    require_admin_or_responsible(ctx, task, "move this task")?;
    let task = db.task_mut(task_id)?;
    let previous = task.category;
    task.category = category;
    task.updated_at = now;
    info!(task_id, from = previous.code(), to = category.code(), "task category changed");
    Ok(previous)
}

/// Close a task with a report and a confirmation token. Checks run in order and the
/// first failure is reported; the task is untouched on failure.
pub fn close_task(
    db: &mut Database,
    ctx: &AuthContext,
    task_id: u64,
    report: Option<&str>,
    confirmation: Option<&str>,
    cfg: &ClosureConfig,
    now: NaiveDateTime,
) -> Result<()> {
    let task = db.task(task_id)?;
    require_admin_or_responsible(ctx, task, "close this task")?;
    if task.completed {
        return Err(BacklogError::Closure(ClosureRejection::AlreadyClosed));
    }
    let Some(report) = report.map(str::trim).filter(|r| !r.is_empty()) else {
        return Err(BacklogError::Closure(ClosureRejection::MissingReport));
    };
    if confirmation.map(str::trim) != Some(cfg.confirmation_token.as_str()) {
        return Err(BacklogError::Closure(ClosureRejection::MissingConfirmation));
    }
    if cfg.require_closed_blocks && !db.task_blocks(task_id).is_empty() && !can_close_by_blocks(db, task_id) {
        return Err(BacklogError::Closure(ClosureRejection::OpenBlocks));
    }

    let report = report.to_string();
    let task = db.task_mut(task_id)?;
    task.state = TaskState::Completed;
    task.completed = true;
    task.closed_at = Some(now);
    task.closure_report = Some(report);
    task.updated_at = now;
    info!(task_id, by = %ctx.actor.username, "task closed");
    Ok(())
}

/// Delete a task with its evidence, blocks and subtasks. Daily items that pointed at
/// it are kept but unlinked. Admin-only.
pub fn delete_task(db: &mut Database, ctx: &AuthContext, task_id: u64) -> Result<Task> {
    ctx.require_admin("delete tasks")?;
    let pos = db.tasks.iter().position(|t| t.id == task_id).ok_or_else(|| BacklogError::not_found("task", task_id))?;
    let block_ids: Vec<u64> = db.task_blocks(task_id).iter().map(|b| b.id).collect();
    db.remove_blocks(&block_ids);
    db.evidences.retain(|e| e.task_id != task_id);
    for item in db.daily_items.iter_mut().filter(|i| i.task_id == Some(task_id)) {
        item.task_id = None;
    }
    let task = db.tasks.remove(pos);
    info!(task_id, "task deleted");
    Ok(task)
}
