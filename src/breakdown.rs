//! Task breakdown: time-boxed blocks and the subtasks inside them.
//!
//! Blocks are managed by administrators only. A block must fit inside the sprint of
//! its task and must not overlap any sibling block; its 1-based order is unique per
//! task. Subtasks can be managed by administrators and by the actors responsible for
//! the task. A subtask's dates always lie within its block.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::info;

use crate::actor::AuthContext;
use crate::db::{next_id, Database};
use crate::error::{BacklogError, Checks, Result};
use crate::fields::*;
use crate::task::{ranges_overlap, Block, Subtask, Task};
use crate::visibility::is_responsible;

/// Input for a block. A missing order is assigned after the current highest.
#[derive(Debug, Clone)]
pub struct BlockDraft {
    pub order: Option<u32>,
    pub name: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A validated block that has not been given an id yet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlannedBlock {
    pub order: u32,
    pub name: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Validate block drafts against a task's sprint and its existing blocks, reporting
/// problems into `checks`. `replacing` is the id of a block being edited, which is
/// left out of the sibling set.
pub(crate) fn plan_blocks(
    db: &Database,
    sprint_id: Option<u64>,
    existing: &[&Block],
    replacing: Option<u64>,
    drafts: &[BlockDraft],
    checks: &mut Checks,
) -> Vec<PlannedBlock> {
    let sprint = sprint_id.and_then(|s| db.sprint(s).ok());
    let siblings: Vec<&&Block> = existing.iter().filter(|b| Some(b.id) != replacing).collect();
    let mut next_order = siblings.iter().map(|b| b.order).max().unwrap_or(0);
    let mut planned: Vec<PlannedBlock> = Vec::with_capacity(drafts.len());

    for draft in drafts {
        checks.require(draft.start <= draft.end, "blocks", "a block cannot end before it starts");
        if let Some(sprint) = sprint {
            checks.require(
                sprint.contains(draft.start) && sprint.contains(draft.end),
                "blocks",
                format!(
                    "block {} - {} must fall within the sprint {} - {}",
                    draft.start, draft.end, sprint.start, sprint.end
                ),
            );
        }
        let range = (draft.start, draft.end);
        let clashes = siblings.iter().any(|b| ranges_overlap(range, (b.start, b.end)))
            || planned.iter().any(|p| ranges_overlap(range, (p.start, p.end)));
        checks.require(!clashes, "blocks", format!("block {} - {} overlaps another block of the task", draft.start, draft.end));

        let order = match draft.order {
            Some(order) => {
                checks.require(order >= 1, "order", "block order starts at 1");
                let taken = siblings.iter().any(|b| b.order == order) || planned.iter().any(|p| p.order == order);
                checks.require(!taken, "order", format!("block order {order} is already used in this task"));
                order
            }
            None => next_order + 1,
        };
        next_order = next_order.max(order);
        planned.push(PlannedBlock {
            order,
            name: draft.name.as_deref().map(str::trim).filter(|n| !n.is_empty()).map(String::from),
            start: draft.start,
            end: draft.end,
        });
    }
    planned
}

/// Store planned blocks under a task, returning their ids.
pub(crate) fn insert_blocks(db: &mut Database, task_id: u64, planned: Vec<PlannedBlock>) -> Vec<u64> {
    let mut ids = Vec::with_capacity(planned.len());
    for p in planned {
        let id = next_id(&db.blocks, |b| b.id);
        db.blocks.push(Block { id, task_id, order: p.order, name: p.name, start: p.start, end: p.end });
        ids.push(id);
    }
    ids
}

/// Whether the task has at least one block and every block has subtasks, all closed.
pub fn can_close_by_blocks(db: &Database, task_id: u64) -> bool {
    let blocks = db.task_blocks(task_id);
    !blocks.is_empty()
        && blocks.iter().all(|b| {
            let subtasks = db.block_subtasks(b.id);
            !subtasks.is_empty() && subtasks.iter().all(|s| s.status == SubtaskStatus::Closed)
        })
}

/// Add a block to a task. Admin-only.
pub fn add_block(db: &mut Database, ctx: &AuthContext, task_id: u64, draft: BlockDraft) -> Result<u64> {
    ctx.require_admin("manage blocks")?;
    let task = db.task(task_id)?;
    let mut checks = Checks::new();
    let planned = plan_blocks(db, task.sprint_id, &db.task_blocks(task_id), None, &[draft], &mut checks);
    checks.finish()?;
    let ids = insert_blocks(db, task_id, planned);
    let id = ids.first().copied().ok_or_else(|| BacklogError::PreconditionFailed("no block was stored".into()))?;
    info!(task_id, block_id = id, "block added");
    Ok(id)
}

/// Edit a block and re-sync its subtasks' dates to the new range. Admin-only.
pub fn edit_block(db: &mut Database, ctx: &AuthContext, block_id: u64, draft: BlockDraft) -> Result<()> {
    ctx.require_admin("manage blocks")?;
    let block = db.block(block_id)?;
    let task = db.task(block.task_id)?;
    let draft = BlockDraft { order: draft.order.or(Some(block.order)), ..draft };

    let mut checks = Checks::new();
    let mut planned =
        plan_blocks(db, task.sprint_id, &db.task_blocks(task.id), Some(block_id), &[draft], &mut checks);
    checks.finish()?;
    let Some(p) = planned.pop() else {
        return Err(BacklogError::PreconditionFailed("no block was planned".into()));
    };

    if let Some(b) = db.blocks.iter_mut().find(|b| b.id == block_id) {
        b.order = p.order;
        b.name = p.name;
        b.start = p.start;
        b.end = p.end;
    }
    for s in db.subtasks.iter_mut().filter(|s| s.block_id == block_id) {
        s.start = Some(p.start);
        s.end = Some(p.end);
    }
    info!(block_id, start = %p.start, end = %p.end, "block edited, subtask dates synced");
    Ok(())
}

/// Delete a block with its subtasks. Admin-only.
pub fn delete_block(db: &mut Database, ctx: &AuthContext, block_id: u64) -> Result<()> {
    ctx.require_admin("manage blocks")?;
    db.block(block_id)?;
    db.remove_blocks(&[block_id]);
    info!(block_id, "block deleted");
    Ok(())
}

fn can_manage_subtasks(ctx: &AuthContext, task: &Task) -> bool {
    ctx.is_admin() || is_responsible(task, ctx.actor_id())
}

/// Admin, responsible of the task, or responsible of the subtask itself.
pub(crate) fn can_work_on_subtask(ctx: &AuthContext, task: &Task, subtask: &Subtask) -> bool {
    can_manage_subtasks(ctx, task) || subtask.responsible_id == Some(ctx.actor_id())
}

/// Input for creating or replacing a subtask. Missing dates take the block's.
#[derive(Debug, Clone, Default)]
pub struct SubtaskDraft {
    pub title: String,
    pub description: String,
    pub responsible_id: Option<u64>,
    pub status: SubtaskStatus,
    pub score: Option<u8>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl SubtaskDraft {
    pub fn from_subtask(s: &Subtask) -> Self {
        SubtaskDraft {
            title: s.title.clone(),
            description: s.description.clone(),
            responsible_id: s.responsible_id,
            status: s.status,
            score: s.score,
            start: s.start,
            end: s.end,
        }
    }
}

/// Validated subtask values: title, score, start, end.
type SubtaskValues = (String, Option<u8>, NaiveDate, NaiveDate);

fn validate_subtask(db: &Database, ctx: &AuthContext, task: &Task, block: &Block, draft: &SubtaskDraft) -> Result<SubtaskValues> {
    let mut checks = Checks::new();
    let title = draft.title.trim().to_string();
    checks.require(!title.is_empty(), "title", "the subtask title is required");
    let score = checks.absorb(validate_subtask_score(draft.score)).flatten();

    if let Some(r) = draft.responsible_id {
        checks.require(db.actor(r).is_ok(), "responsible", format!("actor {r} does not exist"));
        if !ctx.is_admin() {
            checks.require(
                task.is_assigned(r),
                "responsible",
                "the responsible must be one of the task's assignees",
            );
        }
    }

    let start = draft.start.unwrap_or(block.start);
    let end = draft.end.unwrap_or(block.end);
    checks.require(start <= end, "end", "the subtask cannot end before it starts");
    checks.require(
        block.start <= start && end <= block.end,
        "dates",
        format!("subtask dates must lie within the block {} - {}", block.start, block.end),
    );
    checks.finish()?;
    Ok((title, score, start, end))
}

/// Create a subtask in a block. Admin or task responsible.
pub fn create_subtask(db: &mut Database, ctx: &AuthContext, block_id: u64, draft: SubtaskDraft, now: NaiveDateTime) -> Result<u64> {
    let block = db.block(block_id)?;
    let task = db.task(block.task_id)?;
    if !can_manage_subtasks(ctx, task) {
        tracing::warn!(actor = %ctx.actor.username, task_id = task.id, "subtask creation refused");
        return Err(BacklogError::denied("you cannot manage subtasks of this task"));
    }
    let (title, score, start, end) = validate_subtask(db, ctx, task, block, &draft)?;

    let id = next_id(&db.subtasks, |s| s.id);
    db.subtasks.push(Subtask {
        id,
        block_id,
        title,
        description: draft.description,
        responsible_id: draft.responsible_id,
        status: draft.status,
        score,
        start: Some(start),
        end: Some(end),
        created_at: now,
    });
    info!(block_id, subtask_id = id, "subtask created");
    Ok(id)
}

/// Replace a subtask's fields. Admin or task responsible.
pub fn edit_subtask(db: &mut Database, ctx: &AuthContext, subtask_id: u64, draft: SubtaskDraft) -> Result<()> {
    let subtask = db.subtask(subtask_id)?;
    let block = db.block(subtask.block_id)?;
    let task = db.task(block.task_id)?;
    if !can_manage_subtasks(ctx, task) {
        return Err(BacklogError::denied("you cannot manage subtasks of this task"));
    }
    let (title, score, start, end) = validate_subtask(db, ctx, task, block, &draft)?;

    let s = db.subtask_mut(subtask_id)?;
    s.title = title;
    s.description = draft.description;
    s.responsible_id = draft.responsible_id;
    s.status = draft.status;
    s.score = score;
    s.start = Some(start);
    s.end = Some(end);
    info!(subtask_id, "subtask edited");
    Ok(())
}

/// Delete a subtask with its evidence. Admin or task responsible.
pub fn delete_subtask(db: &mut Database, ctx: &AuthContext, subtask_id: u64) -> Result<()> {
    let subtask = db.subtask(subtask_id)?;
    let task = db.subtask_task(subtask)?;
    if !can_manage_subtasks(ctx, task) {
        return Err(BacklogError::denied("you cannot manage subtasks of this task"));
    }
    db.remove_subtasks(&[subtask_id]);
    info!(subtask_id, "subtask deleted");
    Ok(())
}

/// Quick status change from a status code. Admin, task responsible or subtask responsible.
pub fn change_subtask_status(db: &mut Database, ctx: &AuthContext, subtask_id: u64, code: &str) -> Result<SubtaskStatus> {
    let subtask = db.subtask(subtask_id)?;
    let task = db.subtask_task(subtask)?;
    if !can_work_on_subtask(ctx, task, subtask) {
        tracing::warn!(actor = %ctx.actor.username, subtask_id, "subtask status change refused");
        return Err(BacklogError::denied("you cannot change the status of this subtask"));
    }
    let status = parse_subtask_status(code)?;
    let s = db.subtask_mut(subtask_id)?;
    let previous = s.status;
    s.status = status;
    info!(subtask_id, from = ?previous, to = ?status, "subtask status changed");
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{d, Fixture};

    fn draft(start: NaiveDate, end: NaiveDate) -> BlockDraft {
        BlockDraft { order: None, name: None, start, end }
    }

    #[test]
    fn test_block_orders_are_auto_assigned() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let t = fx.task("T", None, None, &[]);
        let ctx = fx.ctx(admin);
        let b1 = add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 3), d(2025, 3, 4))).unwrap();
        let b2 = add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 5), d(2025, 3, 6))).unwrap();
        assert_eq!(fx.db.block(b1).unwrap().order, 1);
        assert_eq!(fx.db.block(b2).unwrap().order, 2);
        let dup = BlockDraft { order: Some(2), ..draft(d(2025, 3, 10), d(2025, 3, 11)) };
        assert!(matches!(add_block(&mut fx.db, &ctx, t, dup), Err(BacklogError::Validation(_))));
    }

    #[test]
    fn test_overlapping_block_is_rejected_and_state_unchanged() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let t = fx.task("T", None, None, &[]);
        let ctx = fx.ctx(admin);
        add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 3), d(2025, 3, 5))).unwrap();
        let b2 = add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 6), d(2025, 3, 8))).unwrap();

        assert!(add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 5), d(2025, 3, 6))).is_err());
        assert!(edit_block(&mut fx.db, &ctx, b2, draft(d(2025, 3, 4), d(2025, 3, 8))).is_err());
        assert_eq!(fx.db.blocks.len(), 2);
        assert_eq!(fx.db.block(b2).unwrap().start, d(2025, 3, 6));
    }

    #[test]
    fn test_block_must_fit_sprint() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let s = fx.sprint(d(2025, 3, 3), d(2025, 3, 14));
        let t = fx.task("T", None, Some(s), &[]);
        let ctx = fx.ctx(admin);
        assert!(add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 12), d(2025, 3, 17))).is_err());
        assert!(add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 3), d(2025, 3, 14))).is_ok());
    }

    #[test]
    fn test_blocks_are_admin_only() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::DatabaseLead);
        let t = fx.task("T", None, None, &[ana]);
        let ctx = fx.ctx(ana);
        assert!(matches!(
            add_block(&mut fx.db, &ctx, t, draft(d(2025, 3, 3), d(2025, 3, 4))),
            Err(BacklogError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_edit_block_syncs_subtask_dates() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let t = fx.task("T", None, None, &[]);
        let b = fx.block(t, d(2025, 3, 3), d(2025, 3, 5));
        let s = fx.subtask(b, None, SubtaskStatus::Pending);
        let ctx = fx.ctx(admin);
        edit_block(&mut fx.db, &ctx, b, BlockDraft { name: Some("Design".into()), ..draft(d(2025, 3, 4), d(2025, 3, 9)) })
            .unwrap();
        let sub = fx.db.subtask(s).unwrap();
        assert_eq!((sub.start, sub.end), (Some(d(2025, 3, 4)), Some(d(2025, 3, 9))));
        assert_eq!(fx.db.block(b).unwrap().order, 1);
        assert_eq!(fx.db.block(b).unwrap().label(), "Block 1 - Design");
    }

    #[test]
    fn test_can_close_by_blocks() {
        let mut fx = Fixture::new();
        let t = fx.task("T", None, None, &[]);
        assert!(!can_close_by_blocks(&fx.db, t));
        let b1 = fx.block(t, d(2025, 3, 3), d(2025, 3, 4));
        assert!(!can_close_by_blocks(&fx.db, t));
        let s1 = fx.subtask(b1, None, SubtaskStatus::Closed);
        assert!(can_close_by_blocks(&fx.db, t));
        let b2 = fx.block(t, d(2025, 3, 5), d(2025, 3, 6));
        fx.subtask(b2, None, SubtaskStatus::Delivered);
        assert!(!can_close_by_blocks(&fx.db, t));
        fx.db.subtask_mut(s1).unwrap().status = SubtaskStatus::Pending;
        assert!(!can_close_by_blocks(&fx.db, t));
    }

    #[test]
    fn test_outsider_cannot_create_subtask() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let t = fx.task("T", None, None, &[ana]);
        let b = fx.block(t, d(2025, 3, 3), d(2025, 3, 5));
        let ctx = fx.ctx(bo);
        let draft = SubtaskDraft { title: "x".into(), responsible_id: Some(bo), ..SubtaskDraft::default() };
        assert!(matches!(create_subtask(&mut fx.db, &ctx, b, draft, fx.now), Err(BacklogError::PermissionDenied(_))));
        assert!(fx.db.subtasks.is_empty());
    }

    #[test]
    fn test_responsible_must_pick_assignee() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let t = fx.task("T", None, None, &[ana]);
        let b = fx.block(t, d(2025, 3, 3), d(2025, 3, 5));

        let for_bo = SubtaskDraft { title: "x".into(), responsible_id: Some(bo), ..SubtaskDraft::default() };
        let ctx = fx.ctx(ana);
        assert!(matches!(create_subtask(&mut fx.db, &ctx, b, for_bo.clone(), fx.now), Err(BacklogError::Validation(_))));

        let ctx = fx.ctx(admin);
        let id = create_subtask(&mut fx.db, &ctx, b, for_bo, fx.now).unwrap();
        let s = fx.db.subtask(id).unwrap();
        assert_eq!((s.start, s.end), (Some(d(2025, 3, 3)), Some(d(2025, 3, 5))));
    }

    #[test]
    fn test_subtask_dates_and_score_validated() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let t = fx.task("T", None, None, &[ana]);
        let b = fx.block(t, d(2025, 3, 3), d(2025, 3, 5));
        let ctx = fx.ctx(ana);
        let bad = SubtaskDraft {
            title: " ".into(),
            score: Some(4),
            start: Some(d(2025, 3, 2)),
            ..SubtaskDraft::default()
        };
        match create_subtask(&mut fx.db, &ctx, b, bad, fx.now) {
            Err(BacklogError::Validation(errs)) => assert_eq!(errs.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_subtask_status_change_permissions() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let cy = fx.actor("cy", Role::Member);
        let t = fx.task("T", None, None, &[ana]);
        let b = fx.block(t, d(2025, 3, 3), d(2025, 3, 5));
        let s = fx.subtask(b, Some(bo), SubtaskStatus::Pending);

        let ctx = fx.ctx(bo);
        assert_eq!(change_subtask_status(&mut fx.db, &ctx, s, "in-progress").unwrap(), SubtaskStatus::Pending);
        let ctx = fx.ctx(ana);
        change_subtask_status(&mut fx.db, &ctx, s, "closed").unwrap();
        assert_eq!(fx.db.subtask(s).unwrap().status, SubtaskStatus::Closed);
        assert!(matches!(change_subtask_status(&mut fx.db, &ctx, s, "done"), Err(BacklogError::Validation(_))));
        let ctx = fx.ctx(cy);
        assert!(matches!(change_subtask_status(&mut fx.db, &ctx, s, "pending"), Err(BacklogError::PermissionDenied(_))));
    }

    #[test]
    fn test_delete_subtask_by_responsible_only() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let t = fx.task("T", None, None, &[ana]);
        let b = fx.block(t, d(2025, 3, 3), d(2025, 3, 5));
        let s = fx.subtask(b, Some(bo), SubtaskStatus::Pending);
        let ctx = fx.ctx(bo);
        assert!(delete_subtask(&mut fx.db, &ctx, s).is_err());
        let ctx = fx.ctx(ana);
        delete_subtask(&mut fx.db, &ctx, s).unwrap();
        assert!(fx.db.subtasks.is_empty());
    }
}
