//! Evidence recorded against tasks and subtasks.
//!
//! Attachments are opaque keys; nothing here reads their contents.

use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::actor::AuthContext;
use crate::breakdown::can_work_on_subtask;
use crate::db::{next_id, Database};
use crate::error::{BacklogError, Result};
use crate::fields::Capability;
use crate::task::{Evidence, SubtaskEvidence, Task};
use crate::visibility::is_responsible;

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Trimmed comment and file, or a validation error when both are empty.
fn require_content(comment: Option<String>, file: Option<String>) -> Result<(Option<String>, Option<String>)> {
    let (comment, file) = (clean(comment), clean(file));
    if comment.is_none() && file.is_none() {
        return Err(BacklogError::invalid("comment", "at least one of comment/file required"));
    }
    Ok((comment, file))
}

fn can_manage_task_evidence(ctx: &AuthContext, task: &Task) -> bool {
    ctx.is_admin() || is_responsible(task, ctx.actor_id()) || ctx.can(Capability::AddEvidence)
}

fn refuse(ctx: &AuthContext, what: &str) -> BacklogError {
    warn!(actor = %ctx.actor.username, what, "evidence action refused");
    BacklogError::denied(format!("you cannot {what}"))
}

/// Add evidence to a task.
pub fn add_evidence(
    db: &mut Database,
    ctx: &AuthContext,
    task_id: u64,
    comment: Option<String>,
    file: Option<String>,
    now: NaiveDateTime,
) -> Result<u64> {
    let task = db.task(task_id)?;
    if !can_manage_task_evidence(ctx, task) {
        return Err(refuse(ctx, "add evidence to this task"));
    }
    let (comment, file) = require_content(comment, file)?;
    let id = next_id(&db.evidences, |e| e.id);
    db.evidences.push(Evidence {
        id,
        task_id,
        comment,
        file,
        created_by: Some(ctx.actor_id()),
        created_at: now,
        updated_at: now,
    });
    info!(task_id, evidence_id = id, "evidence added");
    Ok(id)
}

/// Replace the comment and file of a task evidence.
pub fn edit_evidence(
    db: &mut Database,
    ctx: &AuthContext,
    evidence_id: u64,
    comment: Option<String>,
    file: Option<String>,
    now: NaiveDateTime,
) -> Result<()> {
    let evidence = db.evidence(evidence_id)?;
    let task = db.task(evidence.task_id)?;
    if !can_manage_task_evidence(ctx, task) {
        return Err(refuse(ctx, "edit this evidence"));
    }
    let (comment, file) = require_content(comment, file)?;
    if let Some(e) = db.evidences.iter_mut().find(|e| e.id == evidence_id) {
        e.comment = comment;
        e.file = file;
        e.updated_at = now;
    }
    info!(evidence_id, "evidence edited");
    Ok(())
}

/// Delete a task evidence. Its creator may always delete it.
pub fn delete_evidence(db: &mut Database, ctx: &AuthContext, evidence_id: u64) -> Result<()> {
    let evidence = db.evidence(evidence_id)?;
    let task = db.task(evidence.task_id)?;
    let creator = evidence.created_by == Some(ctx.actor_id());
    if !creator && !can_manage_task_evidence(ctx, task) {
        return Err(refuse(ctx, "delete this evidence"));
    }
    db.evidences.retain(|e| e.id != evidence_id);
    info!(evidence_id, "evidence deleted");
    Ok(())
}

fn require_subtask_access(db: &Database, ctx: &AuthContext, subtask_id: u64, creator: Option<u64>, what: &str) -> Result<()> {
    let subtask = db.subtask(subtask_id)?;
    let task = db.subtask_task(subtask)?;
    if can_work_on_subtask(ctx, task, subtask) || creator.is_some_and(|c| c == ctx.actor_id()) {
        Ok(())
    } else {
        Err(refuse(ctx, what))
    }
}

/// Add evidence to a subtask. Admin, task responsible or subtask responsible.
pub fn add_subtask_evidence(
    db: &mut Database,
    ctx: &AuthContext,
    subtask_id: u64,
    comment: Option<String>,
    file: Option<String>,
    now: NaiveDateTime,
) -> Result<u64> {
    require_subtask_access(db, ctx, subtask_id, None, "add evidence to this subtask")?;
    let (comment, file) = require_content(comment, file)?;
    let id = next_id(&db.subtask_evidences, |e| e.id);
    db.subtask_evidences.push(SubtaskEvidence {
        id,
        subtask_id,
        comment,
        file,
        created_by: Some(ctx.actor_id()),
        created_at: now,
        updated_at: now,
    });
    info!(subtask_id, evidence_id = id, "subtask evidence added");
    Ok(id)
}

/// Edit a subtask evidence. Omitted fields are kept; the result must still carry a
/// comment or a file.
pub fn edit_subtask_evidence(
    db: &mut Database,
    ctx: &AuthContext,
    evidence_id: u64,
    comment: Option<String>,
    file: Option<String>,
    now: NaiveDateTime,
) -> Result<()> {
    let evidence = db.subtask_evidence(evidence_id)?;
    require_subtask_access(db, ctx, evidence.subtask_id, evidence.created_by, "edit this evidence")?;
    let comment = comment.or_else(|| evidence.comment.clone());
    let file = file.or_else(|| evidence.file.clone());
    let (comment, file) = require_content(comment, file)?;
    if let Some(e) = db.subtask_evidences.iter_mut().find(|e| e.id == evidence_id) {
        e.comment = comment;
        e.file = file;
        e.updated_at = now;
    }
    info!(evidence_id, "subtask evidence edited");
    Ok(())
}

pub fn delete_subtask_evidence(db: &mut Database, ctx: &AuthContext, evidence_id: u64) -> Result<()> {
    let evidence = db.subtask_evidence(evidence_id)?;
    require_subtask_access(db, ctx, evidence.subtask_id, evidence.created_by, "delete this evidence")?;
    db.subtask_evidences.retain(|e| e.id != evidence_id);
    info!(evidence_id, "subtask evidence deleted");
    Ok(())
}
