//! Daily standups: one record per actor and day, its line items, and the alignment
//! score that compares what was logged against the work actually assigned.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actor::AuthContext;
use crate::config::{DailyConfig, WindowPolicy};
use crate::db::{next_id, Database};
use crate::error::{BacklogError, Checks, Result};
use crate::fields::DailyItemKind;
use crate::visibility::daily_in_scope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Daily {
    pub id: u64,
    pub actor_id: u64,
    pub date: NaiveDate,
    /// Registration time, local.
    pub time: NaiveTime,
    #[serde(default)]
    pub yesterday: String,
    #[serde(default)]
    pub today: String,
    pub impediments: Option<String>,
    /// Recomputed from `time` on every save.
    #[serde(default)]
    pub out_of_window: bool,
    pub sprint_id: Option<u64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyItem {
    pub id: u64,
    pub daily_id: u64,
    pub kind: DailyItemKind,
    pub text: String,
    pub task_id: Option<u64>,
    pub subtask_id: Option<u64>,
    pub minutes: Option<u32>,
    pub evidence_url: Option<String>,
}

/// Free-text content of a daily.
#[derive(Debug, Clone, Default)]
pub struct DailyDraft {
    pub yesterday: String,
    pub today: String,
    pub impediments: Option<String>,
    pub sprint_id: Option<u64>,
}

/// Inclusive check against the configured registration window.
pub fn in_registration_window(time: NaiveTime, cfg: &DailyConfig) -> bool {
    cfg.window_start <= time && time <= cfg.window_end
}

fn validate_draft(db: &Database, draft: &DailyDraft) -> Result<()> {
    let mut checks = Checks::new();
    checks.require(!draft.yesterday.trim().is_empty(), "yesterday", "say what you did yesterday");
    checks.require(!draft.today.trim().is_empty(), "today", "say what you will do today");
    if let Some(s) = draft.sprint_id {
        checks.require(db.sprint(s).is_ok(), "sprint", format!("sprint {s} does not exist"));
    }
    checks.finish()
}

fn find_daily(db: &Database, actor_id: u64, date: NaiveDate) -> Option<u64> {
    db.dailies.iter().find(|d| d.actor_id == actor_id && d.date == date).map(|d| d.id)
}

fn push_daily(db: &mut Database, actor_id: u64, date: NaiveDate, draft: DailyDraft, out_of_window: bool, now: NaiveDateTime) -> u64 {
    let id = next_id(&db.dailies, |d| d.id);
    db.dailies.push(Daily {
        id,
        actor_id,
        date,
        time: now.time(),
        yesterday: draft.yesterday.trim().to_string(),
        today: draft.today.trim().to_string(),
        impediments: draft.impediments.map(|i| i.trim().to_string()).filter(|i| !i.is_empty()),
        out_of_window,
        sprint_id: draft.sprint_id,
        created_at: now,
        updated_at: now,
    });
    id
}

/// Result of registering a daily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub daily_id: u64,
    pub created: bool,
    pub out_of_window: bool,
}

/// Register today's daily for the caller, or for `owner` when the caller is an
/// administrator. A second registration on the same day updates the first.
pub fn submit_daily(
    db: &mut Database,
    ctx: &AuthContext,
    owner: Option<u64>,
    draft: DailyDraft,
    cfg: &DailyConfig,
    now: NaiveDateTime,
) -> Result<Registration> {
    if ctx.is_visualizer() {
        return Err(BacklogError::denied("visualizers can consult dailies but not register them"));
    }
    let owner = owner.unwrap_or(ctx.actor_id());
    if owner != ctx.actor_id() && !ctx.is_admin() {
        warn!(actor = %ctx.actor.username, owner, "daily for another person refused");
        return Err(BacklogError::denied("you can only register your own daily"));
    }
    db.actor(owner)?;
    validate_draft(db, &draft)?;

    let out_of_window = !in_registration_window(now.time(), cfg);
    if out_of_window && cfg.policy == WindowPolicy::Reject {
        return Err(BacklogError::PreconditionFailed(format!(
            "dailies can only be registered between {} and {}",
            cfg.window_start.format("%H:%M"),
            cfg.window_end.format("%H:%M")
        )));
    }

    let date = now.date();
    let registration = match find_daily(db, owner, date) {
        Some(id) => {
            if let Some(daily) = db.dailies.iter_mut().find(|d| d.id == id) {
                daily.yesterday = draft.yesterday.trim().to_string();
                daily.today = draft.today.trim().to_string();
                daily.impediments = draft.impediments.map(|i| i.trim().to_string()).filter(|i| !i.is_empty());
                daily.sprint_id = draft.sprint_id;
                daily.time = now.time();
                daily.out_of_window = out_of_window;
                daily.updated_at = now;
            }
            Registration { daily_id: id, created: false, out_of_window }
        }
        None => {
            let id = push_daily(db, owner, date, draft, out_of_window, now);
            Registration { daily_id: id, created: true, out_of_window }
        }
    };
    if out_of_window {
        warn!(daily_id = registration.daily_id, owner, time = %now.time(), "daily registered outside the window");
    }
    info!(daily_id = registration.daily_id, owner, created = registration.created, "daily registered");
    Ok(registration)
}

/// Create a daily for someone else on a given date. Admin-only. Never overwrites:
/// an existing daily for that person and date is a conflict.
pub fn admin_create_daily(
    db: &mut Database,
    ctx: &AuthContext,
    owner: u64,
    date: NaiveDate,
    draft: DailyDraft,
    cfg: &DailyConfig,
    now: NaiveDateTime,
) -> Result<u64> {
    ctx.require_admin("register dailies for other people")?;
    db.actor(owner)?;
    validate_draft(db, &draft)?;
    if find_daily(db, owner, date).is_some() {
        return Err(BacklogError::Conflict(format!("{} already has a daily for {date}", db.actor_name(owner))));
    }
    let out_of_window = !in_registration_window(now.time(), cfg);
    let id = push_daily(db, owner, date, draft, out_of_window, now);
    info!(daily_id = id, owner, %date, by = %ctx.actor.username, "daily created for another person");
    Ok(id)
}

/// Delete a daily and its items. Admin-only.
pub fn delete_daily(db: &mut Database, ctx: &AuthContext, daily_id: u64) -> Result<Daily> {
    ctx.require_admin("delete dailies")?;
    let pos = db.dailies.iter().position(|d| d.id == daily_id).ok_or_else(|| BacklogError::not_found("daily", daily_id))?;
    let daily = db.dailies.remove(pos);
    db.daily_items.retain(|i| i.daily_id != daily_id);
    info!(daily_id, "daily deleted");
    Ok(daily)
}

/// Filters for the daily summary.
#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub person: Option<u64>,
    pub sprint: Option<u64>,
}

/// Dailies visible to the actor, newest first. Without `from`, the window covers the
/// last `summary_days` days. The person filter only applies to admins and visualizers.
pub fn daily_summary<'a>(db: &'a Database, ctx: &AuthContext, filter: &SummaryFilter, cfg: &DailyConfig, today: NaiveDate) -> Vec<&'a Daily> {
    let from = filter.from.unwrap_or(today - Duration::days(cfg.summary_days));
    let person = filter.person.filter(|_| ctx.can_filter_people());
    let mut dailies: Vec<&Daily> = db
        .dailies
        .iter()
        .filter(|d| d.date >= from)
        .filter(|d| filter.to.map_or(true, |to| d.date <= to))
        .filter(|d| person.map_or(true, |p| d.actor_id == p))
        .filter(|d| filter.sprint.is_none() || d.sprint_id == filter.sprint)
        .filter(|d| daily_in_scope(db, ctx, d))
        .collect();
    dailies.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| db.actor_name(a.actor_id).cmp(&db.actor_name(b.actor_id))));
    dailies
}

/// Input for a daily line item.
#[derive(Debug, Clone)]
pub struct DailyItemDraft {
    pub kind: DailyItemKind,
    pub text: String,
    pub task_id: Option<u64>,
    pub subtask_id: Option<u64>,
    pub minutes: Option<u32>,
    pub evidence_url: Option<String>,
}

fn require_daily_owner(db: &Database, ctx: &AuthContext, daily_id: u64) -> Result<()> {
    let daily = db.daily(daily_id)?;
    if ctx.is_admin() || daily.actor_id == ctx.actor_id() {
        Ok(())
    } else {
        warn!(actor = %ctx.actor.username, daily_id, "daily item change refused");
        Err(BacklogError::denied("only the owner of the daily or an administrator can change its items"))
    }
}

fn validate_item(db: &Database, draft: &DailyItemDraft) -> Result<()> {
    let mut checks = Checks::new();
    checks.require(!draft.text.trim().is_empty(), "text", "the item text is required");
    checks.require(
        !(draft.task_id.is_some() && draft.subtask_id.is_some()),
        "target",
        "link the item to a task or a subtask, not both",
    );
    if let Some(t) = draft.task_id {
        checks.require(db.task(t).is_ok(), "task", format!("task {t} does not exist"));
    }
    if let Some(s) = draft.subtask_id {
        checks.require(db.subtask(s).is_ok(), "subtask", format!("subtask {s} does not exist"));
    }
    checks.finish()
}

fn clean_url(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

pub fn add_item(db: &mut Database, ctx: &AuthContext, daily_id: u64, draft: DailyItemDraft) -> Result<u64> {
    require_daily_owner(db, ctx, daily_id)?;
    validate_item(db, &draft)?;
    let id = next_id(&db.daily_items, |i| i.id);
    db.daily_items.push(DailyItem {
        id,
        daily_id,
        kind: draft.kind,
        text: draft.text.trim().to_string(),
        task_id: draft.task_id,
        subtask_id: draft.subtask_id,
        minutes: draft.minutes,
        evidence_url: clean_url(draft.evidence_url),
    });
    info!(daily_id, item_id = id, "daily item added");
    Ok(id)
}

pub fn edit_item(db: &mut Database, ctx: &AuthContext, item_id: u64, draft: DailyItemDraft) -> Result<()> {
    let daily_id = db.daily_item(item_id)?.daily_id;
    require_daily_owner(db, ctx, daily_id)?;
    validate_item(db, &draft)?;
    if let Some(item) = db.daily_items.iter_mut().find(|i| i.id == item_id) {
        item.kind = draft.kind;
        item.text = draft.text.trim().to_string();
        item.task_id = draft.task_id;
        item.subtask_id = draft.subtask_id;
        item.minutes = draft.minutes;
        item.evidence_url = clean_url(draft.evidence_url);
    }
    info!(item_id, "daily item edited");
    Ok(())
}

pub fn delete_item(db: &mut Database, ctx: &AuthContext, item_id: u64) -> Result<()> {
    let daily_id = db.daily_item(item_id)?.daily_id;
    require_daily_owner(db, ctx, daily_id)?;
    db.daily_items.retain(|i| i.id != item_id);
    info!(item_id, "daily item deleted");
    Ok(())
}

/// How well a daily's items match the owner's assigned work.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Alignment {
    pub percentage: u32,
    pub total: usize,
    pub aligned: usize,
    pub misaligned: usize,
    pub misaligned_ids: Vec<u64>,
}

/// What an item points at, resolved for scoring.
struct Target {
    responsible: Option<u64>,
    range: Option<(NaiveDate, NaiveDate)>,
    sprint: Option<u64>,
}

fn resolve_target(db: &Database, item: &DailyItem) -> Option<Target> {
    if let Some(sid) = item.subtask_id {
        let subtask = db.subtask(sid).ok()?;
        let block = db.block(subtask.block_id).ok()?;
        let task = db.task(block.task_id).ok()?;
        let range = match (subtask.start, subtask.end) {
            (Some(s), Some(e)) => (s, e),
            _ => (block.start, block.end),
        };
        return Some(Target { responsible: subtask.responsible_id, range: Some(range), sprint: task.sprint_id });
    }
    let task = db.task(item.task_id?).ok()?;
    let blocks = db.task_blocks(task.id);
    let start = blocks.iter().map(|b| b.start).min();
    let end = blocks.iter().map(|b| b.end).max();
    Some(Target { responsible: task.legacy_assignee(), range: start.zip(end), sprint: task.sprint_id })
}

fn is_aligned(db: &Database, daily: &Daily, item: &DailyItem) -> bool {
    let Some(target) = resolve_target(db, item) else {
        return false;
    };
    let ok_user = target.responsible == Some(daily.actor_id);
    let ok_date = target.range.is_some_and(|(s, e)| s <= daily.date && daily.date <= e);
    let ok_sprint = daily.sprint_id.is_some() && daily.sprint_id == target.sprint;
    ok_user && (ok_date || ok_sprint)
}

/// Score every item of a daily. An empty daily scores 0%.
pub fn alignment(db: &Database, daily: &Daily) -> Alignment {
    let mut result = Alignment::default();
    for item in db.daily_items_of(daily.id) {
        result.total += 1;
        if is_aligned(db, daily, item) {
            result.aligned += 1;
        } else {
            result.misaligned += 1;
            result.misaligned_ids.push(item.id);
        }
    }
    if result.total > 0 {
        result.percentage = (100.0 * result.aligned as f64 / result.total as f64).round() as u32;
    }
    result
}

/// Alignment of a daily the actor is allowed to see.
pub fn daily_alignment(db: &Database, ctx: &AuthContext, daily_id: u64) -> Result<Alignment> {
    let daily = db.daily(daily_id)?;
    if !daily_in_scope(db, ctx, daily) {
        return Err(BacklogError::denied("you are not authorized to view this daily"));
    }
    Ok(alignment(db, daily))
}
