//! Work report: what people said they would work on, grouped by the task or subtask
//! they linked it to.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::actor::AuthContext;
use crate::db::Database;
use crate::error::Result;
use crate::fields::{DailyItemKind, SubtaskStatus};

/// Item target used as the grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetRef {
    Task(u64),
    Subtask(u64),
}

#[derive(Debug, Clone)]
pub struct ReportFilter {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub person: Option<u64>,
    pub include_closed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub target: TargetRef,
    pub label: String,
    pub closed: bool,
    pub items: usize,
    pub minutes: u64,
    pub people: BTreeSet<u64>,
    pub first: NaiveDate,
    pub last: NaiveDate,
}

fn describe(db: &Database, target: TargetRef) -> Option<(String, bool)> {
    match target {
        TargetRef::Task(id) => {
            let task = db.task(id).ok()?;
            Some((format!("#{} {}", task.id, task.title), task.completed))
        }
        TargetRef::Subtask(id) => {
            let subtask = db.subtask(id).ok()?;
            let task = db.subtask_task(subtask).ok()?;
            Some((format!("#{} {} / {}", task.id, task.title, subtask.title), subtask.status == SubtaskStatus::Closed))
        }
    }
}

/// Today-type items between `from` and `to`, grouped by target. Items without a
/// target are left out. Admin-only.
pub fn work_report(db: &Database, ctx: &AuthContext, filter: &ReportFilter) -> Result<Vec<ReportRow>> {
    ctx.require_admin("view the work report")?;
    let mut rows: BTreeMap<TargetRef, ReportRow> = BTreeMap::new();

    for item in db.daily_items.iter().filter(|i| i.kind == DailyItemKind::Today) {
        let Ok(daily) = db.daily(item.daily_id) else { continue };
        if daily.date < filter.from || daily.date > filter.to {
            continue;
        }
        if filter.person.is_some_and(|p| p != daily.actor_id) {
            continue;
        }
        let target = match (item.subtask_id, item.task_id) {
            (Some(s), _) => TargetRef::Subtask(s),
            (None, Some(t)) => TargetRef::Task(t),
            (None, None) => continue,
        };
        let Some((label, closed)) = describe(db, target) else { continue };
        if closed && !filter.include_closed {
            continue;
        }

        let row = rows.entry(target).or_insert_with(|| ReportRow {
            target,
            label,
            closed,
            items: 0,
            minutes: 0,
            people: BTreeSet::new(),
            first: daily.date,
            last: daily.date,
        });
        row.items += 1;
        row.minutes += u64::from(item.minutes.unwrap_or(0));
        row.people.insert(daily.actor_id);
        row.first = row.first.min(daily.date);
        row.last = row.last.max(daily.date);
    }
    Ok(rows.into_values().collect())
}
