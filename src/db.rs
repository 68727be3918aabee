//! Database operations and utility functions for the backlog.
//!
//! This module provides the `Database` struct holding every record of the backlog,
//! lookups that turn missing ids into `NotFound` errors, lazy actor provisioning,
//! and small helpers for date parsing and formatting.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::actor::{normalise_username, Actor};
use crate::availability::WeeklyAvailability;
use crate::daily::{Daily, DailyItem};
use crate::epic::Epic;
use crate::error::{BacklogError, Result};
use crate::fields::Role;
use crate::project::{Project, ProjectGrant};
use crate::sprint::Sprint;
use crate::task::{Block, Evidence, Subtask, SubtaskEvidence, Task};

/// In-memory store for the whole backlog, persisted as one JSON document.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub grants: Vec<ProjectGrant>,
    #[serde(default)]
    pub sprints: Vec<Sprint>,
    #[serde(default)]
    pub epics: Vec<Epic>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub evidences: Vec<Evidence>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub subtask_evidences: Vec<SubtaskEvidence>,
    #[serde(default)]
    pub dailies: Vec<Daily>,
    #[serde(default)]
    pub daily_items: Vec<DailyItem>,
    #[serde(default)]
    pub availabilities: Vec<WeeklyAvailability>,
}

/// Next free id for a collection.
pub fn next_id<T>(items: &[T], id: impl Fn(&T) -> u64) -> u64 {
    items.iter().map(id).max().unwrap_or(0) + 1
}

impl Database {
    /// Load the store from a JSON file. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no store yet, starting empty");
            return Ok(Database::default());
        }
        let buf = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&buf)?)
    }

    /// Save the store using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        let data = serde_json::to_string_pretty(self)?;
        f.write_all(data.as_bytes())?;
        f.flush()?;
        fs::rename(tmp, path)?;
        debug!(path = %path.display(), "store saved");
        Ok(())
    }

    pub fn actor(&self, id: u64) -> Result<&Actor> {
        self.actors.iter().find(|a| a.id == id).ok_or_else(|| BacklogError::not_found("actor", id))
    }

    pub fn actor_mut(&mut self, id: u64) -> Result<&mut Actor> {
        self.actors.iter_mut().find(|a| a.id == id).ok_or_else(|| BacklogError::not_found("actor", id))
    }

    pub fn actor_by_username(&self, username: &str) -> Result<&Actor> {
        let wanted = username.trim().to_lowercase();
        self.actors
            .iter()
            .find(|a| a.username == wanted)
            .ok_or_else(|| BacklogError::not_found("actor", username))
    }

    /// Display name of an actor, or a placeholder for dangling ids.
    pub fn actor_name(&self, id: u64) -> String {
        self.actor(id).map(|a| a.display_name.clone()).unwrap_or_else(|_| format!("#{id}"))
    }

    pub fn insert_actor(&mut self, username: &str, display_name: &str, role: Role, superuser: bool, now: NaiveDateTime) -> u64 {
        let id = next_id(&self.actors, |a| a.id);
        let display_name = if display_name.trim().is_empty() { username.to_string() } else { display_name.trim().to_string() };
        self.actors.push(Actor {
            id,
            username: username.to_string(),
            display_name,
            role,
            superuser,
            created_at: now,
        });
        id
    }

    /// Resolve the invoking principal, provisioning a `Member` profile on first sight.
    /// Returns the actor and whether it was created.
    pub fn resolve_actor(&mut self, username: &str, now: NaiveDateTime) -> Result<(Actor, bool)> {
        let username = normalise_username(username)?;
        if let Ok(actor) = self.actor_by_username(&username) {
            return Ok((actor.clone(), false));
        }
        let id = self.insert_actor(&username, &username, Role::Member, false, now);
        info!(actor = %username, "provisioned member profile");
        Ok((self.actor(id)?.clone(), true))
    }

    pub fn project(&self, id: u64) -> Result<&Project> {
        self.projects.iter().find(|p| p.id == id).ok_or_else(|| BacklogError::not_found("project", id))
    }

    pub fn project_by_code(&self, code: &str) -> Result<&Project> {
        let wanted = code.trim().to_uppercase();
        self.projects
            .iter()
            .find(|p| p.code == wanted)
            .ok_or_else(|| BacklogError::not_found("project", code))
    }

    pub fn sprint(&self, id: u64) -> Result<&Sprint> {
        self.sprints.iter().find(|s| s.id == id).ok_or_else(|| BacklogError::not_found("sprint", id))
    }

    pub fn sprint_mut(&mut self, id: u64) -> Result<&mut Sprint> {
        self.sprints.iter_mut().find(|s| s.id == id).ok_or_else(|| BacklogError::not_found("sprint", id))
    }

    pub fn epic(&self, id: u64) -> Result<&Epic> {
        self.epics.iter().find(|e| e.id == id).ok_or_else(|| BacklogError::not_found("epic", id))
    }

    pub fn epic_mut(&mut self, id: u64) -> Result<&mut Epic> {
        self.epics.iter_mut().find(|e| e.id == id).ok_or_else(|| BacklogError::not_found("epic", id))
    }

    pub fn task(&self, id: u64) -> Result<&Task> {
        self.tasks.iter().find(|t| t.id == id).ok_or_else(|| BacklogError::not_found("task", id))
    }

    pub fn task_mut(&mut self, id: u64) -> Result<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id).ok_or_else(|| BacklogError::not_found("task", id))
    }

    /// Project of a task, through its epic.
    pub fn task_project(&self, task: &Task) -> Option<u64> {
        task.epic_id.and_then(|e| self.epic(e).ok()).and_then(|e| e.project_id)
    }

    pub fn evidence(&self, id: u64) -> Result<&Evidence> {
        self.evidences.iter().find(|e| e.id == id).ok_or_else(|| BacklogError::not_found("evidence", id))
    }

    pub fn block(&self, id: u64) -> Result<&Block> {
        self.blocks.iter().find(|b| b.id == id).ok_or_else(|| BacklogError::not_found("block", id))
    }

    /// Blocks of a task, ordered by position.
    pub fn task_blocks(&self, task_id: u64) -> Vec<&Block> {
        let mut blocks: Vec<&Block> = self.blocks.iter().filter(|b| b.task_id == task_id).collect();
        blocks.sort_by_key(|b| b.order);
        blocks
    }

    pub fn subtask(&self, id: u64) -> Result<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id).ok_or_else(|| BacklogError::not_found("subtask", id))
    }

    pub fn subtask_mut(&mut self, id: u64) -> Result<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id).ok_or_else(|| BacklogError::not_found("subtask", id))
    }

    pub fn block_subtasks(&self, block_id: u64) -> Vec<&Subtask> {
        self.subtasks.iter().filter(|s| s.block_id == block_id).collect()
    }

    /// Macro task owning a subtask.
    pub fn subtask_task(&self, subtask: &Subtask) -> Result<&Task> {
        let block = self.block(subtask.block_id)?;
        self.task(block.task_id)
    }

    pub fn subtask_evidence(&self, id: u64) -> Result<&SubtaskEvidence> {
        self.subtask_evidences
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| BacklogError::not_found("subtask evidence", id))
    }

    pub fn daily(&self, id: u64) -> Result<&Daily> {
        self.dailies.iter().find(|d| d.id == id).ok_or_else(|| BacklogError::not_found("daily", id))
    }

    pub fn daily_item(&self, id: u64) -> Result<&DailyItem> {
        self.daily_items.iter().find(|i| i.id == id).ok_or_else(|| BacklogError::not_found("daily item", id))
    }

    pub fn daily_items_of(&self, daily_id: u64) -> Vec<&DailyItem> {
        self.daily_items.iter().filter(|i| i.daily_id == daily_id).collect()
    }

    /// Remove subtasks with their evidence and unlink daily items pointing at them.
    pub fn remove_subtasks(&mut self, ids: &[u64]) {
        self.subtasks.retain(|s| !ids.contains(&s.id));
        self.subtask_evidences.retain(|e| !ids.contains(&e.subtask_id));
        for item in self.daily_items.iter_mut() {
            if item.subtask_id.is_some_and(|s| ids.contains(&s)) {
                item.subtask_id = None;
            }
        }
    }

    /// Remove blocks and everything below them.
    pub fn remove_blocks(&mut self, ids: &[u64]) {
        let subtask_ids: Vec<u64> =
            self.subtasks.iter().filter(|s| ids.contains(&s.block_id)).map(|s| s.id).collect();
        self.remove_subtasks(&subtask_ids);
        self.blocks.retain(|b| !ids.contains(&b.id));
    }
}

/// Parse human-readable date input.
///
/// Supports:
/// - "today", "tomorrow", "yesterday"
/// - "end of week", "end of month"
/// - "in 3d", "in 2w", "3d ago"
/// - "YYYY-MM-DD" format
pub fn parse_date_input(s: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = s.trim().to_lowercase();

    match s.as_str() {
        "today" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        "yesterday" => return Some(today - Duration::days(1)),
        "end of week" | "eow" => {
            let (_, end) = start_end_of_week(today);
            return Some(end);
        }
        "end of month" | "eom" => {
            let (year, month) = if today.month() == 12 { (today.year() + 1, 1) } else { (today.year(), today.month() + 1) };
            let first_of_next = NaiveDate::from_ymd_opt(year, month, 1)?;
            return Some(first_of_next - Duration::days(1));
        }
        _ => {}
    }

    if let Some(rest) = s.strip_prefix("in ") {
        if let Some(nd) = rest.strip_suffix('d') {
            if let Ok(days) = nd.trim().parse::<i64>() {
                return Some(today + Duration::days(days));
            }
        }
        if let Some(nw) = rest.strip_suffix('w') {
            if let Ok(weeks) = nw.trim().parse::<i64>() {
                return Some(today + Duration::weeks(weeks));
            }
        }
    }

    if let Some(rest) = s.strip_suffix("d ago") {
        if let Ok(days) = rest.trim().parse::<i64>() {
            return Some(today - Duration::days(days));
        }
    }

    NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()
}

/// Parse a date argument or fail with a validation error naming the field.
pub fn require_date(field: &'static str, s: &str, today: NaiveDate) -> Result<NaiveDate> {
    parse_date_input(s, today).ok_or_else(|| {
        BacklogError::invalid(field, format!("unrecognised date '{s}'. Use YYYY-MM-DD, 'today', 'yesterday' or 'in Nd'"))
    })
}

/// Start and end dates of the ISO week (Monday to Sunday) containing `today`.
pub fn start_end_of_week(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let weekday = today.weekday().num_days_from_monday() as i64;
    let start = today - Duration::days(weekday);
    (start, start + Duration::days(6))
}

pub fn format_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
}

/// Fit a label into a table column `width` characters wide. Longer labels keep
/// `width - 1` characters and end in `…`.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    if width > 0 {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{d, Fixture};

    #[test]
    fn test_parse_date_input() {
        let today = d(2025, 3, 12);
        assert_eq!(parse_date_input("today", today), Some(today));
        assert_eq!(parse_date_input("Yesterday", today), Some(d(2025, 3, 11)));
        assert_eq!(parse_date_input("in 3d", today), Some(d(2025, 3, 15)));
        assert_eq!(parse_date_input("7d ago", today), Some(d(2025, 3, 5)));
        assert_eq!(parse_date_input("eow", today), Some(d(2025, 3, 16)));
        assert_eq!(parse_date_input("eom", d(2025, 12, 3)), Some(d(2025, 12, 31)));
        assert_eq!(parse_date_input("2025-01-31", today), Some(d(2025, 1, 31)));
        assert_eq!(parse_date_input("someday", today), None);
        assert!(require_date("from", "nope", today).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title", 6), "a lon…");
        assert_eq!(truncate("título largo", 3), "tí…");
        assert_eq!(truncate("abc", 0), "");
    }

    #[test]
    fn test_resolve_actor_provisions_member_once() {
        let mut fx = Fixture::new();
        let (first, created) = fx.db.resolve_actor("Nuevo", fx.now).unwrap();
        assert!(created);
        assert_eq!(first.role, Role::Member);
        assert_eq!(first.username, "nuevo");
        let (again, created) = fx.db.resolve_actor("nuevo", fx.now).unwrap();
        assert!(!created);
        assert_eq!(again.id, first.id);
        assert_eq!(fx.db.actors.len(), 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.json");
        let mut fx = Fixture::new();
        let a = fx.actor("ana", Role::Member);
        fx.task("Write docs", None, None, &[a]);
        fx.db.save(&path).unwrap();
        let loaded = Database::load(&path).unwrap();
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.actor(a).unwrap().username, "ana");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::load(&dir.path().join("none.json")).unwrap();
        assert!(db.tasks.is_empty() && db.actors.is_empty());
    }

    #[test]
    fn test_remove_blocks_cascades() {
        let mut fx = Fixture::new();
        let a = fx.actor("ana", Role::Member);
        let t = fx.task("T", None, None, &[a]);
        let b = fx.block(t, d(2025, 3, 3), d(2025, 3, 5));
        let s = fx.subtask(b, Some(a), crate::fields::SubtaskStatus::Pending);
        fx.db.remove_blocks(&[b]);
        assert!(fx.db.block(b).is_err());
        assert!(fx.db.subtask(s).is_err());
    }
}
