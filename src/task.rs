//! Task data structures and their breakdown.
//!
//! A `Task` is the macro unit of work. It can be broken down into time-boxed
//! `Block`s, each holding `Subtask`s, and it collects `Evidence` while it is worked on.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::fields::*;

/// A unit of trackable work with workflow state and assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    pub category: Category,
    pub state: TaskState,
    pub story_points: Option<u8>,
    pub epic_id: Option<u64>,
    pub sprint_id: Option<u64>,
    #[serde(default)]
    pub assignee_ids: Vec<u64>,
    #[serde(default)]
    pub completed: bool,
    pub closed_at: Option<NaiveDateTime>,
    pub closure_report: Option<String>,
    pub created_by: Option<u64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Task {
    /// The single responsible actor, only defined when exactly one actor is assigned.
    pub fn legacy_assignee(&self) -> Option<u64> {
        match self.assignee_ids.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn is_assigned(&self, actor_id: u64) -> bool {
        self.assignee_ids.contains(&actor_id)
    }

    /// Replace the assignee set, keeping it sorted and free of duplicates.
    pub fn set_assignees(&mut self, mut ids: Vec<u64>) {
        ids.sort_unstable();
        ids.dedup();
        self.assignee_ids = ids;
    }
}

/// A comment or attachment recorded against a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: u64,
    pub task_id: u64,
    pub comment: Option<String>,
    /// Opaque key of the stored attachment.
    pub file: Option<String>,
    pub created_by: Option<u64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A time-boxed slice of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub task_id: u64,
    /// 1-based position, unique within the task.
    pub order: u32,
    pub name: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Block {
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) if !n.is_empty() => format!("Block {} - {}", self.order, n),
            _ => format!("Block {}", self.order),
        }
    }
}

/// The smallest trackable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: u64,
    pub block_id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub responsible_id: Option<u64>,
    #[serde(default)]
    pub status: SubtaskStatus,
    pub score: Option<u8>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

/// Evidence recorded against a subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskEvidence {
    pub id: u64,
    pub subtask_id: u64,
    pub comment: Option<String>,
    pub file: Option<String>,
    pub created_by: Option<u64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Whether two inclusive date ranges share at least one day.
pub fn ranges_overlap(a: (NaiveDate, NaiveDate), b: (NaiveDate, NaiveDate)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{d, Fixture};

    #[test]
    fn test_legacy_assignee_follows_assignee_count() {
        let mut fx = Fixture::new();
        let a = fx.actor("ana", Role::Member);
        let b = fx.actor("bo", Role::Member);
        let id = fx.task("T", None, None, &[]);
        let task = fx.db.task_mut(id).unwrap();

        task.set_assignees(vec![a]);
        assert_eq!(task.legacy_assignee(), Some(a));
        task.set_assignees(vec![a, b, a]);
        assert_eq!(task.assignee_ids, vec![a, b]);
        assert_eq!(task.legacy_assignee(), None);
        task.set_assignees(vec![]);
        assert_eq!(task.legacy_assignee(), None);
    }

    #[test]
    fn test_legacy_assignee_survives_store_round_trip() {
        let mut fx = Fixture::new();
        let a = fx.actor("ana", Role::Member);
        let id = fx.task("T", None, None, &[a]);
        let json = serde_json::to_string(&fx.db).unwrap();
        let back: crate::db::Database = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task(id).unwrap().legacy_assignee(), Some(a));
    }

    #[test]
    fn test_ranges_overlap_is_inclusive() {
        assert!(ranges_overlap((d(2025, 3, 1), d(2025, 3, 5)), (d(2025, 3, 5), d(2025, 3, 9))));
        assert!(!ranges_overlap((d(2025, 3, 1), d(2025, 3, 4)), (d(2025, 3, 5), d(2025, 3, 9))));
    }
}
