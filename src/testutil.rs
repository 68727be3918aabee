//! Fixture builder shared by the unit tests. Records are pushed straight into the
//! store, bypassing the validated operations.

use chrono::{NaiveDate, NaiveDateTime};

use crate::actor::AuthContext;
use crate::db::{next_id, Database};
use crate::epic::Epic;
use crate::fields::*;
use crate::project::{Project, ProjectGrant};
use crate::sprint::Sprint;
use crate::task::{Block, Subtask, Task};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub struct Fixture {
    pub db: Database,
    pub now: NaiveDateTime,
}

impl Fixture {
    /// Empty store with the clock at 2025-03-10 08:00.
    pub fn new() -> Self {
        Fixture { db: Database::default(), now: d(2025, 3, 10).and_hms_opt(8, 0, 0).unwrap() }
    }

    pub fn actor(&mut self, username: &str, role: Role) -> u64 {
        self.db.insert_actor(username, username, role, false, self.now)
    }

    pub fn ctx(&self, actor_id: u64) -> AuthContext {
        AuthContext::new(&self.db, self.db.actor(actor_id).unwrap().clone())
    }

    pub fn project(&mut self, code: &str) -> u64 {
        let id = next_id(&self.db.projects, |p| p.id);
        self.db.projects.push(Project {
            id,
            code: code.to_string(),
            name: code.to_string(),
            active: true,
            created_at: self.now,
        });
        id
    }

    pub fn grant(&mut self, actor_id: u64, project_id: u64) {
        self.db.grants.push(ProjectGrant { actor_id, project_id, active: true });
    }

    pub fn sprint(&mut self, start: NaiveDate, end: NaiveDate) -> u64 {
        let id = next_id(&self.db.sprints, |s| s.id);
        self.db.sprints.push(Sprint { id, name: format!("Sprint {id}"), start, end });
        id
    }

    pub fn epic(&mut self, title: &str, project_id: Option<u64>) -> u64 {
        let id = next_id(&self.db.epics, |e| e.id);
        self.db.epics.push(Epic {
            id,
            code: None,
            title: title.to_string(),
            description: String::new(),
            kpis: String::new(),
            docs_url: None,
            status: EpicStatus::Active,
            priority: EpicPriority::Medium,
            project_id,
            start: None,
            end: None,
            manual_progress: None,
            owner_ids: vec![],
            sprint_ids: vec![],
            created_at: self.now,
            updated_at: self.now,
        });
        id
    }

    pub fn task(&mut self, title: &str, epic_id: Option<u64>, sprint_id: Option<u64>, assignees: &[u64]) -> u64 {
        let id = next_id(&self.db.tasks, |t| t.id);
        let mut task = Task {
            id,
            title: title.to_string(),
            description: String::new(),
            acceptance_criteria: String::new(),
            category: Category::UrgentImportant,
            state: TaskState::New,
            story_points: None,
            epic_id,
            sprint_id,
            assignee_ids: vec![],
            completed: false,
            closed_at: None,
            closure_report: None,
            created_by: None,
            created_at: self.now,
            updated_at: self.now,
        };
        task.set_assignees(assignees.to_vec());
        self.db.tasks.push(task);
        id
    }

    pub fn block(&mut self, task_id: u64, start: NaiveDate, end: NaiveDate) -> u64 {
        let id = next_id(&self.db.blocks, |b| b.id);
        let order = self.db.task_blocks(task_id).iter().map(|b| b.order).max().unwrap_or(0) + 1;
        self.db.blocks.push(Block { id, task_id, order, name: None, start, end });
        id
    }

    pub fn subtask(&mut self, block_id: u64, responsible_id: Option<u64>, status: SubtaskStatus) -> u64 {
        let id = next_id(&self.db.subtasks, |s| s.id);
        self.db.subtasks.push(Subtask {
            id,
            block_id,
            title: format!("Subtask {id}"),
            description: String::new(),
            responsible_id,
            status,
            score: None,
            start: None,
            end: None,
            created_at: self.now,
        });
        id
    }
}
