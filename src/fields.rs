//! Enumerations and field types for the backlog.
//!
//! This module defines the closed vocabularies used across the backlog: roles and
//! their capabilities, task workflow states, Eisenhower categories, epic and subtask
//! states, daily item kinds, and the story-point scales.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{BacklogError, Result};

/// Story points accepted on a task.
pub const STORY_POINTS: [u8; 7] = [1, 2, 3, 5, 8, 13, 21];

/// Effort scores accepted on a subtask.
pub const SUBTASK_SCORES: [u8; 4] = [1, 2, 3, 5];

/// Something an actor may be allowed to do beyond their own assigned work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CreateTasks,
    AddEvidence,
    EditTasks,
}

/// The single role every actor holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    ScrumMasterPo,
    ArchitectDirector,
    HrCoordinator,
    Visualizer,
    ProductOwner,
    ProductOwnerPartner,
    DatabaseLead,
    BackendSupport,
    FrontendDeveloper,
    BiAnalyst,
    Accounting,
    Administration,
    Fabrication,
    Member,
}

impl Role {
    /// Static capability set of the role. Administrative roles are granted
    /// everything by `Actor::can`, independent of this table.
    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::ScrumMasterPo | Role::DatabaseLead => &[CreateTasks, AddEvidence, EditTasks],
            Role::ArchitectDirector | Role::HrCoordinator => &[],
            Role::Visualizer | Role::ProductOwner | Role::ProductOwnerPartner => &[],
            Role::BackendSupport
            | Role::FrontendDeveloper
            | Role::BiAnalyst
            | Role::Accounting
            | Role::Administration
            | Role::Fabrication
            | Role::Member => &[],
        }
    }

    pub fn is_administrative(self) -> bool {
        matches!(self, Role::ScrumMasterPo | Role::ArchitectDirector | Role::HrCoordinator)
    }

    /// Read-mostly roles scoped through project grants.
    pub fn is_visualizer_family(self) -> bool {
        matches!(self, Role::Visualizer | Role::ProductOwner | Role::ProductOwnerPartner)
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::ScrumMasterPo => "Scrum Master / PO",
            Role::ArchitectDirector => "Architect & Director",
            Role::HrCoordinator => "HR & Admin Coordinator",
            Role::Visualizer => "Visualizer",
            Role::ProductOwner => "Product Owner",
            Role::ProductOwnerPartner => "Product Owner (partner)",
            Role::DatabaseLead => "Database Lead",
            Role::BackendSupport => "Backend Support",
            Role::FrontendDeveloper => "Frontend Developer",
            Role::BiAnalyst => "BI Analyst",
            Role::Accounting => "Accounting",
            Role::Administration => "Administration",
            Role::Fabrication => "Fabrication",
            Role::Member => "Member",
        }
    }
}

/// Kanban workflow state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    New,
    /// Legacy state, only reachable through a full edit.
    Approved,
    InProgress,
    Completed,
    Blocked,
}

impl TaskState {
    /// States accepted by the quick change-state action and shown on the board.
    pub const BOARD: [TaskState; 4] =
        [TaskState::New, TaskState::InProgress, TaskState::Completed, TaskState::Blocked];

    /// Parse a state code. Accepts kebab-case names and the legacy upper-case codes.
    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "new" | "nuevo" => Some(TaskState::New),
            "approved" | "aprobado" => Some(TaskState::Approved),
            "in-progress" | "en-progreso" => Some(TaskState::InProgress),
            "completed" | "completado" => Some(TaskState::Completed),
            "blocked" | "bloqueado" => Some(TaskState::Blocked),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskState::New => "New",
            TaskState::Approved => "Approved",
            TaskState::InProgress => "In Progress",
            TaskState::Completed => "Completed",
            TaskState::Blocked => "Blocked",
        }
    }
}

/// Eisenhower matrix quadrant of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    UrgentImportant,
    NotUrgentImportant,
    UrgentNotImportant,
    NotUrgentNotImportant,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::UrgentImportant,
        Category::NotUrgentImportant,
        Category::UrgentNotImportant,
        Category::NotUrgentNotImportant,
    ];

    /// Short matrix code (UI, NUI, UNI, NUNI).
    pub fn code(self) -> &'static str {
        match self {
            Category::UrgentImportant => "UI",
            Category::NotUrgentImportant => "NUI",
            Category::UrgentNotImportant => "UNI",
            Category::NotUrgentNotImportant => "NUNI",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s))
            .or_else(|| match s.to_lowercase().as_str() {
                "urgent-important" => Some(Category::UrgentImportant),
                "not-urgent-important" => Some(Category::NotUrgentImportant),
                "urgent-not-important" => Some(Category::UrgentNotImportant),
                "not-urgent-not-important" => Some(Category::NotUrgentNotImportant),
                _ => None,
            })
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::UrgentImportant => "Urgent & Important",
            Category::NotUrgentImportant => "Not Urgent & Important",
            Category::UrgentNotImportant => "Urgent & Not Important",
            Category::NotUrgentNotImportant => "Not Urgent & Not Important",
        }
    }

    /// Next quadrant in matrix order, wrapping around.
    pub fn next(self) -> Self {
        let i = Category::ALL.iter().position(|c| *c == self).unwrap_or(0);
        Category::ALL[(i + 1) % Category::ALL.len()]
    }
}

/// Lifecycle status of an epic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EpicStatus {
    Proposed,
    #[default]
    Active,
    Paused,
    Closed,
}

/// Priority of an epic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EpicPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// Status of a subtask.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    InProgress,
    Delivered,
    Closed,
}

impl SubtaskStatus {
    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "pending" | "pendiente" => Some(SubtaskStatus::Pending),
            "in-progress" | "en-progreso" => Some(SubtaskStatus::InProgress),
            "delivered" | "entregada" => Some(SubtaskStatus::Delivered),
            "closed" | "cerrada" => Some(SubtaskStatus::Closed),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "Pending",
            SubtaskStatus::InProgress => "In Progress",
            SubtaskStatus::Delivered => "Delivered",
            SubtaskStatus::Closed => "Closed",
        }
    }
}

/// Whether a daily line reports yesterday's work or today's plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DailyItemKind {
    Yesterday,
    Today,
}

/// How much of a day someone can work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AvailabilityKind {
    /// The whole day.
    Available,
    #[default]
    Unavailable,
    /// Between two times of the day.
    Range,
}

impl AvailabilityKind {
    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "available" | "all" | "yes" | "d" => Some(AvailabilityKind::Available),
            "unavailable" | "off" | "no" | "n" => Some(AvailabilityKind::Unavailable),
            "range" | "r" => Some(AvailabilityKind::Range),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AvailabilityKind::Available => "Available all day",
            AvailabilityKind::Unavailable => "Not available",
            AvailabilityKind::Range => "Available between",
        }
    }
}

/// Open/closed filter for task listings and reports.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum OpenFilter {
    Open,
    Closed,
    #[default]
    All,
}

/// Grouping options for task lists.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum GroupBy {
    Project,
    Epic,
    Sprint,
    None,
}

/// Parse a task state code into an error the caller can show.
pub fn parse_task_state(s: &str) -> Result<TaskState> {
    TaskState::from_code(s).ok_or_else(|| {
        BacklogError::invalid("state", format!("unknown state '{s}'; use new, in-progress, completed or blocked"))
    })
}

/// Parse a category code (UI, NUI, UNI, NUNI).
pub fn parse_category(s: &str) -> Result<Category> {
    Category::from_code(s)
        .ok_or_else(|| BacklogError::invalid("category", format!("unknown category '{s}'; use UI, NUI, UNI or NUNI")))
}

pub fn parse_subtask_status(s: &str) -> Result<SubtaskStatus> {
    SubtaskStatus::from_code(s).ok_or_else(|| {
        BacklogError::invalid("status", format!("unknown subtask status '{s}'; use pending, in-progress, delivered or closed"))
    })
}

/// Check an optional story-point value against the Fibonacci scale.
pub fn validate_story_points(points: Option<u8>) -> Result<Option<u8>> {
    match points {
        Some(p) if !STORY_POINTS.contains(&p) => Err(BacklogError::invalid(
            "story_points",
            format!("story points must be one of {}", join_numbers(&STORY_POINTS)),
        )),
        other => Ok(other),
    }
}

pub fn validate_subtask_score(score: Option<u8>) -> Result<Option<u8>> {
    match score {
        Some(s) if !SUBTASK_SCORES.contains(&s) => Err(BacklogError::invalid(
            "score",
            format!("subtask score must be one of {}", join_numbers(&SUBTASK_SCORES)),
        )),
        other => Ok(other),
    }
}

fn join_numbers(values: &[u8]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_points_rejects_four_and_lists_scale() {
        let err = validate_story_points(Some(4)).unwrap_err();
        assert!(err.to_string().contains("1, 2, 3, 5, 8, 13, 21"));
        assert_eq!(validate_story_points(Some(13)).unwrap(), Some(13));
        assert_eq!(validate_story_points(None).unwrap(), None);
    }

    #[test]
    fn test_subtask_score_scale() {
        assert!(validate_subtask_score(Some(8)).is_err());
        assert_eq!(validate_subtask_score(Some(5)).unwrap(), Some(5));
    }

    #[test]
    fn test_task_state_codes() {
        assert_eq!(TaskState::from_code("EN_PROGRESO"), Some(TaskState::InProgress));
        assert_eq!(TaskState::from_code("completed"), Some(TaskState::Completed));
        assert_eq!(TaskState::from_code("aprobado"), Some(TaskState::Approved));
        assert!(parse_task_state("done").is_err());
    }

    #[test]
    fn test_category_codes_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::from_code(c.code()), Some(c));
        }
        assert_eq!(Category::from_code("nuni"), Some(Category::NotUrgentNotImportant));
        assert!(parse_category("XX").is_err());
        assert_eq!(Category::NotUrgentNotImportant.next(), Category::UrgentImportant);
    }

    #[test]
    fn test_role_families_are_disjoint() {
        let all = [
            Role::ScrumMasterPo, Role::ArchitectDirector, Role::HrCoordinator, Role::Visualizer,
            Role::ProductOwner, Role::ProductOwnerPartner, Role::DatabaseLead, Role::BackendSupport,
            Role::FrontendDeveloper, Role::BiAnalyst, Role::Accounting, Role::Administration,
            Role::Fabrication, Role::Member,
        ];
        for r in all {
            assert!(!(r.is_administrative() && r.is_visualizer_family()), "{r:?}");
        }
        assert_eq!(Role::DatabaseLead.capabilities().len(), 3);
        assert!(Role::Member.capabilities().is_empty());
    }
}
