use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::fields::*;

/// File-backed backlog manager: projects, epics, tasks, sprints and dailies.
/// Storage defaults to ~/.backlog/backlog.json or a path passed via --db.
#[derive(Parser)]
#[command(name = "bk", version, about = "Team backlog and daily standup manager")]
pub struct Cli {
    /// Path to the JSON database file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Act as this user. Unknown users are registered as members.
    #[arg(long = "as", global = true, env = "BACKLOG_USER")]
    pub user: Option<String>,

    /// Path to the TOML configuration file (default: backlog.toml next to the database).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the store and its first administrator.
    Init {
        /// Username of the administrator.
        #[arg(long)]
        admin: String,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Show who you are acting as and what you can do.
    Whoami,

    /// Manage people and their roles.
    Actor {
        #[command(subcommand)]
        action: ActorAction,
    },

    /// Manage projects and visualizer grants.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage sprints.
    Sprint {
        #[command(subcommand)]
        action: SprintAction,
    },

    /// Manage epics.
    Epic {
        #[command(subcommand)]
        action: EpicAction,
    },

    /// Manage tasks and their workflow.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Manage the time-boxed blocks of a task.
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },

    /// Manage subtasks.
    Subtask {
        #[command(subcommand)]
        action: SubtaskAction,
    },

    /// Manage task evidence.
    Evidence {
        #[command(subcommand)]
        action: EvidenceAction,
    },

    /// Register and review daily standups.
    Daily {
        #[command(subcommand)]
        action: DailyAction,
    },

    /// Record and review weekly availability.
    Availability {
        #[command(subcommand)]
        action: AvailabilityAction,
    },

    /// Work report from today-type daily items (admin only).
    Report {
        /// Start date (default: 7 days ago).
        #[arg(long)]
        from: Option<String>,
        /// End date (default: today).
        #[arg(long)]
        to: Option<String>,
        /// Only this person's items.
        #[arg(long)]
        person: Option<String>,
        /// Include closed tasks and subtasks.
        #[arg(long)]
        include_closed: bool,
    },

    /// Launch the kanban board interface.
    Board,

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ActorAction {
    /// Register a person.
    Add {
        username: String,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = Role::Member)]
        role: Role,
    },
    /// List people.
    List,
    /// Change a person's role.
    Role {
        username: String,
        #[arg(value_enum)]
        role: Role,
    },
}

#[derive(Subcommand)]
pub enum ProjectAction {
    /// Create a project.
    Add { code: String, name: String },
    /// List the projects you can see.
    List,
    /// Reactivate a project.
    Enable { code: String },
    /// Deactivate a project.
    Disable { code: String },
    /// Grant a visualizer access to a project.
    Grant {
        username: String,
        code: String,
        /// Revoke the grant instead.
        #[arg(long)]
        revoke: bool,
    },
}

#[derive(Subcommand)]
pub enum SprintAction {
    /// Create a sprint.
    Add {
        name: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// List sprints.
    List,
    /// Edit a sprint.
    Edit {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Delete a sprint.
    Delete { id: u64 },
}

/// Epic fields shared by add and edit.
#[derive(Args, Default)]
pub struct EpicFields {
    /// Human code, e.g. NEUSI-001.
    #[arg(long)]
    pub code: Option<String>,
    #[arg(long)]
    pub desc: Option<String>,
    #[arg(long)]
    pub kpis: Option<String>,
    /// Link to the epic's documents.
    #[arg(long)]
    pub docs_url: Option<String>,
    #[arg(long, value_enum)]
    pub status: Option<EpicStatus>,
    #[arg(long, value_enum)]
    pub priority: Option<EpicPriority>,
    /// Project code.
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    /// Manual progress override, 0-100.
    #[arg(long)]
    pub progress: Option<u8>,
    /// Owner username. May be repeated.
    #[arg(long = "owner")]
    pub owners: Vec<String>,
    /// Sprint id. May be repeated.
    #[arg(long = "sprint")]
    pub sprints: Vec<u64>,
}

#[derive(Subcommand)]
pub enum EpicAction {
    /// Create an epic.
    Add {
        title: String,
        #[command(flatten)]
        fields: EpicFields,
    },
    /// List the epics you can see.
    List {
        /// Only epics of this project.
        #[arg(long)]
        project: Option<String>,
    },
    /// Show an epic with its task counts and progress.
    View { id: u64 },
    /// Edit an epic. Omitted options keep their value.
    Edit {
        id: u64,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: EpicFields,
        /// Drop the manual progress override.
        #[arg(long)]
        clear_progress: bool,
    },
    /// Delete an epic; its tasks are kept.
    Delete { id: u64 },
}

/// Listing filters shared by list and matrix.
#[derive(Args, Default)]
pub struct TaskFilterArgs {
    /// Only tasks of this person (admins and visualizers).
    #[arg(long)]
    pub person: Option<String>,
    #[arg(long)]
    pub sprint: Option<u64>,
    #[arg(long)]
    pub epic: Option<u64>,
    /// Project code.
    #[arg(long)]
    pub project: Option<String>,
    /// open | closed | all
    #[arg(long, value_enum, default_value_t = OpenFilter::All)]
    pub open: OpenFilter,
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a task.
    Add {
        title: String,
        #[arg(long)]
        desc: Option<String>,
        /// Acceptance criteria.
        #[arg(long)]
        criteria: Option<String>,
        /// Eisenhower quadrant: UI | NUI | UNI | NUNI.
        #[arg(long, default_value = "UI")]
        category: String,
        /// Initial state.
        #[arg(long, default_value = "new")]
        state: String,
        /// Story points: 1, 2, 3, 5, 8, 13 or 21.
        #[arg(long)]
        points: Option<u8>,
        #[arg(long)]
        epic: Option<u64>,
        #[arg(long)]
        sprint: Option<u64>,
        /// Assignee username. May be repeated.
        #[arg(long = "assign")]
        assignees: Vec<String>,
        /// Block as START:END[:NAME]. May be repeated.
        #[arg(long = "block")]
        blocks: Vec<String>,
    },
    /// List the tasks you can see.
    List {
        #[command(flatten)]
        filter: TaskFilterArgs,
        /// Category code.
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        state: Option<String>,
        /// Group the listing.
        #[arg(long, value_enum, default_value_t = GroupBy::None)]
        group: GroupBy,
    },
    /// Show a task with its blocks, subtasks and evidence.
    View {
        /// Task ID or title.
        id: String,
    },
    /// Edit a task. Responsible members may only change the state.
    Edit {
        /// Task ID or title.
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        desc: Option<String>,
        #[arg(long)]
        criteria: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        points: Option<u8>,
        #[arg(long)]
        clear_points: bool,
        #[arg(long)]
        epic: Option<u64>,
        #[arg(long)]
        clear_epic: bool,
        #[arg(long)]
        sprint: Option<u64>,
        #[arg(long)]
        clear_sprint: bool,
        /// Replace the assignees. May be repeated.
        #[arg(long = "assign")]
        assignees: Vec<String>,
        /// Remove every assignee.
        #[arg(long)]
        unassign: bool,
    },
    /// Move a task on the board.
    State {
        /// Task ID or title.
        id: String,
        /// new | in-progress | completed | blocked
        state: String,
        /// Note kept as evidence when moving to in-progress.
        #[arg(long)]
        note: Option<String>,
    },
    /// Move a task to another Eisenhower quadrant.
    Category {
        /// Task ID or title.
        id: String,
        /// UI | NUI | UNI | NUNI
        category: String,
    },
    /// Close a task with a report.
    Close {
        /// Task ID or title.
        id: String,
        /// Key of the stored closure report.
        #[arg(long)]
        report: Option<String>,
        /// Confirmation token.
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Delete a task and everything under it.
    Delete {
        /// Task ID or title.
        id: String,
    },
    /// Show visible tasks as an Eisenhower matrix.
    Matrix {
        #[command(flatten)]
        filter: TaskFilterArgs,
    },
    /// Open tasks of one person.
    Checklist {
        /// Person (default: yourself).
        #[arg(long)]
        person: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BlockAction {
    /// Add a block to a task.
    Add {
        /// Task ID or title.
        task: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        order: Option<u32>,
    },
    /// Edit a block; its subtasks follow the new dates.
    Edit {
        id: u64,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        order: Option<u32>,
    },
    /// Delete a block and its subtasks.
    Delete { id: u64 },
}

#[derive(Subcommand)]
pub enum SubtaskAction {
    /// Add a subtask to a block.
    Add {
        block: u64,
        title: String,
        #[arg(long)]
        desc: Option<String>,
        #[arg(long)]
        responsible: Option<String>,
        #[arg(long, default_value = "pending")]
        status: String,
        /// Effort score: 1, 2, 3 or 5.
        #[arg(long)]
        score: Option<u8>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Edit a subtask. Omitted options keep their value.
    Edit {
        id: u64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        desc: Option<String>,
        #[arg(long)]
        responsible: Option<String>,
        #[arg(long, conflicts_with = "responsible")]
        clear_responsible: bool,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        score: Option<u8>,
        #[arg(long, conflicts_with = "score")]
        clear_score: bool,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Delete a subtask.
    Delete { id: u64 },
    /// Change a subtask's status.
    Status {
        id: u64,
        /// pending | in-progress | delivered | closed
        status: String,
    },
    /// Manage subtask evidence.
    Evidence {
        #[command(subcommand)]
        action: SubtaskEvidenceAction,
    },
}

#[derive(Subcommand)]
pub enum SubtaskEvidenceAction {
    Add {
        subtask: u64,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },
    Edit {
        id: u64,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },
    Delete { id: u64 },
}

#[derive(Subcommand)]
pub enum EvidenceAction {
    /// Add evidence to a task.
    Add {
        /// Task ID or title.
        task: String,
        #[arg(long)]
        comment: Option<String>,
        /// Key of the stored attachment.
        #[arg(long)]
        file: Option<String>,
    },
    /// Replace an evidence's comment and file.
    Edit {
        id: u64,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },
    Delete { id: u64 },
}

/// Free-text fields of a daily.
#[derive(Args)]
pub struct DailyText {
    /// What you did yesterday.
    #[arg(long)]
    pub yesterday: String,
    /// What you will do today.
    #[arg(long)]
    pub today: String,
    #[arg(long)]
    pub impediments: Option<String>,
    #[arg(long)]
    pub sprint: Option<u64>,
}

/// Fields of a daily line item.
#[derive(Args)]
pub struct ItemFields {
    #[arg(long, value_enum, default_value_t = DailyItemKind::Today)]
    pub kind: DailyItemKind,
    /// Linked task ID.
    #[arg(long, conflicts_with = "subtask")]
    pub task: Option<u64>,
    /// Linked subtask ID.
    #[arg(long)]
    pub subtask: Option<u64>,
    #[arg(long)]
    pub minutes: Option<u32>,
    /// Evidence URL.
    #[arg(long)]
    pub url: Option<String>,
}

#[derive(Subcommand)]
pub enum DailyAction {
    /// Register today's daily (again to update it).
    Submit {
        #[command(flatten)]
        text: DailyText,
        /// Register for someone else (admin only).
        #[arg(long = "for")]
        owner: Option<String>,
    },
    /// Create a daily for someone else on a given date (admin only).
    CreateFor {
        username: String,
        #[arg(long)]
        date: String,
        #[command(flatten)]
        text: DailyText,
    },
    /// Delete a daily (admin only).
    Delete { id: u64 },
    /// Summary of recent dailies.
    List {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        person: Option<String>,
        #[arg(long)]
        sprint: Option<u64>,
    },
    /// Show a daily with its items and alignment.
    View { id: u64 },
    /// Manage the line items of a daily.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
    /// Alignment of a daily with the assigned work.
    Align { id: u64 },
}

#[derive(Subcommand)]
pub enum AvailabilityAction {
    /// Set days of a week. Days not given keep their value.
    Set {
        /// DAY=SLOT[,NOTES] where DAY is a weekday or a date of the week and SLOT is
        /// available, off or HH:MM-HH:MM. May be repeated.
        #[arg(long = "day", required = true)]
        days: Vec<String>,
        /// Any date of the week (default: this week).
        #[arg(long)]
        week: Option<String>,
        /// Set someone else's week (admin only).
        #[arg(long = "for")]
        owner: Option<String>,
    },
    /// Show one person's week (default: your own).
    Show {
        #[arg(long)]
        week: Option<String>,
        #[arg(long)]
        person: Option<String>,
    },
    /// Week grid of everyone you can see (admins and visualizers).
    Team {
        #[arg(long)]
        week: Option<String>,
        #[arg(long, value_enum)]
        role: Option<Role>,
    },
}

#[derive(Subcommand)]
pub enum ItemAction {
    Add {
        daily: u64,
        text: String,
        #[command(flatten)]
        fields: ItemFields,
    },
    Edit {
        id: u64,
        text: String,
        #[command(flatten)]
        fields: ItemFields,
    },
    Delete { id: u64 },
}
