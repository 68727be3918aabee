use std::io::stdout;
use std::path::PathBuf;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use clap_complete::{generate, Shell};

use crate::actor::{add_actor, bootstrap_admin, set_role, AuthContext, Scope};
use crate::availability::*;
use crate::breakdown::*;
use crate::cli::*;
use crate::config::Config;
use crate::daily::*;
use crate::db::*;
use crate::epic::*;
use crate::error::{BacklogError, Result};
use crate::evidence::*;
use crate::fields::*;
use crate::project::{create_project, grant_project, set_project_active};
use crate::report::{work_report, ReportFilter};
use crate::sprint::{create_sprint, delete_sprint, edit_sprint};
use crate::task::Task;
use crate::visibility::*;
use crate::workflow::*;

/// Everything a command needs: the loaded store, who is acting, and the clock.
pub struct Session {
    pub db: Database,
    pub db_path: PathBuf,
    pub ctx: AuthContext,
    pub config: Config,
    pub now: NaiveDateTime,
}

impl Session {
    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    pub fn save(&self) -> Result<()> {
        self.db.save(&self.db_path)
    }

    fn actor_id(&self, username: &str) -> Result<u64> {
        Ok(self.db.actor_by_username(username)?.id)
    }

    fn actor_ids(&self, usernames: &[String]) -> Result<Vec<u64>> {
        usernames.iter().map(|u| self.actor_id(u)).collect()
    }

    fn opt_actor(&self, username: Option<&str>) -> Result<Option<u64>> {
        username.map(|u| self.actor_id(u)).transpose()
    }

    fn date(&self, field: &'static str, s: &str) -> Result<NaiveDate> {
        require_date(field, s, self.today())
    }

    fn opt_date(&self, field: &'static str, s: Option<&str>) -> Result<Option<NaiveDate>> {
        s.map(|s| self.date(field, s)).transpose()
    }

    fn project_id(&self, code: &str) -> Result<u64> {
        Ok(self.db.project_by_code(code)?.id)
    }

    fn opt_project(&self, code: Option<&str>) -> Result<Option<u64>> {
        code.map(|c| self.project_id(c)).transpose()
    }

    /// Resolve a task by ID, or by title among the tasks the actor can see.
    fn task_id(&self, identifier: &str) -> Result<u64> {
        if let Ok(id) = identifier.trim().parse::<u64>() {
            self.db.task(id)?;
            return Ok(id);
        }
        let wanted = identifier.trim().to_lowercase();
        let matches: Vec<&Task> =
            visible_tasks(&self.db, &self.ctx).into_iter().filter(|t| t.title.to_lowercase() == wanted).collect();
        match matches.as_slice() {
            [] => Err(BacklogError::not_found("task", identifier)),
            [task] => Ok(task.id),
            many => {
                let ids = many.iter().map(|t| format!("#{}", t.id)).collect::<Vec<_>>().join(", ");
                Err(BacklogError::Conflict(format!("several tasks are titled '{identifier}': {ids}")))
            }
        }
    }
}

/// Create the store and its first administrator. Runs before any actor is resolved.
pub fn cmd_init(db: &mut Database, db_path: &std::path::Path, admin: &str, name: Option<&str>, now: NaiveDateTime) -> Result<()> {
    let id = bootstrap_admin(db, admin, name.unwrap_or(admin), now)?;
    db.save(db_path)?;
    println!("Created administrator {} (#{id}) in {}", admin, db_path.display());
    Ok(())
}

/// Generate shell completion scripts.
pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut stdout());
}

/// Dispatch a parsed command.
pub fn run(s: &mut Session, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } => Err(BacklogError::Conflict("the store is already initialised".into())),
        Commands::Whoami => {
            cmd_whoami(s);
            Ok(())
        }
        Commands::Actor { action } => cmd_actor(s, action),
        Commands::Project { action } => cmd_project(s, action),
        Commands::Sprint { action } => cmd_sprint(s, action),
        Commands::Epic { action } => cmd_epic(s, action),
        Commands::Task { action } => cmd_task(s, action),
        Commands::Block { action } => cmd_block(s, action),
        Commands::Subtask { action } => cmd_subtask(s, action),
        Commands::Evidence { action } => cmd_evidence(s, action),
        Commands::Daily { action } => cmd_daily(s, action),
        Commands::Availability { action } => cmd_availability(s, action),
        Commands::Report { from, to, person, include_closed } => cmd_report(s, from, to, person, include_closed),
        Commands::Board => crate::tui::board_run::run(s),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

fn cmd_whoami(s: &Session) {
    let actor = &s.ctx.actor;
    println!("User:         {}", actor.username);
    println!("Name:         {}", actor.display_name);
    println!("Role:         {}", actor.role.label());
    let scope = match &s.ctx.scope {
        Scope::All => "everything".to_string(),
        Scope::Projects(ids) if ids.is_empty() => "no projects granted".to_string(),
        Scope::Projects(ids) => {
            let codes: Vec<String> = ids.iter().filter_map(|id| s.db.project(*id).ok()).map(|p| p.code.clone()).collect();
            format!("projects {}", codes.join(", "))
        }
        Scope::Assigned(_) => "tasks assigned to you".to_string(),
    };
    println!("Sees:         {scope}");
}

fn cmd_actor(s: &mut Session, action: ActorAction) -> Result<()> {
    match action {
        ActorAction::Add { username, name, role } => {
            let id = add_actor(&mut s.db, &s.ctx, &username, name.as_deref().unwrap_or(""), role, s.now)?;
            s.save()?;
            println!("Added {username} (#{id}) as {}", role.label());
        }
        ActorAction::List => {
            s.ctx.require_admin("list people")?;
            println!("{:<5} {:<16} {:<24} {}", "ID", "User", "Name", "Role");
            for a in &s.db.actors {
                println!("{:<5} {:<16} {:<24} {}", a.id, truncate(&a.username, 16), truncate(&a.display_name, 24), a.role.label());
            }
        }
        ActorAction::Role { username, role } => {
            let id = s.actor_id(&username)?;
            set_role(&mut s.db, &s.ctx, id, role)?;
            s.save()?;
            println!("{username} is now {}", role.label());
        }
    }
    Ok(())
}

fn cmd_project(s: &mut Session, action: ProjectAction) -> Result<()> {
    match action {
        ProjectAction::Add { code, name } => {
            let id = create_project(&mut s.db, &s.ctx, &code, &name, s.now)?;
            s.save()?;
            println!("Added project {} (#{id})", s.db.project(id)?.code);
        }
        ProjectAction::List => {
            println!("{:<5} {:<12} {:<32} {}", "ID", "Code", "Name", "Active");
            for p in visible_projects(&s.db, &s.ctx) {
                println!("{:<5} {:<12} {:<32} {}", p.id, p.code, truncate(&p.name, 32), if p.active { "yes" } else { "no" });
            }
        }
        ProjectAction::Enable { code } => {
            let id = s.project_id(&code)?;
            set_project_active(&mut s.db, &s.ctx, id, true)?;
            s.save()?;
            println!("Project {code} enabled");
        }
        ProjectAction::Disable { code } => {
            let id = s.project_id(&code)?;
            set_project_active(&mut s.db, &s.ctx, id, false)?;
            s.save()?;
            println!("Project {code} disabled");
        }
        ProjectAction::Grant { username, code, revoke } => {
            let actor = s.actor_id(&username)?;
            let project = s.project_id(&code)?;
            grant_project(&mut s.db, &s.ctx, actor, project, !revoke)?;
            s.save()?;
            if revoke {
                println!("{username} can no longer see {code}");
            } else {
                println!("{username} can now see {code}");
            }
        }
    }
    Ok(())
}

fn cmd_sprint(s: &mut Session, action: SprintAction) -> Result<()> {
    match action {
        SprintAction::Add { name, start, end } => {
            let (start, end) = (s.date("start", &start)?, s.date("end", &end)?);
            let id = create_sprint(&mut s.db, &s.ctx, &name, start, end)?;
            s.save()?;
            println!("Added sprint #{id}");
        }
        SprintAction::List => {
            println!("{:<5} {:<24} {:<10} {:<10} {}", "ID", "Name", "Start", "End", "Tasks");
            for sp in visible_sprints(&s.db, &s.ctx) {
                let count = s.db.tasks.iter().filter(|t| t.sprint_id == Some(sp.id)).count();
                println!("{:<5} {:<24} {:<10} {:<10} {}", sp.id, truncate(&sp.name, 24), sp.start, sp.end, count);
            }
        }
        SprintAction::Edit { id, name, start, end } => {
            let start = s.opt_date("start", start.as_deref())?;
            let end = s.opt_date("end", end.as_deref())?;
            edit_sprint(&mut s.db, &s.ctx, id, name, start, end)?;
            s.save()?;
            println!("Updated sprint #{id}");
        }
        SprintAction::Delete { id } => {
            let sprint = delete_sprint(&mut s.db, &s.ctx, id)?;
            s.save()?;
            println!("Deleted sprint {}", sprint.label());
        }
    }
    Ok(())
}

/// Overlay the options given on the command line onto a draft.
fn apply_epic_fields(s: &Session, draft: &mut EpicDraft, fields: EpicFields) -> Result<()> {
    if let Some(code) = fields.code {
        draft.code = Some(code);
    }
    if let Some(desc) = fields.desc {
        draft.description = desc;
    }
    if let Some(kpis) = fields.kpis {
        draft.kpis = kpis;
    }
    if let Some(url) = fields.docs_url {
        draft.docs_url = Some(url);
    }
    if let Some(status) = fields.status {
        draft.status = status;
    }
    if let Some(priority) = fields.priority {
        draft.priority = priority;
    }
    if let Some(code) = fields.project.as_deref() {
        draft.project_id = Some(s.project_id(code)?);
    }
    if let Some(start) = s.opt_date("start", fields.start.as_deref())? {
        draft.start = Some(start);
    }
    if let Some(end) = s.opt_date("end", fields.end.as_deref())? {
        draft.end = Some(end);
    }
    if let Some(progress) = fields.progress {
        draft.manual_progress = Some(progress);
    }
    if !fields.owners.is_empty() {
        draft.owner_ids = s.actor_ids(&fields.owners)?;
    }
    if !fields.sprints.is_empty() {
        draft.sprint_ids = fields.sprints;
    }
    Ok(())
}

fn cmd_epic(s: &mut Session, action: EpicAction) -> Result<()> {
    match action {
        EpicAction::Add { title, fields } => {
            let mut draft = EpicDraft { title, ..EpicDraft::default() };
            apply_epic_fields(s, &mut draft, fields)?;
            let id = create_epic(&mut s.db, &s.ctx, draft, s.now)?;
            s.save()?;
            println!("Added epic {}", s.db.epic(id)?.label());
        }
        EpicAction::List { project } => {
            let project = s.opt_project(project.as_deref())?;
            println!("{:<5} {:<12} {:<32} {:<9} {:<7} {}", "ID", "Code", "Title", "Status", "Prio", "Progress");
            for e in visible_epics(&s.db, &s.ctx, project) {
                let progress = e.progress(s.db.tasks.iter().filter(|t| t.epic_id == Some(e.id)));
                println!(
                    "{:<5} {:<12} {:<32} {:<9} {:<7} {:.0}%",
                    e.id,
                    e.code.as_deref().unwrap_or("-"),
                    truncate(&e.title, 32),
                    format!("{:?}", e.status).to_lowercase(),
                    format!("{:?}", e.priority).to_lowercase(),
                    progress
                );
            }
        }
        EpicAction::View { id } => {
            let detail = epic_detail(&s.db, &s.ctx, id)?;
            let e = s.db.epic(id)?;
            println!("ID:           {}", e.id);
            println!("Epic:         {}", e.label());
            println!("Status:       {:?}", e.status);
            println!("Priority:     {:?}", e.priority);
            println!("Project:      {}", e.project_id.and_then(|p| s.db.project(p).ok()).map(|p| p.code.clone()).unwrap_or_else(|| "-".into()));
            println!("Dates:        {} .. {}", format_date(e.start), format_date(e.end));
            let owners: Vec<String> = e.owner_ids.iter().map(|o| s.db.actor_name(*o)).collect();
            println!("Owners:       {}", if owners.is_empty() { "-".into() } else { owners.join(", ") });
            println!("Docs:         {}", e.docs_url.as_deref().unwrap_or("-"));
            println!("Tasks:        {} ({} completed)", detail.total, detail.completed);
            for (state, count) in &detail.by_state {
                println!("  {:<12} {}", state.label(), count);
            }
            println!("Progress:     {:.2}% (computed {:.2}%)", detail.effective_progress, detail.computed_progress);
            if !e.description.is_empty() {
                println!("Description:\n{}", e.description);
            }
            if !e.kpis.is_empty() {
                println!("KPIs:\n{}", e.kpis);
            }
        }
        EpicAction::Edit { id, title, fields, clear_progress } => {
            let mut draft = EpicDraft::from_epic(s.db.epic(id)?);
            if let Some(title) = title {
                draft.title = title;
            }
            apply_epic_fields(s, &mut draft, fields)?;
            if clear_progress {
                draft.manual_progress = None;
            }
            edit_epic(&mut s.db, &s.ctx, id, draft, s.now)?;
            s.save()?;
            println!("Updated epic #{id}");
        }
        EpicAction::Delete { id } => {
            let epic = delete_epic(&mut s.db, &s.ctx, id)?;
            s.save()?;
            println!("Deleted epic {}", epic.label());
        }
    }
    Ok(())
}

/// Parse `START:END[:NAME]` into a block draft.
fn parse_block_arg(arg: &str, today: NaiveDate) -> Result<BlockDraft> {
    let mut parts = arg.splitn(3, ':');
    let start = parts.next().unwrap_or_default();
    let end = parts.next().ok_or_else(|| BacklogError::invalid("blocks", format!("'{arg}' is not START:END[:NAME]")))?;
    Ok(BlockDraft {
        order: None,
        name: parts.next().map(str::to_string),
        start: require_date("blocks", start, today)?,
        end: require_date("blocks", end, today)?,
    })
}

fn task_filter(s: &Session, args: TaskFilterArgs) -> Result<TaskFilter> {
    Ok(TaskFilter {
        person: s.opt_actor(args.person.as_deref())?,
        sprint: args.sprint,
        epic: args.epic,
        project: s.opt_project(args.project.as_deref())?,
        category: None,
        state: None,
        open: args.open,
    })
}

fn assignee_names(db: &Database, task: &Task) -> String {
    if task.assignee_ids.is_empty() {
        return "-".into();
    }
    task.assignee_ids.iter().map(|a| db.actor_name(*a)).collect::<Vec<_>>().join(", ")
}

fn print_task_header() {
    println!("{:<5} {:<5} {:<12} {:<4} {:<10} {:<36} {}", "ID", "Cat", "State", "Pts", "Sprint", "Title", "Assignees");
}

fn print_task_row(db: &Database, t: &Task) {
    let sprint = t.sprint_id.and_then(|id| db.sprint(id).ok()).map(|sp| sp.name.clone()).unwrap_or_else(|| "-".into());
    let state = if t.completed { "Closed".to_string() } else { t.state.label().to_string() };
    println!(
        "{:<5} {:<5} {:<12} {:<4} {:<10} {:<36} {}",
        t.id,
        t.category.code(),
        state,
        t.story_points.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        truncate(&sprint, 10),
        truncate(&t.title, 36),
        assignee_names(db, t)
    );
}

fn cmd_task(s: &mut Session, action: TaskAction) -> Result<()> {
    match action {
        TaskAction::Add { title, desc, criteria, category, state, points, epic, sprint, assignees, blocks } => {
            let today = s.today();
            let draft = TaskDraft {
                title,
                description: desc.unwrap_or_default(),
                acceptance_criteria: criteria.unwrap_or_default(),
                category: parse_category(&category)?,
                state: parse_task_state(&state)?,
                story_points: points,
                epic_id: epic,
                sprint_id: sprint,
                assignee_ids: s.actor_ids(&assignees)?,
                blocks: blocks.iter().map(|b| parse_block_arg(b, today)).collect::<Result<_>>()?,
            };
            let id = create_task(&mut s.db, &s.ctx, draft, s.now)?;
            s.save()?;
            println!("Added task {id}");
        }
        TaskAction::List { filter, category, state, group } => {
            let mut filter = task_filter(s, filter)?;
            filter.category = category.as_deref().map(parse_category).transpose()?;
            filter.state = state.as_deref().map(parse_task_state).transpose()?;
            let tasks = filter_tasks(&s.db, &s.ctx, &filter);
            if tasks.is_empty() {
                println!("No tasks found matching the criteria.");
                return Ok(());
            }
            if group == GroupBy::None {
                print_task_header();
                for t in &tasks {
                    print_task_row(&s.db, t);
                }
            } else {
                for (heading, group) in group_tasks(&s.db, &tasks, group) {
                    println!("\n== {heading} ({})", group.len());
                    print_task_header();
                    for t in group {
                        print_task_row(&s.db, t);
                    }
                }
            }
        }
        TaskAction::View { id } => cmd_task_view(s, &id)?,
        TaskAction::Edit {
            id,
            title,
            desc,
            criteria,
            category,
            state,
            points,
            clear_points,
            epic,
            clear_epic,
            sprint,
            clear_sprint,
            assignees,
            unassign,
        } => {
            let task_id = s.task_id(&id)?;
            let patch = TaskPatch {
                title,
                description: desc,
                acceptance_criteria: criteria,
                category: category.as_deref().map(parse_category).transpose()?,
                state: state.as_deref().map(parse_task_state).transpose()?,
                story_points: if clear_points { Some(None) } else { points.map(Some) },
                epic_id: if clear_epic { Some(None) } else { epic.map(Some) },
                sprint_id: if clear_sprint { Some(None) } else { sprint.map(Some) },
                assignee_ids: if unassign {
                    Some(Vec::new())
                } else if assignees.is_empty() {
                    None
                } else {
                    Some(s.actor_ids(&assignees)?)
                },
            };
            edit_task(&mut s.db, &s.ctx, task_id, patch, s.now)?;
            s.save()?;
            println!("Updated task {task_id}");
        }
        TaskAction::State { id, state, note } => {
            let task_id = s.task_id(&id)?;
            let state = parse_task_state(&state)?;
            let previous = change_state(&mut s.db, &s.ctx, task_id, state, note.as_deref(), s.now)?;
            s.save()?;
            println!("Task {task_id}: {} -> {}", previous.label(), state.label());
        }
        TaskAction::Category { id, category } => {
            let task_id = s.task_id(&id)?;
            let category = parse_category(&category)?;
            let previous = change_category(&mut s.db, &s.ctx, task_id, category, s.now)?;
            s.save()?;
            println!("Task {task_id}: {} -> {}", previous.code(), category.code());
        }
        TaskAction::Close { id, report, confirm } => {
            let task_id = s.task_id(&id)?;
            let closure = s.config.closure.clone();
            close_task(&mut s.db, &s.ctx, task_id, report.as_deref(), confirm.as_deref(), &closure, s.now)?;
            s.save()?;
            println!("Closed task {task_id}");
        }
        TaskAction::Delete { id } => {
            let task_id = s.task_id(&id)?;
            let task = delete_task(&mut s.db, &s.ctx, task_id)?;
            s.save()?;
            println!("Deleted task {} - {}", task.id, task.title);
        }
        TaskAction::Matrix { filter } => {
            let filter = task_filter(s, filter)?;
            for (category, tasks) in matrix(&s.db, &s.ctx, &filter) {
                println!("\n[{}] {} ({})", category.code(), category.label(), tasks.len());
                for t in tasks {
                    println!("  #{:<5} {:<12} {}", t.id, t.state.label(), truncate(&t.title, 50));
                }
            }
        }
        TaskAction::Checklist { person } => {
            let person = s.opt_actor(person.as_deref())?.unwrap_or(s.ctx.actor_id());
            let tasks = open_tasks_for(&s.db, &s.ctx, person)?;
            println!("Open tasks of {} ({})", s.db.actor_name(person), tasks.len());
            for t in tasks {
                println!("[ ] #{:<5} {:<5} {:<12} {}", t.id, t.category.code(), t.state.label(), t.title);
            }
        }
    }
    Ok(())
}

fn cmd_task_view(s: &Session, identifier: &str) -> Result<()> {
    let task_id = s.task_id(identifier)?;
    let t = require_task_visible(&s.db, &s.ctx, task_id)?;
    let db = &s.db;
    println!("ID:           {}", t.id);
    println!("Title:        {}", t.title);
    println!("Category:     {} ({})", t.category.label(), t.category.code());
    println!("State:        {}{}", t.state.label(), if t.completed { " (closed)" } else { "" });
    println!("Points:       {}", t.story_points.map(|p| p.to_string()).unwrap_or_else(|| "-".into()));
    println!("Epic:         {}", t.epic_id.and_then(|e| db.epic(e).ok()).map(|e| e.label()).unwrap_or_else(|| "-".into()));
    println!("Sprint:       {}", t.sprint_id.and_then(|sp| db.sprint(sp).ok()).map(|sp| sp.label()).unwrap_or_else(|| "-".into()));
    println!("Assignees:    {}", assignee_names(db, t));
    println!("Created:      {}", t.created_at.format("%Y-%m-%d %H:%M"));
    if let Some(closed) = t.closed_at {
        println!("Closed:       {}", closed.format("%Y-%m-%d %H:%M"));
        println!("Report:       {}", t.closure_report.as_deref().unwrap_or("-"));
    }
    if !t.description.is_empty() {
        println!("Description:\n{}\n", t.description);
    }
    if !t.acceptance_criteria.is_empty() {
        println!("Acceptance criteria:\n{}\n", t.acceptance_criteria);
    }

    let blocks = db.task_blocks(t.id);
    if !blocks.is_empty() {
        println!("Blocks:");
        for b in blocks {
            println!("  {} ({} .. {}) [#{}]", b.label(), b.start, b.end, b.id);
            for st in db.block_subtasks(b.id) {
                let who = st.responsible_id.map(|r| db.actor_name(r)).unwrap_or_else(|| "-".into());
                println!("    - #{:<4} {:<12} {:<28} {}", st.id, st.status.label(), truncate(&st.title, 28), who);
            }
        }
    }

    let evidences: Vec<_> = db.evidences.iter().filter(|e| e.task_id == t.id).collect();
    if !evidences.is_empty() {
        println!("Evidence:");
        for e in evidences {
            let by = e.created_by.map(|a| db.actor_name(a)).unwrap_or_else(|| "-".into());
            println!("  #{} {} by {}", e.id, e.created_at.format("%Y-%m-%d %H:%M"), by);
            if let Some(c) = &e.comment {
                println!("    {}", c.replace('\n', "\n    "));
            }
            if let Some(f) = &e.file {
                println!("    file: {f}");
            }
        }
    }
    Ok(())
}

fn cmd_block(s: &mut Session, action: BlockAction) -> Result<()> {
    match action {
        BlockAction::Add { task, start, end, name, order } => {
            let task_id = s.task_id(&task)?;
            let draft = BlockDraft { order, name, start: s.date("start", &start)?, end: s.date("end", &end)? };
            let id = add_block(&mut s.db, &s.ctx, task_id, draft)?;
            s.save()?;
            println!("Added {} to task {task_id}", s.db.block(id)?.label());
        }
        BlockAction::Edit { id, start, end, name, order } => {
            let block = s.db.block(id)?;
            let draft = BlockDraft {
                order,
                name: name.or_else(|| block.name.clone()),
                start: s.opt_date("start", start.as_deref())?.unwrap_or(block.start),
                end: s.opt_date("end", end.as_deref())?.unwrap_or(block.end),
            };
            edit_block(&mut s.db, &s.ctx, id, draft)?;
            s.save()?;
            println!("Updated block #{id}");
        }
        BlockAction::Delete { id } => {
            delete_block(&mut s.db, &s.ctx, id)?;
            s.save()?;
            println!("Deleted block #{id}");
        }
    }
    Ok(())
}

fn cmd_subtask(s: &mut Session, action: SubtaskAction) -> Result<()> {
    match action {
        SubtaskAction::Add { block, title, desc, responsible, status, score, start, end } => {
            let draft = SubtaskDraft {
                title,
                description: desc.unwrap_or_default(),
                responsible_id: s.opt_actor(responsible.as_deref())?,
                status: parse_subtask_status(&status)?,
                score,
                start: s.opt_date("start", start.as_deref())?,
                end: s.opt_date("end", end.as_deref())?,
            };
            let id = create_subtask(&mut s.db, &s.ctx, block, draft, s.now)?;
            s.save()?;
            println!("Added subtask #{id}");
        }
        SubtaskAction::Edit {
            id,
            title,
            desc,
            responsible,
            clear_responsible,
            status,
            score,
            clear_score,
            start,
            end,
        } => {
            let mut draft = SubtaskDraft::from_subtask(s.db.subtask(id)?);
            if let Some(title) = title {
                draft.title = title;
            }
            if let Some(desc) = desc {
                draft.description = desc;
            }
            if let Some(r) = s.opt_actor(responsible.as_deref())? {
                draft.responsible_id = Some(r);
            }
            if let Some(status) = status.as_deref() {
                draft.status = parse_subtask_status(status)?;
            }
            if clear_responsible {
                draft.responsible_id = None;
            }
            if score.is_some() {
                draft.score = score;
            }
            if clear_score {
                draft.score = None;
            }
            if let Some(start) = s.opt_date("start", start.as_deref())? {
                draft.start = Some(start);
            }
            if let Some(end) = s.opt_date("end", end.as_deref())? {
                draft.end = Some(end);
            }
            edit_subtask(&mut s.db, &s.ctx, id, draft)?;
            s.save()?;
            println!("Updated subtask #{id}");
        }
        SubtaskAction::Delete { id } => {
            delete_subtask(&mut s.db, &s.ctx, id)?;
            s.save()?;
            println!("Deleted subtask #{id}");
        }
        SubtaskAction::Status { id, status } => {
            let previous = change_subtask_status(&mut s.db, &s.ctx, id, &status)?;
            s.save()?;
            println!("Subtask #{id}: {} -> {}", previous.label(), s.db.subtask(id)?.status.label());
        }
        SubtaskAction::Evidence { action } => match action {
            SubtaskEvidenceAction::Add { subtask, comment, file } => {
                let id = add_subtask_evidence(&mut s.db, &s.ctx, subtask, comment, file, s.now)?;
                s.save()?;
                println!("Added evidence #{id} to subtask #{subtask}");
            }
            SubtaskEvidenceAction::Edit { id, comment, file } => {
                edit_subtask_evidence(&mut s.db, &s.ctx, id, comment, file, s.now)?;
                s.save()?;
                println!("Updated evidence #{id}");
            }
            SubtaskEvidenceAction::Delete { id } => {
                delete_subtask_evidence(&mut s.db, &s.ctx, id)?;
                s.save()?;
                println!("Deleted evidence #{id}");
            }
        },
    }
    Ok(())
}

fn cmd_evidence(s: &mut Session, action: EvidenceAction) -> Result<()> {
    match action {
        EvidenceAction::Add { task, comment, file } => {
            let task_id = s.task_id(&task)?;
            let id = add_evidence(&mut s.db, &s.ctx, task_id, comment, file, s.now)?;
            s.save()?;
            println!("Added evidence #{id} to task {task_id}");
        }
        EvidenceAction::Edit { id, comment, file } => {
            edit_evidence(&mut s.db, &s.ctx, id, comment, file, s.now)?;
            s.save()?;
            println!("Updated evidence #{id}");
        }
        EvidenceAction::Delete { id } => {
            delete_evidence(&mut s.db, &s.ctx, id)?;
            s.save()?;
            println!("Deleted evidence #{id}");
        }
    }
    Ok(())
}

fn daily_draft(text: DailyText) -> DailyDraft {
    DailyDraft { yesterday: text.yesterday, today: text.today, impediments: text.impediments, sprint_id: text.sprint }
}

fn item_draft(text: String, fields: ItemFields) -> DailyItemDraft {
    DailyItemDraft {
        kind: fields.kind,
        text,
        task_id: fields.task,
        subtask_id: fields.subtask,
        minutes: fields.minutes,
        evidence_url: fields.url,
    }
}

fn cmd_daily(s: &mut Session, action: DailyAction) -> Result<()> {
    match action {
        DailyAction::Submit { text, owner } => {
            let owner = s.opt_actor(owner.as_deref())?;
            let cfg = s.config.daily.clone();
            let reg = submit_daily(&mut s.db, &s.ctx, owner, daily_draft(text), &cfg, s.now)?;
            s.save()?;
            let verb = if reg.created { "Registered" } else { "Updated" };
            println!("{verb} daily #{} for {}", reg.daily_id, s.today());
            if reg.out_of_window {
                println!(
                    "Note: registered outside the {}-{} window",
                    cfg.window_start.format("%H:%M"),
                    cfg.window_end.format("%H:%M")
                );
            }
        }
        DailyAction::CreateFor { username, date, text } => {
            let owner = s.actor_id(&username)?;
            let date = s.date("date", &date)?;
            let cfg = s.config.daily.clone();
            let id = admin_create_daily(&mut s.db, &s.ctx, owner, date, daily_draft(text), &cfg, s.now)?;
            s.save()?;
            println!("Created daily #{id} for {username} on {date}");
        }
        DailyAction::Delete { id } => {
            let daily = delete_daily(&mut s.db, &s.ctx, id)?;
            s.save()?;
            println!("Deleted daily #{id} of {} ({})", s.db.actor_name(daily.actor_id), daily.date);
        }
        DailyAction::List { from, to, person, sprint } => {
            let filter = SummaryFilter {
                from: s.opt_date("from", from.as_deref())?,
                to: s.opt_date("to", to.as_deref())?,
                person: s.opt_actor(person.as_deref())?,
                sprint,
            };
            let dailies = daily_summary(&s.db, &s.ctx, &filter, &s.config.daily, s.today());
            if dailies.is_empty() {
                println!("No dailies found.");
                return Ok(());
            }
            println!("{:<5} {:<10} {:<6} {:<18} {:<6} {:<5} {}", "ID", "Date", "Time", "Person", "Align", "Late", "Today");
            for d in dailies {
                let align = alignment(&s.db, d);
                println!(
                    "{:<5} {:<10} {:<6} {:<18} {:<6} {:<5} {}",
                    d.id,
                    d.date,
                    d.time.format("%H:%M"),
                    truncate(&s.db.actor_name(d.actor_id), 18),
                    format!("{}%", align.percentage),
                    if d.out_of_window { "yes" } else { "" },
                    truncate(&d.today, 40)
                );
            }
        }
        DailyAction::View { id } => {
            let align = daily_alignment(&s.db, &s.ctx, id)?;
            let d = s.db.daily(id)?;
            println!("ID:           {}", d.id);
            println!("Person:       {}", s.db.actor_name(d.actor_id));
            println!("Date:         {} {}{}", d.date, d.time.format("%H:%M"), if d.out_of_window { " (out of window)" } else { "" });
            println!("Sprint:       {}", d.sprint_id.and_then(|sp| s.db.sprint(sp).ok()).map(|sp| sp.label()).unwrap_or_else(|| "-".into()));
            println!("Yesterday:    {}", d.yesterday);
            println!("Today:        {}", d.today);
            println!("Impediments:  {}", d.impediments.as_deref().unwrap_or("-"));
            println!("Alignment:    {}% ({}/{})", align.percentage, align.aligned, align.total);
            for item in s.db.daily_items_of(id) {
                let target = match (item.task_id, item.subtask_id) {
                    (_, Some(st)) => format!("subtask #{st}"),
                    (Some(t), None) => format!("task #{t}"),
                    (None, None) => "-".into(),
                };
                let mark = if align.misaligned_ids.contains(&item.id) { "!" } else { " " };
                let minutes = item.minutes.map(|m| format!("{m}m")).unwrap_or_default();
                println!("  {mark} #{:<4} {:<9} {:<12} {:<5} {}", item.id, format!("{:?}", item.kind).to_lowercase(), target, minutes, item.text);
            }
        }
        DailyAction::Item { action } => match action {
            ItemAction::Add { daily, text, fields } => {
                let id = add_item(&mut s.db, &s.ctx, daily, item_draft(text, fields))?;
                s.save()?;
                println!("Added item #{id} to daily #{daily}");
            }
            ItemAction::Edit { id, text, fields } => {
                edit_item(&mut s.db, &s.ctx, id, item_draft(text, fields))?;
                s.save()?;
                println!("Updated item #{id}");
            }
            ItemAction::Delete { id } => {
                delete_item(&mut s.db, &s.ctx, id)?;
                s.save()?;
                println!("Deleted item #{id}");
            }
        },
        DailyAction::Align { id } => {
            let align = daily_alignment(&s.db, &s.ctx, id)?;
            println!("Alignment:    {}%", align.percentage);
            println!("Items:        {}", align.total);
            println!("Aligned:      {}", align.aligned);
            println!("Misaligned:   {}", align.misaligned);
            if !align.misaligned_ids.is_empty() {
                let ids: Vec<String> = align.misaligned_ids.iter().map(|i| format!("#{i}")).collect();
                println!("Off-plan:     {}", ids.join(", "));
            }
        }
    }
    Ok(())
}

/// Parse `DAY=SLOT[,NOTES]` for the week starting on `week_start`.
fn parse_day_arg(arg: &str, week_start: NaiveDate) -> Result<DayUpdate> {
    let bad = || BacklogError::invalid("day", format!("'{arg}' is not DAY=SLOT[,NOTES]"));
    let (day, rest) = arg.split_once('=').ok_or_else(bad)?;
    let (slot, notes) = match rest.split_once(',') {
        Some((slot, notes)) => (slot.trim(), Some(notes.trim().to_string())),
        None => (rest.trim(), None),
    };

    let weekday = match NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d") {
        Ok(date) if week_of(date) == week_start => date.weekday(),
        Ok(date) => {
            return Err(BacklogError::invalid("day", format!("{date} is not in the week of {week_start}")));
        }
        Err(_) => day
            .trim()
            .parse::<Weekday>()
            .map_err(|_| BacklogError::invalid("day", format!("unknown day '{day}'; use mon..sun or a date")))?,
    };

    let mut update = DayUpdate { weekday, kind: AvailabilityKind::Range, from: None, to: None, notes };
    if let Some((from, to)) = slot.split_once('-') {
        let hour = |h: &str| {
            NaiveTime::parse_from_str(h.trim(), "%H:%M")
                .map_err(|_| BacklogError::invalid("hours", format!("'{h}' is not an HH:MM time")))
        };
        update.from = Some(hour(from)?);
        update.to = Some(hour(to)?);
    } else {
        update.kind = AvailabilityKind::from_code(slot).ok_or_else(|| {
            BacklogError::invalid("day", format!("unknown slot '{slot}'; use available, off or HH:MM-HH:MM"))
        })?;
    }
    Ok(update)
}

fn cmd_availability(s: &mut Session, action: AvailabilityAction) -> Result<()> {
    match action {
        AvailabilityAction::Set { days, week, owner } => {
            let week_start = week_of(s.opt_date("week", week.as_deref())?.unwrap_or(s.today()));
            let updates = days.iter().map(|d| parse_day_arg(d, week_start)).collect::<Result<Vec<_>>>()?;
            let owner = s.opt_actor(owner.as_deref())?;
            set_availability(&mut s.db, &s.ctx, owner, week_start, updates, s.now)?;
            s.save()?;
            let who = s.db.actor_name(owner.unwrap_or(s.ctx.actor_id()));
            println!("Updated availability of {who} for the week of {week_start}");
        }
        AvailabilityAction::Show { week, person } => {
            let (start, end) = start_end_of_week(s.opt_date("week", week.as_deref())?.unwrap_or(s.today()));
            let person = s.opt_actor(person.as_deref())?.unwrap_or(s.ctx.actor_id());
            let days = week_availability(&s.db, &s.ctx, person, start)?;
            println!("{} - week {start} .. {end}", s.db.actor_name(person));
            for (date, day) in start.iter_days().zip(&days) {
                let notes = if day.notes.is_empty() { String::new() } else { format!(" ({})", day.notes) };
                println!("  {} {}  {}{}", day.weekday, date, day.long(), notes);
            }
        }
        AvailabilityAction::Team { week, role } => {
            let (start, end) = start_end_of_week(s.opt_date("week", week.as_deref())?.unwrap_or(s.today()));
            let rows = team_availability(&s.db, &s.ctx, start, role)?;
            println!("Team availability {start} .. {end}");
            if rows.is_empty() {
                println!("Nobody to show.");
                return Ok(());
            }
            let header: Vec<String> = WEEKDAYS.iter().map(|w| format!("{:<12}", w.to_string())).collect();
            println!("{:<18} {}", "Person", header.join(""));
            for row in rows {
                let cells: Vec<String> = row.days.iter().map(|d| format!("{:<12}", d.short())).collect();
                println!("{:<18} {}", truncate(&row.actor.display_name, 18), cells.join(""));
            }
        }
    }
    Ok(())
}

fn cmd_report(s: &Session, from: Option<String>, to: Option<String>, person: Option<String>, include_closed: bool) -> Result<()> {
    let to = s.opt_date("to", to.as_deref())?.unwrap_or(s.today());
    let from = s.opt_date("from", from.as_deref())?.unwrap_or(to - Duration::days(7));
    let filter = ReportFilter { from, to, person: s.opt_actor(person.as_deref())?, include_closed };
    let rows = work_report(&s.db, &s.ctx, &filter)?;
    println!("Work reported {from} .. {to}");
    if rows.is_empty() {
        println!("No linked items in range.");
        return Ok(());
    }
    println!("{:<40} {:<6} {:<8} {:<22} {}", "Target", "Items", "Minutes", "Span", "People");
    for r in rows {
        let people: Vec<String> = r.people.iter().map(|p| s.db.actor_name(*p)).collect();
        let label = if r.closed { format!("{} (closed)", r.label) } else { r.label };
        println!(
            "{:<40} {:<6} {:<8} {:<22} {}",
            truncate(&label, 40),
            r.items,
            r.minutes,
            format!("{} .. {}", r.first, r.last),
            people.join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{d, Fixture};
    use tempfile::TempDir;

    fn session(fx: Fixture, actor: u64, dir: &TempDir) -> Session {
        let ctx = fx.ctx(actor);
        Session { db: fx.db, db_path: dir.path().join("backlog.json"), ctx, config: Config::default(), now: fx.now }
    }

    #[test]
    fn test_parse_block_arg() {
        let today = d(2025, 3, 10);
        let b = parse_block_arg("2025-03-03:2025-03-05:Design", today).unwrap();
        assert_eq!((b.start, b.end, b.name.as_deref()), (d(2025, 3, 3), d(2025, 3, 5), Some("Design")));
        let b = parse_block_arg("today:in 2d", today).unwrap();
        assert_eq!((b.start, b.end, b.name), (today, d(2025, 3, 12), None));
        assert!(parse_block_arg("2025-03-03", today).is_err());
    }

    #[test]
    fn test_task_lookup_by_title_respects_scope() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let mine = fx.task("Ledger", None, None, &[ana]);
        fx.task("Payroll", None, None, &[bo]);
        let dir = TempDir::new().unwrap();
        let s = session(fx, ana, &dir);
        assert_eq!(s.task_id("ledger").unwrap(), mine);
        assert_eq!(s.task_id(&mine.to_string()).unwrap(), mine);
        assert!(matches!(s.task_id("Payroll"), Err(BacklogError::NotFound { .. })));
    }

    #[test]
    fn test_commands_persist_changes() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let dir = TempDir::new().unwrap();
        let mut s = session(fx, admin, &dir);

        run(&mut s, Commands::Sprint { action: SprintAction::Add { name: "S1".into(), start: "2025-03-03".into(), end: "2025-03-14".into() } })
            .unwrap();
        run(
            &mut s,
            Commands::Task {
                action: TaskAction::Add {
                    title: "Ledger".into(),
                    desc: None,
                    criteria: None,
                    category: "NUI".into(),
                    state: "new".into(),
                    points: Some(3),
                    epic: None,
                    sprint: Some(1),
                    assignees: vec!["admin".into()],
                    blocks: vec!["2025-03-03:2025-03-05".into()],
                },
            },
        )
        .unwrap();

        let stored = Database::load(&s.db_path).unwrap();
        assert_eq!(stored.tasks.len(), 1);
        assert_eq!(stored.tasks[0].category, Category::NotUrgentImportant);
        assert_eq!(stored.blocks.len(), 1);
    }

    #[test]
    fn test_subtask_edit_clears_responsible_and_score() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let bo = fx.actor("bo", Role::Member);
        let t = fx.task("Ledger", None, None, &[bo]);
        let b = fx.block(t, d(2025, 3, 10), d(2025, 3, 12));
        let st = fx.subtask(b, Some(bo), SubtaskStatus::Pending);
        fx.db.subtask_mut(st).unwrap().score = Some(3);
        let dir = TempDir::new().unwrap();
        let mut s = session(fx, admin, &dir);

        let edit = SubtaskAction::Edit {
            id: st,
            title: None,
            desc: None,
            responsible: None,
            clear_responsible: true,
            status: None,
            score: None,
            clear_score: true,
            start: None,
            end: None,
        };
        run(&mut s, Commands::Subtask { action: edit }).unwrap();
        let stored = s.db.subtask(st).unwrap();
        assert_eq!(stored.responsible_id, None);
        assert_eq!(stored.score, None);
        assert_eq!(stored.title, format!("Subtask {st}"));
    }

    #[test]
    fn test_parse_day_arg() {
        let monday = d(2025, 3, 10);
        let u = parse_day_arg("tue=09:00-13:00", monday).unwrap();
        assert_eq!((u.weekday, u.kind), (Weekday::Tue, AvailabilityKind::Range));
        assert_eq!(u.to, NaiveTime::from_hms_opt(13, 0, 0));
        let u = parse_day_arg("2025-03-14=off,public holiday", monday).unwrap();
        assert_eq!((u.weekday, u.kind, u.notes.as_deref()), (Weekday::Fri, AvailabilityKind::Unavailable, Some("public holiday")));
        assert!(parse_day_arg("2025-03-17=available", monday).is_err());
        assert!(parse_day_arg("mon=sometimes", monday).is_err());
        assert!(parse_day_arg("monday", monday).is_err());
    }

    #[test]
    fn test_availability_set_persists_week() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let dir = TempDir::new().unwrap();
        let mut s = session(fx, ana, &dir);
        let set = AvailabilityAction::Set {
            days: vec!["mon=available".into(), "wed=14:00-18:00,afternoon only".into()],
            week: Some("2025-03-12".into()),
            owner: None,
        };
        run(&mut s, Commands::Availability { action: set }).unwrap();

        let stored = Database::load(&s.db_path).unwrap();
        assert_eq!(stored.availabilities.len(), 1);
        let week = &stored.availabilities[0];
        assert_eq!(week.week_start, d(2025, 3, 10));
        assert_eq!(week.days[2].notes, "afternoon only");
        assert!(matches!(
            run(&mut s, Commands::Availability { action: AvailabilityAction::Team { week: None, role: None } }),
            Err(BacklogError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_close_uses_configured_token() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let t = fx.task("Ledger", None, None, &[ana]);
        let dir = TempDir::new().unwrap();
        let mut s = session(fx, ana, &dir);
        s.config.closure.confirmation_token = "yes".into();

        let close = |token: &str| Commands::Task {
            action: TaskAction::Close { id: t.to_string(), report: Some("report.pdf".into()), confirm: Some(token.into()) },
        };
        assert!(matches!(run(&mut s, close("confirmo")), Err(BacklogError::Closure(_))));
        run(&mut s, close("yes")).unwrap();
        assert!(s.db.task(t).unwrap().completed);
    }
}
