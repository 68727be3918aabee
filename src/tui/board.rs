//! Kanban board over the visible tasks.
//!
//! Tasks are organised into four columns by workflow state. Moving a card goes through
//! the same change-state operation as the CLI, so the permission rules are identical:
//! cards you are not responsible for stay put and the refusal shows in the status bar.

use std::io;
use std::time::Duration;

use chrono::Local;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame, Terminal,
};

use crate::cmd::Session;
use crate::fields::{OpenFilter, TaskState};
use crate::task::Task;
use crate::tui::colors::{category_color, state_color, DARK_PURPLE, GOLD};
use crate::visibility::{filter_tasks, visible_members, TaskFilter};
use crate::workflow::{change_category, change_state};

const COLUMN_STATES: [TaskState; 4] = TaskState::BOARD;

/// Column a task is shown in. Legacy approved tasks sit with the new ones.
pub fn column_of(state: TaskState) -> usize {
    match state {
        TaskState::New | TaskState::Approved => 0,
        TaskState::InProgress => 1,
        TaskState::Completed => 2,
        TaskState::Blocked => 3,
    }
}

/// Board state. Borrows the session so moves are saved to the same store.
pub struct BoardApp<'a> {
    session: &'a mut Session,
    selected_column: usize,
    selected_card: usize,
    column_scroll_offsets: [usize; 4],
    status_message: String,
    show_task_detail: bool,
    show_completed: bool,
    filter_active: bool,
    filter_text: String,
    /// Person filter, cycled through the visible members.
    person: Option<u64>,
    columns: [Vec<u64>; 4],
}

impl<'a> BoardApp<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        let mut app = BoardApp {
            session,
            selected_column: 0,
            selected_card: 0,
            column_scroll_offsets: [0; 4],
            status_message: String::new(),
            show_task_detail: false,
            show_completed: true,
            filter_active: false,
            filter_text: String::new(),
            person: None,
            columns: Default::default(),
        };
        app.update_columns();
        app
    }

    /// Rebuild the columns from the visible tasks and the active filters.
    fn update_columns(&mut self) {
        for (i, column) in self.columns.iter_mut().enumerate() {
            column.clear();
            self.column_scroll_offsets[i] = 0;
        }

        let filter = TaskFilter {
            person: self.person,
            open: if self.show_completed { OpenFilter::All } else { OpenFilter::Open },
            ..TaskFilter::default()
        };
        let needle = self.filter_text.to_lowercase();
        let s = &*self.session;
        for task in filter_tasks(&s.db, &s.ctx, &filter) {
            if !needle.is_empty() && !matches_text(s, task, &needle) {
                continue;
            }
            self.columns[column_of(task.state)].push(task.id);
        }
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        if self.selected_column >= self.columns.len() {
            self.selected_column = 0;
        }
        let column_len = self.columns[self.selected_column].len();
        if column_len == 0 {
            self.selected_card = 0;
        } else if self.selected_card >= column_len {
            self.selected_card = column_len - 1;
        }
    }

    fn selected_task_id(&self) -> Option<u64> {
        self.columns[self.selected_column].get(self.selected_card).copied()
    }

    fn save(&mut self) {
        if let Err(e) = self.session.save() {
            self.status_message = format!("Error saving: {e}");
        }
    }

    /// Move the selected card one column left or right.
    fn move_card(&mut self, right: bool) {
        let Some(task_id) = self.selected_task_id() else { return };
        let target = if right {
            if self.selected_column + 1 >= COLUMN_STATES.len() {
                return;
            }
            self.selected_column + 1
        } else {
            if self.selected_column == 0 {
                return;
            }
            self.selected_column - 1
        };
        let state = COLUMN_STATES[target];
        let now = Local::now().naive_local();
        let s = &mut *self.session;
        match change_state(&mut s.db, &s.ctx, task_id, state, None, now) {
            Ok(_) => {
                self.save();
                self.update_columns();
                self.selected_column = target;
                match self.columns[target].iter().position(|&id| id == task_id) {
                    Some(pos) => self.selected_card = pos,
                    None => self.clamp_selection(),
                }
                if self.status_message.is_empty() {
                    self.status_message = format!("Moved task #{task_id} to {}", state.label());
                }
            }
            Err(e) => self.status_message = e.to_string(),
        }
    }

    fn cycle_category(&mut self) {
        let Some(task_id) = self.selected_task_id() else { return };
        let now = Local::now().naive_local();
        let s = &mut *self.session;
        let next = match s.db.task(task_id) {
            Ok(t) => t.category.next(),
            Err(e) => {
                self.status_message = e.to_string();
                return;
            }
        };
        match change_category(&mut s.db, &s.ctx, task_id, next, now) {
            Ok(_) => {
                self.save();
                if self.status_message.is_empty() {
                    self.status_message = format!("Task #{task_id} is now {}", next.label());
                }
            }
            Err(e) => self.status_message = e.to_string(),
        }
    }

    /// Step the person filter through the visible members, then back to everyone.
    fn cycle_person(&mut self) {
        let s = &*self.session;
        if !s.ctx.can_filter_people() {
            self.status_message = "Person filter is only available to administrators and visualizers".into();
            return;
        }
        let members: Vec<(u64, String)> =
            visible_members(&s.db, &s.ctx).into_iter().map(|a| (a.id, a.display_name.clone())).collect();
        let next = match self.person.and_then(|p| members.iter().position(|(id, _)| *id == p)) {
            None if self.person.is_none() => members.first(),
            None => None,
            Some(i) => members.get(i + 1),
        };
        self.person = next.map(|(id, _)| *id);
        self.status_message = match next {
            Some((_, name)) => format!("Showing tasks of {name}"),
            None => "Showing everyone".into(),
        };
        self.selected_card = 0;
        self.update_columns();
    }

    /// Apply one key press. Returns true when the board should close.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if self.filter_active {
            match key.code {
                KeyCode::Esc => {
                    self.filter_active = false;
                    self.filter_text.clear();
                    self.update_columns();
                    self.status_message.clear();
                }
                KeyCode::Enter => {
                    self.filter_active = false;
                    let shown: usize = self.columns.iter().map(Vec::len).sum();
                    self.status_message = if self.filter_text.is_empty() {
                        "Filter cleared".into()
                    } else {
                        format!("Filter: '{}' ({shown} tasks shown)", self.filter_text)
                    };
                }
                KeyCode::Backspace => {
                    if self.filter_text.pop().is_some() {
                        self.update_columns();
                    }
                }
                KeyCode::Char(c) => {
                    self.filter_text.push(c);
                    self.update_columns();
                }
                _ => {}
            }
            return false;
        }

        self.status_message.clear();
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Enter => self.show_task_detail = !self.show_task_detail,
            KeyCode::Left if key.modifiers.contains(KeyModifiers::CONTROL) => self.move_card(false),
            KeyCode::Right if key.modifiers.contains(KeyModifiers::CONTROL) => self.move_card(true),
            KeyCode::Char('<') => self.move_card(false),
            KeyCode::Char('>') => self.move_card(true),
            KeyCode::Left => {
                if self.selected_column > 0 {
                    self.selected_column -= 1;
                    self.clamp_selection();
                }
            }
            KeyCode::Right => {
                if self.selected_column + 1 < self.columns.len() {
                    self.selected_column += 1;
                    self.clamp_selection();
                }
            }
            KeyCode::Up => self.selected_card = self.selected_card.saturating_sub(1),
            KeyCode::Down => {
                let len = self.columns[self.selected_column].len();
                if self.selected_card + 1 < len {
                    self.selected_card += 1;
                }
            }
            KeyCode::Char('c') => self.cycle_category(),
            KeyCode::Char('p') => self.cycle_person(),
            KeyCode::Char('t') => {
                self.show_completed = !self.show_completed;
                self.update_columns();
                self.status_message =
                    if self.show_completed { "Showing completed tasks" } else { "Hiding completed tasks" }.into();
            }
            KeyCode::Char('/') => {
                self.filter_active = true;
                self.status_message = "Filter: type to search title/epic, Enter to apply, Esc to cancel".into();
            }
            KeyCode::Char('h') => {
                self.status_message =
                    "Help: Enter: Details | </>: Move | c: Category | p: Person | t: Toggle done | /: Filter | q: Exit".into();
            }
            _ => {}
        }
        false
    }

    fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
            .split(f.area());

        self.render_header(f, chunks[0]);
        self.render_board(f, chunks[1]);
        self.render_status_bar(f, chunks[2]);
        if self.show_task_detail {
            self.render_task_detail_popup(f);
        }
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let s = &*self.session;
        let person = self.person.map(|p| s.db.actor_name(p)).unwrap_or_else(|| "everyone".into());
        let context = format!("Acting as: {} ({})  Showing: {}", s.ctx.actor.display_name, s.ctx.actor.role.label(), person);
        let header = Paragraph::new(Line::from(vec![
            Span::styled("BACKLOG BOARD", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            Span::styled(context, Style::default().fg(Color::Cyan).add_modifier(Modifier::ITALIC)),
        ]))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
        f.render_widget(header, area);
    }

    fn render_board(&mut self, f: &mut Frame, area: Rect) {
        let layout = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(25); 4])
            .split(area);
        for (i, &column_area) in layout.iter().enumerate() {
            self.render_column(f, column_area, i);
        }
    }

    fn render_column(&mut self, f: &mut Frame, area: Rect, column_index: usize) {
        let is_selected = column_index == self.selected_column;
        let state = COLUMN_STATES[column_index];
        let color = state_color(state);
        let border_style =
            if is_selected { Style::default().fg(color).add_modifier(Modifier::BOLD) } else { Style::default() };
        let title = format!("{} ({})", state.label(), self.columns[column_index].len());
        let block = Block::default().borders(Borders::ALL).title(title).border_style(border_style);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let cards = &self.columns[column_index];
        if cards.is_empty() {
            return;
        }

        let card_height = 5;
        let available_height = inner.height as usize;
        let visible_cards = (available_height / card_height).max(1);
        let scroll_offset = if is_selected {
            let start = self.column_scroll_offsets[column_index];
            let offset = if self.selected_card < start {
                self.selected_card
            } else if self.selected_card >= start + visible_cards {
                self.selected_card + 1 - visible_cards
            } else {
                start
            };
            self.column_scroll_offsets[column_index] = offset;
            offset
        } else {
            self.column_scroll_offsets[column_index]
        };

        let mut current_y = 0;
        let mut rendered = 0;
        for (card_index, &task_id) in cards.iter().enumerate().skip(scroll_offset) {
            if current_y + card_height > available_height {
                break;
            }
            let Ok(task) = self.session.db.task(task_id) else { continue };
            let card_area = Rect { x: inner.x, y: inner.y + current_y as u16, width: inner.width, height: card_height as u16 };
            self.render_card(f, card_area, task, is_selected && card_index == self.selected_card);
            current_y += card_height;
            rendered += 1;
        }

        if scroll_offset > 0 {
            let indicator = Paragraph::new(format!("▲ +{scroll_offset} above")).style(Style::default().fg(Color::Cyan));
            f.render_widget(indicator, Rect { x: inner.x, y: inner.y, width: inner.width, height: 1 });
        }
        let remaining = cards.len().saturating_sub(scroll_offset + rendered);
        if remaining > 0 && inner.height > 0 {
            let indicator = Paragraph::new(format!("▼ +{remaining} below")).style(Style::default().fg(Color::Cyan));
            f.render_widget(indicator, Rect { x: inner.x, y: inner.y + inner.height - 1, width: inner.width, height: 1 });
        }
    }

    fn render_card(&self, f: &mut Frame, area: Rect, task: &Task, is_selected: bool) {
        let db = &self.session.db;
        let style = if is_selected {
            Style::default().bg(state_color(task.state)).fg(if task.state == TaskState::InProgress { Color::Black } else { Color::White }).add_modifier(Modifier::BOLD)
        } else {
            Style::default().bg(Color::DarkGray)
        };

        let mut lines = vec![Line::from(vec![
            Span::raw(format!("#{} ", task.id)),
            Span::styled(task.category.code(), Style::default().fg(category_color(task.category))),
            Span::raw(task.story_points.map(|p| format!(" {p}pt")).unwrap_or_default()),
        ])];
        lines.push(Line::from(crate::db::truncate(&task.title, area.width.saturating_sub(2) as usize)));
        let who = task.legacy_assignee().map(|a| db.actor_name(a)).unwrap_or_else(|| "unassigned".into());
        let extra = task.assignee_ids.len().saturating_sub(1);
        lines.push(Line::from(if extra > 0 { format!("{who} +{extra}") } else { who }));

        let card = Paragraph::new(lines).block(Block::default().borders(Borders::ALL)).style(style).wrap(Wrap { trim: true });
        f.render_widget(card, area);
    }

    fn render_status_bar(&self, f: &mut Frame, area: Rect) {
        let text = if self.filter_active {
            format!("Filter: {} | Type to search, Enter to apply, Esc to cancel", self.filter_text)
        } else if !self.status_message.is_empty() {
            self.status_message.clone()
        } else {
            let total: usize = self.columns.iter().map(Vec::len).sum();
            let done = if self.show_completed { " [+Done]" } else { "" };
            let filter = if self.filter_text.is_empty() { String::new() } else { format!(" [Filter: {}]", self.filter_text) };
            format!("Tasks: {total}{done}{filter} | </>: Move | c: Category | p: Person | /: Filter | h: Help")
        };
        let bar = Paragraph::new(text).style(Style::default().bg(DARK_PURPLE).fg(Color::White)).alignment(Alignment::Left);
        f.render_widget(bar, area);
    }

    fn render_task_detail_popup(&self, f: &mut Frame) {
        let Some(task) = self.selected_task_id().and_then(|id| self.session.db.task(id).ok()) else { return };
        let db = &self.session.db;
        let area = f.area();
        let (w, h) = ((area.width * 80) / 100, (area.height * 80) / 100);
        let popup_area = Rect::new((area.width - w) / 2, (area.height - h) / 2, w, h);
        f.render_widget(Clear, popup_area);

        let assignees: Vec<String> = task.assignee_ids.iter().map(|a| db.actor_name(*a)).collect();
        let mut lines = vec![
            Line::from(Span::styled(format!("Task #{}: {}", task.id, task.title), Style::default().add_modifier(Modifier::BOLD))),
            Line::from(""),
            Line::from(format!("State:        {}", task.state.label())),
            Line::from(format!("Category:     {}", task.category.label())),
            Line::from(format!("Epic:         {}", task.epic_id.and_then(|e| db.epic(e).ok()).map(|e| e.label()).unwrap_or_else(|| "-".into()))),
            Line::from(format!("Sprint:       {}", task.sprint_id.and_then(|sp| db.sprint(sp).ok()).map(|sp| sp.label()).unwrap_or_else(|| "-".into()))),
            Line::from(format!("Assignees:    {}", if assignees.is_empty() { "-".into() } else { assignees.join(", ") })),
            Line::from(""),
            Line::from("Description:"),
            Line::from(if task.description.is_empty() { "-".to_string() } else { task.description.clone() }),
        ];

        let blocks = db.task_blocks(task.id);
        if !blocks.is_empty() {
            lines.push(Line::from(""));
            lines.push(Line::from("Blocks:"));
            for b in blocks {
                let subtasks = db.block_subtasks(b.id);
                let closed = subtasks.iter().filter(|s| s.status == crate::fields::SubtaskStatus::Closed).count();
                lines.push(Line::from(format!("  {} ({} .. {})  {closed}/{} closed", b.label(), b.start, b.end, subtasks.len())));
                for st in subtasks {
                    let who = st.responsible_id.map(|r| db.actor_name(r)).unwrap_or_else(|| "-".into());
                    lines.push(Line::from(format!("    - {} [{}] {who}", st.title, st.status.label())));
                }
            }
        }
        let evidence = db.evidences.iter().filter(|e| e.task_id == task.id).count();
        lines.push(Line::from(""));
        lines.push(Line::from(format!("Evidence entries: {evidence}")));

        let popup = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("Task Details (Press Enter to close)")
                    .title_alignment(Alignment::Center)
                    .border_style(Style::default().fg(GOLD).add_modifier(Modifier::BOLD)),
            )
            .wrap(Wrap { trim: true })
            .style(Style::default().bg(Color::Black));
        f.render_widget(popup, popup_area);
    }

    /// Main event loop
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            terminal.draw(|f| self.render(f))?;
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if self.handle_key(key) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

fn matches_text(s: &Session, task: &Task, needle: &str) -> bool {
    task.title.to_lowercase().contains(needle)
        || task.epic_id.and_then(|e| s.db.epic(e).ok()).is_some_and(|e| e.title.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fields::{Category, Role};
    use crate::testutil::Fixture;
    use tempfile::TempDir;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn session(fx: Fixture, actor: u64, dir: &TempDir) -> Session {
        let ctx = fx.ctx(actor);
        Session { db: fx.db, db_path: dir.path().join("backlog.json"), ctx, config: Config::default(), now: fx.now }
    }

    #[test]
    fn test_columns_follow_state() {
        assert_eq!(column_of(TaskState::Approved), 0);
        assert_eq!(column_of(TaskState::Blocked), 3);
    }

    #[test]
    fn test_move_card_saves_and_follows_card() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let t = fx.task("Ledger", None, None, &[ana]);
        let dir = TempDir::new().unwrap();
        let mut s = session(fx, ana, &dir);
        let mut app = BoardApp::new(&mut s);
        assert_eq!(app.columns[0], vec![t]);

        app.handle_key(key(KeyCode::Char('>')));
        assert_eq!(app.columns[1], vec![t]);
        assert_eq!(app.selected_column, 1);
        app.handle_key(key(KeyCode::Char('c')));
        drop(app);

        assert_eq!(s.db.task(t).unwrap().state, TaskState::InProgress);
        assert_eq!(s.db.task(t).unwrap().category, Category::NotUrgentImportant);
        assert!(s.db_path.exists());
    }

    #[test]
    fn test_refused_move_keeps_card() {
        let mut fx = Fixture::new();
        let ana = fx.actor("ana", Role::Member);
        let viewer = fx.actor("viewer", Role::Visualizer);
        let p = fx.project("CPS");
        fx.grant(viewer, p);
        let e = fx.epic("E", Some(p));
        let t = fx.task("Ledger", Some(e), None, &[ana]);
        let dir = TempDir::new().unwrap();
        let mut s = session(fx, viewer, &dir);
        let mut app = BoardApp::new(&mut s);
        assert_eq!(app.columns[0], vec![t]);

        app.handle_key(key(KeyCode::Char('>')));
        assert_eq!(app.columns[0], vec![t]);
        assert!(app.status_message.contains("permission denied"));
    }

    #[test]
    fn test_filters() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ana = fx.actor("ana", Role::Member);
        let bo = fx.actor("bo", Role::Member);
        let ledger = fx.task("Ledger", None, None, &[ana]);
        let payroll = fx.task("Payroll", None, None, &[bo]);
        fx.db.task_mut(payroll).unwrap().completed = true;
        let dir = TempDir::new().unwrap();
        let mut s = session(fx, admin, &dir);
        let mut app = BoardApp::new(&mut s);
        assert_eq!(app.columns[0].len(), 2);

        app.handle_key(key(KeyCode::Char('t')));
        assert_eq!(app.columns[0], vec![ledger]);
        app.handle_key(key(KeyCode::Char('t')));

        app.handle_key(key(KeyCode::Char('/')));
        for c in "pay".chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.columns[0], vec![payroll]);
        app.handle_key(key(KeyCode::Char('/')));
        app.handle_key(key(KeyCode::Esc));

        // Members sorted by display name: admin, ana, bo.
        app.handle_key(key(KeyCode::Char('p')));
        app.handle_key(key(KeyCode::Char('p')));
        assert_eq!(app.person, Some(ana));
        assert_eq!(app.columns[0], vec![ledger]);
    }
}
