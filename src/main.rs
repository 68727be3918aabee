//! # bk - Team Backlog CLI
//!
//! A command-line backlog manager for small teams: projects, epics, tasks broken into
//! time-boxed blocks and subtasks, sprints, and daily standups, with a kanban board TUI.
//!
//! ## Key Features
//!
//! - **Role-scoped visibility**: administrators see everything, visualizers see the
//!   projects granted to them, everyone else sees the work assigned to them
//! - **Task workflow**: New, In Progress, Completed and Blocked on a kanban board, plus a
//!   stricter closure step that needs a report and an explicit confirmation
//! - **Breakdown**: blocks that must fit the sprint and never overlap, each holding
//!   subtasks with a responsible person and an effort score
//! - **Daily standups**: one per person per day, a registration window, and an alignment
//!   score telling how much of the reported work matches what was assigned
//! - **Weekly availability**: who can work which days of the week, and between
//!   which hours, with a team grid for administrators
//! - **Eisenhower matrix**: every task sits in one of four urgency/importance quadrants
//!
//! ## Quick Start
//!
//! ```bash
//! # Create the store and its first administrator
//! bk init --admin ana
//!
//! # Plan a sprint and a task with one block
//! bk --as ana sprint add "Sprint 12" --start 2025-03-03 --end 2025-03-14
//! bk --as ana task add "Ledger export" --sprint 1 --assign bo --block 2025-03-03:2025-03-05:Design
//!
//! # Work on it
//! bk --as bo task state "Ledger export" in-progress --note "starting with the schema"
//! bk --as bo daily submit --yesterday "reviews" --today "ledger schema"
//! bk --as bo task close "Ledger export" --report reports/ledger.pdf --confirm confirmo
//!
//! # Look at the board
//! bk --as ana board
//! ```
//!
//! ## Identity
//!
//! Every command runs as the user named by `--as` (or `BACKLOG_USER`, then `USER`).
//! Unknown users are registered as members the first time they show up.
//!
//! Data is stored in `~/.backlog/backlog.json` unless `--db` points elsewhere. An
//! optional `backlog.toml` next to it tunes the daily window and the closure token.

use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod actor;
pub mod availability;
pub mod breakdown;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod daily;
pub mod db;
pub mod epic;
pub mod error;
pub mod evidence;
pub mod fields;
pub mod project;
pub mod report;
pub mod sprint;
pub mod task;
pub mod visibility;
pub mod workflow;
#[cfg(test)]
mod testutil;
pub mod tui {
    pub mod board;
    pub mod board_run;
    pub mod colors;
}

use actor::AuthContext;
use cli::{Cli, Commands};
use cmd::*;
use config::Config;
use db::Database;
use error::{BacklogError, Result};

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return Ok(());
    }

    let db_path = match cli.db {
        Some(path) => path,
        None => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            let dir = PathBuf::from(home).join(".backlog");
            std::fs::create_dir_all(&dir)?;
            dir.join("backlog.json")
        }
    };
    let config_path = cli
        .config
        .unwrap_or_else(|| db_path.parent().unwrap_or_else(|| std::path::Path::new(".")).join("backlog.toml"));
    let config = Config::load(&config_path)?;
    let mut db = Database::load(&db_path)?;
    let now = Local::now().naive_local();

    if let Commands::Init { admin, name } = &cli.command {
        return cmd_init(&mut db, &db_path, admin, name.as_deref(), now);
    }

    let username = cli
        .user
        .or_else(|| std::env::var("USER").ok())
        .ok_or_else(|| BacklogError::invalid("user", "no user given; pass --as or set BACKLOG_USER"))?;
    let (actor, created) = db.resolve_actor(&username, now)?;
    if created {
        db.save(&db_path)?;
    }
    let ctx = AuthContext::new(&db, actor);

    let mut session = Session { db, db_path, ctx, config, now };
    cmd::run(&mut session, cli.command)
}
