//! Weekly availability: for every person and ISO week, which days they can work
//! and between which hours.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::actor::{Actor, AuthContext};
use crate::db::{next_id, start_end_of_week, Database};
use crate::error::{BacklogError, Checks, Result};
use crate::fields::{AvailabilityKind, Role};
use crate::visibility::visible_members;

/// One person's week, keyed by the Monday it starts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    pub id: u64,
    pub actor_id: u64,
    pub week_start: NaiveDate,
    /// Always seven entries, Monday first.
    pub days: Vec<DayAvailability>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub weekday: Weekday,
    #[serde(default)]
    pub kind: AvailabilityKind,
    /// Set only for `Range`.
    pub from: Option<NaiveTime>,
    pub to: Option<NaiveTime>,
    #[serde(default)]
    pub notes: String,
}

impl DayAvailability {
    fn unavailable(weekday: Weekday) -> Self {
        DayAvailability { weekday, kind: AvailabilityKind::Unavailable, from: None, to: None, notes: String::new() }
    }

    /// Compact cell for the team grid.
    pub fn short(&self) -> String {
        match (self.kind, self.from, self.to) {
            (AvailabilityKind::Available, ..) => "Yes".into(),
            (AvailabilityKind::Unavailable, ..) => "No".into(),
            (AvailabilityKind::Range, Some(from), Some(to)) => format!("{}-{}", from.format("%H:%M"), to.format("%H:%M")),
            (AvailabilityKind::Range, ..) => "Range".into(),
        }
    }

    pub fn long(&self) -> String {
        match (self.kind, self.from, self.to) {
            (AvailabilityKind::Range, Some(from), Some(to)) => {
                format!("Available from {} to {}", from.format("%H:%M"), to.format("%H:%M"))
            }
            (kind, ..) => kind.label().to_string(),
        }
    }
}

/// A change to one day of a week.
#[derive(Debug, Clone)]
pub struct DayUpdate {
    pub weekday: Weekday,
    pub kind: AvailabilityKind,
    pub from: Option<NaiveTime>,
    pub to: Option<NaiveTime>,
    pub notes: Option<String>,
}

/// Monday of the week holding `date`.
pub fn week_of(date: NaiveDate) -> NaiveDate {
    start_end_of_week(date).0
}

pub const WEEKDAYS: [Weekday; 7] =
    [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri, Weekday::Sat, Weekday::Sun];

fn empty_week() -> Vec<DayAvailability> {
    WEEKDAYS.into_iter().map(DayAvailability::unavailable).collect()
}

fn stored_week(db: &Database, actor_id: u64, week_start: NaiveDate) -> Option<&WeeklyAvailability> {
    db.availabilities.iter().find(|w| w.actor_id == actor_id && w.week_start == week_start)
}

/// The seven days of a person's week. Weeks nobody filled in read as unavailable.
pub fn days_of(db: &Database, actor_id: u64, week_start: NaiveDate) -> Vec<DayAvailability> {
    let mut days = empty_week();
    if let Some(w) = stored_week(db, actor_id, week_start) {
        for d in &w.days {
            days[d.weekday.num_days_from_monday() as usize] = d.clone();
        }
    }
    days
}

fn validate_updates(updates: &[DayUpdate]) -> Result<()> {
    let mut checks = Checks::new();
    let mut seen = BTreeSet::new();
    for u in updates {
        let day = u.weekday.num_days_from_monday();
        checks.require(seen.insert(day), "day", format!("{} is given more than once", u.weekday));
        if u.kind == AvailabilityKind::Range {
            match (u.from, u.to) {
                (Some(from), Some(to)) => checks.require(
                    from < to,
                    "hours",
                    format!("{}: the range must start before it ends", u.weekday),
                ),
                _ => checks.require(false, "hours", format!("{}: a range needs a start and an end hour", u.weekday)),
            }
        }
        if let Some(notes) = &u.notes {
            checks.require(notes.chars().count() <= 255, "notes", format!("{}: notes are limited to 255 characters", u.weekday));
        }
    }
    checks.finish()
}

/// Record availability for the week holding `week`. Callers fill in their own week;
/// administrators may fill in anyone's. Days not mentioned keep their value, and
/// nothing is stored when any day is invalid.
pub fn set_availability(
    db: &mut Database,
    ctx: &AuthContext,
    owner: Option<u64>,
    week: NaiveDate,
    updates: Vec<DayUpdate>,
    now: NaiveDateTime,
) -> Result<u64> {
    let owner = owner.unwrap_or(ctx.actor_id());
    if owner != ctx.actor_id() && !ctx.is_admin() {
        warn!(actor = %ctx.actor.username, owner, "availability for another person refused");
        return Err(BacklogError::denied("you can only record your own availability"));
    }
    db.actor(owner)?;
    validate_updates(&updates)?;

    let week_start = week_of(week);
    let mut days = days_of(db, owner, week_start);
    for u in updates {
        let day = &mut days[u.weekday.num_days_from_monday() as usize];
        day.kind = u.kind;
        (day.from, day.to) = match u.kind {
            AvailabilityKind::Range => (u.from, u.to),
            _ => (None, None),
        };
        if let Some(notes) = u.notes {
            day.notes = notes.trim().to_string();
        }
    }

    let id = match db.availabilities.iter_mut().find(|w| w.actor_id == owner && w.week_start == week_start) {
        Some(w) => {
            w.days = days;
            w.updated_at = now;
            w.id
        }
        None => {
            let id = next_id(&db.availabilities, |w| w.id);
            db.availabilities.push(WeeklyAvailability { id, actor_id: owner, week_start, days, created_at: now, updated_at: now });
            id
        }
    };
    info!(availability_id = id, owner, %week_start, by = %ctx.actor.username, "availability recorded");
    Ok(id)
}

/// Read one person's week. Anyone may read their own; administrators and
/// visualizers may read the people they can see.
pub fn week_availability(db: &Database, ctx: &AuthContext, actor_id: u64, week: NaiveDate) -> Result<Vec<DayAvailability>> {
    db.actor(actor_id)?;
    if actor_id != ctx.actor_id() && !visible_members(db, ctx).iter().any(|a| a.id == actor_id) {
        return Err(BacklogError::denied("you cannot see this person's availability"));
    }
    Ok(days_of(db, actor_id, week_of(week)))
}

/// One row of the team grid.
#[derive(Debug, Clone)]
pub struct TeamRow<'a> {
    pub actor: &'a Actor,
    pub days: Vec<DayAvailability>,
}

/// The week of everyone the caller can see, ordered by name, optionally narrowed to
/// one role. Administrators and visualizers only.
pub fn team_availability<'a>(
    db: &'a Database,
    ctx: &AuthContext,
    week: NaiveDate,
    role: Option<Role>,
) -> Result<Vec<TeamRow<'a>>> {
    if !ctx.can_filter_people() {
        warn!(actor = %ctx.actor.username, "team availability refused");
        return Err(BacklogError::denied("only administrators and visualizers can see the team's availability"));
    }
    let week_start = week_of(week);
    Ok(visible_members(db, ctx)
        .into_iter()
        .filter(|a| role.map_or(true, |r| a.role == r))
        .map(|actor| TeamRow { actor, days: days_of(db, actor.id, week_start) })
        .collect())
}
