//! Sprints: named date windows that tasks, epics and dailies refer to.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actor::AuthContext;
use crate::db::{next_id, Database};
use crate::error::{BacklogError, Checks, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    pub id: u64,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Sprint {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn label(&self) -> String {
        format!("{} ({} - {})", self.name, self.start, self.end)
    }
}

fn validate(name: &str, start: NaiveDate, end: NaiveDate) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BacklogError::invalid("name", "the sprint name is required"));
    }
    if start > end {
        return Err(BacklogError::invalid("end", "the sprint cannot end before it starts"));
    }
    Ok(())
}

/// Create a sprint. Admin-only.
pub fn create_sprint(db: &mut Database, ctx: &AuthContext, name: &str, start: NaiveDate, end: NaiveDate) -> Result<u64> {
    ctx.require_admin("create sprints")?;
    validate(name, start, end)?;
    let id = next_id(&db.sprints, |s| s.id);
    db.sprints.push(Sprint { id, name: name.trim().to_string(), start, end });
    info!(sprint_id = id, %start, %end, "sprint created");
    Ok(id)
}

/// Edit a sprint. Admin-only; omitted fields are kept. New dates must still hold
/// every block of the sprint's tasks.
pub fn edit_sprint(
    db: &mut Database,
    ctx: &AuthContext,
    id: u64,
    name: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    ctx.require_admin("edit sprints")?;
    let current = db.sprint(id)?;
    let name = name.unwrap_or_else(|| current.name.clone());
    let start = start.unwrap_or(current.start);
    let end = end.unwrap_or(current.end);
    validate(&name, start, end)?;

    let mut checks = Checks::new();
    for task in db.tasks.iter().filter(|t| t.sprint_id == Some(id)) {
        for b in db.task_blocks(task.id) {
            checks.require(
                start <= b.start && b.end <= end,
                "sprint",
                format!("{} of task #{} ({} - {}) falls outside {start} - {end}", b.label(), task.id, b.start, b.end),
            );
        }
    }
    checks.finish()?;

    let sprint = db.sprint_mut(id)?;
    sprint.name = name.trim().to_string();
    sprint.start = start;
    sprint.end = end;
    info!(sprint_id = id, "sprint edited");
    Ok(())
}

/// Delete a sprint, detaching it from tasks, epics and dailies. Admin-only.
pub fn delete_sprint(db: &mut Database, ctx: &AuthContext, id: u64) -> Result<Sprint> {
    ctx.require_admin("delete sprints")?;
    let pos = db.sprints.iter().position(|s| s.id == id).ok_or_else(|| BacklogError::not_found("sprint", id))?;
    let sprint = db.sprints.remove(pos);
    for task in db.tasks.iter_mut().filter(|t| t.sprint_id == Some(id)) {
        task.sprint_id = None;
    }
    for epic in db.epics.iter_mut() {
        epic.sprint_ids.retain(|s| *s != id);
    }
    for daily in db.dailies.iter_mut().filter(|d| d.sprint_id == Some(id)) {
        daily.sprint_id = None;
    }
    info!(sprint_id = id, "sprint deleted");
    Ok(sprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Role;
    use crate::testutil::{d, Fixture};

    #[test]
    fn test_sprint_dates_must_be_ordered() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ctx = fx.ctx(admin);
        assert!(create_sprint(&mut fx.db, &ctx, "S1", d(2025, 3, 10), d(2025, 3, 1)).is_err());
        let id = create_sprint(&mut fx.db, &ctx, "S1", d(2025, 3, 1), d(2025, 3, 14)).unwrap();
        assert!(edit_sprint(&mut fx.db, &ctx, id, None, Some(d(2025, 3, 20)), None).is_err());
        edit_sprint(&mut fx.db, &ctx, id, Some("Sprint 1".into()), None, Some(d(2025, 3, 21))).unwrap();
        let s = fx.db.sprint(id).unwrap();
        assert_eq!(s.name, "Sprint 1");
        assert!(s.contains(d(2025, 3, 21)));
    }

    #[test]
    fn test_shrinking_sprint_cannot_strand_blocks() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let s = fx.sprint(d(2025, 3, 1), d(2025, 3, 14));
        let t = fx.task("T", None, Some(s), &[]);
        fx.block(t, d(2025, 3, 10), d(2025, 3, 12));
        let ctx = fx.ctx(admin);
        match edit_sprint(&mut fx.db, &ctx, s, None, None, Some(d(2025, 3, 5))) {
            Err(BacklogError::Validation(errs)) => {
                assert_eq!(errs.len(), 1);
                assert_eq!(errs[0].field, "sprint");
                assert!(errs[0].message.contains(&format!("task #{t}")));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.db.sprint(s).unwrap().end, d(2025, 3, 14));

        edit_sprint(&mut fx.db, &ctx, s, None, Some(d(2025, 3, 10)), Some(d(2025, 3, 12))).unwrap();
        assert_eq!(fx.db.sprint(s).unwrap().start, d(2025, 3, 10));
    }

    #[test]
    fn test_sprint_management_is_admin_only() {
        let mut fx = Fixture::new();
        let member = fx.actor("member", Role::Member);
        let ctx = fx.ctx(member);
        assert!(matches!(
            create_sprint(&mut fx.db, &ctx, "S", d(2025, 3, 1), d(2025, 3, 2)),
            Err(BacklogError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_delete_sprint_detaches_tasks() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let s = fx.sprint(d(2025, 3, 1), d(2025, 3, 14));
        let t = fx.task("T", None, Some(s), &[]);
        let ctx = fx.ctx(admin);
        delete_sprint(&mut fx.db, &ctx, s).unwrap();
        assert_eq!(fx.db.task(t).unwrap().sprint_id, None);
    }
}
