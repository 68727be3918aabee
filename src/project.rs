//! Projects and the grants that scope visualizer-family roles.
//!
//! Administrators see every project. Visualizer-family actors see the active projects
//! they hold an active grant for. Everyone else is scoped by task assignment and never
//! consults grants.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actor::{Actor, AuthContext};
use crate::db::{next_id, Database};
use crate::error::{BacklogError, Result};

/// A product line or client engagement that groups epics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    /// Short upper-case identifier, unique.
    pub code: String,
    pub name: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

/// Authorizes a visualizer-family actor on one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectGrant {
    pub actor_id: u64,
    pub project_id: u64,
    pub active: bool,
}

/// Projects an actor may see through the project scope.
pub fn authorized_projects(db: &Database, actor: &Actor) -> BTreeSet<u64> {
    if actor.is_admin() {
        return db.projects.iter().map(|p| p.id).collect();
    }
    if !actor.is_visualizer() {
        return BTreeSet::new();
    }
    db.grants
        .iter()
        .filter(|g| g.actor_id == actor.id && g.active)
        .filter_map(|g| db.project(g.project_id).ok())
        .filter(|p| p.active)
        .map(|p| p.id)
        .collect()
}

/// Trim and upper-case a project code.
pub fn normalise_code(raw: &str) -> Result<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(BacklogError::invalid("code", "the project code is required"));
    }
    Ok(code)
}

/// Create a project. Admin-only.
pub fn create_project(db: &mut Database, ctx: &AuthContext, code: &str, name: &str, now: NaiveDateTime) -> Result<u64> {
    ctx.require_admin("create projects")?;
    let code = normalise_code(code)?;
    if name.trim().is_empty() {
        return Err(BacklogError::invalid("name", "the project name is required"));
    }
    if db.project_by_code(&code).is_ok() {
        return Err(BacklogError::Conflict(format!("project code '{code}' already exists")));
    }
    let id = next_id(&db.projects, |p| p.id);
    db.projects.push(Project { id, code: code.clone(), name: name.trim().to_string(), active: true, created_at: now });
    info!(project = %code, "project created");
    Ok(id)
}

/// Activate or deactivate a project. Admin-only.
pub fn set_project_active(db: &mut Database, ctx: &AuthContext, project_id: u64, active: bool) -> Result<()> {
    ctx.require_admin("change project status")?;
    let project = db
        .projects
        .iter_mut()
        .find(|p| p.id == project_id)
        .ok_or_else(|| BacklogError::not_found("project", project_id))?;
    project.active = active;
    info!(project = %project.code, active, "project status changed");
    Ok(())
}

/// Grant or revoke a visualizer-family actor's access to a project. Admin-only.
/// A second grant for the same pair updates the existing one. Returns whether a
/// new grant row was created.
pub fn grant_project(db: &mut Database, ctx: &AuthContext, actor_id: u64, project_id: u64, active: bool) -> Result<bool> {
    ctx.require_admin("manage project grants")?;
    let actor = db.actor(actor_id)?;
    if !actor.is_visualizer() {
        return Err(BacklogError::invalid(
            "actor",
            format!("{} is not a visualizer or product owner; grants only apply to those roles", actor.display_name),
        ));
    }
    db.project(project_id)?;

    if let Some(existing) = db.grants.iter_mut().find(|g| g.actor_id == actor_id && g.project_id == project_id) {
        existing.active = active;
        info!(actor_id, project_id, active, "project grant updated");
        return Ok(false);
    }
    db.grants.push(ProjectGrant { actor_id, project_id, active });
    info!(actor_id, project_id, active, "project grant created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Role;
    use crate::testutil::Fixture;

    #[test]
    fn test_visualizer_without_grants_sees_nothing() {
        let mut fx = Fixture::new();
        fx.project("NEUCONTA");
        let viewer = fx.actor("viewer", Role::Visualizer);
        let actor = fx.db.actor(viewer).unwrap().clone();
        assert!(authorized_projects(&fx.db, &actor).is_empty());
    }

    #[test]
    fn test_visualizer_sees_active_granted_active_projects() {
        let mut fx = Fixture::new();
        let p1 = fx.project("CPS");
        let p2 = fx.project("JURIDICO");
        let p3 = fx.project("OLD");
        let viewer = fx.actor("viewer", Role::ProductOwner);
        fx.grant(viewer, p1);
        fx.grant(viewer, p3);
        fx.db.grants.push(ProjectGrant { actor_id: viewer, project_id: p2, active: false });
        fx.db.projects.iter_mut().find(|p| p.id == p3).unwrap().active = false;

        let actor = fx.db.actor(viewer).unwrap().clone();
        assert_eq!(authorized_projects(&fx.db, &actor), BTreeSet::from([p1]));
    }

    #[test]
    fn test_admin_sees_all_and_member_none() {
        let mut fx = Fixture::new();
        let p1 = fx.project("A");
        let p2 = fx.project("B");
        let admin = fx.actor("admin", Role::ArchitectDirector);
        let member = fx.actor("member", Role::BiAnalyst);
        fx.db.grants.push(ProjectGrant { actor_id: member, project_id: p1, active: true });
        let a = fx.db.actor(admin).unwrap().clone();
        let m = fx.db.actor(member).unwrap().clone();
        assert_eq!(authorized_projects(&fx.db, &a), BTreeSet::from([p1, p2]));
        assert!(authorized_projects(&fx.db, &m).is_empty());
    }

    #[test]
    fn test_create_project_normalises_and_rejects_duplicates() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ctx = fx.ctx(admin);
        let id = create_project(&mut fx.db, &ctx, " neuconta ", "Contabilidad", fx.now).unwrap();
        assert_eq!(fx.db.project(id).unwrap().code, "NEUCONTA");
        assert!(matches!(
            create_project(&mut fx.db, &ctx, "NEUCONTA", "Again", fx.now),
            Err(BacklogError::Conflict(_))
        ));
        assert!(create_project(&mut fx.db, &ctx, "  ", "Blank", fx.now).is_err());
    }

    #[test]
    fn test_grant_is_unique_per_pair_and_only_for_visualizers() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let viewer = fx.actor("viewer", Role::Visualizer);
        let member = fx.actor("member", Role::Member);
        let p = fx.project("CPS");
        let ctx = fx.ctx(admin);

        assert!(grant_project(&mut fx.db, &ctx, viewer, p, true).unwrap());
        assert!(!grant_project(&mut fx.db, &ctx, viewer, p, false).unwrap());
        assert_eq!(fx.db.grants.len(), 1);
        assert!(!fx.db.grants[0].active);
        assert!(matches!(grant_project(&mut fx.db, &ctx, member, p, true), Err(BacklogError::Validation(_))));

        let member_ctx = fx.ctx(member);
        assert!(matches!(
            grant_project(&mut fx.db, &member_ctx, viewer, p, true),
            Err(BacklogError::PermissionDenied(_))
        ));
    }
}
