//! Actors, their role capabilities and the per-invocation authorization context.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::Database;
use crate::error::{BacklogError, Result};
use crate::fields::*;
use crate::project::authorized_projects;

/// A person working in, or looking at, the backlog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: u64,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub superuser: bool,
    pub created_at: NaiveDateTime,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.superuser || self.role.is_administrative()
    }

    pub fn is_visualizer(&self) -> bool {
        self.role.is_visualizer_family()
    }

    /// Administrators hold every capability; everyone else gets their role's set.
    pub fn can(&self, capability: Capability) -> bool {
        self.is_admin() || self.role.capabilities().contains(&capability)
    }

    pub fn can_create_tasks(&self) -> bool {
        self.can(Capability::CreateTasks)
    }

    pub fn can_add_evidence(&self) -> bool {
        self.can(Capability::AddEvidence)
    }

    pub fn can_edit_tasks(&self) -> bool {
        self.can(Capability::EditTasks)
    }
}

/// How much of the backlog an actor can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Administrators see everything.
    All,
    /// Visualizer-family roles see the work of the listed projects.
    Projects(BTreeSet<u64>),
    /// Everyone else sees the work assigned to them.
    Assigned(u64),
}

/// Resolved identity and scope, built once per invocation and passed to every
/// operation that needs to authorize or filter.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: Actor,
    pub scope: Scope,
}

impl AuthContext {
    pub fn new(db: &Database, actor: Actor) -> Self {
        let scope = if actor.is_admin() {
            Scope::All
        } else if actor.is_visualizer() {
            Scope::Projects(authorized_projects(db, &actor))
        } else {
            Scope::Assigned(actor.id)
        };
        AuthContext { actor, scope }
    }

    pub fn actor_id(&self) -> u64 {
        self.actor.id
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.scope, Scope::All)
    }

    /// Visualizer without administrative rights.
    pub fn is_visualizer(&self) -> bool {
        matches!(self.scope, Scope::Projects(_))
    }

    /// Admins and visualizers may filter listings by person.
    pub fn can_filter_people(&self) -> bool {
        !matches!(self.scope, Scope::Assigned(_))
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.actor.can(capability)
    }

    pub fn require_admin(&self, action: &str) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            tracing::warn!(actor = %self.actor.username, action, "admin-only action refused");
            Err(BacklogError::denied(format!("only administrators can {action}")))
        }
    }
}

/// Create the first administrator of an empty store.
pub fn bootstrap_admin(db: &mut Database, username: &str, display_name: &str, now: NaiveDateTime) -> Result<u64> {
    if !db.actors.is_empty() {
        return Err(BacklogError::Conflict("the store already has actors; ask an administrator".into()));
    }
    let username = normalise_username(username)?;
    let id = db.insert_actor(&username, display_name, Role::ScrumMasterPo, true, now);
    info!(actor = %username, "bootstrapped administrator");
    Ok(id)
}

/// Register a new actor. Admin-only.
pub fn add_actor(
    db: &mut Database,
    ctx: &AuthContext,
    username: &str,
    display_name: &str,
    role: Role,
    now: NaiveDateTime,
) -> Result<u64> {
    ctx.require_admin("register people")?;
    let username = normalise_username(username)?;
    if db.actor_by_username(&username).is_ok() {
        return Err(BacklogError::Conflict(format!("username '{username}' is already taken")));
    }
    let id = db.insert_actor(&username, display_name, role, false, now);
    info!(actor = %username, role = ?role, by = %ctx.actor.username, "actor added");
    Ok(id)
}

/// Change an actor's role. Admin-only.
pub fn set_role(db: &mut Database, ctx: &AuthContext, actor_id: u64, role: Role) -> Result<()> {
    ctx.require_admin("change roles")?;
    let actor = db.actor_mut(actor_id)?;
    let previous = actor.role;
    actor.role = role;
    info!(actor = %actor.username, from = ?previous, to = ?role, "role changed");
    Ok(())
}

/// Trim and lowercase a username; it must be non-empty and free of whitespace.
pub fn normalise_username(raw: &str) -> Result<String> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(BacklogError::invalid("username", "username cannot be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(BacklogError::invalid("username", "username cannot contain spaces"));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Fixture;

    #[test]
    fn test_admin_roles_hold_every_capability() {
        let mut fx = Fixture::new();
        for role in [Role::ScrumMasterPo, Role::ArchitectDirector, Role::HrCoordinator] {
            let id = fx.actor(&format!("{role:?}").to_lowercase(), role);
            let actor = fx.db.actor(id).unwrap();
            assert!(actor.is_admin());
            assert!(actor.can_create_tasks() && actor.can_add_evidence() && actor.can_edit_tasks());
        }
    }

    #[test]
    fn test_superuser_flag_makes_admin() {
        let mut fx = Fixture::new();
        let id = fx.actor("root", Role::Member);
        fx.db.actor_mut(id).unwrap().superuser = true;
        let ctx = fx.ctx(id);
        assert!(ctx.is_admin());
        assert!(ctx.can(Capability::EditTasks));
    }

    #[test]
    fn test_static_map_for_operational_roles() {
        let mut fx = Fixture::new();
        let lead = fx.actor("lead", Role::DatabaseLead);
        let front = fx.actor("front", Role::FrontendDeveloper);
        assert!(fx.db.actor(lead).unwrap().can_create_tasks());
        assert!(!fx.db.actor(lead).unwrap().is_admin());
        assert!(!fx.db.actor(front).unwrap().can_add_evidence());
    }

    #[test]
    fn test_context_scope_by_role() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let viewer = fx.actor("viewer", Role::ProductOwner);
        let member = fx.actor("member", Role::Member);
        assert_eq!(fx.ctx(admin).scope, Scope::All);
        assert_eq!(fx.ctx(viewer).scope, Scope::Projects(BTreeSet::new()));
        assert_eq!(fx.ctx(member).scope, Scope::Assigned(member));
        assert!(fx.ctx(viewer).can_filter_people());
        assert!(!fx.ctx(member).can_filter_people());
    }

    #[test]
    fn test_bootstrap_only_on_empty_store() {
        let mut fx = Fixture::new();
        let id = bootstrap_admin(&mut fx.db, "Boss", "The Boss", fx.now).unwrap();
        assert!(fx.db.actor(id).unwrap().is_admin());
        assert_eq!(fx.db.actor(id).unwrap().username, "boss");
        assert!(matches!(bootstrap_admin(&mut fx.db, "other", "", fx.now), Err(BacklogError::Conflict(_))));
    }

    #[test]
    fn test_role_change_is_admin_only() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::HrCoordinator);
        let member = fx.actor("member", Role::Member);
        let ctx = fx.ctx(member);
        assert!(matches!(set_role(&mut fx.db, &ctx, member, Role::ScrumMasterPo), Err(BacklogError::PermissionDenied(_))));
        let ctx = fx.ctx(admin);
        set_role(&mut fx.db, &ctx, member, Role::Visualizer).unwrap();
        assert_eq!(fx.db.actor(member).unwrap().role, Role::Visualizer);
    }

    #[test]
    fn test_add_actor_rejects_duplicates() {
        let mut fx = Fixture::new();
        let admin = fx.actor("admin", Role::ScrumMasterPo);
        let ctx = fx.ctx(admin);
        add_actor(&mut fx.db, &ctx, "laura", "Laura", Role::Accounting, fx.now).unwrap();
        let err = add_actor(&mut fx.db, &ctx, " Laura ", "Laura R", Role::Member, fx.now).unwrap_err();
        assert!(matches!(err, BacklogError::Conflict(_)));
        assert!(normalise_username("two words").is_err());
    }
}
