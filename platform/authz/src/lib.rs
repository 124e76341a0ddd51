//! Authorization policy for projects and tasks.
//!
//! The engine is pure: callers look up membership facts and hand them in, the
//! engine answers allow/deny. ADMIN short-circuits every check.

use entity::users::Role;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("action {action} denied for resource {resource}")]
    Denied { action: String, resource: String },
}

impl AuthzError {
    fn denied(action: &str, resource: &str) -> Self {
        Self::Denied {
            action: action.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// Authenticated caller as seen by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// ADMIN or PM.
    pub fn is_elevated(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Pm)
    }
}

/// Which rule decides who may administer a project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProjectPolicy {
    /// ADMIN, or a member whose `is_manager` bit is set.
    #[default]
    ManagerOrAdmin,
    /// ADMIN, or the user that created the project.
    OwnerOrAdmin,
}

impl ProjectPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" | "manager_or_admin" => Some(Self::ManagerOrAdmin),
            "owner" | "owner_or_admin" => Some(Self::OwnerOrAdmin),
            _ => None,
        }
    }
}

/// Per-project facts about the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProjectFacts {
    pub is_member: bool,
    pub is_manager: bool,
    pub is_owner: bool,
}

/// How much of a task the caller may change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditScope {
    Full,
    /// Only status and priority.
    AssigneeOnly,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyEngine {
    policy: ProjectPolicy,
}

impl PolicyEngine {
    pub fn new(policy: ProjectPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ProjectPolicy {
        self.policy
    }

    pub fn require_admin(&self, principal: &Principal, action: &str) -> Result<(), AuthzError> {
        if principal.is_admin() {
            Ok(())
        } else {
            Err(AuthzError::denied(action, "users"))
        }
    }

    pub fn can_view_project(
        &self,
        principal: &Principal,
        facts: ProjectFacts,
    ) -> Result<(), AuthzError> {
        if principal.is_admin() || facts.is_member {
            Ok(())
        } else {
            Err(AuthzError::denied("read", "project"))
        }
    }

    pub fn can_manage_project(
        &self,
        principal: &Principal,
        facts: ProjectFacts,
    ) -> Result<(), AuthzError> {
        if principal.is_admin() {
            return Ok(());
        }
        let allowed = match self.policy {
            ProjectPolicy::ManagerOrAdmin => facts.is_member && facts.is_manager,
            ProjectPolicy::OwnerOrAdmin => facts.is_owner,
        };
        if allowed {
            Ok(())
        } else {
            Err(AuthzError::denied("manage", "project"))
        }
    }

    pub fn can_create_project(&self, principal: &Principal) -> Result<(), AuthzError> {
        if principal.is_elevated() {
            Ok(())
        } else {
            Err(AuthzError::denied("create", "project"))
        }
    }

    /// ADMIN anywhere; PM inside projects they belong to.
    pub fn can_create_task(
        &self,
        principal: &Principal,
        facts: ProjectFacts,
    ) -> Result<(), AuthzError> {
        match principal.role {
            Role::Admin => Ok(()),
            Role::Pm if facts.is_member => Ok(()),
            _ => Err(AuthzError::denied("create", "task")),
        }
    }

    pub fn task_edit_scope(
        &self,
        principal: &Principal,
        is_assignee: bool,
    ) -> Result<EditScope, AuthzError> {
        if principal.is_elevated() {
            Ok(EditScope::Full)
        } else if is_assignee {
            Ok(EditScope::AssigneeOnly)
        } else {
            Err(AuthzError::denied("update", "task"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal::new(Uuid::new_v4(), role)
    }

    #[test]
    fn admin_bypasses_membership() {
        let engine = PolicyEngine::default();
        let admin = principal(Role::Admin);
        let none = ProjectFacts::default();
        assert!(engine.can_view_project(&admin, none).is_ok());
        assert!(engine.can_manage_project(&admin, none).is_ok());
        assert!(engine.can_create_task(&admin, none).is_ok());
    }

    #[test]
    fn manager_policy_needs_manager_bit() {
        let engine = PolicyEngine::new(ProjectPolicy::ManagerOrAdmin);
        let pm = principal(Role::Pm);
        let owner_only = ProjectFacts {
            is_member: true,
            is_manager: false,
            is_owner: true,
        };
        assert!(engine.can_manage_project(&pm, owner_only).is_err());
        let manager = ProjectFacts {
            is_member: true,
            is_manager: true,
            is_owner: false,
        };
        assert!(engine.can_manage_project(&pm, manager).is_ok());
    }

    #[test]
    fn owner_policy_ignores_manager_bit() {
        let engine = PolicyEngine::new(ProjectPolicy::OwnerOrAdmin);
        let pm = principal(Role::Pm);
        let manager = ProjectFacts {
            is_member: true,
            is_manager: true,
            is_owner: false,
        };
        assert!(engine.can_manage_project(&pm, manager).is_err());
        let owner = ProjectFacts {
            is_owner: true,
            ..ProjectFacts::default()
        };
        assert!(engine.can_manage_project(&pm, owner).is_ok());
    }

    #[test]
    fn members_cannot_create_tasks() {
        let engine = PolicyEngine::default();
        let member = principal(Role::Member);
        let facts = ProjectFacts {
            is_member: true,
            ..ProjectFacts::default()
        };
        assert!(engine.can_create_task(&member, facts).is_err());
        assert!(engine.can_create_task(&principal(Role::Pm), facts).is_ok());
        assert!(
            engine
                .can_create_task(&principal(Role::Pm), ProjectFacts::default())
                .is_err()
        );
    }

    #[test]
    fn edit_scope_by_role_and_assignment() {
        let engine = PolicyEngine::default();
        assert_eq!(
            engine.task_edit_scope(&principal(Role::Pm), false),
            Ok(EditScope::Full)
        );
        assert_eq!(
            engine.task_edit_scope(&principal(Role::Member), true),
            Ok(EditScope::AssigneeOnly)
        );
        assert!(engine.task_edit_scope(&principal(Role::Member), false).is_err());
    }

    #[test]
    fn policy_parses_config_values() {
        assert_eq!(ProjectPolicy::parse("owner"), Some(ProjectPolicy::OwnerOrAdmin));
        assert_eq!(
            ProjectPolicy::parse(" Manager "),
            Some(ProjectPolicy::ManagerOrAdmin)
        );
        assert_eq!(ProjectPolicy::parse("anyone"), None);
    }
}
