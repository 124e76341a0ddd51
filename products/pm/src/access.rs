//! Storage-backed authorization: loads membership facts and asks the policy engine.

use entity::{attachments, comments, project_members, projects, tasks};
use platform_authz::{EditScope, PolicyEngine, Principal, ProjectFacts};
use sea_orm::{ConnectionTrait, EntityTrait};
use uuid::Uuid;

use crate::{PmError, PmResult};

pub async fn project_facts<C: ConnectionTrait>(
    db: &C,
    principal: &Principal,
    project: &projects::Model,
) -> PmResult<ProjectFacts> {
    let membership = project_members::Entity::find_by_id((project.id, principal.id))
        .one(db)
        .await?;
    Ok(ProjectFacts {
        is_member: membership.is_some(),
        is_manager: membership.is_some_and(|row| row.is_manager),
        is_owner: project.created_by == principal.id,
    })
}

async fn load_project<C: ConnectionTrait>(db: &C, project_id: Uuid) -> PmResult<projects::Model> {
    projects::Entity::find_by_id(project_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("project"))
}

async fn load_task<C: ConnectionTrait>(db: &C, task_id: Uuid) -> PmResult<tasks::Model> {
    tasks::Entity::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("task"))
}

/// Membership or ADMIN.
pub async fn require_project_member<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    project_id: Uuid,
) -> PmResult<projects::Model> {
    let project = load_project(db, project_id).await?;
    let facts = project_facts(db, principal, &project).await?;
    engine.can_view_project(principal, facts)?;
    Ok(project)
}

/// Manager-or-admin, or owner-or-admin when the engine is configured that way.
pub async fn require_project_manager<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    project_id: Uuid,
) -> PmResult<projects::Model> {
    let project = load_project(db, project_id).await?;
    let facts = project_facts(db, principal, &project).await?;
    engine.can_manage_project(principal, facts)?;
    Ok(project)
}

pub async fn authorize_task_create<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    project_id: Uuid,
) -> PmResult<projects::Model> {
    let project = load_project(db, project_id).await?;
    let facts = project_facts(db, principal, &project).await?;
    engine.can_create_task(principal, facts)?;
    Ok(project)
}

/// Resolves how much of the task the caller may change.
pub async fn authorize_task_edit<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    task_id: Uuid,
) -> PmResult<(tasks::Model, EditScope)> {
    let task = load_task(db, task_id).await?;
    let is_assignee = task.assignee_id == Some(principal.id);
    let scope = engine
        .task_edit_scope(principal, is_assignee)
        .map_err(|_| PmError::permission("insufficient permission to edit this task"))?;
    Ok((task, scope))
}

/// Deleting a task needs full edit rights.
pub async fn authorize_task_delete<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    task_id: Uuid,
) -> PmResult<tasks::Model> {
    match authorize_task_edit(db, engine, principal, task_id).await? {
        (task, EditScope::Full) => Ok(task),
        (_, EditScope::AssigneeOnly) => Err(PmError::permission(
            "assignees cannot delete tasks",
        )),
    }
}

/// Reading a task, its comments or its attachments requires project membership.
pub async fn authorize_task_read<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    task_id: Uuid,
) -> PmResult<tasks::Model> {
    let task = load_task(db, task_id).await?;
    require_project_member(db, engine, principal, task.project_id).await?;
    Ok(task)
}

pub async fn authorize_comment_read<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    comment_id: Uuid,
) -> PmResult<comments::Model> {
    let comment = comments::Entity::find_by_id(comment_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("comment"))?;
    authorize_task_read(db, engine, principal, comment.task_id).await?;
    Ok(comment)
}

/// Membership in the project the attachment belongs to, directly or through its task.
pub async fn authorize_attachment<C: ConnectionTrait>(
    db: &C,
    engine: &PolicyEngine,
    principal: &Principal,
    attachment_id: Uuid,
) -> PmResult<attachments::Model> {
    let attachment = attachments::Entity::find_by_id(attachment_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("attachment"))?;
    let project_id = match (attachment.project_id, attachment.task_id) {
        (Some(project_id), _) => project_id,
        (None, Some(task_id)) => load_task(db, task_id).await?.project_id,
        (None, None) => return Err(PmError::NotFound("attachment")),
    };
    require_project_member(db, engine, principal, project_id).await?;
    Ok(attachment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::users::Role;

    #[test]
    fn assignee_edit_denial_is_a_permission_error() {
        let engine = PolicyEngine::default();
        let member = Principal::new(Uuid::new_v4(), Role::Member);
        let err: PmError = engine.task_edit_scope(&member, false).unwrap_err().into();
        assert!(matches!(err, PmError::Permission(_)));
    }
}
