//! Projects, their membership, and the completion gate.

use std::collections::HashSet;

use entity::{
    notifications::Kind,
    project_members,
    projects::{self, Status},
    tasks, users,
};
use platform_authz::Principal;
use platform_db::{DbFailure, classify};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    prelude::DateTimeWithTimeZone, sea_query::Expr,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{PmError, PmResult, notifications, now, optional_text, required_text, users as user_ops};

#[derive(Clone, Debug, Default)]
pub struct NewProject {
    pub name: String,
    pub project_code: String,
    pub description: Option<String>,
    /// Extra managers besides the creator, who always starts as a manager.
    pub manager_ids: Vec<Uuid>,
}

/// `project_code` and `created_by` are fixed at creation and have no field here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<Status>,
    /// Replaces the manager set when present.
    pub manager_ids: Option<Vec<Uuid>>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberView {
    pub user: users::Model,
    pub is_manager: bool,
    pub joined_at: DateTimeWithTimeZone,
}

fn code_conflict(err: DbErr) -> PmError {
    match classify(&err) {
        DbFailure::UniqueViolation => PmError::conflict("project code already exists"),
        _ => err.into(),
    }
}

fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

async fn ensure_users_exist<C: ConnectionTrait>(db: &C, ids: &[Uuid]) -> PmResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let found = users::Entity::find()
        .filter(users::Column::Id.is_in(ids.iter().copied()))
        .count(db)
        .await?;
    if found != ids.len() as u64 {
        return Err(PmError::validation("manager not found"));
    }
    Ok(())
}

async fn upsert_manager<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
    user_id: Uuid,
) -> PmResult<()> {
    match project_members::Entity::find_by_id((project_id, user_id))
        .one(db)
        .await?
    {
        Some(existing) => {
            let mut active: project_members::ActiveModel = existing.into();
            active.is_manager = Set(true);
            active.update(db).await?;
        }
        None => {
            project_members::ActiveModel {
                project_id: Set(project_id),
                user_id: Set(user_id),
                is_manager: Set(true),
                joined_at: Set(now()),
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}

/// Inserts the project and its first memberships in one transaction.
#[instrument(name = "pm.projects.create", skip(db, input, creator), fields(creator = %creator.id, code = %input.project_code))]
pub async fn create_project(
    db: &DatabaseConnection,
    creator: &Principal,
    input: NewProject,
) -> PmResult<projects::Model> {
    let name = required_text("name", &input.name, 255)?;
    let project_code = required_text("project code", &input.project_code, 64)?;
    let description = optional_text(input.description);
    let managers: Vec<Uuid> = dedup(&input.manager_ids)
        .into_iter()
        .filter(|id| *id != creator.id)
        .collect();

    let txn = db.begin().await?;
    ensure_users_exist(&txn, &managers).await?;

    let id = Uuid::new_v4();
    let stamp = now();
    let active = projects::ActiveModel {
        id: Set(id),
        name: Set(name),
        project_code: Set(project_code),
        description: Set(description),
        status: Set(Status::InProgress),
        created_by: Set(creator.id),
        created_at: Set(stamp),
        updated_at: Set(stamp),
    };
    projects::Entity::insert(active)
        .exec_without_returning(&txn)
        .await
        .map_err(code_conflict)?;

    let memberships = std::iter::once(creator.id)
        .chain(managers)
        .map(|user_id| project_members::ActiveModel {
            project_id: Set(id),
            user_id: Set(user_id),
            is_manager: Set(true),
            joined_at: Set(stamp),
        })
        .collect::<Vec<_>>();
    project_members::Entity::insert_many(memberships)
        .exec_without_returning(&txn)
        .await?;

    let project = projects::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(PmError::NotFound("project"))?;
    txn.commit().await?;
    info!(project_id = %project.id, "project created");
    Ok(project)
}

/// Applies `patch`. Completing requires every task to be DONE; the manager
/// set, when given, replaces the current one. Members hear about completion
/// once the transaction has committed.
#[instrument(name = "pm.projects.update", skip(db, patch))]
pub async fn update_project(
    db: &DatabaseConnection,
    project_id: Uuid,
    patch: ProjectPatch,
) -> PmResult<projects::Model> {
    if patch.is_empty() {
        return Err(PmError::validation("no fields to update"));
    }
    let name = patch
        .name
        .as_deref()
        .map(|name| required_text("name", name, 255))
        .transpose()?;

    let txn = db.begin().await?;
    let existing = projects::Entity::find_by_id(project_id)
        .one(&txn)
        .await?
        .ok_or(PmError::NotFound("project"))?;

    if patch.status == Some(Status::Completed) {
        let open = open_task_count(&txn, project_id).await?;
        if open > 0 {
            return Err(PmError::OpenTasks(open));
        }
    }

    let previous_status = existing.status;
    let mut active: projects::ActiveModel = existing.into();
    if let Some(name) = name {
        active.name = Set(name);
    }
    if let Some(description) = patch.description {
        active.description = Set(optional_text(description));
    }
    if let Some(status) = patch.status {
        active.status = Set(status);
    }
    active.updated_at = Set(now());
    let updated = active.update(&txn).await?;

    if let Some(manager_ids) = &patch.manager_ids {
        let managers = dedup(manager_ids);
        ensure_users_exist(&txn, &managers).await?;
        project_members::Entity::update_many()
            .col_expr(project_members::Column::IsManager, Expr::value(false))
            .filter(project_members::Column::ProjectId.eq(project_id))
            .exec(&txn)
            .await?;
        for user_id in managers {
            upsert_manager(&txn, project_id, user_id).await?;
        }
    }
    txn.commit().await?;

    if updated.status == Status::Completed && previous_status != Status::Completed {
        let members = member_ids(db, project_id).await?;
        let message = format!(
            "Project \"{}\" ({}) was marked as completed",
            updated.name, updated.project_code
        );
        notifications::notify_many(db, &members, "Project completed", &message, Kind::Status)
            .await;
        info!(%project_id, notified = members.len(), "project completed");
    }

    Ok(updated)
}

/// Deletes the project; tasks, memberships and attachments go with it.
#[instrument(name = "pm.projects.delete", skip(db))]
pub async fn delete_project<C: ConnectionTrait>(db: &C, project_id: Uuid) -> PmResult<()> {
    let result = projects::Entity::delete_by_id(project_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(PmError::NotFound("project"));
    }
    info!(%project_id, "project deleted");
    Ok(())
}

pub async fn get_project<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
) -> PmResult<projects::Model> {
    projects::Entity::find_by_id(project_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("project"))
}

/// Tasks of the project that are not DONE.
pub async fn open_task_count<C: ConnectionTrait>(db: &C, project_id: Uuid) -> PmResult<u64> {
    Ok(tasks::Entity::find()
        .filter(tasks::Column::ProjectId.eq(project_id))
        .filter(tasks::Column::Status.ne(tasks::Status::Done))
        .count(db)
        .await?)
}

/// ADMIN sees every project, everyone else the ones they belong to. Newest first.
pub async fn projects_for_user<C: ConnectionTrait>(
    db: &C,
    principal: &Principal,
) -> PmResult<Vec<projects::Model>> {
    let mut query = projects::Entity::find();
    if !principal.is_admin() {
        let ids = member_project_ids(db, principal.id).await?;
        query = query.filter(projects::Column::Id.is_in(ids));
    }
    Ok(query
        .order_by_desc(projects::Column::CreatedAt)
        .order_by_desc(projects::Column::Id)
        .all(db)
        .await?)
}

pub async fn member_project_ids<C: ConnectionTrait>(db: &C, user_id: Uuid) -> PmResult<Vec<Uuid>> {
    Ok(project_members::Entity::find()
        .select_only()
        .column(project_members::Column::ProjectId)
        .filter(project_members::Column::UserId.eq(user_id))
        .into_tuple::<Uuid>()
        .all(db)
        .await?)
}

pub async fn member_ids<C: ConnectionTrait>(db: &C, project_id: Uuid) -> PmResult<Vec<Uuid>> {
    Ok(project_members::Entity::find()
        .select_only()
        .column(project_members::Column::UserId)
        .filter(project_members::Column::ProjectId.eq(project_id))
        .order_by_asc(project_members::Column::JoinedAt)
        .into_tuple::<Uuid>()
        .all(db)
        .await?)
}

pub async fn list_members<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
) -> PmResult<Vec<MemberView>> {
    get_project(db, project_id).await?;
    let rows = project_members::Entity::find()
        .filter(project_members::Column::ProjectId.eq(project_id))
        .order_by_asc(project_members::Column::JoinedAt)
        .find_also_related(users::Entity)
        .all(db)
        .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(member, user)| {
            user.map(|user| MemberView {
                user,
                is_manager: member.is_manager,
                joined_at: member.joined_at,
            })
        })
        .collect())
}

/// Adds the user registered under `email`.
#[instrument(name = "pm.projects.add_member", skip(db))]
pub async fn add_member_by_email<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
    email: &str,
    is_manager: bool,
) -> PmResult<project_members::Model> {
    get_project(db, project_id).await?;
    let user = user_ops::find_by_email(db, email)
        .await?
        .ok_or(PmError::NotFound("user"))?;
    if project_members::Entity::find_by_id((project_id, user.id))
        .one(db)
        .await?
        .is_some()
    {
        return Err(PmError::conflict("user is already a member of this project"));
    }
    let member = project_members::ActiveModel {
        project_id: Set(project_id),
        user_id: Set(user.id),
        is_manager: Set(is_manager),
        joined_at: Set(now()),
    }
    .insert(db)
    .await?;
    Ok(member)
}

pub async fn remove_member<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
    user_id: Uuid,
) -> PmResult<()> {
    let result = project_members::Entity::delete_many()
        .filter(
            Condition::all()
                .add(project_members::Column::ProjectId.eq(project_id))
                .add(project_members::Column::UserId.eq(user_id)),
        )
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(PmError::NotFound("member"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(dedup(&[a, b, a, b]), vec![a, b]);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(ProjectPatch::default().is_empty());
        let patch = ProjectPatch {
            manager_ids: Some(Vec::new()),
            ..ProjectPatch::default()
        };
        assert!(!patch.is_empty());
    }
}
