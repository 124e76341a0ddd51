//! Dashboard counters scoped by role, and the team workload view.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use entity::{
    projects,
    tasks::{self, Status},
    users::{self, Role},
};
use platform_authz::Principal;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, prelude::DateTimeWithTimeZone,
};
use uuid::Uuid;

use crate::{PmResult, projects::member_project_ids};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProjectCounts {
    pub total: u64,
    pub completed: u64,
    pub in_progress: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: u64,
    pub done: u64,
    pub in_progress: u64,
    /// Not DONE and past due.
    pub overdue: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DashboardStats {
    pub projects: ProjectCounts,
    pub tasks: TaskCounts,
}

/// One non-ADMIN user and the open tasks assigned to them.
#[derive(Clone, Debug)]
pub struct Workload {
    pub user: users::Model,
    /// Not DONE, ordered by due date.
    pub active_tasks: Vec<tasks::Model>,
}

impl Workload {
    pub fn active_count(&self) -> u64 {
        self.active_tasks.len() as u64
    }
}

/// Every non-ADMIN user with their open tasks, busiest first. Ties keep
/// username order.
pub async fn workload<C: ConnectionTrait>(db: &C) -> PmResult<Vec<Workload>> {
    let people = users::Entity::find()
        .filter(users::Column::Role.ne(Role::Admin))
        .order_by_asc(users::Column::Username)
        .all(db)
        .await?;
    let open = tasks::Entity::find()
        .filter(tasks::Column::Status.ne(Status::Done))
        .filter(tasks::Column::AssigneeId.is_not_null())
        .order_by_asc(tasks::Column::DueDate)
        .order_by_asc(tasks::Column::CreatedAt)
        .all(db)
        .await?;

    let mut by_assignee: HashMap<Uuid, Vec<tasks::Model>> = HashMap::new();
    for task in open {
        if let Some(assignee) = task.assignee_id {
            by_assignee.entry(assignee).or_default().push(task);
        }
    }
    let mut rows: Vec<Workload> = people
        .into_iter()
        .map(|user| Workload {
            active_tasks: by_assignee.remove(&user.id).unwrap_or_default(),
            user,
        })
        .collect();
    rows.sort_by(|a, b| b.active_tasks.len().cmp(&a.active_tasks.len()));
    Ok(rows)
}

/// ADMIN counts everything. PM counts projects they created or joined and the
/// tasks inside them. MEMBER counts joined projects and tasks assigned to them.
pub async fn dashboard_stats<C: ConnectionTrait>(
    db: &C,
    principal: &Principal,
    at: DateTime<Utc>,
) -> PmResult<DashboardStats> {
    let (project_scope, task_scope) = match principal.role {
        Role::Admin => (Condition::all(), Condition::all()),
        Role::Pm => {
            let joined = member_project_ids(db, principal.id).await?;
            let visible: Vec<Uuid> = projects_created_or_joined(db, principal.id, joined).await?;
            (
                Condition::all().add(projects::Column::Id.is_in(visible.clone())),
                Condition::all().add(tasks::Column::ProjectId.is_in(visible)),
            )
        }
        Role::Member => {
            let joined = member_project_ids(db, principal.id).await?;
            (
                Condition::all().add(projects::Column::Id.is_in(joined)),
                Condition::all().add(tasks::Column::AssigneeId.eq(principal.id)),
            )
        }
    };

    let projects = ProjectCounts {
        total: count_projects(db, &project_scope, None).await?,
        completed: count_projects(db, &project_scope, Some(projects::Status::Completed)).await?,
        in_progress: count_projects(db, &project_scope, Some(projects::Status::InProgress))
            .await?,
    };

    let now: DateTimeWithTimeZone = at.into();
    let overdue = Condition::all()
        .add(tasks::Column::Status.ne(Status::Done))
        .add(tasks::Column::DueDate.lt(now));
    let tasks = TaskCounts {
        total: count_tasks(db, &task_scope, Condition::all()).await?,
        done: count_tasks(
            db,
            &task_scope,
            Condition::all().add(tasks::Column::Status.eq(Status::Done)),
        )
        .await?,
        in_progress: count_tasks(
            db,
            &task_scope,
            Condition::all().add(tasks::Column::Status.eq(Status::InProgress)),
        )
        .await?,
        overdue: count_tasks(db, &task_scope, overdue).await?,
    };

    Ok(DashboardStats { projects, tasks })
}

async fn count_projects<C: ConnectionTrait>(
    db: &C,
    scope: &Condition,
    status: Option<projects::Status>,
) -> Result<u64, DbErr> {
    let mut query = projects::Entity::find().filter(scope.clone());
    if let Some(status) = status {
        query = query.filter(projects::Column::Status.eq(status));
    }
    query.count(db).await
}

async fn count_tasks<C: ConnectionTrait>(
    db: &C,
    scope: &Condition,
    extra: Condition,
) -> Result<u64, DbErr> {
    tasks::Entity::find()
        .filter(scope.clone())
        .filter(extra)
        .count(db)
        .await
}

async fn projects_created_or_joined<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    mut joined: Vec<Uuid>,
) -> PmResult<Vec<Uuid>> {
    let created = projects::Entity::find()
        .filter(projects::Column::CreatedBy.eq(user_id))
        .all(db)
        .await?;
    for project in created {
        if !joined.contains(&project.id) {
            joined.push(project.id);
        }
    }
    Ok(joined)
}
