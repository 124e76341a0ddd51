//! Task lifecycle: creation with project/parent reopening, guarded updates,
//! deletion and listings.

use entity::{
    notifications::Kind,
    project_members, projects,
    tasks::{self, Priority, Status},
    users,
};
use platform_authz::{EditScope, Principal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, Query},
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    PmError, PmResult, notifications, now, optional_text, projects as project_ops,
    required_text,
    tree::{TaskNode, build_forest},
};

const TITLE_MAX: usize = 255;

#[derive(Clone, Debug, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    /// Defaults to TODO.
    pub status: Option<Status>,
    /// Defaults to MEDIUM.
    pub priority: Option<Priority>,
    pub start_date: Option<DateTimeWithTimeZone>,
    pub due_date: Option<DateTimeWithTimeZone>,
    pub assignee_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
}

/// Partial update. For nullable columns the outer `Option` means "touch this
/// field" and the inner one carries the new value, so `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub start_date: Option<Option<DateTimeWithTimeZone>>,
    pub due_date: Option<Option<DateTimeWithTimeZone>>,
    pub assignee_id: Option<Option<Uuid>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Keeps the fields an assignee may change (status and priority).
    pub fn narrow_to_assignee(self) -> Self {
        Self {
            status: self.status,
            priority: self.priority,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.priority.is_none()
    }
}

/// Unfiltered listings are nested; filtered ones stay flat.
#[derive(Clone, Debug)]
pub enum TaskListing {
    Tree(Vec<TaskNode>),
    Flat(Vec<tasks::Model>),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CalendarFilter {
    pub project_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
}

fn reopen(task: tasks::Model) -> tasks::ActiveModel {
    let mut active: tasks::ActiveModel = task.into();
    active.status = Set(Status::InProgress);
    active.completed_at = Set(None);
    active.updated_at = Set(now());
    active
}

async fn assignee_exists<C: ConnectionTrait>(db: &C, user_id: Uuid) -> PmResult<()> {
    users::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .map(|_| ())
        .ok_or_else(|| PmError::validation("assignee not found"))
}

/// Creates a task. A COMPLETED project and a DONE parent are both reopened
/// in the same transaction as the insert; notifications follow the commit.
#[instrument(name = "pm.tasks.create", skip(db, input, actor), fields(actor = %actor.id))]
pub async fn create_task(
    db: &DatabaseConnection,
    project_id: Uuid,
    input: NewTask,
    actor: &Principal,
) -> PmResult<tasks::Model> {
    let title = required_text("title", &input.title, TITLE_MAX)?;
    let description = optional_text(input.description);

    let txn = db.begin().await?;
    let project = projects::Entity::find_by_id(project_id)
        .one(&txn)
        .await?
        .ok_or(PmError::NotFound("project"))?;
    if let Some(assignee) = input.assignee_id {
        assignee_exists(&txn, assignee).await?;
    }
    let parent = match input.parent_id {
        Some(parent_id) => Some(
            tasks::Entity::find_by_id(parent_id)
                .one(&txn)
                .await?
                .filter(|parent| parent.project_id == project_id)
                .ok_or_else(|| PmError::validation("parent task not found"))?,
        ),
        None => None,
    };

    let project_reopened = project.status == projects::Status::Completed;
    if project_reopened {
        let mut active: projects::ActiveModel = project.clone().into();
        active.status = Set(projects::Status::InProgress);
        active.updated_at = Set(now());
        active.update(&txn).await?;
    }

    let reopened_parent = match parent {
        Some(parent) if parent.status == Status::Done => Some(reopen(parent).update(&txn).await?),
        _ => None,
    };

    let status = input.status.unwrap_or(Status::Todo);
    let stamp = now();
    let id = Uuid::new_v4();
    let active = tasks::ActiveModel {
        id: Set(id),
        project_id: Set(project_id),
        parent_id: Set(input.parent_id),
        title: Set(title),
        description: Set(description),
        status: Set(status),
        priority: Set(input.priority.unwrap_or(Priority::Medium)),
        start_date: Set(input.start_date),
        due_date: Set(input.due_date),
        assignee_id: Set(input.assignee_id),
        created_by: Set(actor.id),
        completed_at: Set((status == Status::Done).then_some(stamp)),
        is_overdue_notified: Set(false),
        created_at: Set(stamp),
        updated_at: Set(stamp),
    };
    tasks::Entity::insert(active)
        .exec_without_returning(&txn)
        .await?;
    let task = tasks::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or(PmError::NotFound("task"))?;
    txn.commit().await?;
    info!(task_id = %task.id, "task created");

    if project_reopened {
        let members = project_ops::member_ids(db, project_id).await?;
        let message = format!(
            "Project \"{}\" was reopened because task \"{}\" was added",
            project.name, task.title
        );
        notifications::notify_many(db, &members, "Project reopened", &message, Kind::Status)
            .await;
    }
    if let Some(parent) = &reopened_parent {
        if let Some(assignee) = parent.assignee_id {
            let message = format!(
                "Subtask \"{}\" was added, so \"{}\" is back in progress",
                task.title, parent.title
            );
            notifications::notify(db, assignee, "Task reopened", &message, Kind::Status).await;
        }
    }
    if let Some(assignee) = task.assignee_id {
        if assignee != actor.id {
            let message = format!(
                "{}: {} ({})",
                project.project_code,
                task.title,
                task.priority.as_str()
            );
            notifications::notify(db, assignee, "New task assigned", &message, Kind::Assign)
                .await;
        }
    }

    Ok(task)
}

/// Applies `patch` under the completion gate and the completed_at / overdue
/// bookkeeping rules. A DONE parent of a task that ends up not DONE is reopened.
#[instrument(name = "pm.tasks.update", skip(db, patch))]
pub async fn update_task(
    db: &DatabaseConnection,
    task_id: Uuid,
    patch: TaskPatch,
    scope: EditScope,
) -> PmResult<tasks::Model> {
    let patch = match scope {
        EditScope::Full => patch,
        EditScope::AssigneeOnly => patch.narrow_to_assignee(),
    };
    if patch.is_empty() {
        return Err(match scope {
            EditScope::AssigneeOnly => {
                PmError::permission("insufficient permission: assignees may only change status or priority")
            }
            EditScope::Full => PmError::validation("no fields to update"),
        });
    }
    let title = patch
        .title
        .as_deref()
        .map(|title| required_text("title", title, TITLE_MAX))
        .transpose()?;

    let txn = db.begin().await?;
    let existing = tasks::Entity::find_by_id(task_id)
        .one(&txn)
        .await?
        .ok_or(PmError::NotFound("task"))?;
    if let Some(Some(assignee)) = patch.assignee_id {
        assignee_exists(&txn, assignee).await?;
    }
    if patch.status == Some(Status::Done) {
        let open = open_children(&txn, task_id).await?;
        if open > 0 {
            return Err(PmError::IncompleteChildren(open));
        }
    }

    let previous_status = existing.status;
    let previous_assignee = existing.assignee_id;
    let next_status = patch.status.unwrap_or(previous_status);
    let stamp = now();

    let mut active: tasks::ActiveModel = existing.clone().into();
    if let Some(title) = title {
        active.title = Set(title);
    }
    if let Some(description) = patch.description {
        active.description = Set(optional_text(description));
    }
    if let Some(priority) = patch.priority {
        active.priority = Set(priority);
    }
    if let Some(start_date) = patch.start_date {
        active.start_date = Set(start_date);
    }
    if let Some(due_date) = patch.due_date {
        if due_date != existing.due_date {
            active.due_date = Set(due_date);
            active.is_overdue_notified = Set(false);
        }
    }
    if let Some(assignee) = patch.assignee_id {
        active.assignee_id = Set(assignee);
    }
    active.status = Set(next_status);
    if next_status == Status::Done && previous_status != Status::Done {
        active.completed_at = Set(Some(stamp));
    } else if next_status != Status::Done && previous_status == Status::Done {
        active.completed_at = Set(None);
    }
    active.updated_at = Set(stamp);
    let updated = active.update(&txn).await?;

    if next_status != Status::Done {
        if let Some(parent_id) = updated.parent_id {
            if let Some(parent) = tasks::Entity::find_by_id(parent_id).one(&txn).await? {
                if parent.status == Status::Done {
                    reopen(parent).update(&txn).await?;
                }
            }
        }
    }
    txn.commit().await?;

    if let Some(Some(assignee)) = patch.assignee_id {
        if previous_assignee != Some(assignee) {
            let message = format!("You were assigned \"{}\"", updated.title);
            notifications::notify(db, assignee, "New task assigned", &message, Kind::Assign)
                .await;
        }
    }
    // Status changes are reported to whoever held the task before this patch.
    if next_status != previous_status {
        if let Some(assignee) = previous_assignee {
            let (title, message) = if next_status == Status::Done {
                (
                    "Task completed",
                    format!("\"{}\" was marked as done", updated.title),
                )
            } else {
                (
                    "Task status changed",
                    format!(
                        "\"{}\" moved from {} to {}",
                        updated.title,
                        previous_status.as_str(),
                        next_status.as_str()
                    ),
                )
            };
            notifications::notify(db, assignee, title, &message, Kind::Status).await;
        }
    }

    Ok(updated)
}

/// Deletes a task; its direct children are detached rather than deleted.
#[instrument(name = "pm.tasks.delete", skip(db))]
pub async fn delete_task(db: &DatabaseConnection, task_id: Uuid) -> PmResult<()> {
    let txn = db.begin().await?;
    let existing = tasks::Entity::find_by_id(task_id)
        .one(&txn)
        .await?
        .ok_or(PmError::NotFound("task"))?;
    tasks::Entity::update_many()
        .col_expr(tasks::Column::ParentId, Expr::value(Option::<Uuid>::None))
        .filter(tasks::Column::ParentId.eq(existing.id))
        .exec(&txn)
        .await?;
    tasks::Entity::delete_by_id(existing.id).exec(&txn).await?;
    txn.commit().await?;
    info!(%task_id, "task deleted");
    Ok(())
}

pub async fn get_task<C: ConnectionTrait>(db: &C, task_id: Uuid) -> PmResult<tasks::Model> {
    tasks::Entity::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("task"))
}

/// Direct children that are not DONE.
pub async fn open_children<C: ConnectionTrait>(db: &C, task_id: Uuid) -> PmResult<u64> {
    Ok(tasks::Entity::find()
        .filter(tasks::Column::ParentId.eq(task_id))
        .filter(tasks::Column::Status.ne(Status::Done))
        .count(db)
        .await?)
}

pub async fn children_of<C: ConnectionTrait>(
    db: &C,
    task_id: Uuid,
) -> PmResult<Vec<tasks::Model>> {
    Ok(tasks::Entity::find()
        .filter(tasks::Column::ParentId.eq(task_id))
        .order_by_asc(tasks::Column::CreatedAt)
        .order_by_asc(tasks::Column::Id)
        .all(db)
        .await?)
}

/// Tasks of a project ordered by creation; nested unless a filter is given.
pub async fn tasks_for_project<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
    filter: TaskFilter,
) -> PmResult<TaskListing> {
    if projects::Entity::find_by_id(project_id).one(db).await?.is_none() {
        return Err(PmError::NotFound("project"));
    }
    let mut query = tasks::Entity::find().filter(tasks::Column::ProjectId.eq(project_id));
    if let Some(status) = filter.status {
        query = query.filter(tasks::Column::Status.eq(status));
    }
    if let Some(priority) = filter.priority {
        query = query.filter(tasks::Column::Priority.eq(priority));
    }
    let rows = query
        .order_by_asc(tasks::Column::CreatedAt)
        .order_by_asc(tasks::Column::Id)
        .all(db)
        .await?;
    Ok(if filter.is_empty() {
        TaskListing::Tree(build_forest(rows))
    } else {
        TaskListing::Flat(rows)
    })
}

/// Calendar view: every task the principal can see, soonest due first.
pub async fn tasks_for_user<C: ConnectionTrait>(
    db: &C,
    principal: &Principal,
    filter: CalendarFilter,
) -> PmResult<Vec<tasks::Model>> {
    let mut condition = Condition::all();
    if !principal.is_admin() {
        condition = condition.add(
            tasks::Column::ProjectId.in_subquery(
                Query::select()
                    .column(project_members::Column::ProjectId)
                    .from(project_members::Entity)
                    .and_where(project_members::Column::UserId.eq(principal.id))
                    .to_owned(),
            ),
        );
    }
    if let Some(project_id) = filter.project_id {
        condition = condition.add(tasks::Column::ProjectId.eq(project_id));
    }
    if let Some(assignee_id) = filter.assignee_id {
        condition = condition.add(tasks::Column::AssigneeId.eq(assignee_id));
    }
    Ok(tasks::Entity::find()
        .filter(condition)
        .order_by_asc(tasks::Column::DueDate)
        .order_by_asc(tasks::Column::CreatedAt)
        .all(db)
        .await?)
}
