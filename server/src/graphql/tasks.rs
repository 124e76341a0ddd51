use async_graphql::{Context, InputObject, MaybeUndefined, Object, Result};
use chrono::{DateTime, Utc};
use products_pm::{
    access,
    tasks::{self, CalendarFilter, NewTask, TaskFilter, TaskListing, TaskPatch},
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    Resolve, data, principal,
    projects::maybe,
    types::{TaskNode, TaskPriority, TaskStatus},
};

#[derive(InputObject)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
}

/// Omitted fields stay untouched; an explicit `null` clears a nullable field.
/// Assignees may only change `status` and `priority`; other fields are ignored.
#[derive(InputObject, Default)]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    pub description: MaybeUndefined<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub start_date: MaybeUndefined<DateTime<Utc>>,
    pub due_date: MaybeUndefined<DateTime<Utc>>,
    pub assignee_id: MaybeUndefined<Uuid>,
}

impl From<UpdateTaskInput> for TaskPatch {
    fn from(input: UpdateTaskInput) -> Self {
        TaskPatch {
            title: input.title,
            description: maybe(input.description),
            status: input.status.map(Into::into),
            priority: input.priority.map(Into::into),
            start_date: maybe(input.start_date).map(|date| date.map(Into::into)),
            due_date: maybe(input.due_date).map(|date| date.map(Into::into)),
            assignee_id: maybe(input.assignee_id),
        }
    }
}

#[derive(Default)]
pub struct TaskQuery;

#[Object]
impl TaskQuery {
    #[instrument(name = "graphql.task", skip_all, fields(%id))]
    async fn task(&self, ctx: &Context<'_>, id: Uuid) -> Result<TaskNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::authorize_task_read(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()
            .map(Into::into)
    }

    /// Nested by parent when unfiltered, flat when a status or priority filter is set.
    #[instrument(name = "graphql.tasks", skip_all, fields(%project_id))]
    async fn tasks(
        &self,
        ctx: &Context<'_>,
        project_id: Uuid,
        status: Option<TaskStatus>,
        priority: Option<TaskPriority>,
    ) -> Result<Vec<TaskNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::require_project_member(&data.pool, &data.engine, &caller, project_id)
            .await
            .resolve()?;
        let filter = TaskFilter {
            status: status.map(Into::into),
            priority: priority.map(Into::into),
        };
        let listing = tasks::tasks_for_project(&data.pool, project_id, filter)
            .await
            .resolve()?;
        Ok(match listing {
            TaskListing::Tree(forest) => forest.into_iter().map(Into::into).collect(),
            TaskListing::Flat(rows) => rows.into_iter().map(Into::into).collect(),
        })
    }

    #[instrument(name = "graphql.subtasks", skip_all, fields(%task_id))]
    async fn subtasks(&self, ctx: &Context<'_>, task_id: Uuid) -> Result<Vec<TaskNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::authorize_task_read(&data.pool, &data.engine, &caller, task_id)
            .await
            .resolve()?;
        let rows = tasks::children_of(&data.pool, task_id).await.resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Every visible task, soonest due first.
    #[instrument(name = "graphql.calendar_tasks", skip_all)]
    async fn calendar_tasks(
        &self,
        ctx: &Context<'_>,
        project_id: Option<Uuid>,
        assignee_id: Option<Uuid>,
    ) -> Result<Vec<TaskNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        let rows = tasks::tasks_for_user(
            &data.pool,
            &caller,
            CalendarFilter {
                project_id,
                assignee_id,
            },
        )
        .await
        .resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
pub struct TaskMutation;

#[Object]
impl TaskMutation {
    #[instrument(name = "graphql.create_task", skip_all, fields(%project_id))]
    async fn create_task(
        &self,
        ctx: &Context<'_>,
        project_id: Uuid,
        input: CreateTaskInput,
    ) -> Result<TaskNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::authorize_task_create(&data.pool, &data.engine, &caller, project_id)
            .await
            .resolve()?;
        let new_task = NewTask {
            title: input.title,
            description: input.description,
            status: input.status.map(Into::into),
            priority: input.priority.map(Into::into),
            start_date: input.start_date.map(Into::into),
            due_date: input.due_date.map(Into::into),
            assignee_id: input.assignee_id,
            parent_id: input.parent_id,
        };
        tasks::create_task(&data.pool, project_id, new_task, &caller)
            .await
            .resolve()
            .map(Into::into)
    }

    /// Moving to DONE fails while direct subtasks are open.
    #[instrument(name = "graphql.update_task", skip_all, fields(%id))]
    async fn update_task(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        input: UpdateTaskInput,
    ) -> Result<TaskNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        let (_, scope) = access::authorize_task_edit(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()?;
        tasks::update_task(&data.pool, id, input.into(), scope)
            .await
            .resolve()
            .map(Into::into)
    }

    #[instrument(name = "graphql.delete_task", skip_all, fields(%id))]
    async fn delete_task(&self, ctx: &Context<'_>, id: Uuid) -> Result<bool> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::authorize_task_delete(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()?;
        tasks::delete_task(&data.pool, id).await.resolve()?;
        Ok(true)
    }
}
