//! Comments, attachments, the notification inbox and dashboard counters.

use async_graphql::{Context, ErrorExtensions, InputObject, Object, Result};
use chrono::Utc;
use platform_api::ApiError;
use products_pm::{
    access,
    attachments::{self, AttachmentScope, NewAttachment},
    comments::{self, NewComment},
    notifications, stats,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    Resolve, data, principal,
    types::{AttachmentNode, CommentNode, Dashboard, NotificationNode, WorkloadNode},
};

#[derive(InputObject, Default)]
pub struct AddCommentInput {
    pub content: Option<String>,
    pub parent_id: Option<Uuid>,
    pub image_url: Option<String>,
}

/// Metadata for a file the client already uploaded to the file store.
#[derive(InputObject)]
pub struct RegisterAttachmentInput {
    pub file_name: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub task_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

#[derive(Default)]
pub struct ActivityQuery;

#[Object]
impl ActivityQuery {
    #[instrument(name = "graphql.comments", skip_all, fields(%task_id))]
    async fn comments(&self, ctx: &Context<'_>, task_id: Uuid) -> Result<Vec<CommentNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::authorize_task_read(&data.pool, &data.engine, &caller, task_id)
            .await
            .resolve()?;
        let rows = comments::list_comments(&data.pool, task_id)
            .await
            .resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Attachments of a task, or of a project when no task is given.
    #[instrument(name = "graphql.attachments", skip_all)]
    async fn attachments(
        &self,
        ctx: &Context<'_>,
        task_id: Option<Uuid>,
        project_id: Option<Uuid>,
    ) -> Result<Vec<AttachmentNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        let scope = match (task_id, project_id) {
            (Some(task_id), _) => {
                access::authorize_task_read(&data.pool, &data.engine, &caller, task_id)
                    .await
                    .resolve()?;
                AttachmentScope::Task(task_id)
            }
            (None, Some(project_id)) => {
                access::require_project_member(&data.pool, &data.engine, &caller, project_id)
                    .await
                    .resolve()?;
                AttachmentScope::Project(project_id)
            }
            (None, None) => {
                return Err(ApiError::invalid("taskId or projectId is required").extend());
            }
        };
        let rows = attachments::list_attachments(&data.pool, scope)
            .await
            .resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// The caller's latest notifications, newest first.
    #[instrument(name = "graphql.notifications", skip_all)]
    async fn notifications(&self, ctx: &Context<'_>) -> Result<Vec<NotificationNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        let rows = notifications::list_for_user(&data.pool, caller.id)
            .await
            .resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(name = "graphql.dashboard", skip_all)]
    async fn dashboard(&self, ctx: &Context<'_>) -> Result<Dashboard> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        stats::dashboard_stats(&data.pool, &caller, Utc::now())
            .await
            .resolve()
            .map(Into::into)
    }

    /// Open task load of every non-admin user, busiest first. ADMIN and PM only.
    #[instrument(name = "graphql.workload", skip_all)]
    async fn workload(&self, ctx: &Context<'_>) -> Result<Vec<WorkloadNode>> {
        let caller = principal(ctx)?;
        if !caller.is_elevated() {
            return Err(ApiError::Forbidden("workload requires ADMIN or PM".into()).extend());
        }
        let data = data(ctx)?;
        let rows = stats::workload(&data.pool).await.resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
pub struct ActivityMutation;

#[Object]
impl ActivityMutation {
    #[instrument(name = "graphql.add_comment", skip_all, fields(%task_id))]
    async fn add_comment(
        &self,
        ctx: &Context<'_>,
        task_id: Uuid,
        input: AddCommentInput,
    ) -> Result<CommentNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::authorize_task_read(&data.pool, &data.engine, &caller, task_id)
            .await
            .resolve()?;
        comments::add_comment(
            &data.pool,
            task_id,
            &caller,
            NewComment {
                content: input.content,
                parent_id: input.parent_id,
                image_url: input.image_url,
            },
        )
        .await
        .resolve()
        .map(Into::into)
    }

    #[instrument(name = "graphql.delete_comment", skip_all, fields(%id))]
    async fn delete_comment(&self, ctx: &Context<'_>, id: Uuid) -> Result<CommentNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::authorize_comment_read(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()?;
        comments::delete_comment(&data.pool, &data.store, id, &caller)
            .await
            .resolve()
            .map(Into::into)
    }

    #[instrument(name = "graphql.register_attachment", skip_all)]
    async fn register_attachment(
        &self,
        ctx: &Context<'_>,
        input: RegisterAttachmentInput,
    ) -> Result<AttachmentNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        let project_id = attachments::resolve_owner(&data.pool, input.task_id, input.project_id)
            .await
            .resolve()?;
        access::require_project_member(&data.pool, &data.engine, &caller, project_id)
            .await
            .resolve()?;
        attachments::register_attachment(
            &data.pool,
            caller.id,
            NewAttachment {
                file_name: input.file_name,
                file_path: input.file_path,
                file_type: input.file_type,
                task_id: input.task_id,
                project_id: input.project_id,
            },
        )
        .await
        .resolve()
        .map(Into::into)
    }

    /// Uploaders remove their own files; anyone else needs to manage the project.
    #[instrument(name = "graphql.delete_attachment", skip_all, fields(%id))]
    async fn delete_attachment(&self, ctx: &Context<'_>, id: Uuid) -> Result<bool> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        let attachment = access::authorize_attachment(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()?;
        if attachment.uploaded_by != caller.id {
            let project_id = attachments::resolve_owner(
                &data.pool,
                attachment.task_id,
                attachment.project_id,
            )
            .await
            .resolve()?;
            access::require_project_manager(&data.pool, &data.engine, &caller, project_id)
                .await
                .resolve()?;
        }
        attachments::delete_attachment(&data.pool, &data.store, id)
            .await
            .resolve()?;
        Ok(true)
    }

    #[instrument(name = "graphql.mark_notification_read", skip_all, fields(%id))]
    async fn mark_notification_read(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
    ) -> Result<NotificationNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        notifications::mark_read(&data.pool, caller.id, id)
            .await
            .resolve()
            .map(Into::into)
    }

    /// Returns how many notifications changed.
    #[instrument(name = "graphql.mark_all_notifications_read", skip_all)]
    async fn mark_all_notifications_read(&self, ctx: &Context<'_>) -> Result<u64> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        notifications::mark_all_read(&data.pool, caller.id)
            .await
            .resolve()
    }

    #[instrument(name = "graphql.delete_notification", skip_all, fields(%id))]
    async fn delete_notification(&self, ctx: &Context<'_>, id: Uuid) -> Result<bool> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        notifications::delete_notification(&data.pool, caller.id, id)
            .await
            .resolve()?;
        Ok(true)
    }
}
