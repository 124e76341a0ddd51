//! Attachment metadata. Bytes live in the file store; rows only keep locators.

use entity::{attachments, projects, tasks};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    PmError, PmResult, now, required_text,
    storage::{FileStore, remove_best_effort},
};

#[derive(Clone, Debug, Default)]
pub struct NewAttachment {
    pub file_name: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub task_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentScope {
    Task(Uuid),
    Project(Uuid),
}

/// The project an upload would belong to, checking that referenced rows exist.
/// A task-only upload inherits the task's project.
pub async fn resolve_owner<C: ConnectionTrait>(
    db: &C,
    task_id: Option<Uuid>,
    project_id: Option<Uuid>,
) -> PmResult<Uuid> {
    match (task_id, project_id) {
        (None, None) => Err(PmError::validation(
            "an attachment needs a task or a project",
        )),
        (Some(task_id), project_id) => {
            let task = tasks::Entity::find_by_id(task_id)
                .one(db)
                .await?
                .ok_or(PmError::NotFound("task"))?;
            match project_id {
                Some(project_id) if project_id != task.project_id => Err(PmError::validation(
                    "task does not belong to the given project",
                )),
                _ => Ok(task.project_id),
            }
        }
        (None, Some(project_id)) => projects::Entity::find_by_id(project_id)
            .one(db)
            .await?
            .map(|project| project.id)
            .ok_or(PmError::NotFound("project")),
    }
}

#[instrument(name = "pm.attachments.register", skip(db, input), fields(file = %input.file_name))]
pub async fn register_attachment<C: ConnectionTrait>(
    db: &C,
    uploaded_by: Uuid,
    input: NewAttachment,
) -> PmResult<attachments::Model> {
    let file_name = required_text("file name", &input.file_name, 255)?;
    let file_path = required_text("file path", &input.file_path, 1024)?;
    let project_id = resolve_owner(db, input.task_id, input.project_id).await?;
    let attachment = attachments::ActiveModel {
        id: Set(Uuid::new_v4()),
        file_name: Set(file_name),
        file_path: Set(file_path),
        file_type: Set(input.file_type),
        task_id: Set(input.task_id),
        project_id: Set(Some(project_id)),
        uploaded_by: Set(uploaded_by),
        created_at: Set(now()),
    }
    .insert(db)
    .await?;
    info!(attachment_id = %attachment.id, "attachment registered");
    Ok(attachment)
}

/// Newest first.
pub async fn list_attachments<C: ConnectionTrait>(
    db: &C,
    scope: AttachmentScope,
) -> PmResult<Vec<attachments::Model>> {
    let query = match scope {
        AttachmentScope::Task(task_id) => {
            attachments::Entity::find().filter(attachments::Column::TaskId.eq(task_id))
        }
        AttachmentScope::Project(project_id) => {
            attachments::Entity::find().filter(attachments::Column::ProjectId.eq(project_id))
        }
    };
    Ok(query
        .order_by_desc(attachments::Column::CreatedAt)
        .order_by_desc(attachments::Column::Id)
        .all(db)
        .await?)
}

/// Removes the row; the stored file is removed best-effort.
#[instrument(name = "pm.attachments.delete", skip(db, store))]
pub async fn delete_attachment<C: ConnectionTrait, S: FileStore>(
    db: &C,
    store: &S,
    attachment_id: Uuid,
) -> PmResult<attachments::Model> {
    let existing = attachments::Entity::find_by_id(attachment_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("attachment"))?;
    remove_best_effort(store, &existing.file_path).await;
    attachments::Entity::delete_by_id(existing.id)
        .exec(db)
        .await?;
    Ok(existing)
}
