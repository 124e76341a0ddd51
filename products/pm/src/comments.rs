//! Task discussion threads with @mentions and soft deletion.

use entity::{comments, tasks, users};
use platform_authz::Principal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    PmError, PmResult, notifications, now, optional_text,
    storage::{FileStore, remove_best_effort},
};

/// Text left behind when a comment is deleted.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

#[derive(Clone, Debug, Default)]
pub struct NewComment {
    pub content: Option<String>,
    pub parent_id: Option<Uuid>,
    /// Locator returned by the file store for an uploaded image.
    pub image_url: Option<String>,
}

/// Stores a comment and notifies every user mentioned in it.
#[instrument(name = "pm.comments.add", skip(db, input, author), fields(author = %author.id))]
pub async fn add_comment<C: ConnectionTrait>(
    db: &C,
    task_id: Uuid,
    author: &Principal,
    input: NewComment,
) -> PmResult<comments::Model> {
    let content = optional_text(input.content);
    let image_url = optional_text(input.image_url);
    if content.is_none() && image_url.is_none() {
        return Err(PmError::validation("a comment needs text or an image"));
    }
    let task = tasks::Entity::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("task"))?;
    if let Some(parent_id) = input.parent_id {
        comments::Entity::find_by_id(parent_id)
            .one(db)
            .await?
            .filter(|parent| parent.task_id == task_id)
            .ok_or_else(|| PmError::validation("parent comment not found"))?;
    }
    let author_row = users::Entity::find_by_id(author.id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("user"))?;

    let comment = comments::ActiveModel {
        id: Set(Uuid::new_v4()),
        task_id: Set(task_id),
        user_id: Set(author.id),
        content: Set(content.clone().unwrap_or_default()),
        parent_id: Set(input.parent_id),
        image_url: Set(image_url),
        is_deleted: Set(false),
        created_at: Set(now()),
    }
    .insert(db)
    .await?;

    if let Some(text) = &content {
        let sent = notifications::notify_mentions(db, &author_row, text, &task.title).await;
        if sent > 0 {
            info!(comment_id = %comment.id, mentions = sent, "mention notifications sent");
        }
    }
    Ok(comment)
}

/// Oldest first, deleted entries included so threads keep their shape.
pub async fn list_comments<C: ConnectionTrait>(
    db: &C,
    task_id: Uuid,
) -> PmResult<Vec<comments::Model>> {
    Ok(comments::Entity::find()
        .filter(comments::Column::TaskId.eq(task_id))
        .order_by_asc(comments::Column::CreatedAt)
        .order_by_asc(comments::Column::Id)
        .all(db)
        .await?)
}

/// Soft-deletes a comment. Only its author or an ADMIN may do so; an attached
/// image is handed to the file store for removal.
#[instrument(name = "pm.comments.delete", skip(db, store, principal))]
pub async fn delete_comment<C: ConnectionTrait, S: FileStore>(
    db: &C,
    store: &S,
    comment_id: Uuid,
    principal: &Principal,
) -> PmResult<comments::Model> {
    let existing = comments::Entity::find_by_id(comment_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("comment"))?;
    if existing.user_id != principal.id && !principal.is_admin() {
        return Err(PmError::permission("only the author can delete this comment"));
    }
    if existing.is_deleted {
        return Ok(existing);
    }
    let image = existing.image_url.clone();
    let mut active: comments::ActiveModel = existing.into();
    active.content = Set(DELETED_PLACEHOLDER.to_string());
    active.image_url = Set(None);
    active.is_deleted = Set(true);
    let updated = active.update(db).await?;
    if let Some(locator) = image {
        remove_best_effort(store, &locator).await;
    }
    Ok(updated)
}
