//! Notification dispatch and the per-user inbox.
//!
//! Dispatch is best-effort: a failed insert is logged and swallowed so that it
//! never undoes the mutation that triggered it.

use chrono::{DateTime, Utc};
use entity::{notifications, users};
use notifications::Kind;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::Expr,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{PmError, PmResult, now};

/// Number of notifications returned by [`list_for_user`].
pub const INBOX_LIMIT: u64 = 20;

/// Persists one notification. Failures are logged and reported as `None`.
pub async fn notify<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    title: &str,
    message: &str,
    kind: Kind,
) -> Option<notifications::Model> {
    let model = notifications::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        title: Set(title.to_string()),
        message: Set(message.to_string()),
        kind: Set(kind),
        is_read: Set(false),
        created_at: Set(now()),
    };
    match model.insert(db).await {
        Ok(saved) => {
            debug!(%user_id, ?kind, "notification stored");
            Some(saved)
        }
        Err(err) => {
            warn!(%user_id, ?kind, error = %err, "failed to store notification");
            None
        }
    }
}

/// Sends the same notification to every user in `user_ids`; returns how many were stored.
pub async fn notify_many<C: ConnectionTrait>(
    db: &C,
    user_ids: &[Uuid],
    title: &str,
    message: &str,
    kind: Kind,
) -> usize {
    let mut stored = 0;
    for user_id in user_ids {
        if notify(db, *user_id, title, message, kind).await.is_some() {
            stored += 1;
        }
    }
    stored
}

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("mention pattern is valid"));

/// `@name` tokens in order of first appearance, without duplicates.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for name in MENTION.captures_iter(text).filter_map(|caps| caps.get(1)) {
        let name = name.as_str();
        if !found.iter().any(|seen| seen == name) {
            found.push(name.to_string());
        }
    }
    found
}

/// Sends a MENTION to every resolvable `@username` in `text` other than the author.
pub async fn notify_mentions<C: ConnectionTrait>(
    db: &C,
    author: &users::Model,
    text: &str,
    task_title: &str,
) -> usize {
    let mut sent = 0;
    for name in extract_mentions(text) {
        let target = match users::Entity::find()
            .filter(users::Column::Username.eq(name.as_str()))
            .one(db)
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => continue,
            Err(err) => {
                warn!(username = %name, error = %err, "mention lookup failed");
                continue;
            }
        };
        if target.id == author.id {
            continue;
        }
        let message = format!("{} mentioned you on \"{}\"", author.username, task_title);
        if notify(db, target.id, "You were mentioned", &message, Kind::Mention)
            .await
            .is_some()
        {
            sent += 1;
        }
    }
    sent
}

/// Latest [`INBOX_LIMIT`] notifications, newest first.
pub async fn list_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
) -> PmResult<Vec<notifications::Model>> {
    let rows = notifications::Entity::find()
        .filter(notifications::Column::UserId.eq(user_id))
        .order_by_desc(notifications::Column::CreatedAt)
        .order_by_desc(notifications::Column::Id)
        .limit(INBOX_LIMIT)
        .all(db)
        .await?;
    Ok(rows)
}

async fn owned<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    notification_id: Uuid,
) -> PmResult<notifications::Model> {
    notifications::Entity::find_by_id(notification_id)
        .filter(notifications::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(PmError::NotFound("notification"))
}

pub async fn mark_read<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    notification_id: Uuid,
) -> PmResult<notifications::Model> {
    let existing = owned(db, user_id, notification_id).await?;
    if existing.is_read {
        return Ok(existing);
    }
    let mut active: notifications::ActiveModel = existing.into();
    active.is_read = Set(true);
    Ok(active.update(db).await?)
}

pub async fn mark_all_read<C: ConnectionTrait>(db: &C, user_id: Uuid) -> PmResult<u64> {
    let result = notifications::Entity::update_many()
        .col_expr(notifications::Column::IsRead, Expr::value(true))
        .filter(notifications::Column::UserId.eq(user_id))
        .filter(notifications::Column::IsRead.eq(false))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

pub async fn delete_notification<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    notification_id: Uuid,
) -> PmResult<()> {
    let existing = owned(db, user_id, notification_id).await?;
    notifications::Entity::delete_by_id(existing.id)
        .exec(db)
        .await?;
    Ok(())
}

/// Deletes notifications created before `cutoff`.
pub async fn prune_older_than<C: ConnectionTrait>(
    db: &C,
    cutoff: DateTime<Utc>,
) -> PmResult<u64> {
    let cutoff: sea_orm::prelude::DateTimeWithTimeZone = cutoff.into();
    let result = notifications::Entity::delete_many()
        .filter(notifications::Column::CreatedAt.lt(cutoff))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_are_unique_and_ordered() {
        let found = extract_mentions("@alice ping @bob_2, then @alice again");
        assert_eq!(found, vec!["alice".to_string(), "bob_2".to_string()]);
    }

    #[test]
    fn bare_at_signs_are_ignored() {
        assert!(extract_mentions("meet @ noon @").is_empty());
        assert_eq!(extract_mentions("@@carol!"), vec!["carol".to_string()]);
    }

    #[test]
    fn mention_stops_at_punctuation() {
        assert_eq!(
            extract_mentions("thanks @dave. (cc @erin)"),
            vec!["dave".to_string(), "erin".to_string()]
        );
    }

    #[test]
    fn mention_handles_are_ascii_words() {
        assert_eq!(
            extract_mentions("@zoë and @ops-team, mail ops@corp.io"),
            vec!["zo".to_string(), "ops".to_string(), "corp".to_string()]
        );
    }
}
