//! Periodic background jobs: overdue detection and notification retention.
//!
//! Each overdue task is claimed with a conditional update before anything is
//! sent, so several sweepers sharing a database never notify twice.

use std::time::Duration;

use chrono::{DateTime, Utc};
use entity::{
    notifications::Kind,
    tasks::{self, Status},
};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    prelude::DateTimeWithTimeZone, sea_query::Expr,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{info, warn};

use crate::{PmResult, notifications};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    pub overdue_every: Duration,
    pub retention_every: Duration,
    pub retention_days: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            overdue_every: Duration::from_secs(60),
            retention_every: Duration::from_secs(24 * 60 * 60),
            retention_days: 30,
        }
    }
}

/// Notifies the assignee of every open, past-due task that has not been
/// flagged yet. Returns the number of tasks notified by this run.
///
/// A task is claimed before its notification is written. If the write fails
/// the claim is released so a later sweep retries it.
pub async fn sweep_overdue<C: ConnectionTrait>(db: &C, at: DateTime<Utc>) -> PmResult<usize> {
    let cutoff: DateTimeWithTimeZone = at.into();
    let candidates = tasks::Entity::find()
        .filter(tasks::Column::Status.ne(Status::Done))
        .filter(tasks::Column::DueDate.lt(cutoff))
        .filter(tasks::Column::IsOverdueNotified.eq(false))
        .filter(tasks::Column::AssigneeId.is_not_null())
        .order_by_asc(tasks::Column::DueDate)
        .all(db)
        .await?;

    let mut notified = 0;
    for task in candidates {
        let (Some(assignee), Some(due)) = (task.assignee_id, task.due_date) else {
            continue;
        };
        if !claim_overdue(db, &task, at).await? {
            continue;
        }
        let message = format!(
            "\"{}\" was due {} UTC",
            task.title,
            due.with_timezone(&Utc).format("%Y-%m-%d %H:%M")
        );
        match notifications::notify(db, assignee, "Task overdue", &message, Kind::Overdue).await {
            Some(_) => notified += 1,
            None => release_claim(db, &task).await?,
        }
    }
    Ok(notified)
}

/// Flags `task` as notified, but only while it still matches what the sweep
/// selected: open, assigned to the same user, and past the same due date.
/// Returns `false` when another sweeper or a concurrent edit got there first.
pub async fn claim_overdue<C: ConnectionTrait>(
    db: &C,
    task: &tasks::Model,
    at: DateTime<Utc>,
) -> PmResult<bool> {
    let (Some(assignee), Some(due)) = (task.assignee_id, task.due_date) else {
        return Ok(false);
    };
    let cutoff: DateTimeWithTimeZone = at.into();
    if due >= cutoff {
        return Ok(false);
    }
    let result = tasks::Entity::update_many()
        .col_expr(tasks::Column::IsOverdueNotified, Expr::value(true))
        .filter(tasks::Column::Id.eq(task.id))
        .filter(tasks::Column::IsOverdueNotified.eq(false))
        .filter(tasks::Column::Status.ne(Status::Done))
        .filter(tasks::Column::AssigneeId.eq(assignee))
        .filter(tasks::Column::DueDate.eq(due))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

async fn release_claim<C: ConnectionTrait>(db: &C, task: &tasks::Model) -> PmResult<()> {
    tasks::Entity::update_many()
        .col_expr(tasks::Column::IsOverdueNotified, Expr::value(false))
        .filter(tasks::Column::Id.eq(task.id))
        .filter(tasks::Column::DueDate.eq(task.due_date))
        .exec(db)
        .await?;
    warn!(task_id = %task.id, "overdue notification not stored; claim released");
    Ok(())
}

/// Deletes notifications older than `retention_days`.
pub async fn prune_notifications<C: ConnectionTrait>(
    db: &C,
    at: DateTime<Utc>,
    retention_days: i64,
) -> PmResult<u64> {
    notifications::prune_older_than(db, at - chrono::Duration::days(retention_days)).await
}

/// Running sweeper loops. Dropping the handle leaves them running; call
/// [`SweeperHandle::shutdown`] to stop them.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "sweeper task ended abnormally");
            }
        }
    }
}

/// Starts both loops. The first tick fires immediately, so retention also
/// runs once at startup.
pub fn spawn(db: DatabaseConnection, config: SweeperConfig) -> SweeperHandle {
    let (stop, stop_rx) = watch::channel(false);

    let overdue = {
        let db = db.clone();
        let mut stop_rx = stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = interval(config.overdue_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sweep_overdue(&db, Utc::now()).await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "overdue notifications sent"),
                            Err(err) => warn!(error = %err, "overdue sweep failed"),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    let retention = {
        let mut stop_rx = stop_rx;
        tokio::spawn(async move {
            let mut ticker = interval(config.retention_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match prune_notifications(&db, Utc::now(), config.retention_days).await {
                            Ok(removed) => info!(removed, "old notifications pruned"),
                            Err(err) => warn!(error = %err, "notification cleanup failed"),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    info!(
        overdue_every = ?config.overdue_every,
        retention_every = ?config.retention_every,
        "background sweepers started"
    );
    SweeperHandle {
        stop,
        tasks: vec![overdue, retention],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_cadence() {
        let config = SweeperConfig::default();
        assert_eq!(config.overdue_every, Duration::from_secs(60));
        assert_eq!(config.retention_every, Duration::from_secs(86_400));
        assert_eq!(config.retention_days, 30);
    }
}
