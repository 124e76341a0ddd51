mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use entity::{
    notifications::{self, Kind},
    tasks::{self, Status},
};
use products_pm::{
    EditScope, PmError,
    notifications::{
        INBOX_LIMIT, delete_notification, list_for_user, mark_all_read, mark_read, notify,
        notify_mentions,
    },
    sweepers::{self, SweeperConfig, claim_overdue, prune_notifications, sweep_overdue},
    tasks::{NewTask, TaskPatch, create_task, update_task},
};
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};

async fn overdue_task(fx: &Fixture, project_id: uuid::Uuid, title: &str) -> tasks::Model {
    create_task(
        &fx.db,
        project_id,
        NewTask {
            title: title.into(),
            due_date: Some(hours_ago(2)),
            assignee_id: Some(fx.alice.id),
            ..NewTask::default()
        },
        &fx.pm,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn overdue_sweep_notifies_once_until_due_date_changes() {
    let fx = Fixture::new().await;
    let project = fx.project("LATE").await;
    let task = overdue_task(&fx, project.id, "Pay vendor").await;

    assert_eq!(sweep_overdue(&fx.db, Utc::now()).await.unwrap(), 1);
    assert_eq!(sweep_overdue(&fx.db, Utc::now()).await.unwrap(), 0);
    let overdue = notifications_of_kind(&fx.db, fx.alice.id, Kind::Overdue).await;
    assert_eq!(overdue.len(), 1);
    assert!(overdue[0].message.contains("Pay vendor"));
    assert!(reload_task(&fx.db, task.id).await.is_overdue_notified);

    update_task(
        &fx.db,
        task.id,
        TaskPatch {
            due_date: Some(Some(hours_ago(1))),
            ..TaskPatch::default()
        },
        EditScope::Full,
    )
    .await
    .unwrap();
    assert_eq!(sweep_overdue(&fx.db, Utc::now()).await.unwrap(), 1);
    assert_eq!(
        notifications_of_kind(&fx.db, fx.alice.id, Kind::Overdue)
            .await
            .len(),
        2
    );
}

#[tokio::test]
async fn overdue_claim_rechecks_the_task_it_selected() {
    let fx = Fixture::new().await;
    let project = fx.project("RACE").await;

    let moved = overdue_task(&fx, project.id, "Moved deadline").await;
    let snapshot = reload_task(&fx.db, moved.id).await;
    update_task(
        &fx.db,
        moved.id,
        TaskPatch {
            due_date: Some(Some(hours_ahead(48))),
            ..TaskPatch::default()
        },
        EditScope::Full,
    )
    .await
    .unwrap();
    assert!(!claim_overdue(&fx.db, &snapshot, Utc::now()).await.unwrap());
    assert!(!reload_task(&fx.db, moved.id).await.is_overdue_notified);

    let finished = overdue_task(&fx, project.id, "Finished meanwhile").await;
    let snapshot = reload_task(&fx.db, finished.id).await;
    force_status(&fx.db, &snapshot, Status::Done).await;
    assert!(!claim_overdue(&fx.db, &snapshot, Utc::now()).await.unwrap());

    let open = overdue_task(&fx, project.id, "Still late").await;
    let snapshot = reload_task(&fx.db, open.id).await;
    assert!(claim_overdue(&fx.db, &snapshot, Utc::now()).await.unwrap());
    assert!(!claim_overdue(&fx.db, &snapshot, Utc::now()).await.unwrap());
    assert!(reload_task(&fx.db, open.id).await.is_overdue_notified);
}

#[tokio::test]
async fn overdue_sweep_skips_done_unassigned_and_future_tasks() {
    let fx = Fixture::new().await;
    let project = fx.project("SKIP").await;
    let done = overdue_task(&fx, project.id, "Already done").await;
    force_status(&fx.db, &done, Status::Done).await;
    create_task(
        &fx.db,
        project.id,
        NewTask {
            title: "Nobody's".into(),
            due_date: Some(hours_ago(3)),
            ..NewTask::default()
        },
        &fx.pm,
    )
    .await
    .unwrap();
    create_task(
        &fx.db,
        project.id,
        NewTask {
            title: "Next week".into(),
            due_date: Some(hours_ahead(24 * 7)),
            assignee_id: Some(fx.alice.id),
            ..NewTask::default()
        },
        &fx.pm,
    )
    .await
    .unwrap();

    assert_eq!(sweep_overdue(&fx.db, Utc::now()).await.unwrap(), 0);
    assert!(
        notifications_of_kind(&fx.db, fx.alice.id, Kind::Overdue)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn retention_prunes_only_old_notifications() {
    let fx = Fixture::new().await;
    let old = notify(&fx.db, fx.bob.id, "Old", "from last quarter", Kind::Status)
        .await
        .unwrap();
    let mut active: notifications::ActiveModel = old.into();
    active.created_at = Set(hours_ago(24 * 31));
    active.update(&fx.db).await.unwrap();
    notify(&fx.db, fx.bob.id, "Fresh", "from today", Kind::Status)
        .await
        .unwrap();

    let removed = prune_notifications(&fx.db, Utc::now(), 30).await.unwrap();
    assert_eq!(removed, 1);
    let left = notifications_for(&fx.db, fx.bob.id).await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].title, "Fresh");
}

#[tokio::test]
async fn inbox_is_capped_newest_first_and_owner_scoped() {
    let fx = Fixture::new().await;
    for i in 0..(INBOX_LIMIT + 5) {
        let note = notify(&fx.db, fx.alice.id, "n", &format!("#{i}"), Kind::Assign)
            .await
            .unwrap();
        let mut active: notifications::ActiveModel = note.into();
        active.created_at = Set(hours_ago(100 - i as i64));
        active.update(&fx.db).await.unwrap();
    }

    let inbox = list_for_user(&fx.db, fx.alice.id).await.unwrap();
    assert_eq!(inbox.len() as u64, INBOX_LIMIT);
    assert_eq!(inbox[0].message, format!("#{}", INBOX_LIMIT + 4));

    let first = inbox[0].id;
    let foreign = mark_read(&fx.db, fx.bob.id, first).await;
    assert!(matches!(foreign, Err(PmError::NotFound("notification"))));
    assert!(mark_read(&fx.db, fx.alice.id, first).await.unwrap().is_read);

    let flipped = mark_all_read(&fx.db, fx.alice.id).await.unwrap();
    assert_eq!(flipped, INBOX_LIMIT + 4);

    delete_notification(&fx.db, fx.alice.id, first).await.unwrap();
    assert!(matches!(
        delete_notification(&fx.db, fx.alice.id, first).await,
        Err(PmError::NotFound("notification"))
    ));
}

#[tokio::test]
async fn mentions_skip_author_and_unknown_names() {
    let fx = Fixture::new().await;
    let author = entity::users::Entity::find_by_id(fx.alice.id)
        .one(&fx.db)
        .await
        .unwrap()
        .unwrap();

    let sent = notify_mentions(
        &fx.db,
        &author,
        "@bob can you check? cc @alice @ghost @bob",
        "Release notes",
    )
    .await;
    assert_eq!(sent, 1);
    let mentions = notifications_of_kind(&fx.db, fx.bob.id, Kind::Mention).await;
    assert_eq!(mentions.len(), 1);
    assert_eq!(mentions[0].message, "alice mentioned you on \"Release notes\"");
    assert!(notifications_for(&fx.db, fx.alice.id).await.is_empty());
}

#[tokio::test]
async fn notify_failure_is_swallowed() {
    let fx = Fixture::new().await;
    let missing_user = uuid::Uuid::new_v4();
    assert!(
        notify(&fx.db, missing_user, "x", "y", Kind::Status)
            .await
            .is_none()
    );
    assert_eq!(notifications::Entity::find().count(&fx.db).await.unwrap(), 0);
}

#[tokio::test]
async fn spawned_sweepers_run_and_stop() {
    let fx = Fixture::new().await;
    let project = fx.project("BG").await;
    overdue_task(&fx, project.id, "Background").await;

    let handle = sweepers::spawn(
        fx.db.clone(),
        SweeperConfig {
            overdue_every: Duration::from_millis(20),
            retention_every: Duration::from_millis(20),
            retention_days: 30,
        },
    );
    let mut delivered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !notifications_of_kind(&fx.db, fx.alice.id, Kind::Overdue)
            .await
            .is_empty()
        {
            delivered = true;
            break;
        }
    }
    handle.shutdown().await;
    assert!(delivered, "overdue sweep should have fired");
    assert_eq!(
        notifications_of_kind(&fx.db, fx.alice.id, Kind::Overdue)
            .await
            .len(),
        1
    );
}
