mod common;

use common::*;
use entity::users::Role;
use products_pm::{
    EditScope, PmError, PolicyEngine, ProjectPolicy,
    access::{
        authorize_task_create, authorize_task_delete, authorize_task_edit, authorize_task_read,
        require_project_manager, require_project_member,
    },
};

#[tokio::test]
async fn membership_gates_project_reads() {
    let fx = Fixture::new().await;
    let engine = PolicyEngine::default();
    let project = fx.project("READ").await;
    let outsider = seed_user(&fx.db, "olga", Role::Member).await;

    require_project_member(&fx.db, &engine, &fx.alice, project.id)
        .await
        .unwrap();
    require_project_member(&fx.db, &engine, &fx.admin, project.id)
        .await
        .unwrap();
    let err = require_project_member(&fx.db, &engine, &outsider, project.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PmError::Permission(_)));

    let missing = require_project_member(&fx.db, &engine, &fx.alice, uuid::Uuid::new_v4()).await;
    assert!(matches!(missing, Err(PmError::NotFound("project"))));
}

#[tokio::test]
async fn manager_policy_follows_the_manager_flag() {
    let fx = Fixture::new().await;
    let engine = PolicyEngine::new(ProjectPolicy::ManagerOrAdmin);
    let project = fx.project("MAN").await;

    require_project_manager(&fx.db, &engine, &fx.pm, project.id)
        .await
        .unwrap();
    require_project_manager(&fx.db, &engine, &fx.admin, project.id)
        .await
        .unwrap();
    assert!(matches!(
        require_project_manager(&fx.db, &engine, &fx.alice, project.id).await,
        Err(PmError::Permission(_))
    ));
}

#[tokio::test]
async fn owner_policy_ignores_manager_flag() {
    let fx = Fixture::new().await;
    let engine = PolicyEngine::new(ProjectPolicy::OwnerOrAdmin);
    let project = fx.project("OWN").await;
    let other_pm = seed_user(&fx.db, "quinn", Role::Pm).await;
    add_member(&fx.db, project.id, other_pm.id).await;
    products_pm::projects::update_project(
        &fx.db,
        project.id,
        products_pm::projects::ProjectPatch {
            manager_ids: Some(vec![other_pm.id]),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    require_project_manager(&fx.db, &engine, &fx.pm, project.id)
        .await
        .unwrap();
    assert!(matches!(
        require_project_manager(&fx.db, &engine, &other_pm, project.id).await,
        Err(PmError::Permission(_))
    ));
}

#[tokio::test]
async fn only_member_pms_and_admins_create_tasks() {
    let fx = Fixture::new().await;
    let engine = PolicyEngine::default();
    let project = fx.project("MAKE").await;
    let stranger_pm = seed_user(&fx.db, "sam", Role::Pm).await;

    authorize_task_create(&fx.db, &engine, &fx.pm, project.id)
        .await
        .unwrap();
    authorize_task_create(&fx.db, &engine, &fx.admin, project.id)
        .await
        .unwrap();
    for denied in [&fx.alice, &stranger_pm] {
        assert!(matches!(
            authorize_task_create(&fx.db, &engine, denied, project.id).await,
            Err(PmError::Permission(_))
        ));
    }
}

#[tokio::test]
async fn edit_scope_depends_on_role_and_assignment() {
    let fx = Fixture::new().await;
    let engine = PolicyEngine::default();
    let project = fx.project("SCOPE").await;
    let task = fx.task(project.id, "Scoped", Some(fx.alice.id), None).await;

    let (_, scope) = authorize_task_edit(&fx.db, &engine, &fx.pm, task.id)
        .await
        .unwrap();
    assert_eq!(scope, EditScope::Full);
    let (loaded, scope) = authorize_task_edit(&fx.db, &engine, &fx.alice, task.id)
        .await
        .unwrap();
    assert_eq!(scope, EditScope::AssigneeOnly);
    assert_eq!(loaded.id, task.id);

    let err = authorize_task_edit(&fx.db, &engine, &fx.bob, task.id)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "insufficient permission to edit this task");

    assert!(matches!(
        authorize_task_delete(&fx.db, &engine, &fx.alice, task.id).await,
        Err(PmError::Permission(_))
    ));
    authorize_task_delete(&fx.db, &engine, &fx.admin, task.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn task_reads_follow_project_membership() {
    let fx = Fixture::new().await;
    let engine = PolicyEngine::default();
    let project = fx.project("TR").await;
    let task = fx.task(project.id, "Visible", None, None).await;
    let outsider = seed_user(&fx.db, "uma", Role::Member).await;

    authorize_task_read(&fx.db, &engine, &fx.bob, task.id)
        .await
        .unwrap();
    assert!(matches!(
        authorize_task_read(&fx.db, &engine, &outsider, task.id).await,
        Err(PmError::Permission(_))
    ));
    assert!(matches!(
        authorize_task_read(&fx.db, &engine, &fx.bob, uuid::Uuid::new_v4()).await,
        Err(PmError::NotFound("task"))
    ));
}
