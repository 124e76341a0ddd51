#![allow(dead_code)]

use chrono::{Duration, Utc};
use entity::{
    notifications, project_members, projects,
    tasks::{self, Status},
    users::{self, Role},
};
use migration::{Migrator, MigratorTrait};
use products_pm::{
    Principal,
    projects::{NewProject, create_project},
    tasks::{NewTask, create_task},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set, prelude::DateTimeWithTimeZone,
};
use uuid::Uuid;

/// Fresh, migrated in-memory database. A single connection keeps every
/// statement on the same SQLite memory instance.
pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.expect("connect sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

pub struct Fixture {
    pub db: DatabaseConnection,
    pub admin: Principal,
    pub pm: Principal,
    pub alice: Principal,
    pub bob: Principal,
}

impl Fixture {
    /// Users `admin` (ADMIN), `pat` (PM), `alice` and `bob` (MEMBER).
    pub async fn new() -> Self {
        let db = setup_db().await;
        let admin = seed_user(&db, "admin", Role::Admin).await;
        let pm = seed_user(&db, "pat", Role::Pm).await;
        let alice = seed_user(&db, "alice", Role::Member).await;
        let bob = seed_user(&db, "bob", Role::Member).await;
        Self {
            db,
            admin,
            pm,
            alice,
            bob,
        }
    }

    /// Project created by the PM with alice and bob as plain members.
    pub async fn project(&self, code: &str) -> projects::Model {
        let project = create_project(
            &self.db,
            &self.pm,
            NewProject {
                name: format!("Project {code}"),
                project_code: code.to_string(),
                description: None,
                manager_ids: Vec::new(),
            },
        )
        .await
        .expect("create project");
        add_member(&self.db, project.id, self.alice.id).await;
        add_member(&self.db, project.id, self.bob.id).await;
        project
    }

    pub async fn task(
        &self,
        project_id: Uuid,
        title: &str,
        assignee: Option<Uuid>,
        parent: Option<Uuid>,
    ) -> tasks::Model {
        create_task(
            &self.db,
            project_id,
            NewTask {
                title: title.to_string(),
                assignee_id: assignee,
                parent_id: parent,
                ..NewTask::default()
            },
            &self.pm,
        )
        .await
        .expect("create task")
    }
}

/// Inserts a user directly; the hash is a placeholder since these users never log in.
pub async fn seed_user(db: &DatabaseConnection, username: &str, role: Role) -> Principal {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(username.to_string()),
        email: Set(format!("{username}@example.com")),
        password_hash: Set("not-a-real-hash".to_string()),
        role: Set(role),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed user");
    Principal::new(user.id, user.role)
}

pub async fn add_member(db: &DatabaseConnection, project_id: Uuid, user_id: Uuid) {
    project_members::ActiveModel {
        project_id: Set(project_id),
        user_id: Set(user_id),
        is_manager: Set(false),
        joined_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await
    .expect("add member");
}

pub async fn notifications_for(
    db: &DatabaseConnection,
    user_id: Uuid,
) -> Vec<notifications::Model> {
    notifications::Entity::find()
        .filter(notifications::Column::UserId.eq(user_id))
        .order_by_asc(notifications::Column::CreatedAt)
        .all(db)
        .await
        .expect("load notifications")
}

pub async fn notifications_of_kind(
    db: &DatabaseConnection,
    user_id: Uuid,
    kind: notifications::Kind,
) -> Vec<notifications::Model> {
    notifications_for(db, user_id)
        .await
        .into_iter()
        .filter(|n| n.kind == kind)
        .collect()
}

pub async fn reload_task(db: &DatabaseConnection, id: Uuid) -> tasks::Model {
    tasks::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("load task")
        .expect("task exists")
}

pub async fn reload_project(db: &DatabaseConnection, id: Uuid) -> projects::Model {
    projects::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("load project")
        .expect("project exists")
}

/// Forces a status straight into storage, bypassing the lifecycle rules.
pub async fn force_status(db: &DatabaseConnection, task: &tasks::Model, status: Status) {
    let mut active: tasks::ActiveModel = task.clone().into();
    active.status = Set(status);
    active.completed_at = Set((status == Status::Done).then(|| Utc::now().into()));
    active.update(db).await.expect("force status");
}

pub fn hours_ago(hours: i64) -> DateTimeWithTimeZone {
    (Utc::now() - Duration::hours(hours)).into()
}

pub fn hours_ahead(hours: i64) -> DateTimeWithTimeZone {
    (Utc::now() + Duration::hours(hours)).into()
}
