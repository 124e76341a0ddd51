//! GraphQL mirrors of the storage models.

use async_graphql::{Enum, SimpleObject};
use chrono::{DateTime, Utc};
use entity::{attachments, comments, notifications, projects, tasks, users};
use products_pm::{
    projects::MemberView,
    stats::{DashboardStats, ProjectCounts, TaskCounts, Workload},
    tree::TaskNode as Tree,
};
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

fn utc(value: DateTimeWithTimeZone) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}

macro_rules! mirror_enum {
    ($name:ident, $module:ident::$ty:ident, [$($variant:ident),+ $(,)?]) => {
        #[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
        pub enum $name {
            $($variant),+
        }

        impl From<$module::$ty> for $name {
            fn from(value: $module::$ty) -> Self {
                match value {
                    $($module::$ty::$variant => Self::$variant),+
                }
            }
        }

        impl From<$name> for $module::$ty {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $module::$ty::$variant),+
                }
            }
        }
    };
}

mirror_enum!(UserRole, users::Role, [Admin, Pm, Member]);
mirror_enum!(ProjectStatus, projects::Status, [InProgress, Completed, Archived]);
mirror_enum!(TaskStatus, tasks::Status, [Todo, InProgress, Review, Done]);
mirror_enum!(TaskPriority, tasks::Priority, [Low, Medium, High, Urgent]);
mirror_enum!(NotificationKind, notifications::Kind, [Mention, Assign, Status, Overdue]);

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "User")]
pub struct UserNode {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl From<users::Model> for UserNode {
    fn from(user: users::Model) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role.into(),
            created_at: utc(user.created_at),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct AuthPayload {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserNode,
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Project")]
pub struct ProjectNode {
    pub id: Uuid,
    pub name: String,
    pub project_code: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<projects::Model> for ProjectNode {
    fn from(project: projects::Model) -> Self {
        Self {
            id: project.id,
            name: project.name,
            project_code: project.project_code,
            description: project.description,
            status: project.status.into(),
            created_by: project.created_by,
            created_at: utc(project.created_at),
            updated_at: utc(project.updated_at),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "ProjectMember")]
pub struct MemberNode {
    pub user: UserNode,
    pub is_manager: bool,
    pub joined_at: DateTime<Utc>,
}

impl From<MemberView> for MemberNode {
    fn from(view: MemberView) -> Self {
        Self {
            user: view.user.into(),
            is_manager: view.is_manager,
            joined_at: utc(view.joined_at),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Task")]
pub struct TaskNode {
    pub id: Uuid,
    pub project_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Populated for unfiltered project listings only.
    pub children: Vec<TaskNode>,
}

impl From<tasks::Model> for TaskNode {
    fn from(task: tasks::Model) -> Self {
        Self {
            id: task.id,
            project_id: task.project_id,
            parent_id: task.parent_id,
            title: task.title,
            description: task.description,
            status: task.status.into(),
            priority: task.priority.into(),
            start_date: task.start_date.map(utc),
            due_date: task.due_date.map(utc),
            assignee_id: task.assignee_id,
            created_by: task.created_by,
            completed_at: task.completed_at.map(utc),
            created_at: utc(task.created_at),
            updated_at: utc(task.updated_at),
            children: Vec::new(),
        }
    }
}

impl From<Tree> for TaskNode {
    fn from(tree: Tree) -> Self {
        let mut node = TaskNode::from(tree.task);
        node.children = tree.children.into_iter().map(TaskNode::from).collect();
        node
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Comment")]
pub struct CommentNode {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub parent_id: Option<Uuid>,
    pub image_url: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<comments::Model> for CommentNode {
    fn from(comment: comments::Model) -> Self {
        Self {
            id: comment.id,
            task_id: comment.task_id,
            user_id: comment.user_id,
            content: comment.content,
            parent_id: comment.parent_id,
            image_url: comment.image_url,
            is_deleted: comment.is_deleted,
            created_at: utc(comment.created_at),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Attachment")]
pub struct AttachmentNode {
    pub id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub file_type: Option<String>,
    pub task_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<attachments::Model> for AttachmentNode {
    fn from(attachment: attachments::Model) -> Self {
        Self {
            id: attachment.id,
            file_name: attachment.file_name,
            file_path: attachment.file_path,
            file_type: attachment.file_type,
            task_id: attachment.task_id,
            project_id: attachment.project_id,
            uploaded_by: attachment.uploaded_by,
            created_at: utc(attachment.created_at),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Notification")]
pub struct NotificationNode {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<notifications::Model> for NotificationNode {
    fn from(note: notifications::Model) -> Self {
        Self {
            id: note.id,
            title: note.title,
            message: note.message,
            kind: note.kind.into(),
            is_read: note.is_read,
            created_at: utc(note.created_at),
        }
    }
}

#[derive(Clone, Copy, Debug, SimpleObject)]
pub struct ProjectCountsNode {
    pub total: u64,
    pub completed: u64,
    pub in_progress: u64,
}

#[derive(Clone, Copy, Debug, SimpleObject)]
pub struct TaskCountsNode {
    pub total: u64,
    pub done: u64,
    pub in_progress: u64,
    pub overdue: u64,
}

#[derive(Clone, Copy, Debug, SimpleObject)]
pub struct Dashboard {
    pub projects: ProjectCountsNode,
    pub tasks: TaskCountsNode,
}

impl From<DashboardStats> for Dashboard {
    fn from(stats: DashboardStats) -> Self {
        let ProjectCounts {
            total,
            completed,
            in_progress,
        } = stats.projects;
        let TaskCounts {
            total: task_total,
            done,
            in_progress: task_in_progress,
            overdue,
        } = stats.tasks;
        Self {
            projects: ProjectCountsNode {
                total,
                completed,
                in_progress,
            },
            tasks: TaskCountsNode {
                total: task_total,
                done,
                in_progress: task_in_progress,
                overdue,
            },
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Workload")]
pub struct WorkloadNode {
    pub user: UserNode,
    pub active_count: u64,
    pub active_tasks: Vec<TaskNode>,
}

impl From<Workload> for WorkloadNode {
    fn from(row: Workload) -> Self {
        Self {
            active_count: row.active_count(),
            user: row.user.into(),
            active_tasks: row.active_tasks.into_iter().map(Into::into).collect(),
        }
    }
}
