pub mod attachments;
pub mod comments;
pub mod notifications;
pub mod project_members;
pub mod projects;
pub mod tasks;
pub mod users;
