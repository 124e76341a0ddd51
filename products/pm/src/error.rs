use platform_api::ApiError;
use platform_authz::AuthzError;
use platform_db::{DbFailure, classify};
use sea_orm::DbErr;
use thiserror::Error;

pub type PmResult<T> = Result<T, PmError>;

#[derive(Debug, Error)]
pub enum PmError {
    #[error("{0}")]
    Validation(String),
    /// A task cannot move to DONE while direct subtasks are open.
    #[error("incomplete children: {0} subtasks not yet done")]
    IncompleteChildren(u64),
    /// A project cannot be completed while tasks are open.
    #[error("{0} tasks not yet done")]
    OpenTasks(u64),
    #[error("{0}")]
    Permission(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("invalid credentials")]
    Unauthenticated,
    #[error("storage error: {0}")]
    Storage(#[source] DbErr),
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl PmError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// True for the validation family, including the completion gates.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::IncompleteChildren(_) | Self::OpenTasks(_)
        )
    }
}

impl From<DbErr> for PmError {
    fn from(err: DbErr) -> Self {
        match classify(&err) {
            DbFailure::UniqueViolation => Self::Conflict("duplicate value".into()),
            DbFailure::ForeignKeyViolation => {
                Self::Conflict("record is referenced by other data".into())
            }
            DbFailure::Other => Self::Storage(err),
        }
    }
}

impl From<AuthzError> for PmError {
    fn from(err: AuthzError) -> Self {
        Self::Permission(err.to_string())
    }
}

impl From<PmError> for ApiError {
    fn from(err: PmError) -> Self {
        match err {
            PmError::Validation(_) | PmError::IncompleteChildren(_) | PmError::OpenTasks(_) => {
                ApiError::InvalidInput(err.to_string())
            }
            PmError::Permission(msg) => ApiError::Forbidden(msg),
            PmError::NotFound(what) => ApiError::NotFound(what.to_string()),
            PmError::Conflict(msg) => ApiError::Conflict(msg),
            PmError::Unauthenticated => ApiError::Unauthenticated,
            PmError::Storage(db) => ApiError::internal(anyhow::Error::new(db)),
            PmError::PasswordHash(_) => ApiError::internal(anyhow::anyhow!(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_become_conflicts() {
        let err: PmError = DbErr::Custom("UNIQUE constraint failed: users.email".into()).into();
        assert!(matches!(err, PmError::Conflict(_)));
        let err: PmError = DbErr::Custom("pool timed out".into()).into();
        assert!(matches!(err, PmError::Storage(_)));
    }

    #[test]
    fn gate_errors_report_counts() {
        assert_eq!(PmError::OpenTasks(3).to_string(), "3 tasks not yet done");
        let api: ApiError = PmError::IncompleteChildren(2).into();
        assert_eq!(api.code(), "VALIDATION");
        assert!(api.to_string().contains("2 subtasks"));
    }

    #[test]
    fn storage_errors_are_internal() {
        let api: ApiError = PmError::Storage(DbErr::Custom("boom".into())).into();
        assert_eq!(api.code(), "INTERNAL");
        assert_eq!(api.to_string(), "internal server error");
    }

    #[test]
    fn hashing_failures_are_internal_not_storage() {
        let err = PmError::PasswordHash("salt too short".into());
        assert!(!matches!(err, PmError::Storage(_)));
        let api: ApiError = err.into();
        assert_eq!(api.code(), "INTERNAL");
        assert_eq!(api.to_string(), "internal server error");
    }
}
