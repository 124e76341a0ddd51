//! Connection settings, pool construction and storage error classification.

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, SqlErr};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Shared connection pool handle. Cloning is cheap; every operation takes it explicitly.
pub type DbPool = DatabaseConnection;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database url missing (env {0})")]
    MissingUrl(String),
    #[error("failed to connect to database: {0}")]
    Connect(#[from] DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_url_key")]
    env_key: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_url_key() -> String {
    "DATABASE_URL".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    8
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            env_key: default_url_key(),
            url: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl DatabaseSettings {
    pub fn new(env_key: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
            ..Self::default()
        }
    }

    /// Settings pointing at an explicit URL, bypassing the environment.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Reads `DATABASE_URL` and `DB_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(max) = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
        {
            settings.max_connections = max;
        }
        settings
    }

    pub fn database_url(&self) -> Result<String, DbError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        std::env::var(&self.env_key).map_err(|_| DbError::MissingUrl(self.env_key.clone()))
    }
}

/// Opens the pool described by `settings`.
pub async fn connect(settings: &DatabaseSettings) -> DbResult<DbPool> {
    let url = settings.database_url()?;
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(settings.max_connections)
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .sqlx_logging(false);
    let pool = Database::connect(options).await?;
    info!(max_connections = settings.max_connections, "database pool ready");
    Ok(pool)
}

/// Coarse category of a storage failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbFailure {
    UniqueViolation,
    ForeignKeyViolation,
    Other,
}

/// Classifies a [`DbErr`] so callers can surface conflicts separately from transient faults.
pub fn classify(err: &DbErr) -> DbFailure {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => return DbFailure::UniqueViolation,
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => return DbFailure::ForeignKeyViolation,
        _ => {}
    }
    let text = err.to_string();
    if text.contains("UNIQUE constraint failed") || text.contains("duplicate key value") {
        DbFailure::UniqueViolation
    } else if text.contains("FOREIGN KEY constraint failed")
        || text.contains("violates foreign key constraint")
    {
        DbFailure::ForeignKeyViolation
    } else {
        DbFailure::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_url_wins_over_env() {
        let settings = DatabaseSettings::with_url("sqlite::memory:");
        assert_eq!(settings.database_url().unwrap(), "sqlite::memory:");
    }

    #[test]
    fn missing_env_reports_key() {
        let settings = DatabaseSettings::new("PM_TEST_DATABASE_URL_THAT_IS_NOT_SET");
        let err = settings.database_url().unwrap_err();
        assert!(err.to_string().contains("PM_TEST_DATABASE_URL_THAT_IS_NOT_SET"));
    }

    #[test]
    fn classifies_driver_messages() {
        let unique = DbErr::Custom("UNIQUE constraint failed: projects.project_code".into());
        assert_eq!(classify(&unique), DbFailure::UniqueViolation);
        let fk = DbErr::Custom("FOREIGN KEY constraint failed".into());
        assert_eq!(classify(&fk), DbFailure::ForeignKeyViolation);
        let other = DbErr::Custom("connection reset".into());
        assert_eq!(classify(&other), DbFailure::Other);
    }

    #[tokio::test]
    async fn connects_to_in_memory_sqlite() {
        let mut settings = DatabaseSettings::with_url("sqlite::memory:");
        settings.max_connections = 1;
        let pool = connect(&settings).await.unwrap();
        pool.ping().await.unwrap();
    }
}
