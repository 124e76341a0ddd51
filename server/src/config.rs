use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use platform_authz::ProjectPolicy;
use products_pm::sweepers::SweeperConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HS256 signing key for bearer tokens.
    pub auth_secret: Vec<u8>,
    pub token_ttl: chrono::Duration,
    pub cors_allowed_origins: Vec<String>,
    pub project_policy: ProjectPolicy,
    pub upload_dir: PathBuf,
    pub sweepers: SweeperConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secret = lookup("AUTH_SECRET_BASE64").context("AUTH_SECRET_BASE64 missing")?;
        let auth_secret = STANDARD
            .decode(secret.trim())
            .context("invalid AUTH_SECRET_BASE64")?;
        if auth_secret.len() < 32 {
            return Err(anyhow!(
                "AUTH_SECRET_BASE64 must decode to at least 32 bytes"
            ));
        }

        let token_ttl = chrono::Duration::minutes(number(&lookup, "TOKEN_TTL_MINUTES", 720)?);

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect::<Vec<_>>();

        let project_policy = match lookup("PROJECT_POLICY") {
            Some(raw) => ProjectPolicy::parse(&raw)
                .ok_or_else(|| anyhow!("PROJECT_POLICY must be `manager` or `owner`, got {raw:?}"))?,
            None => ProjectPolicy::default(),
        };

        let upload_dir = lookup("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("uploads"));

        let sweepers = SweeperConfig {
            overdue_every: Duration::from_secs(number(&lookup, "OVERDUE_SWEEP_SECS", 60)?),
            retention_every: Duration::from_secs(number(&lookup, "RETENTION_SWEEP_SECS", 86_400)?),
            retention_days: number(&lookup, "NOTIFICATION_RETENTION_DAYS", 30)?,
        };

        Ok(Self {
            auth_secret,
            token_ttl,
            cors_allowed_origins,
            project_policy,
            upload_dir,
            sweepers,
        })
    }
}

fn number<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_a_secret() {
        let config = load(&[("AUTH_SECRET_BASE64", SECRET)]).unwrap();
        assert_eq!(config.auth_secret.len(), 32);
        assert_eq!(config.token_ttl, chrono::Duration::minutes(720));
        assert_eq!(config.project_policy, ProjectPolicy::ManagerOrAdmin);
        assert_eq!(config.sweepers, SweeperConfig::default());
        assert_eq!(config.cors_allowed_origins, vec!["http://localhost:5173"]);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("AUTH_SECRET_BASE64", SECRET),
            ("PROJECT_POLICY", "owner"),
            ("OVERDUE_SWEEP_SECS", "5"),
            ("NOTIFICATION_RETENTION_DAYS", "7"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, ,https://b.example"),
        ])
        .unwrap();
        assert_eq!(config.project_policy, ProjectPolicy::OwnerOrAdmin);
        assert_eq!(config.sweepers.overdue_every, Duration::from_secs(5));
        assert_eq!(config.sweepers.retention_days, 7);
        assert_eq!(config.cors_allowed_origins.len(), 2);
    }

    #[test]
    fn short_or_missing_secret_is_rejected() {
        assert!(load(&[]).is_err());
        assert!(load(&[("AUTH_SECRET_BASE64", "c2hvcnQ=")]).is_err());
        assert!(
            load(&[("AUTH_SECRET_BASE64", SECRET), ("TOKEN_TTL_MINUTES", "soon")]).is_err()
        );
    }
}
