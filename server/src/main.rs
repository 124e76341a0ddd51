mod auth;
mod config;
mod graphql;
mod http;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use entity::users::Role;
use migration::{Migrator, MigratorTrait};
use platform_authz::PolicyEngine;
use platform_db::{DatabaseSettings, DbPool, connect};
use platform_obs::{ObsConfig, init_tracing};
use products_pm::{
    PmError,
    storage::LocalFileStore,
    sweepers,
    users::{self, NewUser},
};
use tracing::{info, warn};

use crate::{
    auth::TokenKeys,
    config::AppConfig,
    graphql::GraphqlData,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "pm-server", version, about = "Project management backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP + GraphQL server and the background sweepers.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Create the first ADMIN account.
    Seed(SeedCommand),
    /// Print the GraphQL schema (SDL).
    #[command(name = "schema:print")]
    SchemaPrint {
        #[arg(long, value_name = "FILE", help = "Destination file path")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

#[derive(Args, Debug)]
struct SeedCommand {
    #[arg(long, default_value = "admin@example.com")]
    admin_email: String,
    #[arg(long, env = "SEED_ADMIN_PASSWORD")]
    admin_password: String,
    #[arg(long, default_value = "admin")]
    admin_username: String,
}

impl From<&ServeCommand> for ServeConfig {
    fn from(value: &ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(err).context("failed to read .env");
        }
    }
    init_tracing(ObsConfig::from_env())?;
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(cmd) => run_server(cmd).await,
        Command::Migrate(action) => match action {
            MigrateCommand::Up => migrate_up().await,
            MigrateCommand::Down => migrate_down().await,
        },
        Command::Seed(cmd) => run_seed(cmd).await,
        Command::SchemaPrint { output } => schema_print(output),
    }
}

async fn run_seed(cmd: SeedCommand) -> Result<()> {
    let pool = setup_pool().await?;
    if users::find_by_email(&pool, &cmd.admin_email).await?.is_some() {
        warn!(email = %cmd.admin_email, "admin already present; nothing to seed");
        return Ok(());
    }
    let admin = users::create_user(
        &pool,
        NewUser {
            username: cmd.admin_username,
            email: cmd.admin_email,
            password: cmd.admin_password,
            role: Some(Role::Admin),
        },
    )
    .await
    .map_err(seed_error)?;
    info!(user_id = %admin.id, "admin account created");
    Ok(())
}

fn seed_error(err: PmError) -> anyhow::Error {
    anyhow::Error::new(err).context("failed to create admin account")
}

fn schema_print(path: Option<PathBuf>) -> Result<()> {
    let sdl = graphql::sdl();
    match path {
        Some(target) => {
            std::fs::write(&target, sdl)
                .with_context(|| format!("failed to write {}", target.display()))?;
            info!(path = %target.display(), "schema written");
        }
        None => println!("{sdl}"),
    }
    Ok(())
}

async fn setup_pool() -> Result<DbPool> {
    let settings = DatabaseSettings::from_env();
    connect(&settings).await.map_err(Into::into)
}

async fn run_server(cmd: ServeCommand) -> Result<()> {
    let config = AppConfig::load()?;
    let pool = setup_pool().await?;
    ensure_migrations(&pool, cmd.allow_dirty).await?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("failed to create {}", config.upload_dir.display()))?;
    let tokens = TokenKeys::new(&config.auth_secret, config.token_ttl);
    let graphql_data = GraphqlData {
        pool: pool.clone(),
        engine: PolicyEngine::new(config.project_policy),
        store: LocalFileStore::new(config.upload_dir.clone()),
        tokens: tokens.clone(),
    };
    let schema = graphql::build_schema(graphql_data);
    let state = AppState {
        pool: pool.clone(),
        schema,
        tokens,
        cors_allowed_origins: config.cors_allowed_origins.clone(),
    };

    let sweepers = sweepers::spawn(pool, config.sweepers);
    let served = http::serve((&cmd).into(), state).await;
    sweepers.shutdown().await;
    info!("background sweepers stopped");
    served
}

async fn ensure_migrations(pool: &DbPool, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(pool).await?;
    if !pending.is_empty() && !allow_dirty {
        anyhow::bail!(
            "pending migrations detected; run `cargo run -p pm-server -- migrate up` or pass --allow-dirty"
        );
    }
    Ok(())
}

async fn migrate_up() -> Result<()> {
    let pool = setup_pool().await?;
    Migrator::up(&pool, None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down() -> Result<()> {
    let pool = setup_pool().await?;
    Migrator::down(&pool, Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from(["pm-server", "serve", "--port", "9000", "--allow-dirty"])
            .unwrap();
        match cli.command {
            Command::Serve(cmd) => {
                assert_eq!(cmd.port, 9000);
                assert!(cmd.allow_dirty);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
