mod activity;
mod projects;
mod tasks;
pub mod types;
mod users;

use async_graphql::{
    Context, EmptySubscription, ErrorExtensions, MergedObject, Object, Result, Schema,
    SimpleObject,
};
use platform_api::{ApiError, ApiResult};
use platform_authz::{PolicyEngine, Principal};
use platform_db::DbPool;
use products_pm::{PmResult, storage::LocalFileStore};
use sea_orm::{ConnectionTrait, Statement};
use tracing::instrument;

use crate::auth::TokenKeys;

pub type SchemaType = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Shared resolver state, installed once as schema data.
#[derive(Clone)]
pub struct GraphqlData {
    pub pool: DbPool,
    pub engine: PolicyEngine,
    pub store: LocalFileStore,
    pub tokens: TokenKeys,
}

#[derive(MergedObject, Default)]
pub struct QueryRoot(
    SystemQuery,
    users::UserQuery,
    projects::ProjectQuery,
    tasks::TaskQuery,
    activity::ActivityQuery,
);

#[derive(MergedObject, Default)]
pub struct MutationRoot(
    users::UserMutation,
    projects::ProjectMutation,
    tasks::TaskMutation,
    activity::ActivityMutation,
);

fn builder() -> async_graphql::SchemaBuilder<QueryRoot, MutationRoot, EmptySubscription> {
    Schema::build(
        QueryRoot::default(),
        MutationRoot::default(),
        EmptySubscription,
    )
}

pub fn build_schema(data: GraphqlData) -> SchemaType {
    builder().data(data).finish()
}

/// SDL of the public schema.
pub fn sdl() -> String {
    builder().finish().sdl()
}

pub(crate) fn data<'a>(ctx: &Context<'a>) -> Result<&'a GraphqlData> {
    ctx.data::<GraphqlData>()
}

/// The authenticated caller, attached per request by the HTTP layer.
pub(crate) fn principal(ctx: &Context<'_>) -> Result<Principal> {
    ctx.data_opt::<Principal>()
        .copied()
        .ok_or_else(|| ApiError::Unauthenticated.extend())
}

/// Converts domain results into GraphQL errors carrying an error code.
pub(crate) trait Resolve<T> {
    fn resolve(self) -> Result<T>;
}

impl<T> Resolve<T> for PmResult<T> {
    fn resolve(self) -> Result<T> {
        self.map_err(|err| ApiError::from(err).extend())
    }
}

#[derive(Default)]
pub struct SystemQuery;

#[Object]
impl SystemQuery {
    #[instrument(name = "graphql.health", skip_all)]
    async fn health(&self, ctx: &Context<'_>) -> ApiResult<HealthPayload> {
        let db_ok = match ctx.data_opt::<GraphqlData>() {
            Some(data) => {
                let backend = data.pool.get_database_backend();
                data.pool
                    .execute(Statement::from_string(backend, "SELECT 1".to_string()))
                    .await
                    .is_ok()
            }
            None => false,
        };
        Ok(HealthPayload { ok: true, db_ok })
    }

    #[instrument(name = "graphql.version", skip_all)]
    async fn version(&self) -> ApiResult<String> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct HealthPayload {
    pub ok: bool,
    pub db_ok: bool,
}

#[cfg(test)]
pub(crate) mod test_support {
    use migration::{Migrator, MigratorTrait};
    use platform_authz::ProjectPolicy;
    use sea_orm::{ConnectOptions, Database};

    use super::*;

    pub async fn schema() -> (SchemaType, DbPool) {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let pool = Database::connect(options).await.unwrap();
        Migrator::up(&pool, None).await.unwrap();
        let data = GraphqlData {
            pool: pool.clone(),
            engine: PolicyEngine::new(ProjectPolicy::ManagerOrAdmin),
            store: LocalFileStore::new(std::env::temp_dir().join("pm-server-tests")),
            tokens: TokenKeys::new(&[3u8; 32], chrono::Duration::minutes(5)),
        };
        (build_schema(data), pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::Request;
    use serde_json::json;

    #[tokio::test]
    async fn health_query_reports_database() {
        let (schema, _pool) = test_support::schema().await;
        let response = schema
            .execute(Request::new("{ health { ok dbOk } }"))
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let body = response.data.into_json().unwrap();
        assert_eq!(body, json!({"health": {"ok": true, "dbOk": true}}));
    }

    #[test]
    fn sdl_exposes_core_operations() {
        let sdl = sdl();
        for name in [
            "createTask",
            "updateTask",
            "updateProject",
            "markAllNotificationsRead",
            "calendarTasks",
            "dashboard",
            "workload",
        ] {
            assert!(sdl.contains(name), "schema is missing {name}");
        }
    }

    #[tokio::test]
    async fn protected_fields_require_a_principal() {
        let (schema, _pool) = test_support::schema().await;
        let response = schema.execute(Request::new("{ me { id } }")).await;
        assert_eq!(response.errors.len(), 1);
        let code = response.errors[0]
            .extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .cloned();
        assert_eq!(code, Some(async_graphql::Value::from("UNAUTHENTICATED")));
    }
}
