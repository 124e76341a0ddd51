use async_graphql::{Context, ErrorExtensions, InputObject, Object, Result};
use platform_api::{ApiError, internal_error};
use products_pm::users::{self, NewUser, UserPatch};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    Resolve, data, principal,
    types::{AuthPayload, UserNode, UserRole},
};

#[derive(InputObject)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(InputObject)]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Option<UserRole>,
}

#[derive(InputObject, Default)]
pub struct UpdateUserInput {
    pub username: Option<String>,
    pub role: Option<UserRole>,
    pub password: Option<String>,
}

#[derive(Default)]
pub struct UserQuery;

#[Object]
impl UserQuery {
    #[instrument(name = "graphql.me", skip_all)]
    async fn me(&self, ctx: &Context<'_>) -> Result<UserNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        users::get_user(&data.pool, caller.id)
            .await
            .resolve()
            .map(Into::into)
    }

    #[instrument(name = "graphql.users", skip_all)]
    async fn users(&self, ctx: &Context<'_>) -> Result<Vec<UserNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        data.engine
            .require_admin(&caller, "list")
            .map_err(|err| ApiError::Forbidden(err.to_string()).extend())?;
        let rows = users::list_users(&data.pool).await.resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Exact username lookup, used by mention pickers.
    #[instrument(name = "graphql.user_by_username", skip_all)]
    async fn user_by_username(
        &self,
        ctx: &Context<'_>,
        username: String,
    ) -> Result<Option<UserNode>> {
        principal(ctx)?;
        let data = data(ctx)?;
        let found = users::find_by_username(&data.pool, username.trim())
            .await
            .resolve()?;
        Ok(found.map(Into::into))
    }
}

#[derive(Default)]
pub struct UserMutation;

#[Object]
impl UserMutation {
    #[instrument(name = "graphql.login", skip_all)]
    async fn login(
        &self,
        ctx: &Context<'_>,
        email: String,
        password: String,
    ) -> Result<AuthPayload> {
        let data = data(ctx)?;
        let user = users::authenticate(&data.pool, &email, &password)
            .await
            .resolve()?;
        let issued = data
            .tokens
            .issue(&user)
            .map_err(internal_error)?;
        info!(user_id = %user.id, "login succeeded");
        Ok(AuthPayload {
            token: issued.token,
            expires_at: issued.expires_at,
            user: user.into(),
        })
    }

    /// Self-registration; new accounts are always MEMBER.
    #[instrument(name = "graphql.register", skip_all)]
    async fn register(&self, ctx: &Context<'_>, input: RegisterInput) -> Result<AuthPayload> {
        let data = data(ctx)?;
        let user = users::create_user(
            &data.pool,
            NewUser {
                username: input.username,
                email: input.email,
                password: input.password,
                role: None,
            },
        )
        .await
        .resolve()?;
        let issued = data
            .tokens
            .issue(&user)
            .map_err(internal_error)?;
        Ok(AuthPayload {
            token: issued.token,
            expires_at: issued.expires_at,
            user: user.into(),
        })
    }

    #[instrument(name = "graphql.create_user", skip_all)]
    async fn create_user(&self, ctx: &Context<'_>, input: CreateUserInput) -> Result<UserNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        data.engine
            .require_admin(&caller, "create")
            .map_err(|err| ApiError::Forbidden(err.to_string()).extend())?;
        users::create_user(
            &data.pool,
            NewUser {
                username: input.username,
                email: input.email,
                password: input.password,
                role: input.role.map(Into::into),
            },
        )
        .await
        .resolve()
        .map(Into::into)
    }

    /// Admins may change anyone; other users only their own username and password.
    #[instrument(name = "graphql.update_user", skip_all, fields(%id))]
    async fn update_user(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        input: UpdateUserInput,
    ) -> Result<UserNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        if !caller.is_admin() && (caller.id != id || input.role.is_some()) {
            return Err(
                ApiError::Forbidden("only admins can change other users or roles".into()).extend(),
            );
        }
        users::update_user(
            &data.pool,
            id,
            UserPatch {
                username: input.username,
                role: input.role.map(Into::into),
                password: input.password,
            },
        )
        .await
        .resolve()
        .map(Into::into)
    }

    #[instrument(name = "graphql.delete_user", skip_all, fields(%id))]
    async fn delete_user(&self, ctx: &Context<'_>, id: Uuid) -> Result<bool> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        data.engine
            .require_admin(&caller, "delete")
            .map_err(|err| ApiError::Forbidden(err.to_string()).extend())?;
        if caller.id == id {
            return Err(ApiError::invalid("admins cannot delete their own account").extend());
        }
        users::delete_user(&data.pool, id).await.resolve()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use async_graphql::Request;
    use serde_json::json;

    use super::super::test_support;

    #[tokio::test]
    async fn register_then_login_returns_tokens() {
        let (schema, _pool) = test_support::schema().await;
        let register = schema
            .execute(Request::new(
                r#"mutation {
                    register(input: {username: "lin", email: "Lin@Example.com", password: "s3cret-pass"}) {
                        token
                        user { email role }
                    }
                }"#,
            ))
            .await;
        assert!(register.errors.is_empty(), "{:?}", register.errors);
        let body = register.data.into_json().unwrap();
        assert_eq!(body["register"]["user"], json!({"email": "lin@example.com", "role": "MEMBER"}));

        let login = schema
            .execute(Request::new(
                r#"mutation { login(email: "lin@example.com", password: "s3cret-pass") { token } }"#,
            ))
            .await;
        assert!(login.errors.is_empty(), "{:?}", login.errors);

        let denied = schema
            .execute(Request::new(
                r#"mutation { login(email: "lin@example.com", password: "nope-nope") { token } }"#,
            ))
            .await;
        assert_eq!(denied.errors.len(), 1);
        assert_eq!(denied.errors[0].message, "authentication required");
    }
}
