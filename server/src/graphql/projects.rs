use async_graphql::{Context, ErrorExtensions, InputObject, MaybeUndefined, Object, Result};
use platform_api::ApiError;
use products_pm::{
    access,
    projects::{self, NewProject, ProjectPatch},
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    Resolve, data, principal,
    types::{MemberNode, ProjectNode, ProjectStatus},
};

#[derive(InputObject)]
pub struct CreateProjectInput {
    pub name: String,
    pub project_code: String,
    pub description: Option<String>,
    #[graphql(default)]
    pub manager_ids: Vec<Uuid>,
}

#[derive(InputObject, Default)]
pub struct UpdateProjectInput {
    pub name: Option<String>,
    pub description: MaybeUndefined<String>,
    pub status: Option<ProjectStatus>,
    /// Replaces the full manager set.
    pub manager_ids: Option<Vec<Uuid>>,
}

pub(crate) fn maybe<T>(value: MaybeUndefined<T>) -> Option<Option<T>> {
    match value {
        MaybeUndefined::Undefined => None,
        MaybeUndefined::Null => Some(None),
        MaybeUndefined::Value(value) => Some(Some(value)),
    }
}

#[derive(Default)]
pub struct ProjectQuery;

#[Object]
impl ProjectQuery {
    /// Projects the caller belongs to; every project for ADMIN.
    #[instrument(name = "graphql.projects", skip_all)]
    async fn projects(&self, ctx: &Context<'_>) -> Result<Vec<ProjectNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        let rows = projects::projects_for_user(&data.pool, &caller)
            .await
            .resolve()?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(name = "graphql.project", skip_all, fields(%id))]
    async fn project(&self, ctx: &Context<'_>, id: Uuid) -> Result<ProjectNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::require_project_member(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()
            .map(Into::into)
    }

    #[instrument(name = "graphql.project_members", skip_all, fields(%project_id))]
    async fn project_members(
        &self,
        ctx: &Context<'_>,
        project_id: Uuid,
    ) -> Result<Vec<MemberNode>> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::require_project_member(&data.pool, &data.engine, &caller, project_id)
            .await
            .resolve()?;
        let members = projects::list_members(&data.pool, project_id)
            .await
            .resolve()?;
        Ok(members.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
pub struct ProjectMutation;

#[Object]
impl ProjectMutation {
    #[instrument(name = "graphql.create_project", skip_all)]
    async fn create_project(
        &self,
        ctx: &Context<'_>,
        input: CreateProjectInput,
    ) -> Result<ProjectNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        data.engine
            .can_create_project(&caller)
            .map_err(|err| ApiError::Forbidden(err.to_string()).extend())?;
        projects::create_project(
            &data.pool,
            &caller,
            NewProject {
                name: input.name,
                project_code: input.project_code,
                description: input.description,
                manager_ids: input.manager_ids,
            },
        )
        .await
        .resolve()
        .map(Into::into)
    }

    /// Completing a project fails while any of its tasks is open.
    #[instrument(name = "graphql.update_project", skip_all, fields(%id))]
    async fn update_project(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        input: UpdateProjectInput,
    ) -> Result<ProjectNode> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::require_project_manager(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()?;
        let patch = ProjectPatch {
            name: input.name,
            description: maybe(input.description),
            status: input.status.map(Into::into),
            manager_ids: input.manager_ids,
        };
        projects::update_project(&data.pool, id, patch)
            .await
            .resolve()
            .map(Into::into)
    }

    #[instrument(name = "graphql.delete_project", skip_all, fields(%id))]
    async fn delete_project(&self, ctx: &Context<'_>, id: Uuid) -> Result<bool> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::require_project_manager(&data.pool, &data.engine, &caller, id)
            .await
            .resolve()?;
        projects::delete_project(&data.pool, id).await.resolve()?;
        Ok(true)
    }

    #[instrument(name = "graphql.add_project_member", skip_all, fields(%project_id))]
    async fn add_project_member(
        &self,
        ctx: &Context<'_>,
        project_id: Uuid,
        email: String,
        #[graphql(default)] is_manager: bool,
    ) -> Result<bool> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::require_project_manager(&data.pool, &data.engine, &caller, project_id)
            .await
            .resolve()?;
        projects::add_member_by_email(&data.pool, project_id, &email, is_manager)
            .await
            .resolve()?;
        Ok(true)
    }

    #[instrument(name = "graphql.remove_project_member", skip_all, fields(%project_id, %user_id))]
    async fn remove_project_member(
        &self,
        ctx: &Context<'_>,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool> {
        let caller = principal(ctx)?;
        let data = data(ctx)?;
        access::require_project_manager(&data.pool, &data.engine, &caller, project_id)
            .await
            .resolve()?;
        projects::remove_member(&data.pool, project_id, user_id)
            .await
            .resolve()?;
        Ok(true)
    }
}
