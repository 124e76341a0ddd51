use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use entity::users::{self, Role};
use once_cell::sync::Lazy;
use platform_db::{DbFailure, classify};
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{PmError, PmResult, now, required_text};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Defaults to MEMBER.
    pub role: Option<Role>,
}

/// Email cannot change after registration.
#[derive(Clone, Debug, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.role.is_none() && self.password.is_none()
    }
}

static USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("username pattern is valid"));

/// Usernames double as mention handles, so they are limited to `[A-Za-z0-9_]`.
pub fn validate_username(value: &str) -> PmResult<String> {
    let username = required_text("username", value, 64)?;
    if !USERNAME.is_match(&username) {
        return Err(PmError::validation(
            "username may only contain letters, digits and underscores",
        ));
    }
    Ok(username)
}

pub fn normalize_email(value: &str) -> PmResult<String> {
    let email = required_text("email", value, 320)?.to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(PmError::validation("email is not valid")),
    }
}

fn validate_password(value: &str) -> PmResult<()> {
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(PmError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> PmResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| PmError::PasswordHash(err.to_string()))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn unique_conflict(err: DbErr) -> PmError {
    match classify(&err) {
        DbFailure::UniqueViolation => PmError::conflict("email or username already in use"),
        _ => err.into(),
    }
}

#[instrument(name = "pm.users.create", skip_all, fields(username = %input.username))]
pub async fn create_user<C: ConnectionTrait>(db: &C, input: NewUser) -> PmResult<users::Model> {
    let username = validate_username(&input.username)?;
    let email = normalize_email(&input.email)?;
    validate_password(&input.password)?;

    if find_by_email(db, &email).await?.is_some() {
        return Err(PmError::conflict("email already registered"));
    }
    if find_by_username(db, &username).await?.is_some() {
        return Err(PmError::conflict("username already taken"));
    }

    let id = Uuid::new_v4();
    let stamp = now();
    let active = users::ActiveModel {
        id: Set(id),
        username: Set(username),
        email: Set(email),
        password_hash: Set(hash_password(&input.password)?),
        role: Set(input.role.unwrap_or(Role::Member)),
        created_at: Set(stamp),
        updated_at: Set(stamp),
    };
    users::Entity::insert(active)
        .exec_without_returning(db)
        .await
        .map_err(unique_conflict)?;
    info!(user_id = %id, "user created");
    get_user(db, id).await
}

pub async fn update_user<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    patch: UserPatch,
) -> PmResult<users::Model> {
    if patch.is_empty() {
        return Err(PmError::validation("no fields to update"));
    }
    let existing = get_user(db, user_id).await?;
    let mut active: users::ActiveModel = existing.clone().into();
    if let Some(username) = &patch.username {
        let username = validate_username(username)?;
        if username != existing.username {
            if find_by_username(db, &username).await?.is_some() {
                return Err(PmError::conflict("username already taken"));
            }
            active.username = Set(username);
        }
    }
    if let Some(role) = patch.role {
        active.role = Set(role);
    }
    if let Some(password) = &patch.password {
        validate_password(password)?;
        active.password_hash = Set(hash_password(password)?);
    }
    active.updated_at = Set(now());
    active.update(db).await.map_err(unique_conflict)
}

/// Fails with a conflict while projects, tasks or uploads still point at the user.
#[instrument(name = "pm.users.delete", skip(db))]
pub async fn delete_user<C: ConnectionTrait>(db: &C, user_id: Uuid) -> PmResult<()> {
    let existing = get_user(db, user_id).await?;
    users::Entity::delete_by_id(existing.id)
        .exec(db)
        .await
        .map_err(|err| match classify(&err) {
            DbFailure::ForeignKeyViolation => {
                PmError::conflict("user still owns projects, tasks or files")
            }
            _ => err.into(),
        })?;
    info!(%user_id, "user deleted");
    Ok(())
}

pub async fn get_user<C: ConnectionTrait>(db: &C, user_id: Uuid) -> PmResult<users::Model> {
    users::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or(PmError::NotFound("user"))
}

pub async fn list_users<C: ConnectionTrait>(db: &C) -> PmResult<Vec<users::Model>> {
    Ok(users::Entity::find()
        .order_by_asc(users::Column::Username)
        .all(db)
        .await?)
}

pub async fn find_by_username<C: ConnectionTrait>(
    db: &C,
    username: &str,
) -> PmResult<Option<users::Model>> {
    Ok(users::Entity::find()
        .filter(users::Column::Username.eq(username))
        .one(db)
        .await?)
}

pub async fn find_by_email<C: ConnectionTrait>(
    db: &C,
    email: &str,
) -> PmResult<Option<users::Model>> {
    Ok(users::Entity::find()
        .filter(users::Column::Email.eq(email.trim().to_ascii_lowercase()))
        .one(db)
        .await?)
}

/// Checks credentials; unknown email and wrong password are indistinguishable.
pub async fn authenticate<C: ConnectionTrait>(
    db: &C,
    email: &str,
    password: &str,
) -> PmResult<users::Model> {
    let user = find_by_email(db, email)
        .await?
        .ok_or(PmError::Unauthenticated)?;
    if verify_password(password, &user.password_hash) {
        Ok(user)
    } else {
        Err(PmError::Unauthenticated)
    }
}
