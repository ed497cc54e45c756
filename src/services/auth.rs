use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::types::User;

/// What a route demands of the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequirement {
    /// No check at all.
    #[default]
    None,
    /// Only visitors without a session (login and signup pages).
    Guest,
    /// Any logged-in user.
    User,
    /// A logged-in user holding this role.
    Role(String),
}

/// Applies `requirement` to the already-authenticated `user`.
pub fn enforce(user: Option<&User>, requirement: &AuthRequirement) -> AppResult<Option<User>> {
    match (requirement, user) {
        (AuthRequirement::None, u) => Ok(u.cloned()),
        (AuthRequirement::Guest, None) => Ok(None),
        (AuthRequirement::Guest, Some(_)) => {
            Err(AppError::Forbidden("This page is only available to visitors".into()))
        }
        (AuthRequirement::User, Some(u)) => Ok(Some(u.clone())),
        (AuthRequirement::Role(role), Some(u)) => {
            if u.has_role(role) {
                Ok(Some(u.clone()))
            } else {
                Err(AppError::Forbidden(format!("Role {} required", role)))
            }
        }
        (AuthRequirement::User | AuthRequirement::Role(_), None) => {
            Err(AppError::AuthRequired("Please log in to continue".into()))
        }
    }
}

#[async_trait]
pub trait Auth: Send + Sync {
    /// Looks up the user owning `token`. `Ok(None)` for unknown or expired tokens.
    async fn authenticate(&self, token: &str) -> AppResult<Option<User>>;

    /// Validates `requirement` for the user attached to `ctx`.
    async fn check(&self, ctx: &RequestContext, requirement: &AuthRequirement) -> AppResult<Option<User>> {
        enforce(ctx.user.as_ref(), requirement)
    }
}

/// Sessions stored in the `sessions` table.
pub struct SessionAuth {
    pool: SqlitePool,
}

impl SessionAuth {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Auth for SessionAuth {
    async fn authenticate(&self, token: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(
            r#"SELECT u.id, u.email, u.name, u.roles
               FROM sessions s JOIN users u ON u.id = s.user_id
               WHERE s.token = ?1 AND s.expires_at > ?2"#,
        )
        .bind(token)
        .bind(chrono::Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let roles: String = r.get("roles");
            User {
                id: r.get("id"),
                email: r.get("email"),
                name: r.get("name"),
                roles: roles.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            }
        }))
    }
}

/// Fixed token table, for tests and single-user setups.
#[derive(Default)]
pub struct StaticAuth {
    tokens: Vec<(String, User)>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user: User) -> Self {
        self.tokens.push((token.into(), user));
        self
    }
}

/// Constant-time comparison so token lookups do not leak prefix matches.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[async_trait]
impl Auth for StaticAuth {
    async fn authenticate(&self, token: &str) -> AppResult<Option<User>> {
        let mut found = None;
        for (candidate, user) in &self.tokens {
            if constant_time_eq(candidate.as_bytes(), token.as_bytes()) {
                found = Some(user.clone());
            }
        }
        Ok(found)
    }
}
