use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Store-assigned user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// User record in the database.
#[derive(Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String, // Argon2 PHC string
    pub created_at: OffsetDateTime,
    pub is_banned: bool,
    pub is_deleted: bool,
    pub is_admin: bool,
}

impl User {
    /// Neither banned nor deleted; only active users may log in or refresh.
    pub fn is_active(&self) -> bool {
        !self.is_banned && !self.is_deleted
    }
}

// Hand-written so the password hash never ends up in logs.
impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("created_at", &self.created_at)
            .field("is_banned", &self.is_banned)
            .field("is_deleted", &self.is_deleted)
            .field("is_admin", &self.is_admin)
            .finish_non_exhaustive()
    }
}

/// Account flags that administrators can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFlag {
    Banned,
    Deleted,
    Admin,
}

impl UserFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            UserFlag::Banned => "banned",
            UserFlag::Deleted => "deleted",
            UserFlag::Admin => "admin",
        }
    }
}

impl fmt::Display for UserFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
