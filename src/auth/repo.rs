use async_trait::async_trait;
use thiserror::Error;

use crate::auth::repo_types::{User, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("user not found")]
    NotFound,
    #[error("user with this email already exists")]
    AlreadyExists,
    #[error("storage error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Access to the `users` store.
///
/// `create` checks the email before inserting; implementations must also report a
/// uniqueness violation raised by the insert itself as [`RepoError::AlreadyExists`].
/// The first user ever created is made an administrator by the store.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, email: &str, password_hash: &str) -> Result<UserId, RepoError>;

    async fn by_email(&self, email: &str) -> Result<User, RepoError>;

    async fn by_id(&self, id: UserId) -> Result<User, RepoError>;

    /// Returns the stored value after the write.
    async fn set_banned(&self, id: UserId, value: bool) -> Result<bool, RepoError>;

    async fn set_deleted(&self, id: UserId, value: bool) -> Result<bool, RepoError>;

    async fn set_admin(&self, id: UserId, value: bool) -> Result<bool, RepoError>;
}
