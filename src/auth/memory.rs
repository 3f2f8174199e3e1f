use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::auth::repo::{RepoError, UserRepository};
use crate::auth::repo_types::{User, UserFlag, UserId};

/// In-memory `UserRepository` for tests. Ids start at 1.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<Vec<User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    fn set_flag(&self, id: UserId, flag: UserFlag, value: bool) -> Result<bool, RepoError> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepoError::NotFound)?;
        let slot = match flag {
            UserFlag::Banned => &mut user.is_banned,
            UserFlag::Deleted => &mut user.is_deleted,
            UserFlag::Admin => &mut user.is_admin,
        };
        *slot = value;
        Ok(*slot)
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, email: &str, password_hash: &str) -> Result<UserId, RepoError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == email) {
            return Err(RepoError::AlreadyExists);
        }
        let id = UserId(users.len() as i64 + 1);
        let is_admin = users.is_empty();
        users.push(User {
            id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: OffsetDateTime::now_utc(),
            is_banned: false,
            is_deleted: false,
            is_admin,
        });
        Ok(id)
    }

    async fn by_email(&self, email: &str) -> Result<User, RepoError> {
        let users = self.users.lock().unwrap();
        users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn by_id(&self, id: UserId) -> Result<User, RepoError> {
        let users = self.users.lock().unwrap();
        users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn set_banned(&self, id: UserId, value: bool) -> Result<bool, RepoError> {
        self.set_flag(id, UserFlag::Banned, value)
    }

    async fn set_deleted(&self, id: UserId, value: bool) -> Result<bool, RepoError> {
        self.set_flag(id, UserFlag::Deleted, value)
    }

    async fn set_admin(&self, id: UserId, value: bool) -> Result<bool, RepoError> {
        self.set_flag(id, UserFlag::Admin, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_user_is_admin_and_later_ones_are_not() {
        let repo = MemoryUserRepository::new();
        let first = repo.create("a@x.com", "h1").await.unwrap();
        let second = repo.create("b@x.com", "h2").await.unwrap();
        assert_eq!(first, UserId(1));
        assert!(repo.by_id(first).await.unwrap().is_admin);
        assert!(!repo.by_id(second).await.unwrap().is_admin);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_without_insert() {
        let repo = MemoryUserRepository::new();
        repo.create("a@x.com", "h1").await.unwrap();
        let err = repo.create("a@x.com", "h2").await.unwrap_err();
        assert!(matches!(err, RepoError::AlreadyExists));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn lookups_and_flag_writes_on_missing_ids_report_not_found() {
        let repo = MemoryUserRepository::new();
        assert!(matches!(repo.by_id(UserId(9)).await, Err(RepoError::NotFound)));
        assert!(matches!(repo.by_email("nobody@x.com").await, Err(RepoError::NotFound)));
        assert!(matches!(
            repo.set_banned(UserId(9), true).await,
            Err(RepoError::NotFound)
        ));
    }
}
