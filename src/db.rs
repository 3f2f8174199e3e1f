use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::auth::repo::{RepoError, UserRepository};
use crate::auth::repo_types::{User, UserFlag, UserId};
use crate::config::AppConfig;

const UNIQUE_VIOLATION: &str = "23505";

pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;
    Ok(db)
}

pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run database migrations")?;
    info!("database migrations applied");
    Ok(())
}

/// Postgres-backed `UserRepository` over the `users` table.
#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, created_at, is_banned, is_deleted, is_admin
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
    }

    async fn update_flag(
        &self,
        id: UserId,
        flag: UserFlag,
        value: bool,
    ) -> Result<bool, RepoError> {
        let sql = match flag {
            UserFlag::Banned => "UPDATE users SET is_banned = $2 WHERE id = $1 RETURNING is_banned",
            UserFlag::Deleted => {
                "UPDATE users SET is_deleted = $2 WHERE id = $1 RETURNING is_deleted"
            }
            UserFlag::Admin => "UPDATE users SET is_admin = $2 WHERE id = $1 RETURNING is_admin",
        };
        let row: Option<(bool,)> = sqlx::query_as(sql)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        row.map(|(stored,)| stored).ok_or(RepoError::NotFound)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, email: &str, password_hash: &str) -> Result<UserId, RepoError> {
        if self.find_by_email(email).await?.is_some() {
            return Err(RepoError::AlreadyExists);
        }

        // The admin decision and the insert are one statement. Two concurrent
        // first registrations can still both see an empty table.
        let inserted = sqlx::query_as::<_, (UserId,)>(
            r#"
            INSERT INTO users (email, password_hash, is_admin)
            VALUES ($1, $2, NOT EXISTS (SELECT 1 FROM users))
            RETURNING id
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok((id,)) => Ok(id),
            Err(e) if is_unique_violation(&e) => Err(RepoError::AlreadyExists),
            Err(e) => Err(RepoError::Backend(e)),
        }
    }

    async fn by_email(&self, email: &str) -> Result<User, RepoError> {
        self.find_by_email(email).await?.ok_or(RepoError::NotFound)
    }

    async fn by_id(&self, id: UserId) -> Result<User, RepoError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, created_at, is_banned, is_deleted, is_admin
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(RepoError::NotFound)
    }

    async fn set_banned(&self, id: UserId, value: bool) -> Result<bool, RepoError> {
        self.update_flag(id, UserFlag::Banned, value).await
    }

    async fn set_deleted(&self, id: UserId, value: bool) -> Result<bool, RepoError> {
        self.update_flag(id, UserFlag::Deleted, value).await
    }

    async fn set_admin(&self, id: UserId, value: bool) -> Result<bool, RepoError> {
        self.update_flag(id, UserFlag::Admin, value).await
    }
}
