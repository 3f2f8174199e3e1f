use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::auth::jwt::{TokenError, TokenPair, TokenProvider};
use crate::auth::password::{hash_password, verify_against_dummy, verify_password};
use crate::auth::repo::{RepoError, UserRepository};
use crate::auth::repo_types::{User, UserFlag, UserId};
use crate::context::{Interrupted, RequestContext};

/// Caller-facing failures of the credential operations. Messages never carry
/// internal diagnostics; those are logged where the failure happens.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("failed to register user")]
    RegistrationFailed,
    #[error("invalid login or password")]
    InvalidLoginOrPassword,
    #[error("user is unable to log in")]
    UserUnableToLogIn,
    #[error("failed to log in user")]
    LoginFailed,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("failed to refresh token")]
    RefreshFailed,
    #[error("user does not exist")]
    UserDoesNotExist,
    #[error("failed to update {0} flag")]
    OperationFailed(UserFlag),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Register / Login / Refresh and the administrative flag writes.
///
/// Holds no per-request state; every call takes the caller's [`RequestContext`]
/// and runs each store, hashing and signing step under it.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenProvider>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { users, tokens }
    }

    /// Creates the account. No token is issued; callers log in separately.
    #[instrument(skip(self, ctx, password))]
    pub async fn register(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<UserId, AuthError> {
        let hash = ctx
            .run(hash_blocking(password.to_owned()))
            .await?
            .map_err(|e| {
                error!(error = %e, "unable to hash password");
                AuthError::RegistrationFailed
            })?;

        match ctx.run(self.users.create(email, &hash)).await? {
            Ok(id) => {
                info!(user_id = %id, "user registered");
                Ok(id)
            }
            Err(RepoError::AlreadyExists) => {
                info!("user already exists");
                Err(AuthError::UserAlreadyExists)
            }
            Err(e) => {
                error!(error = %e, "unable to create user");
                Err(AuthError::RegistrationFailed)
            }
        }
    }

    /// Unknown email and wrong password fail identically. Account state is only
    /// revealed after the password has been verified.
    #[instrument(skip(self, ctx, password))]
    pub async fn login(
        &self,
        ctx: &RequestContext,
        email: &str,
        password: &str,
    ) -> Result<TokenPair, AuthError> {
        let user = match ctx.run(self.users.by_email(email)).await? {
            Ok(user) => user,
            Err(RepoError::NotFound) => {
                ctx.run(dummy_verify_blocking(password.to_owned())).await?;
                info!("login for unknown email");
                return Err(AuthError::InvalidLoginOrPassword);
            }
            Err(e) => {
                error!(error = %e, "unable to get user by email");
                return Err(AuthError::LoginFailed);
            }
        };

        let matches = ctx
            .run(verify_blocking(password.to_owned(), user.password_hash.clone()))
            .await?
            .map_err(|e| {
                error!(error = %e, user_id = %user.id, "unable to verify password");
                AuthError::LoginFailed
            })?;
        if !matches {
            info!(user_id = %user.id, "invalid login or password");
            return Err(AuthError::InvalidLoginOrPassword);
        }

        self.ensure_active(&user)?;
        self.issue(ctx, &user, AuthError::LoginFailed)
    }

    /// Mints a new pair from a refresh token, re-checking the user's current state.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        refresh_token: &str,
    ) -> Result<TokenPair, AuthError> {
        ctx.check()?;
        let user_id = match self.tokens.parse_refresh(refresh_token) {
            Ok(id) => id,
            Err(TokenError::Invalid) => {
                info!("invalid refresh token");
                return Err(AuthError::InvalidRefreshToken);
            }
            Err(e) => {
                error!(error = %e, "unable to parse refresh token");
                return Err(AuthError::RefreshFailed);
            }
        };

        let user = match ctx.run(self.users.by_id(user_id)).await? {
            Ok(user) => user,
            Err(RepoError::NotFound) => {
                info!(user_id = %user_id, "refresh token for missing user");
                return Err(AuthError::InvalidRefreshToken);
            }
            Err(e) => {
                error!(error = %e, user_id = %user_id, "unable to get user by id");
                return Err(AuthError::RefreshFailed);
            }
        };

        self.ensure_active(&user)?;
        self.issue(ctx, &user, AuthError::RefreshFailed)
    }

    #[instrument(skip(self, ctx))]
    pub async fn set_banned(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        value: bool,
    ) -> Result<bool, AuthError> {
        self.set_flag(ctx, user_id, UserFlag::Banned, value).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn set_deleted(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        value: bool,
    ) -> Result<bool, AuthError> {
        self.set_flag(ctx, user_id, UserFlag::Deleted, value).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn set_admin(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        value: bool,
    ) -> Result<bool, AuthError> {
        self.set_flag(ctx, user_id, UserFlag::Admin, value).await
    }

    // The caller's right to do this is checked by the transport layer.
    async fn set_flag(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        flag: UserFlag,
        value: bool,
    ) -> Result<bool, AuthError> {
        match ctx.run(self.users.by_id(user_id)).await? {
            Ok(_) => {}
            Err(RepoError::NotFound) => {
                info!("user does not exist");
                return Err(AuthError::UserDoesNotExist);
            }
            Err(e) => {
                error!(error = %e, "unable to get user by id");
                return Err(AuthError::OperationFailed(flag));
            }
        }

        let write = match flag {
            UserFlag::Banned => self.users.set_banned(user_id, value),
            UserFlag::Deleted => self.users.set_deleted(user_id, value),
            UserFlag::Admin => self.users.set_admin(user_id, value),
        };
        match ctx.run(write).await? {
            Ok(stored) => {
                info!(flag = %flag, value = stored, "user flag updated");
                Ok(stored)
            }
            Err(RepoError::NotFound) => {
                warn!("user vanished before flag update");
                Err(AuthError::UserDoesNotExist)
            }
            Err(e) => {
                error!(error = %e, flag = %flag, "unable to update user flag");
                Err(AuthError::OperationFailed(flag))
            }
        }
    }

    fn ensure_active(&self, user: &User) -> Result<(), AuthError> {
        if user.is_active() {
            return Ok(());
        }
        info!(
            user_id = %user.id,
            banned = user.is_banned,
            deleted = user.is_deleted,
            "user is banned or deleted"
        );
        Err(AuthError::UserUnableToLogIn)
    }

    fn issue(
        &self,
        ctx: &RequestContext,
        user: &User,
        on_failure: AuthError,
    ) -> Result<TokenPair, AuthError> {
        ctx.check()?;
        self.tokens
            .issue_pair(&user.email, user.id, user.is_admin)
            .map_err(|e| {
                error!(error = %e, user_id = %user.id, "unable to create token pair");
                on_failure
            })
    }
}

async fn hash_blocking(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

async fn verify_blocking(password: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?
}

async fn dummy_verify_blocking(password: String) {
    if let Err(e) = tokio::task::spawn_blocking(move || verify_against_dummy(&password)).await {
        warn!(error = %e, "dummy password verification did not complete");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use jsonwebtoken::errors::ErrorKind;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::auth::claims::{AccessClaims, TokenKind};
    use crate::auth::jwt::JwtKeys;
    use crate::auth::memory::MemoryUserRepository;

    fn keys() -> Arc<JwtKeys> {
        Arc::new(JwtKeys::new(
            b"test-secret",
            "auth",
            Duration::from_secs(5 * 60),
            Duration::from_secs(60 * 60),
        ))
    }

    fn service() -> (AuthService, Arc<MemoryUserRepository>, Arc<JwtKeys>) {
        let repo = Arc::new(MemoryUserRepository::new());
        let keys = keys();
        let svc = AuthService::new(repo.clone(), keys.clone());
        (svc, repo, keys)
    }

    fn ctx() -> RequestContext {
        RequestContext::background()
    }

    fn cancelled_ctx() -> RequestContext {
        let token = CancellationToken::new();
        token.cancel();
        RequestContext::new(token)
    }

    /// Every store call fails with a backend error.
    struct BrokenRepository;

    #[async_trait]
    impl UserRepository for BrokenRepository {
        async fn create(&self, _: &str, _: &str) -> Result<UserId, RepoError> {
            Err(RepoError::Backend(sqlx::Error::PoolTimedOut))
        }
        async fn by_email(&self, _: &str) -> Result<User, RepoError> {
            Err(RepoError::Backend(sqlx::Error::PoolTimedOut))
        }
        async fn by_id(&self, _: UserId) -> Result<User, RepoError> {
            Err(RepoError::Backend(sqlx::Error::PoolTimedOut))
        }
        async fn set_banned(&self, _: UserId, _: bool) -> Result<bool, RepoError> {
            Err(RepoError::Backend(sqlx::Error::PoolTimedOut))
        }
        async fn set_deleted(&self, _: UserId, _: bool) -> Result<bool, RepoError> {
            Err(RepoError::Backend(sqlx::Error::PoolTimedOut))
        }
        async fn set_admin(&self, _: UserId, _: bool) -> Result<bool, RepoError> {
            Err(RepoError::Backend(sqlx::Error::PoolTimedOut))
        }
    }

    /// Verifies with the real keys but can never sign.
    struct UnsignableTokens(Arc<JwtKeys>);

    impl TokenProvider for UnsignableTokens {
        fn issue_pair(&self, _: &str, _: UserId, _: bool) -> Result<TokenPair, TokenError> {
            Err(TokenError::Signing {
                kind: TokenKind::Access,
                source: ErrorKind::InvalidKeyFormat.into(),
            })
        }
        fn parse_refresh(&self, token: &str) -> Result<UserId, TokenError> {
            self.0.parse_refresh(token)
        }
        fn parse_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
            self.0.parse_access(token)
        }
    }

    #[tokio::test]
    async fn register_then_login_returns_token_for_that_email() {
        let (svc, _, keys) = service();
        let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        let pair = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap();
        let claims = keys.parse_access(&pair.access_token).unwrap();
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.sub, id);
        assert_eq!(keys.parse_refresh(&pair.refresh_token).unwrap(), id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_fail_the_same_way() {
        let (svc, _, _) = service();
        svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();

        let wrong = svc.login(&ctx(), "a@x.com", "nope").await.unwrap_err();
        let unknown = svc.login(&ctx(), "ghost@x.com", "pw1").await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidLoginOrPassword));
        assert!(matches!(unknown, AuthError::InvalidLoginOrPassword));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn first_registration_is_admin_second_is_not() {
        let (svc, repo, keys) = service();
        let first = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        let second = svc.register(&ctx(), "b@x.com", "pw2").await.unwrap();
        assert!(repo.by_id(first).await.unwrap().is_admin);
        assert!(!repo.by_id(second).await.unwrap().is_admin);

        let admin = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap();
        let plain = svc.login(&ctx(), "b@x.com", "pw2").await.unwrap();
        assert!(keys.parse_access(&admin.access_token).unwrap().adm);
        assert!(!keys.parse_access(&plain.access_token).unwrap().adm);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_without_new_row() {
        let (svc, repo, _) = service();
        svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        let err = svc.register(&ctx(), "a@x.com", "other").await.unwrap_err();
        assert!(matches!(err, AuthError::UserAlreadyExists));
        assert_eq!(repo.len(), 1);
        // The original password still works.
        assert!(svc.login(&ctx(), "a@x.com", "pw1").await.is_ok());
    }

    #[tokio::test]
    async fn banned_or_deleted_users_cannot_login_or_refresh() {
        for flag in [UserFlag::Banned, UserFlag::Deleted] {
            let (svc, _, _) = service();
            let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
            let pair = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap();

            match flag {
                UserFlag::Banned => svc.set_banned(&ctx(), id, true).await.unwrap(),
                _ => svc.set_deleted(&ctx(), id, true).await.unwrap(),
            };

            let login = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap_err();
            assert!(matches!(login, AuthError::UserUnableToLogIn), "{flag}");
            let refresh = svc.refresh(&ctx(), &pair.refresh_token).await.unwrap_err();
            assert!(matches!(refresh, AuthError::UserUnableToLogIn), "{flag}");
        }
    }

    #[tokio::test]
    async fn banned_user_with_wrong_password_sees_only_invalid_credentials() {
        let (svc, _, _) = service();
        let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        svc.set_banned(&ctx(), id, true).await.unwrap();
        let err = svc.login(&ctx(), "a@x.com", "nope").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidLoginOrPassword));
    }

    #[tokio::test]
    async fn unbanning_restores_access() {
        let (svc, _, _) = service();
        let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        svc.set_banned(&ctx(), id, true).await.unwrap();
        assert!(!svc.set_banned(&ctx(), id, false).await.unwrap());
        assert!(svc.login(&ctx(), "a@x.com", "pw1").await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_access_tokens_and_vanished_users() {
        let (svc, _, _) = service();
        svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        let pair = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap();

        let garbage = svc.refresh(&ctx(), "not-a-token").await.unwrap_err();
        assert!(matches!(garbage, AuthError::InvalidRefreshToken));
        let access = svc.refresh(&ctx(), &pair.access_token).await.unwrap_err();
        assert!(matches!(access, AuthError::InvalidRefreshToken));

        // Same keys, but a store that has never seen this user.
        let (other, _, _) = service();
        let orphan = other.refresh(&ctx(), &pair.refresh_token).await.unwrap_err();
        assert!(matches!(orphan, AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn refresh_picks_up_current_admin_state() {
        let (svc, _, keys) = service();
        let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        let pair = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap();
        assert!(keys.parse_access(&pair.access_token).unwrap().adm);

        svc.set_admin(&ctx(), id, false).await.unwrap();
        let next = svc.refresh(&ctx(), &pair.refresh_token).await.unwrap();
        assert!(!keys.parse_access(&next.access_token).unwrap().adm);
    }

    #[tokio::test]
    async fn set_flag_on_missing_user_reports_user_does_not_exist() {
        let (svc, _, _) = service();
        let err = svc.set_banned(&ctx(), UserId(404), true).await.unwrap_err();
        assert!(matches!(err, AuthError::UserDoesNotExist));
        let err = svc.set_deleted(&ctx(), UserId(404), true).await.unwrap_err();
        assert!(matches!(err, AuthError::UserDoesNotExist));
        let err = svc.set_admin(&ctx(), UserId(404), true).await.unwrap_err();
        assert!(matches!(err, AuthError::UserDoesNotExist));
    }

    #[tokio::test]
    async fn set_banned_is_idempotent() {
        let (svc, repo, _) = service();
        let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        assert!(svc.set_banned(&ctx(), id, true).await.unwrap());
        assert!(svc.set_banned(&ctx(), id, true).await.unwrap());
        let user = repo.by_id(id).await.unwrap();
        assert!(user.is_banned);
        assert!(!user.is_deleted);
        assert!(user.is_admin);
    }

    #[tokio::test]
    async fn register_login_refresh_scenario() {
        let (svc, repo, keys) = service();
        let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        assert_eq!(id, UserId(1));
        assert!(repo.by_id(id).await.unwrap().is_admin);

        let t1 = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap();
        let t2 = svc.refresh(&ctx(), &t1.refresh_token).await.unwrap();

        assert_eq!(keys.parse_refresh(&t2.refresh_token).unwrap(), id);
        assert_eq!(keys.parse_access(&t2.access_token).unwrap().sub, id);
        assert_ne!(t1.access_token, t2.access_token);
        assert_ne!(t1.refresh_token, t2.refresh_token);
    }

    #[tokio::test]
    async fn store_faults_surface_as_opaque_failures() {
        let svc = AuthService::new(Arc::new(BrokenRepository), keys());
        let pair = keys().issue_pair("a@x.com", UserId(1), false).unwrap();

        assert!(matches!(
            svc.register(&ctx(), "a@x.com", "pw1").await,
            Err(AuthError::RegistrationFailed)
        ));
        assert!(matches!(
            svc.login(&ctx(), "a@x.com", "pw1").await,
            Err(AuthError::LoginFailed)
        ));
        assert!(matches!(
            svc.refresh(&ctx(), &pair.refresh_token).await,
            Err(AuthError::RefreshFailed)
        ));
        assert!(matches!(
            svc.set_deleted(&ctx(), UserId(1), true).await,
            Err(AuthError::OperationFailed(UserFlag::Deleted))
        ));
    }

    #[tokio::test]
    async fn signing_faults_surface_as_login_and_refresh_failures() {
        let repo = Arc::new(MemoryUserRepository::new());
        let keys = keys();
        let healthy = AuthService::new(repo.clone(), keys.clone());
        healthy.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        let pair = healthy.login(&ctx(), "a@x.com", "pw1").await.unwrap();

        let broken = AuthService::new(repo, Arc::new(UnsignableTokens(keys)));
        assert!(matches!(
            broken.login(&ctx(), "a@x.com", "pw1").await,
            Err(AuthError::LoginFailed)
        ));
        assert!(matches!(
            broken.refresh(&ctx(), &pair.refresh_token).await,
            Err(AuthError::RefreshFailed)
        ));
    }

    #[tokio::test]
    async fn cancelled_context_aborts_before_touching_the_store() {
        let (svc, repo, _) = service();
        let err = svc
            .register(&cancelled_ctx(), "a@x.com", "pw1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Interrupted(Interrupted::Cancelled)));
        assert_eq!(repo.len(), 0);

        let id = svc.register(&ctx(), "a@x.com", "pw1").await.unwrap();
        let pair = svc.login(&ctx(), "a@x.com", "pw1").await.unwrap();
        assert!(matches!(
            svc.login(&cancelled_ctx(), "a@x.com", "pw1").await,
            Err(AuthError::Interrupted(_))
        ));
        assert!(matches!(
            svc.refresh(&cancelled_ctx(), &pair.refresh_token).await,
            Err(AuthError::Interrupted(_))
        ));
        assert!(matches!(
            svc.set_banned(&cancelled_ctx(), id, true).await,
            Err(AuthError::Interrupted(_))
        ));
        assert!(!repo.by_id(id).await.unwrap().is_banned);
    }
}
