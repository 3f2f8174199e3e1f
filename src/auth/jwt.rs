use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, RefreshClaims, TokenKind};
use crate::auth::repo_types::UserId;
use crate::config::JwtConfig;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Freshly minted access + refresh token.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// Malformed, forged, expired, wrong algorithm or wrong kind.
    #[error("invalid token")]
    Invalid,
    #[error("failed to sign {kind:?} token")]
    Signing {
        kind: TokenKind,
        #[source]
        source: jsonwebtoken::errors::Error,
    },
}

/// Mints and verifies token pairs. Verification never consults the user store.
pub trait TokenProvider: Send + Sync {
    fn issue_pair(&self, email: &str, user_id: UserId, is_admin: bool)
        -> Result<TokenPair, TokenError>;

    fn parse_refresh(&self, token: &str) -> Result<UserId, TokenError>;

    fn parse_access(&self, token: &str) -> Result<AccessClaims, TokenError>;
}

/// HMAC signing keys plus the issuer and TTLs they are used with.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self::new(
            cfg.secret.as_bytes(),
            cfg.issuer.clone(),
            Duration::from_secs((cfg.ttl_minutes as u64).saturating_mul(60)),
            Duration::from_secs((cfg.refresh_ttl_minutes as u64).saturating_mul(60)),
        )
    }

    fn window(&self, kind: TokenKind) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let ttl = TimeDuration::try_from(ttl).unwrap_or(TimeDuration::MAX);
        let exp = now.saturating_add(ttl);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    fn sign<C: Serialize>(&self, claims: &C, kind: TokenKind) -> Result<String, TokenError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding)
            .map_err(|source| TokenError::Signing { kind, source })
    }

    fn verify<C: DeserializeOwned>(&self, token: &str) -> Result<C, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = 0;
        decode::<C>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "jwt rejected");
                TokenError::Invalid
            })
    }
}

impl TokenProvider for JwtKeys {
    fn issue_pair(
        &self,
        email: &str,
        user_id: UserId,
        is_admin: bool,
    ) -> Result<TokenPair, TokenError> {
        let (iat, exp) = self.window(TokenKind::Access);
        let access = AccessClaims {
            sub: user_id,
            email: email.to_string(),
            adm: is_admin,
            iss: self.issuer.clone(),
            iat,
            exp,
            jti: Uuid::new_v4(),
            kind: TokenKind::Access,
        };
        let (iat, exp) = self.window(TokenKind::Refresh);
        let refresh = RefreshClaims {
            sub: user_id,
            iss: self.issuer.clone(),
            iat,
            exp,
            jti: Uuid::new_v4(),
            kind: TokenKind::Refresh,
        };

        let pair = TokenPair {
            access_token: self.sign(&access, TokenKind::Access)?,
            refresh_token: self.sign(&refresh, TokenKind::Refresh)?,
        };
        debug!(user_id = %user_id, "token pair signed");
        Ok(pair)
    }

    fn parse_refresh(&self, token: &str) -> Result<UserId, TokenError> {
        let claims: RefreshClaims = self.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            debug!(user_id = %claims.sub, "not a refresh token");
            return Err(TokenError::Invalid);
        }
        Ok(claims.sub)
    }

    fn parse_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.verify(token)?;
        if claims.kind != TokenKind::Access {
            debug!(user_id = %claims.sub, "not an access token");
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }
}
