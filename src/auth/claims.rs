use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::repo_types::UserId;

/// Type of JWT: access or refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Payload of a short-lived access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId,     // user ID
    pub email: String,
    pub adm: bool,       // administrator at issue time
    pub iss: String,     // issuer
    pub iat: usize,      // issued at (unix timestamp)
    pub exp: usize,      // expires at (unix timestamp)
    pub jti: Uuid,       // unique per token
    pub kind: TokenKind,
}

/// Payload of a refresh token. Carries no privilege claims: those are re-read
/// from the store on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: UserId,
    pub iss: String,
    pub iat: usize,
    pub exp: usize,
    pub jti: Uuid,
    pub kind: TokenKind,
}
