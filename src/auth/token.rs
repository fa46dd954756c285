use bson::oid::ObjectId;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Role;

/// What a token may be used for. A token is only ever accepted for its own purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenPurpose {
    Auth,
    VerifyEmail,
    ResetPassword,
}

impl TokenPurpose {
    pub fn ttl(self) -> Duration {
        match self {
            TokenPurpose::Auth => Duration::days(7),
            TokenPurpose::VerifyEmail => Duration::hours(24),
            TokenPurpose::ResetPassword => Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub purpose: TokenPurpose,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<ObjectId> {
        ObjectId::parse_str(&self.sub).map_err(|_| AppError::Unauthenticated("Invalid token".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// HS256 signing and verification keys derived from the configured secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        TokenKeys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(
        &self,
        user_id: &ObjectId,
        email: &str,
        role: Role,
        purpose: TokenPurpose,
    ) -> AppResult<IssuedToken> {
        self.issue_at(user_id, email, role, purpose, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: &ObjectId,
        email: &str,
        role: Role,
        purpose: TokenPurpose,
        issued_at: chrono::DateTime<Utc>,
    ) -> AppResult<IssuedToken> {
        let claims = Claims {
            sub: user_id.to_hex(),
            email: email.to_string(),
            role,
            purpose,
            jti: Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + purpose.ttl()).timestamp(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding).map_err(AppError::internal)?;
        Ok(IssuedToken { token, claims })
    }

    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> AppResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::Unauthenticated("Token has expired".to_string()),
                _ => AppError::Unauthenticated("Invalid token".to_string()),
            })?;

        if data.claims.purpose != purpose {
            return Err(AppError::Unauthenticated("Invalid token".to_string()));
        }
        Ok(data.claims)
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
