pub mod lockout;
pub mod password;
pub mod token;

use bson::oid::ObjectId;

use crate::error::{AppError, AppResult};
use crate::models::Role;

pub use token::{Claims, TokenKeys, TokenPurpose};

/// The caller behind a verified auth token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: ObjectId,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn from_claims(claims: &Claims) -> AppResult<Self> {
        Ok(AuthUser {
            id: claims.user_id()?,
            email: claims.email.clone(),
            role: claims.role,
        })
    }

    pub fn require_role(&self, role: Role) -> AppResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have permission to perform this action".to_string(),
            ))
        }
    }
}
