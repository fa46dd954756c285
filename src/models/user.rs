use bson::oid::ObjectId;
use bson::DateTime;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    Moderator,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 500))]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub notifications: bool,
    #[validate(range(min = 1.0, max = 500.0))]
    pub search_radius: f64,
    #[validate(length(equal = 3))]
    pub currency: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            notifications: true,
            search_radius: 10.0,
            currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub products_listed: i64,
    pub products_sold: i64,
    pub rating: f64,
    pub member_since: DateTime,
    pub last_active: DateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub email_verified: bool,
    #[serde(default)]
    pub verification_token: Option<String>,
    #[serde(default)]
    pub verification_expires: Option<DateTime>,
    #[serde(default)]
    pub reset_token: Option<String>,
    #[serde(default)]
    pub reset_expires: Option<DateTime>,
}

/// Failed-login bookkeeping; see `auth::lockout` for the transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    pub login_attempts: i32,
    #[serde(default)]
    pub lock_until: Option<DateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<UserLocation>,
    #[serde(default)]
    pub preferences: Preferences,
    pub stats: UserStats,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default)]
    pub security: Security,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// At least eight characters with an uppercase letter, a lowercase letter and a digit.
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let long_enough = password.chars().count() >= 8;
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());

    if long_enough && upper && lower && digit {
        Ok(())
    } else {
        let mut err = ValidationError::new("password_strength");
        err.message = Some(
            "password must be at least 8 characters and contain an uppercase letter, a lowercase letter and a number"
                .into(),
        );
        Err(err)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(length(min = 2, max = 50, message = "name must be 2-50 characters"))]
    pub name: String,
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TokenInput {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordInput {
    #[validate(email(message = "a valid email is required"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordInput {
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    #[validate(length(min = 1, message = "current password is required"))]
    pub current_password: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(length(min = 2, max = 50, message = "name must be 2-50 characters"))]
    pub name: Option<String>,
    #[validate(nested)]
    pub profile: Option<Profile>,
    #[validate(nested)]
    pub location: Option<UserLocation>,
    #[validate(nested)]
    pub preferences: Option<Preferences>,
}

/// What callers may see of a user; never carries the password or tokens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub profile: Profile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<UserLocation>,
    pub preferences: Preferences,
    pub stats: StatsResponse,
    pub email_verified: bool,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub products_listed: i64,
    pub products_sold: i64,
    pub rating: f64,
    pub member_since: chrono::DateTime<Utc>,
    pub last_active: chrono::DateTime<Utc>,
}

impl From<&UserStats> for StatsResponse {
    fn from(stats: &UserStats) -> Self {
        StatsResponse {
            products_listed: stats.products_listed,
            products_sold: stats.products_sold,
            rating: stats.rating,
            member_since: stats.member_since.to_chrono(),
            last_active: stats.last_active.to_chrono(),
        }
    }
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user.id.to_hex(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            profile: user.profile.clone(),
            location: user.location.clone(),
            preferences: user.preferences.clone(),
            stats: StatsResponse::from(&user.stats),
            email_verified: user.verification.email_verified,
            created_at: user.created_at.to_chrono(),
        }
    }
}
