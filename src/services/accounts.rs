use std::sync::Arc;

use bson::oid::ObjectId;
use bson::DateTime;
use serde::Serialize;
use validator::Validate;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::{lockout, AuthUser, TokenKeys, TokenPurpose};
use crate::error::{AppError, AppResult};
use crate::models::user::{
    normalize_email, ChangePasswordInput, ForgotPasswordInput, LoginInput, Preferences, Profile,
    RegisterInput, ResetPasswordInput, Security, StatsResponse, TokenInput, UpdateProfileInput,
    UserStats, Verification,
};
use crate::models::{Role, User, UserResponse};
use crate::store::UserStore;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub token: String,
    pub user: UserResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
}

pub struct AccountService {
    users: Arc<dyn UserStore>,
    keys: TokenKeys,
    expose_dev_tokens: bool,
}

impl AccountService {
    pub fn new(users: Arc<dyn UserStore>, keys: TokenKeys, expose_dev_tokens: bool) -> Self {
        AccountService {
            users,
            keys,
            expose_dev_tokens,
        }
    }

    async fn load(&self, id: &ObjectId) -> AppResult<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    fn auth_token(&self, user: &User) -> AppResult<String> {
        Ok(self
            .keys
            .issue(&user.id, &user.email, user.role, TokenPurpose::Auth)?
            .token)
    }

    fn dev_token(&self, token: String) -> Option<String> {
        self.expose_dev_tokens.then_some(token)
    }

    pub async fn register(&self, input: RegisterInput) -> AppResult<AuthPayload> {
        input.validate()?;
        let email = normalize_email(&input.email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AppError::Duplicate("email".to_string()));
        }

        let password = hash_password(&input.password).map_err(AppError::internal)?;
        let now = DateTime::now();
        let id = ObjectId::new();
        let verification = self
            .keys
            .issue(&id, &email, Role::User, TokenPurpose::VerifyEmail)?;

        let user = User {
            id,
            name: input.name.trim().to_string(),
            email,
            password,
            role: Role::User,
            profile: Profile::default(),
            location: None,
            preferences: Preferences::default(),
            stats: UserStats {
                products_listed: 0,
                products_sold: 0,
                rating: 0.0,
                member_since: now,
                last_active: now,
            },
            verification: Verification {
                email_verified: false,
                verification_token: Some(verification.claims.jti.clone()),
                verification_expires: Some(DateTime::from_millis(verification.claims.exp * 1000)),
                reset_token: None,
                reset_expires: None,
            },
            security: Security::default(),
            created_at: now,
            updated_at: now,
        };
        self.users.insert(&user).await?;

        log::info!("Registered user {}", user.id);
        log::debug!("Email verification token for {}: {}", user.email, verification.token);

        Ok(AuthPayload {
            token: self.auth_token(&user)?,
            user: UserResponse::from(&user),
            verification_token: self.dev_token(verification.token),
        })
    }

    pub async fn login(&self, input: LoginInput) -> AppResult<AuthPayload> {
        input.validate()?;
        let email = normalize_email(&input.email);
        let Some(mut user) = self.users.find_by_email(&email).await? else {
            return Err(AppError::InvalidCredentials);
        };

        let now = DateTime::now();
        if let Some(retry_after_secs) = lockout::retry_after_secs(&user.security, now) {
            log::warn!("Login attempt on locked account {}", user.id);
            return Err(AppError::AccountLocked { retry_after_secs });
        }

        if !verify_password(&user.password, &input.password) {
            let Some(security) = self.users.register_failed_login(&user.id, now).await? else {
                return Err(AppError::InvalidCredentials);
            };
            if lockout::is_locked(&security, now) {
                log::warn!(
                    "Account {} locked after {} failed attempts",
                    user.id,
                    security.login_attempts
                );
            }
            return Err(AppError::InvalidCredentials);
        }

        self.users.record_login(&user.id, now).await?;
        user.security = lockout::register_success();
        user.stats.last_active = now;

        Ok(AuthPayload {
            token: self.auth_token(&user)?,
            user: UserResponse::from(&user),
            verification_token: None,
        })
    }

    pub async fn verify_email(&self, input: TokenInput) -> AppResult<UserResponse> {
        input.validate()?;
        let claims = self.keys.verify(&input.token, TokenPurpose::VerifyEmail)?;
        let mut user = self.load(&claims.user_id()?).await?;

        if user.verification.email_verified {
            return Ok(UserResponse::from(&user));
        }
        if user.verification.verification_token.as_deref() != Some(claims.jti.as_str()) {
            return Err(AppError::Unauthenticated(
                "Invalid or expired verification token".to_string(),
            ));
        }

        user.verification = Verification {
            email_verified: true,
            verification_token: None,
            verification_expires: None,
            ..user.verification
        };
        self.users
            .set_verification(&user.id, &user.verification)
            .await?;
        log::info!("Email verified for user {}", user.id);
        Ok(UserResponse::from(&user))
    }

    /// Issues a reset token when the account exists. The caller learns nothing
    /// about existence unless dev tokens are exposed.
    pub async fn forgot_password(&self, input: ForgotPasswordInput) -> AppResult<Option<String>> {
        input.validate()?;
        let email = normalize_email(&input.email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            log::info!("Password reset requested for unknown address");
            return Ok(None);
        };

        let issued = self
            .keys
            .issue(&user.id, &user.email, user.role, TokenPurpose::ResetPassword)?;
        let verification = Verification {
            reset_token: Some(issued.claims.jti.clone()),
            reset_expires: Some(DateTime::from_millis(issued.claims.exp * 1000)),
            ..user.verification
        };
        self.users.set_verification(&user.id, &verification).await?;

        log::debug!("Password reset token for {}: {}", user.email, issued.token);
        Ok(self.dev_token(issued.token))
    }

    pub async fn reset_password(&self, input: ResetPasswordInput) -> AppResult<()> {
        input.validate()?;
        let claims = self.keys.verify(&input.token, TokenPurpose::ResetPassword)?;
        let user = self.load(&claims.user_id()?).await?;

        let now = DateTime::now();
        let matches = user.verification.reset_token.as_deref() == Some(claims.jti.as_str());
        let fresh = user.verification.reset_expires.map_or(false, |exp| exp > now);
        if !matches || !fresh {
            return Err(AppError::Unauthenticated(
                "Invalid or expired reset token".to_string(),
            ));
        }

        let hash = hash_password(&input.password).map_err(AppError::internal)?;
        self.users.set_password(&user.id, &hash, now).await?;
        let verification = Verification {
            reset_token: None,
            reset_expires: None,
            ..user.verification
        };
        self.users.set_verification(&user.id, &verification).await?;
        self.users
            .update_security(&user.id, &lockout::register_success())
            .await?;

        log::info!("Password reset for user {}", user.id);
        Ok(())
    }

    pub async fn change_password(&self, actor: &AuthUser, input: ChangePasswordInput) -> AppResult<()> {
        input.validate()?;
        let user = self.load(&actor.id).await?;
        if !verify_password(&user.password, &input.current_password) {
            return Err(AppError::invalid_field(
                "currentPassword",
                "current password is incorrect",
            ));
        }

        let hash = hash_password(&input.new_password).map_err(AppError::internal)?;
        self.users
            .set_password(&user.id, &hash, DateTime::now())
            .await?;
        log::info!("Password changed for user {}", user.id);
        Ok(())
    }

    pub async fn me(&self, actor: &AuthUser) -> AppResult<UserResponse> {
        Ok(UserResponse::from(&self.load(&actor.id).await?))
    }

    pub async fn stats(&self, actor: &AuthUser) -> AppResult<StatsResponse> {
        Ok(StatsResponse::from(&self.load(&actor.id).await?.stats))
    }

    pub async fn update_profile(
        &self,
        actor: &AuthUser,
        input: UpdateProfileInput,
    ) -> AppResult<UserResponse> {
        input.validate()?;
        let user = self
            .users
            .update_profile(&actor.id, &input, DateTime::now())
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?;
        Ok(UserResponse::from(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryUserStore;

    struct Fixture {
        service: AccountService,
        users: Arc<MemoryUserStore>,
        keys: TokenKeys,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserStore::default());
        let keys = TokenKeys::new("test-secret");
        Fixture {
            service: AccountService::new(users.clone(), keys.clone(), true),
            users,
            keys,
        }
    }

    fn register_input() -> RegisterInput {
        RegisterInput {
            name: "Ana".to_string(),
            email: "a@x.com".to_string(),
            password: "Abcdef12".to_string(),
        }
    }

    fn login(password: &str) -> LoginInput {
        LoginInput {
            email: "A@x.com".to_string(),
            password: password.to_string(),
        }
    }

    fn user_id(payload: &AuthPayload) -> ObjectId {
        ObjectId::parse_str(&payload.user.id).unwrap()
    }

    #[actix_web::test]
    async fn register_returns_token_without_password() {
        let f = fixture();
        let payload = f.service.register(register_input()).await.unwrap();

        assert!(!payload.token.is_empty());
        let claims = f.keys.verify(&payload.token, TokenPurpose::Auth).unwrap();
        assert_eq!(claims.email, "a@x.com");

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["user"].get("password").is_none());
        assert_eq!(json["user"]["emailVerified"], false);

        let stored = f.users.get(&user_id(&payload)).unwrap();
        assert_ne!(stored.password, "Abcdef12");
        assert!(verify_password(&stored.password, "Abcdef12"));
    }

    #[actix_web::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let f = fixture();
        f.service.register(register_input()).await.unwrap();
        let again = RegisterInput {
            email: "A@X.COM".to_string(),
            ..register_input()
        };
        match f.service.register(again).await {
            Err(AppError::Duplicate(field)) => assert_eq!(field, "email"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[actix_web::test]
    async fn weak_password_is_a_validation_error() {
        let f = fixture();
        let weak = RegisterInput {
            password: "abcdefgh".to_string(),
            ..register_input()
        };
        assert!(matches!(
            f.service.register(weak).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[actix_web::test]
    async fn four_failures_then_success_resets_the_counter() {
        let f = fixture();
        let id = user_id(&f.service.register(register_input()).await.unwrap());

        for _ in 0..4 {
            assert!(matches!(
                f.service.login(login("Wrong123")).await,
                Err(AppError::InvalidCredentials)
            ));
        }
        assert_eq!(f.users.get(&id).unwrap().security.login_attempts, 4);

        let payload = f.service.login(login("Abcdef12")).await.unwrap();
        assert!(!payload.token.is_empty());
        assert_eq!(f.users.get(&id).unwrap().security, Security::default());
    }

    #[actix_web::test]
    async fn five_failures_lock_the_account_until_the_window_passes() {
        let f = fixture();
        let id = user_id(&f.service.register(register_input()).await.unwrap());

        for _ in 0..5 {
            assert!(matches!(
                f.service.login(login("Wrong123")).await,
                Err(AppError::InvalidCredentials)
            ));
        }

        match f.service.login(login("Abcdef12")).await {
            Err(AppError::AccountLocked { retry_after_secs }) => {
                assert!(retry_after_secs > 0 && retry_after_secs <= lockout::LOCK_DURATION_SECS)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            f.service.login(login("Wrong123")).await,
            Err(AppError::AccountLocked { .. })
        ));

        // Move the lock into the past.
        let expired = Security {
            login_attempts: 5,
            lock_until: Some(DateTime::from_millis(DateTime::now().timestamp_millis() - 1_000)),
        };
        f.users.update_security(&id, &expired).await.unwrap();

        f.service.login(login("Abcdef12")).await.unwrap();
        assert_eq!(f.users.get(&id).unwrap().security.login_attempts, 0);
    }

    #[actix_web::test]
    async fn concurrent_failures_all_count_towards_the_lock() {
        let f = fixture();
        let id = user_id(&f.service.register(register_input()).await.unwrap());
        f.users.yield_on_read();

        let attempts = (0..10).map(|_| f.service.login(login("Wrong123")));
        let results = futures::future::join_all(attempts).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(AppError::InvalidCredentials))));

        let security = f.users.get(&id).unwrap().security;
        assert_eq!(security.login_attempts, 10);
        assert!(lockout::is_locked(&security, DateTime::now()));
        assert!(matches!(
            f.service.login(login("Abcdef12")).await,
            Err(AppError::AccountLocked { .. })
        ));
    }

    #[actix_web::test]
    async fn unknown_email_is_invalid_credentials() {
        let f = fixture();
        assert!(matches!(
            f.service.login(login("Abcdef12")).await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[actix_web::test]
    async fn email_verification_is_single_use() {
        let f = fixture();
        let payload = f.service.register(register_input()).await.unwrap();
        let token = payload.verification_token.clone().unwrap();

        let user = f
            .service
            .verify_email(TokenInput { token: token.clone() })
            .await
            .unwrap();
        assert!(user.email_verified);
        assert!(f.users.get(&user_id(&payload)).unwrap().verification.verification_token.is_none());

        // An auth token is not a verification token.
        assert!(f
            .service
            .verify_email(TokenInput { token: payload.token })
            .await
            .is_err());
    }

    #[actix_web::test]
    async fn password_reset_flow() {
        let f = fixture();
        let id = user_id(&f.service.register(register_input()).await.unwrap());
        f.users
            .update_security(
                &id,
                &Security {
                    login_attempts: 5,
                    lock_until: Some(DateTime::from_millis(
                        DateTime::now().timestamp_millis() + 60_000,
                    )),
                },
            )
            .await
            .unwrap();

        let token = f
            .service
            .forgot_password(ForgotPasswordInput {
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap()
            .unwrap();

        f.service
            .reset_password(ResetPasswordInput {
                token: token.clone(),
                password: "Newpass99".to_string(),
            })
            .await
            .unwrap();

        assert!(f.service.login(login("Newpass99")).await.is_ok());
        assert!(f
            .service
            .reset_password(ResetPasswordInput {
                token,
                password: "Another99".to_string(),
            })
            .await
            .is_err());
    }

    #[actix_web::test]
    async fn forgot_password_for_unknown_email_is_silent() {
        let f = fixture();
        let result = f
            .service
            .forgot_password(ForgotPasswordInput {
                email: "nobody@x.com".to_string(),
            })
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[actix_web::test]
    async fn change_password_requires_the_current_one() {
        let f = fixture();
        let payload = f.service.register(register_input()).await.unwrap();
        let actor = AuthUser {
            id: user_id(&payload),
            email: "a@x.com".to_string(),
            role: Role::User,
        };

        let wrong = ChangePasswordInput {
            current_password: "Nope1234".to_string(),
            new_password: "Better123".to_string(),
        };
        assert!(matches!(
            f.service.change_password(&actor, wrong).await,
            Err(AppError::Validation { .. })
        ));

        let right = ChangePasswordInput {
            current_password: "Abcdef12".to_string(),
            new_password: "Better123".to_string(),
        };
        f.service.change_password(&actor, right).await.unwrap();
        assert!(f.service.login(login("Better123")).await.is_ok());
        assert!(f.service.login(login("Abcdef12")).await.is_err());
    }

    #[actix_web::test]
    async fn profile_updates_are_partial() {
        let f = fixture();
        let payload = f.service.register(register_input()).await.unwrap();
        let actor = AuthUser {
            id: user_id(&payload),
            email: "a@x.com".to_string(),
            role: Role::User,
        };

        let updated = f
            .service
            .update_profile(
                &actor,
                UpdateProfileInput {
                    profile: Some(Profile {
                        bio: Some("Selling bikes".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Ana");
        assert_eq!(updated.profile.bio.as_deref(), Some("Selling bikes"));

        let stats = f.service.stats(&actor).await.unwrap();
        assert_eq!(stats.products_listed, 0);
    }
}
