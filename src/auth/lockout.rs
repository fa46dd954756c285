//! Failed-login lockout. An account is either unlocked or locked until
//! `lock_until`; expiry is noticed on the next attempt rather than scheduled.

use bson::DateTime;

use crate::models::user::Security;

pub const MAX_LOGIN_ATTEMPTS: i32 = 5;
pub const LOCK_DURATION_SECS: i64 = 2 * 60 * 60;

pub fn is_locked(security: &Security, now: DateTime) -> bool {
    security.lock_until.map_or(false, |until| until > now)
}

/// Whole seconds until the lock lifts, if locked.
pub fn retry_after_secs(security: &Security, now: DateTime) -> Option<i64> {
    security
        .lock_until
        .filter(|until| *until > now)
        .map(|until| {
            let millis = until.timestamp_millis() - now.timestamp_millis();
            (millis + 999) / 1000
        })
}

/// State after a wrong password.
pub fn register_failure(security: &Security, now: DateTime) -> Security {
    if let Some(until) = security.lock_until {
        if until <= now {
            return Security {
                login_attempts: 1,
                lock_until: None,
            };
        }
    }

    let attempts = security.login_attempts + 1;
    let lock_until = if attempts >= MAX_LOGIN_ATTEMPTS && !is_locked(security, now) {
        Some(DateTime::from_millis(
            now.timestamp_millis() + LOCK_DURATION_SECS * 1000,
        ))
    } else {
        security.lock_until
    };

    Security {
        login_attempts: attempts,
        lock_until,
    }
}

/// State after a correct password.
pub fn register_success() -> Security {
    Security::default()
}
