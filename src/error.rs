use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Account is temporarily locked due to too many failed login attempts")]
    AccountLocked { retry_after_secs: i64 },

    #[error("Too many requests, please try again later")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Validation failure pinned to one input field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        AppError::Validation {
            message: format!("Invalid value for {field}"),
            fields: vec![FieldError::new(field, message)],
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        AppError::Internal(err.to_string())
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Duplicate(_) => "DUPLICATE_KEY",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::AccountLocked { .. } => "ACCOUNT_LOCKED",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldError]>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<i64>,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::Duplicate(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::EmailNotVerified => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AccountLocked { .. } => StatusCode::LOCKED,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (details, retry_after) = match self {
            AppError::Validation { fields, .. } if !fields.is_empty() => (Some(fields.as_slice()), None),
            AppError::AccountLocked { retry_after_secs } => (None, Some(*retry_after_secs)),
            AppError::RateLimited { retry_after_secs } => (None, Some(*retry_after_secs as i64)),
            _ => (None, None),
        };

        if let AppError::Internal(cause) = self {
            log::error!("Request failed: {}", cause);
        }

        let mut builder = HttpResponse::build(self.status_code());
        if let AppError::RateLimited { retry_after_secs } = self {
            builder.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
        }

        builder.json(ErrorBody {
            success: false,
            error: self.to_string(),
            code: self.code(),
            details,
            retry_after,
        })
    }
}

fn validation_message(err: &validator::ValidationError) -> String {
    err.message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}

/// Flattens nested struct and list errors into dotted paths such as
/// `location.lat` or `images[0].url`.
fn collect_field_errors(prefix: Option<&str>, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{field}"),
            None => field.to_string(),
        };
        match kind {
            ValidationErrorsKind::Field(errs) => out.extend(
                errs.iter()
                    .map(|e| FieldError::new(path.clone(), validation_message(e))),
            ),
            ValidationErrorsKind::Struct(inner) => collect_field_errors(Some(&path), inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(Some(&format!("{path}[{index}]")), inner, out);
                }
            }
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields = Vec::new();
        collect_field_errors(None, &errors, &mut fields);
        fields.sort_by(|a, b| a.field.cmp(&b.field));

        AppError::Validation {
            message: "Validation failed".to_string(),
            fields,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
