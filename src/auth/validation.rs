use lazy_static::lazy_static;
use regex::Regex;

use crate::auth::dto::{
    ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RegisterRequest,
    ResetPasswordRequest,
};

pub const MIN_PASSWORD_LEN: usize = 6;
const MAX_NAME_LEN: usize = 100;

/// A request field that failed a shape check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn is_valid_phone(phone: &str) -> bool {
    lazy_static! {
        static ref PHONE_RE: Regex = Regex::new(r"^\+?[1-9]\d{6,14}$").unwrap();
    }
    PHONE_RE.is_match(phone)
}

fn check_email(email: &str) -> Result<(), ValidationError> {
    if is_valid_email(&normalize_email(email)) {
        Ok(())
    } else {
        Err(ValidationError::new("email", "must be a valid email address"))
    }
}

fn check_password(field: &'static str, password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

fn check_name(field: &'static str, name: &str) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

pub fn validate_register(req: &RegisterRequest) -> Result<(), ValidationError> {
    check_email(&req.email)?;
    check_password("password", &req.password)?;
    check_name("first_name", &req.first_name)?;
    check_name("last_name", &req.last_name)?;
    if let Some(phone) = req.phone.as_deref() {
        if !is_valid_phone(phone.trim()) {
            return Err(ValidationError::new("phone", "must be a valid phone number"));
        }
    }
    Ok(())
}

pub fn validate_login(req: &LoginRequest) -> Result<(), ValidationError> {
    check_email(&req.email)?;
    if req.password.is_empty() {
        return Err(ValidationError::new("password", "must not be empty"));
    }
    Ok(())
}

pub fn validate_forgot_password(req: &ForgotPasswordRequest) -> Result<(), ValidationError> {
    check_email(&req.email)
}

pub fn validate_reset_password(req: &ResetPasswordRequest) -> Result<(), ValidationError> {
    if req.token.trim().is_empty() {
        return Err(ValidationError::new("token", "must not be empty"));
    }
    check_password("new_password", &req.new_password)
}

pub fn validate_change_password(req: &ChangePasswordRequest) -> Result<(), ValidationError> {
    if req.old_password.is_empty() {
        return Err(ValidationError::new("old_password", "must not be empty"));
    }
    check_password("new_password", &req.new_password)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: password.into(),
            first_name: "Alice".into(),
            last_name: "Liddell".into(),
            phone: None,
            role: None,
        }
    }

    #[test]
    fn email_normalization_and_shape() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
        assert!(is_valid_email("alice@example.com"));
        assert!(!is_valid_email("alice@example"));
        assert!(!is_valid_email("alice example.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn register_checks_each_field() {
        assert!(validate_register(&register("alice@example.com", "secret123")).is_ok());
        assert_eq!(
            validate_register(&register("nope", "secret123")).unwrap_err().field,
            "email"
        );
        assert_eq!(
            validate_register(&register("alice@example.com", "12345"))
                .unwrap_err()
                .field,
            "password"
        );

        let mut req = register("alice@example.com", "secret123");
        req.first_name = "   ".into();
        assert_eq!(validate_register(&req).unwrap_err().field, "first_name");

        let mut req = register("alice@example.com", "secret123");
        req.phone = Some("+14155552671".into());
        assert!(validate_register(&req).is_ok());
        req.phone = Some("call me".into());
        assert_eq!(validate_register(&req).unwrap_err().field, "phone");
    }

    #[test]
    fn reset_and_change_need_a_usable_new_password() {
        assert!(validate_reset_password(&ResetPasswordRequest {
            token: "abc".into(),
            new_password: "secret123".into(),
        })
        .is_ok());
        assert_eq!(
            validate_reset_password(&ResetPasswordRequest {
                token: " ".into(),
                new_password: "secret123".into(),
            })
            .unwrap_err()
            .field,
            "token"
        );
        assert_eq!(
            validate_change_password(&ChangePasswordRequest {
                old_password: "old-secret".into(),
                new_password: "short".into(),
            })
            .unwrap_err()
            .field,
            "new_password"
        );
    }

    #[test]
    fn error_message_names_the_field() {
        let err = validate_forgot_password(&ForgotPasswordRequest { email: "x".into() }).unwrap_err();
        assert_eq!(err.to_string(), "email: must be a valid email address");
    }
}
