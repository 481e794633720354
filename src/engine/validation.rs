//! Input checks for registration and login payloads.

use regex::Regex;
use secrecy::SecretString;

use super::error::FieldError;
use crate::hasher::MAX_PASSWORD_BYTES;
use super::{LoginRequest, SignupRequest};

pub const MIN_HANDLE_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

pub(crate) struct ValidSignup {
    pub(crate) name: String,
    pub(crate) handle: String,
    pub(crate) email: String,
    pub(crate) password: SecretString,
}

pub(crate) enum LoginIdentifier {
    Handle(String),
    Email(String),
}

pub(crate) struct ValidLogin {
    pub(crate) identifier: LoginIdentifier,
    pub(crate) password: SecretString,
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Passwords are taken verbatim, never trimmed.
fn check_password(password: Option<String>, errors: &mut Vec<FieldError>) -> Option<SecretString> {
    match password {
        Some(password) if password.len() > MAX_PASSWORD_BYTES => {
            errors.push(FieldError::new(
                "password",
                format!("must be at most {MAX_PASSWORD_BYTES} bytes"),
            ));
            None
        }
        Some(password) if password.chars().count() >= MIN_PASSWORD_LEN => {
            Some(SecretString::from(password))
        }
        Some(_) => {
            errors.push(FieldError::new(
                "password",
                format!("must be at least {MIN_PASSWORD_LEN} characters"),
            ));
            None
        }
        None => {
            errors.push(FieldError::new("password", "is required"));
            None
        }
    }
}

pub(crate) fn validate_signup(request: SignupRequest) -> Result<ValidSignup, Vec<FieldError>> {
    let mut errors = Vec::new();

    let name = trimmed(request.name.as_ref());
    if name.is_none() {
        errors.push(FieldError::new("name", "is required"));
    }

    let handle = trimmed(request.handle.as_ref());
    match &handle {
        None => errors.push(FieldError::new("handle", "is required")),
        Some(handle) if handle.chars().count() < MIN_HANDLE_LEN => errors.push(FieldError::new(
            "handle",
            format!("must be at least {MIN_HANDLE_LEN} characters"),
        )),
        Some(_) => {}
    }

    let email = request.email.as_deref().map(normalize_email);
    match &email {
        None => errors.push(FieldError::new("email", "is required")),
        Some(email) if !valid_email(email) => {
            errors.push(FieldError::new("email", "must be a valid email address"));
        }
        Some(_) => {}
    }

    let password = check_password(request.password, &mut errors);

    match (name, handle, email, password) {
        (Some(name), Some(handle), Some(email), Some(password)) if errors.is_empty() => {
            Ok(ValidSignup {
                name,
                handle,
                email,
                password,
            })
        }
        _ => Err(errors),
    }
}

pub(crate) fn validate_login(request: LoginRequest) -> Result<ValidLogin, Vec<FieldError>> {
    let mut errors = Vec::new();

    let handle = trimmed(request.handle.as_ref());
    let email = trimmed(request.email.as_ref()).map(|email| normalize_email(&email));

    let identifier = match (handle, email) {
        (Some(handle), None) => Some(LoginIdentifier::Handle(handle)),
        (None, Some(email)) => Some(LoginIdentifier::Email(email)),
        (Some(_), Some(_)) => {
            errors.push(FieldError::new(
                "handle",
                "provide either a handle or an email, not both",
            ));
            None
        }
        (None, None) => {
            errors.push(FieldError::new("handle", "a handle or an email is required"));
            None
        }
    };

    let password = check_password(request.password, &mut errors);

    match (identifier, password) {
        (Some(identifier), Some(password)) if errors.is_empty() => Ok(ValidLogin {
            identifier,
            password,
        }),
        _ => Err(errors),
    }
}
