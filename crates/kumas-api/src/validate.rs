//! Boundary validation. Every failed constraint of a request is collected and
//! reported together as one `BadRequest`.

use kumas_types::api::{LoginRequest, RegisterRequest, UpdateUserRequest};
use validator::ValidateEmail;

use crate::error::ApiError;

pub const EMAIL_MAX: usize = 30;
pub const PASSWORD_MAX: usize = 100;
pub const NAME_MAX: usize = 10;
pub const TITLE_MAX: usize = 100;
pub const CONTENT_MAX: usize = 100;

#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn length(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        let len = value.chars().count();
        if len == 0 || len > max {
            self.failures
                .push(format!("{field} must be between 1 and {max} characters"));
        }
        self
    }

    fn email(&mut self, value: &str) -> &mut Self {
        self.length("email", value, EMAIL_MAX);
        if !is_email(value) {
            self.failures.push("email must be an email".to_string());
        }
        self
    }

    fn finish(&mut self) -> Result<(), ApiError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(ApiError::bad_request(self.failures.join(", ")))
        }
    }
}

fn is_email(value: &str) -> bool {
    value.validate_email()
}

pub fn register(req: &RegisterRequest) -> Result<(), ApiError> {
    Checks::default()
        .email(&req.email)
        .length("password", &req.password, PASSWORD_MAX)
        .length("name", &req.name, NAME_MAX)
        .finish()
}

pub fn login(req: &LoginRequest) -> Result<(), ApiError> {
    Checks::default()
        .email(&req.email)
        .length("password", &req.password, PASSWORD_MAX)
        .finish()
}

pub fn update_user(req: &UpdateUserRequest) -> Result<(), ApiError> {
    let mut checks = Checks::default();
    if let Some(email) = &req.email {
        checks.email(email);
    }
    if let Some(password) = &req.password {
        checks.length("password", password, PASSWORD_MAX);
    }
    if let Some(name) = &req.name {
        checks.length("name", name, NAME_MAX);
    }
    checks.finish()
}

pub fn title(title: &str) -> Result<(), ApiError> {
    Checks::default().length("title", title, TITLE_MAX).finish()
}

pub fn content(content: &str) -> Result<(), ApiError> {
    Checks::default().length("content", content, CONTENT_MAX).finish()
}
