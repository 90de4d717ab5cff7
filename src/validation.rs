//! Field-level request validation.
//!
//! Handlers collect every problem with a payload before answering, so a
//! client gets all field messages from a single 400 response.

use crate::error::{AppError, AppResult, FieldError};

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.push(field, format!("{field} is required"));
        }
        self
    }

    /// Like [`Validator::required`] but only when the value was supplied.
    pub fn not_blank(&mut self, field: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value {
            self.required(field, value);
        }
        self
    }

    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        if value.chars().count() < min {
            self.push(field, format!("{field} must be at least {min} characters"));
        }
        self
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if !is_plausible_email(value) {
            self.push(field, "must be a valid email address");
        }
        self
    }

    pub fn range<T>(&mut self, field: &str, value: T, min: T, max: T) -> &mut Self
    where
        T: PartialOrd + std::fmt::Display,
    {
        if value < min || value > max {
            self.push(field, format!("{field} must be between {min} and {max}"));
        }
        self
    }

    pub fn at_least<T>(&mut self, field: &str, value: T, min: T) -> &mut Self
    where
        T: PartialOrd + std::fmt::Display,
    {
        if value < min {
            self.push(field, format!("{field} must be at least {min}"));
        }
        self
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.errors.push(FieldError::new(field, message));
        self
    }

    pub fn finish(&mut self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}

/// Lowercases and trims an email so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_field_error() {
        let err = Validator::new()
            .required("first_name", "  ")
            .email("email", "not-an-email")
            .min_len("password", "123", 6)
            .finish()
            .unwrap_err();

        match err {
            AppError::Validation(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, ["first_name", "email", "password"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn accepts_valid_input() {
        assert!(
            Validator::new()
                .email("email", "jane@example.com")
                .range("rating", 5, 1, 5)
                .not_blank("phone", None)
                .finish()
                .is_ok()
        );
    }

    #[test]
    fn normalizes_email() {
        assert_eq!(normalize_email("  Jane@Example.COM "), "jane@example.com");
    }
}
