use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    Validation,
    PhaseViolation,
    Internal,
}

/// Field name to the list of problems found with it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: FieldErrors,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: FieldErrors::new(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "action not allowed")
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn phase_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PhaseViolation, message)
    }

    /// A validation failure pinned to a single form field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.clone()]);
        Self {
            code: ErrorCode::Validation,
            message,
            fields,
        }
    }

    pub fn from_fields(fields: FieldErrors) -> Self {
        Self {
            code: ErrorCode::Validation,
            message: "invalid form".to_string(),
            fields,
        }
    }
}

impl From<UnknownVariant> for ApiError {
    fn from(value: UnknownVariant) -> Self {
        Self::new(ErrorCode::Validation, value.to_string())
    }
}
