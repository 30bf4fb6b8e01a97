//! # DomainError
//!
//! Centralized error handling for the board core.
//! Validation problems are collected into [`ValidationErrors`] and handed back
//! as a value; everything else propagates unmodified.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The primary error type for all core operations.
#[derive(Error, Debug)]
pub enum DomainError {
    /// Referenced id is missing (e.g., Post, Comment, Member)
    #[error("{entity} not found with ID {id}")]
    NotFound { entity: &'static str, id: String },

    /// One or more field-scoped validation failures
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// A cascade transaction was aborted and rolled back
    #[error("deleting {entity} {id} failed and was rolled back: {source}")]
    DeletionFailed {
        entity: &'static str,
        id: String,
        #[source]
        source: Box<DomainError>,
    },

    /// Store error or constraint violation
    #[error("data access failure: {0}")]
    DataAccess(#[source] BoxError),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn data_access(err: impl Into<BoxError>) -> Self {
        Self::DataAccess(err.into())
    }

    pub fn deletion_failed(entity: &'static str, id: impl fmt::Display, source: DomainError) -> Self {
        Self::DeletionFailed {
            entity,
            id: id.to_string(),
            source: Box::new(source),
        }
    }

    /// Whether the caller may reasonably resubmit the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::DeletionFailed { .. })
    }

    /// The collected validation errors, if this is a validation rejection.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            DomainError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

/// A specialized Result type for board logic.
pub type DomainResult<T> = std::result::Result<T, DomainError>;

/// What a validation rejection is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// An edit that changes nothing
    NoChange,
    /// An upload whose name is already attached to the post
    DuplicateFile,
    /// A reply whose parent is on another post or is itself a reply
    InvalidParent,
    DuplicateLoginId,
    DuplicateNickname,
    /// A required text field is empty or whitespace
    Blank,
}

impl ValidationKind {
    pub fn default_message(self) -> &'static str {
        match self {
            ValidationKind::NoChange => "nothing was changed",
            ValidationKind::DuplicateFile => "a file with this name is already attached",
            ValidationKind::InvalidParent => "replies must target a top-level comment of the same post",
            ValidationKind::DuplicateLoginId => "this login id is already in use",
            ValidationKind::DuplicateNickname => "this nickname is already in use",
            ValidationKind::Blank => "must not be blank",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// `None` for object-level rejections such as `NoChange`
    pub field: Option<&'static str>,
    pub kind: ValidationKind,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Accumulates validation failures the way a form binding result does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an object-level rejection.
    pub fn reject(&mut self, kind: ValidationKind) {
        self.0.push(FieldError {
            field: None,
            kind,
            message: kind.default_message().to_string(),
        });
    }

    /// Records a rejection scoped to one input field.
    pub fn reject_field(&mut self, field: &'static str, kind: ValidationKind) {
        self.0.push(FieldError {
            field: Some(field),
            kind,
            message: kind.default_message().to_string(),
        });
    }

    /// Rejects `field` with `Blank` if `value` is empty or whitespace.
    pub fn require_text(&mut self, field: &'static str, value: &str) {
        if value.trim().is_empty() {
            self.reject_field(field, ValidationKind::Blank);
        }
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn has(&self, kind: ValidationKind) -> bool {
        self.0.iter().any(|e| e.kind == kind)
    }

    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.0.iter().filter(move |e| e.field == Some(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was rejected, otherwise a `Validation` error.
    pub fn into_result(self) -> DomainResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            error.fmt(f)?;
        }
        Ok(())
    }
}
