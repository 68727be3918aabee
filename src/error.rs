//! Error types for the backlog.
//!
//! Every operation on the store returns [`Result`]. The kinds mirror what a caller
//! has to tell the user: the action is not allowed, the input is wrong (field by
//! field), the record does not exist, or a precondition such as a closure
//! requirement or a uniqueness rule was not met.

use std::fmt;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Why a task could not be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureRejection {
    AlreadyClosed,
    MissingReport,
    MissingConfirmation,
    OpenBlocks,
}

impl fmt::Display for ClosureRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ClosureRejection::AlreadyClosed => "the task is already closed",
            ClosureRejection::MissingReport => "a closure report must be attached to close the task",
            ClosureRejection::MissingConfirmation => "the closure must be explicitly confirmed",
            ClosureRejection::OpenBlocks => "every block must have all of its subtasks closed",
        };
        f.write_str(msg)
    }
}

/// Main backlog error type
#[derive(Debug, thiserror::Error)]
pub enum BacklogError {
    /// The actor lacks the role, capability or responsibility for the action
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed or out-of-range input
    #[error("validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// Referenced record does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Task closure requirement not met
    #[error("cannot close task: {0}")]
    Closure(ClosureRejection),

    /// Business precondition not met
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Uniqueness violation
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed store: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BacklogError {
    /// Single-field validation error.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        BacklogError::Validation(vec![FieldError { field, message: message.into() }])
    }

    pub fn denied(message: impl Into<String>) -> Self {
        BacklogError::PermissionDenied(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BacklogError::NotFound { entity, id: id.to_string() }
    }

    /// Process exit code for the error kind.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            BacklogError::Validation(_) => 2,
            BacklogError::PermissionDenied(_) => 3,
            BacklogError::NotFound { .. } => 4,
            BacklogError::Closure(_) | BacklogError::PreconditionFailed(_) | BacklogError::Conflict(_) => 5,
            BacklogError::Io(_) | BacklogError::Json(_) | BacklogError::Config(_) => 1,
        }
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Collects field errors so several problems are reported at once.
#[derive(Debug, Default)]
pub struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, ok: bool, field: &'static str, message: impl Into<String>) {
        if !ok {
            self.errors.push(FieldError { field, message: message.into() });
        }
    }

    /// Fold a single-field result into the collection.
    pub fn absorb<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(BacklogError::Validation(mut errs)) => {
                self.errors.append(&mut errs);
                None
            }
            Err(other) => {
                self.errors.push(FieldError { field: "input", message: other.to_string() });
                None
            }
        }
    }

    pub fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(BacklogError::Validation(self.errors))
        }
    }
}

pub type Result<T> = std::result::Result<T, BacklogError>;
