use refdelta_core_types::CallId;
use thiserror::Error;

use crate::model::{FieldId, ObjectId, TypeId};

/// Result type alias using RefDeltaError
pub type Result<T> = std::result::Result<T, RefDeltaError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure surfaced by the engine is a structural violation of
/// caller-supplied data and falls into exactly one of these classes. Each
/// kind maps to a stable error code for programmatic handling and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdErrorKind {
    /// Type ids or instance kinds disagree between two inputs that must match
    Consistency,
    /// A field named by a diff no longer resolves on the live type
    SchemaMismatch,
    /// A shared reference in a diff graph never resolves to an object
    CycleGuardViolation,
    /// The type registry could not create an instance
    AllocationFailure,
    /// A serialized graph could not be encoded or decoded
    Serialization,

    // Internal
    Internal,
}

impl RdErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            RdErrorKind::Consistency => "ERR_CONSISTENCY",
            RdErrorKind::SchemaMismatch => "ERR_SCHEMA_MISMATCH",
            RdErrorKind::CycleGuardViolation => "ERR_CYCLE_GUARD_VIOLATION",
            RdErrorKind::AllocationFailure => "ERR_ALLOCATION_FAILURE",
            RdErrorKind::Serialization => "ERR_SERIALIZATION",
            RdErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries the classification plus whatever context was known where the
/// error was raised. Built from a [`RefDeltaError`] at reporting boundaries
/// (logging macros, callers that want stable codes).
#[derive(Debug, Clone)]
pub struct RdError {
    kind: RdErrorKind,
    op: Option<String>,
    type_id: Option<TypeId>,
    field_id: Option<FieldId>,
    call_id: Option<CallId>,
    message: String,
}

impl RdError {
    /// Create a new error with the specified kind
    pub fn new(kind: RdErrorKind) -> Self {
        Self {
            kind,
            op: None,
            type_id: None,
            field_id: None,
            call_id: None,
            message: String::new(),
        }
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_type_id(mut self, type_id: TypeId) -> Self {
        self.type_id = Some(type_id);
        self
    }

    pub fn with_field_id(mut self, field_id: FieldId) -> Self {
        self.field_id = Some(field_id);
        self
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> RdErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn field_id(&self) -> Option<FieldId> {
        self.field_id
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for RdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(type_id) = self.type_id {
            write!(f, " (type_id: {})", type_id)?;
        }
        if let Some(field_id) = self.field_id {
            write!(f, " (field_id: {})", field_id)?;
        }
        if let Some(call_id) = &self.call_id {
            write!(f, " (call_id: {})", call_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for RdError {}

// ========== End Error Facility ==========

/// Error taxonomy for diff generation and application
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefDeltaError {
    // ===== Consistency Errors =====
    /// Two objects that must share a type do not
    #[error("Type mismatch: expected type {expected}, found {found}")]
    TypeMismatch { expected: TypeId, found: TypeId },

    /// The same field holds different instance kinds on the two sides
    #[error("Field {field_id} holds {original} in the original but {new} in the new snapshot")]
    KindMismatch {
        field_id: FieldId,
        original: &'static str,
        new: &'static str,
    },

    /// Object start/end brackets in a command list do not pair up
    #[error("Unbalanced command list: {reason}")]
    UnbalancedCommands { reason: String },

    // ===== Schema Errors =====
    /// The registry has no type with this id
    #[error("Unknown type: {type_id}")]
    UnknownType { type_id: TypeId },

    /// The diff names a field the live type does not declare
    #[error("Field {field_id} does not exist on type {type_id}")]
    UnknownField { type_id: TypeId, field_id: FieldId },

    /// A by-name field lookup found nothing
    #[error("Type {type_id} has no field named '{name}'")]
    UnknownFieldName { type_id: TypeId, name: String },

    /// The diff entry's kind disagrees with the field descriptor
    #[error("Field {field_id} on type {type_id} is declared as {expected}, diff holds {found}")]
    FieldKindMismatch {
        type_id: TypeId,
        field_id: FieldId,
        expected: String,
        found: &'static str,
    },

    /// An array access fell outside the live array
    #[error("Index {index} out of range for field {field_id} (len {len})")]
    IndexOutOfRange {
        field_id: FieldId,
        index: u32,
        len: u32,
    },

    // ===== Reference Errors =====
    /// A shared reference names an object the graph does not contain
    #[error("Dangling shared reference to object {object_id}")]
    DanglingReference { object_id: ObjectId },

    // ===== Allocation Errors =====
    /// The registry failed to create an instance
    #[error("Failed to allocate instance of type {type_id}: {reason}")]
    AllocationFailed { type_id: TypeId, reason: String },

    // ===== Serialization Errors =====
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    // ===== Internal Errors =====
    /// A count does not fit the 32-bit ids and lengths of the serialized form
    #[error("Too many {what}: {count} exceeds the 32-bit limit")]
    CapacityExceeded { what: &'static str, count: usize },
}

impl RefDeltaError {
    /// Classify this error into the canonical taxonomy
    pub fn kind(&self) -> RdErrorKind {
        match self {
            RefDeltaError::TypeMismatch { .. }
            | RefDeltaError::KindMismatch { .. }
            | RefDeltaError::UnbalancedCommands { .. } => RdErrorKind::Consistency,
            RefDeltaError::UnknownType { .. }
            | RefDeltaError::UnknownField { .. }
            | RefDeltaError::UnknownFieldName { .. }
            | RefDeltaError::FieldKindMismatch { .. }
            | RefDeltaError::IndexOutOfRange { .. } => RdErrorKind::SchemaMismatch,
            RefDeltaError::DanglingReference { .. } => RdErrorKind::CycleGuardViolation,
            RefDeltaError::AllocationFailed { .. } => RdErrorKind::AllocationFailure,
            RefDeltaError::Serialization { .. } => RdErrorKind::Serialization,
            RefDeltaError::CapacityExceeded { .. } => RdErrorKind::Internal,
        }
    }
}

/// Conversion from RefDeltaError to RdError
impl From<RefDeltaError> for RdError {
    fn from(err: RefDeltaError) -> Self {
        let base = RdError::new(err.kind()).with_message(err.to_string());
        match err {
            RefDeltaError::TypeMismatch { expected, .. } => base.with_type_id(expected),
            RefDeltaError::KindMismatch { field_id, .. }
            | RefDeltaError::IndexOutOfRange { field_id, .. } => base.with_field_id(field_id),
            RefDeltaError::UnknownType { type_id }
            | RefDeltaError::UnknownFieldName { type_id, .. }
            | RefDeltaError::AllocationFailed { type_id, .. } => base.with_type_id(type_id),
            RefDeltaError::UnknownField { type_id, field_id }
            | RefDeltaError::FieldKindMismatch {
                type_id, field_id, ..
            } => base.with_type_id(type_id).with_field_id(field_id),
            RefDeltaError::UnbalancedCommands { .. }
            | RefDeltaError::DanglingReference { .. }
            | RefDeltaError::Serialization { .. }
            | RefDeltaError::CapacityExceeded { .. } => base,
        }
    }
}

/// Conversion from serde_json::Error to RefDeltaError
impl From<serde_json::Error> for RefDeltaError {
    fn from(err: serde_json::Error) -> Self {
        RefDeltaError::Serialization {
            message: err.to_string(),
        }
    }
}
