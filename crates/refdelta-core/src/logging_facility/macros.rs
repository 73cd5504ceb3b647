//! Operation boundary macros
//!
//! Field names and event values come from `refdelta_core_types::schema` so
//! that log consumers and test assertions share one vocabulary.

/// Log the start of an operation
///
/// # Example
///
/// ```
/// # use refdelta_core::log_op_start;
/// log_op_start!("generate_diff");
/// log_op_start!("plan", object_count = 3);
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refdelta_core_types::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refdelta_core_types::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// # Example
///
/// ```
/// # use refdelta_core::log_op_end;
/// log_op_end!("apply_diff", duration_ms = 4);
/// log_op_end!("apply_diff", duration_ms = 4, command_count = 12);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refdelta_core_types::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = refdelta_core_types::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error with its taxonomy kind and stable code
///
/// # Example
///
/// ```
/// # use refdelta_core::{log_op_error, errors::RefDeltaError, model::ObjectId};
/// let err = RefDeltaError::DanglingReference { object_id: ObjectId(7) };
/// log_op_error!("plan", err, duration_ms = 1);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        let rd_err: $crate::errors::RdError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = refdelta_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?rd_err.kind(),
            err.code = rd_err.code(),
            err.message = rd_err.message(),
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        let rd_err: $crate::errors::RdError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = refdelta_core_types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?rd_err.kind(),
            err.code = rd_err.code(),
            err.message = rd_err.message(),
            $($field)*
        );
    }};
}
