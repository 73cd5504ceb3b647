//! refdelta core - structural diffs for reflective object graphs
//!
//! This crate computes the difference between two snapshots of an object
//! graph and replays such a difference onto a live object, including:
//! - A serialized graph model where shared references and cycles are ids
//! - Diff generation with identity-pair memoization and cycle tolerance
//! - Two-phase application: plan a command list, then execute it
//! - A pluggable diff strategy (`DiffHandler`), byte-exact by default
//! - An in-memory reference object model for tests and tooling
//!
//! Live objects are only ever reached through a caller-supplied
//! [`registry::TypeRegistry`].

pub mod diff;
pub mod dynamic;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod logging_facility;
pub mod model;
pub mod patch;
pub mod registry;

// Re-export commonly used types
pub use engine::DiffEngine;
pub use errors::{RdError, RdErrorKind, RefDeltaError, Result};
pub use handler::{BinaryDiff, DiffHandler};
pub use model::{
    FieldId, GraphBuilder, ObjectId, SerializedArray, SerializedField, SerializedGraph,
    SerializedInstance, SerializedObject, TypeId,
};
pub use patch::{CommandList, DiffCommand};
pub use registry::{FieldDescriptor, FieldKind, TypeRegistry};
