//! Type registry capability surface.
//!
//! The engine never touches live objects directly. Everything it needs to
//! know about a type, and every write it performs, goes through a
//! [`TypeRegistry`] supplied by the caller. Live objects are opaque handles
//! (`TypeRegistry::Object`); writes happen through `&self` so handles are
//! expected to provide their own interior mutability.

use serde::{Deserialize, Serialize};

use crate::errors::{RefDeltaError, Result};
use crate::model::{FieldId, SerializedInstance, TypeId};

/// Storage kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Plain,
    Reflectable,
    ReflectablePtr,
    DataBlock,
}

impl FieldKind {
    /// Whether a (non-array) serialized value has this kind
    pub fn matches(&self, value: &SerializedInstance) -> bool {
        matches!(
            (self, value),
            (FieldKind::Plain, SerializedInstance::Plain(_))
                | (FieldKind::Reflectable, SerializedInstance::Reflectable(_))
                | (FieldKind::ReflectablePtr, SerializedInstance::ReflectablePtr(_))
                | (FieldKind::DataBlock, SerializedInstance::DataBlock(_))
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Plain => "plain",
            FieldKind::Reflectable => "reflectable",
            FieldKind::ReflectablePtr => "reflectable_ptr",
            FieldKind::DataBlock => "data_block",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes one field of a reflective type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub name: String,
    pub kind: FieldKind,
    pub is_array: bool,
    /// Declared type of reflectable fields
    pub type_id: Option<TypeId>,
}

impl FieldDescriptor {
    fn new(id: u32, name: &str, kind: FieldKind, type_id: Option<TypeId>) -> Self {
        Self {
            id: FieldId(id),
            name: name.to_string(),
            kind,
            is_array: false,
            type_id,
        }
    }

    pub fn plain(id: u32, name: &str) -> Self {
        Self::new(id, name, FieldKind::Plain, None)
    }

    pub fn data_block(id: u32, name: &str) -> Self {
        Self::new(id, name, FieldKind::DataBlock, None)
    }

    pub fn reflectable(id: u32, name: &str, type_id: TypeId) -> Self {
        Self::new(id, name, FieldKind::Reflectable, Some(type_id))
    }

    pub fn reflectable_ptr(id: u32, name: &str, type_id: TypeId) -> Self {
        Self::new(id, name, FieldKind::ReflectablePtr, Some(type_id))
    }

    /// Turn this descriptor into an array of the same element kind
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Check that a serialized value fits this field
    ///
    /// # Errors
    ///
    /// `FieldKindMismatch` when the value's kind or array-ness disagrees.
    pub fn check(&self, owner: TypeId, value: &SerializedInstance) -> Result<()> {
        let fits = match value {
            SerializedInstance::Array(_) => self.is_array,
            other => !self.is_array && self.kind.matches(other),
        };
        if fits {
            Ok(())
        } else {
            Err(RefDeltaError::FieldKindMismatch {
                type_id: owner,
                field_id: self.id,
                expected: self.describe(),
                found: value.kind_name(),
            })
        }
    }

    /// Check that an array element fits this field
    ///
    /// # Errors
    ///
    /// `FieldKindMismatch` when the element kind disagrees.
    pub fn check_element(&self, owner: TypeId, value: &SerializedInstance) -> Result<()> {
        if self.is_array && self.kind.matches(value) {
            Ok(())
        } else {
            Err(RefDeltaError::FieldKindMismatch {
                type_id: owner,
                field_id: self.id,
                expected: self.describe(),
                found: value.kind_name(),
            })
        }
    }

    /// Human-readable declared shape, e.g. `array of plain`
    pub fn describe(&self) -> String {
        if self.is_array {
            format!("array of {}", self.kind)
        } else {
            self.kind.to_string()
        }
    }
}

/// Resolves types and performs field access on live objects.
///
/// `Context` is caller-owned state handed unexamined to every accessor;
/// the engine threads it through but never reads it.
pub trait TypeRegistry {
    /// Handle to a live object. Cloning a handle must not clone the object.
    type Object: Clone;
    type Context;

    /// Dynamic type of a live object
    fn type_of(&self, object: &Self::Object) -> TypeId;

    /// Whether two handles name the same live object
    fn same_object(&self, a: &Self::Object, b: &Self::Object) -> bool;

    /// Ordered field descriptors across the type's inheritance chain
    ///
    /// # Errors
    ///
    /// `UnknownType` if the id is not registered.
    fn resolve(&self, type_id: TypeId) -> Result<&[FieldDescriptor]>;

    /// Allocate a default-initialized instance
    ///
    /// # Errors
    ///
    /// `AllocationFailed` or `UnknownType`.
    fn create_instance(&self, type_id: TypeId, ctx: &mut Self::Context) -> Result<Self::Object>;

    /// Handle to the inline nested object stored in `field` (at `index` for arrays)
    ///
    /// # Errors
    ///
    /// Schema errors when the field does not hold an inline object.
    fn nested(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        index: Option<u32>,
        ctx: &mut Self::Context,
    ) -> Result<Self::Object>;

    /// Install `value` as the inline nested object of `field`
    ///
    /// Used when the nested object's dynamic type changes; the previous
    /// inline object is dropped.
    ///
    /// # Errors
    ///
    /// Schema errors when the field does not hold an inline object.
    fn replace_nested(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        index: Option<u32>,
        value: &Self::Object,
        ctx: &mut Self::Context,
    ) -> Result<()>;

    /// Current target of a shared-reference field
    ///
    /// # Errors
    ///
    /// Schema errors when the field does not hold a reference.
    fn get_ptr(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        index: Option<u32>,
        ctx: &mut Self::Context,
    ) -> Result<Option<Self::Object>>;

    /// # Errors
    ///
    /// Schema errors when the field is not an array.
    fn array_size(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        ctx: &mut Self::Context,
    ) -> Result<u32>;

    /// # Errors
    ///
    /// Schema errors when the field cannot take raw bytes.
    fn set_plain(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        index: Option<u32>,
        bytes: &[u8],
        ctx: &mut Self::Context,
    ) -> Result<()>;

    /// # Errors
    ///
    /// Schema errors when the field is not a data block.
    fn set_data_block(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        index: Option<u32>,
        data: &[u8],
        ctx: &mut Self::Context,
    ) -> Result<()>;

    /// # Errors
    ///
    /// Schema errors when the field does not hold a reference.
    fn set_ptr(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        index: Option<u32>,
        target: Option<&Self::Object>,
        ctx: &mut Self::Context,
    ) -> Result<()>;

    /// # Errors
    ///
    /// Schema or allocation errors.
    fn set_array_size(
        &self,
        object: &Self::Object,
        field: &FieldDescriptor,
        size: u32,
        ctx: &mut Self::Context,
    ) -> Result<()>;

    /// Called when an object becomes the write target
    fn on_object_start(&self, _object: &Self::Object, _ctx: &mut Self::Context) {}

    /// Called when an object stops being the write target
    fn on_object_end(&self, _object: &Self::Object, _ctx: &mut Self::Context) {}

    /// Look up one field of a type by id
    ///
    /// # Errors
    ///
    /// `UnknownType` or `UnknownField`.
    fn field(&self, type_id: TypeId, field_id: FieldId) -> Result<&FieldDescriptor> {
        self.resolve(type_id)?
            .iter()
            .find(|f| f.id == field_id)
            .ok_or(RefDeltaError::UnknownField { type_id, field_id })
    }
}
