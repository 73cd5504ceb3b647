//! Pluggable diff strategy.
//!
//! The engine drives the traversal (object walk, shared-reference memo,
//! command buffering); a [`DiffHandler`] supplies the two recursive
//! primitives that decide what a difference looks like: how one pair of
//! field values is compared, and how one diff entry becomes commands.
//! [`BinaryDiff`] is the byte-exact default.

use std::collections::BTreeMap;

use crate::diff::DiffPass;
use crate::errors::{RefDeltaError, Result};
use crate::model::{FieldId, SerializedArray, SerializedInstance, TypeId};
use crate::patch::{DiffCommand, PlanPass};
use crate::registry::{FieldDescriptor, TypeRegistry};

/// Capability injected into [`crate::engine::DiffEngine`].
pub trait DiffHandler {
    /// Compare one field value pair, returning the diff entry or `None`
    ///
    /// # Errors
    ///
    /// `KindMismatch` when the two values are different variants; anything
    /// raised while recursing.
    fn diff_instance(
        &self,
        pass: &mut DiffPass<'_>,
        field: FieldId,
        original: &SerializedInstance,
        new: &SerializedInstance,
    ) -> Result<Option<SerializedInstance>>;

    /// Emit the commands for one diff entry of an object of type `owner`
    ///
    /// `target` is the live object owning the field, when one exists at
    /// planning time.
    ///
    /// # Errors
    ///
    /// Schema errors when the entry does not fit the field, plus registry
    /// errors raised while inspecting the live object.
    fn plan_field<'a, R: TypeRegistry>(
        &self,
        pass: &mut PlanPass<'a, '_, R>,
        target: Option<&R::Object>,
        owner: TypeId,
        field: &'a FieldDescriptor,
        value: &'a SerializedInstance,
    ) -> Result<()>;
}

/// Byte-exact diff: plain values and data blocks differ iff their bytes do.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryDiff;

impl BinaryDiff {
    fn diff_array(
        &self,
        pass: &mut DiffPass<'_>,
        field: FieldId,
        original: &SerializedArray,
        new: &SerializedArray,
    ) -> Result<Option<SerializedInstance>> {
        let common = original.len.min(new.len);
        let mut entries = BTreeMap::new();
        for (&index, value) in new.entries.range(..new.len) {
            let delta = match original.entries.get(&index) {
                Some(org_value) if index < common => {
                    self.diff_instance(pass, field, org_value, value)?
                }
                _ => Some(pass.copy_instance(value)?),
            };
            if let Some(delta) = delta {
                entries.insert(index, delta);
            }
        }

        let resized = original.len != new.len;
        if entries.is_empty() && !resized {
            return Ok(None);
        }
        Ok(Some(SerializedInstance::Array(SerializedArray {
            len: new.len,
            entries,
            resized,
        })))
    }

    fn plan_value<'a, R: TypeRegistry>(
        &self,
        pass: &mut PlanPass<'a, '_, R>,
        live: Option<&R::Object>,
        field: &'a FieldDescriptor,
        index: Option<u32>,
        value: &'a SerializedInstance,
    ) -> Result<()> {
        match value {
            SerializedInstance::Plain(bytes) => pass.push(DiffCommand::Plain {
                field,
                index,
                bytes,
            }),
            SerializedInstance::DataBlock(data) => pass.push(DiffCommand::DataBlock {
                field,
                index,
                data,
            }),
            SerializedInstance::Reflectable(obj) => {
                pass.plan_inline(self, field, index, live, obj)?;
            }
            SerializedInstance::ReflectablePtr(None) => pass.push(DiffCommand::ReflectablePtr {
                field,
                index,
                target: None,
            }),
            SerializedInstance::ReflectablePtr(Some(id)) => {
                let current = match live {
                    Some(owner) => {
                        let registry = pass.registry();
                        registry.get_ptr(owner, field, index, pass.context())?
                    }
                    None => None,
                };
                let object = pass.plan_shared(self, *id, current)?;
                pass.push(DiffCommand::ReflectablePtr {
                    field,
                    index,
                    target: Some(object),
                });
            }
            // nested arrays are rejected by the descriptor checks before we get here
            SerializedInstance::Array(_) => {}
        }
        Ok(())
    }
}

impl DiffHandler for BinaryDiff {
    fn diff_instance(
        &self,
        pass: &mut DiffPass<'_>,
        field: FieldId,
        original: &SerializedInstance,
        new: &SerializedInstance,
    ) -> Result<Option<SerializedInstance>> {
        use SerializedInstance as S;

        match (original, new) {
            (S::Plain(a), S::Plain(b)) => Ok((a != b).then(|| S::Plain(b.clone()))),
            (S::DataBlock(a), S::DataBlock(b)) => Ok((a != b).then(|| S::DataBlock(b.clone()))),
            (S::Reflectable(a), S::Reflectable(b)) => {
                if a.type_id != b.type_id {
                    return Ok(Some(S::Reflectable(pass.copy_object(b)?)));
                }
                Ok(pass.diff_object(self, a, b)?.map(S::Reflectable))
            }
            (S::ReflectablePtr(a), S::ReflectablePtr(b)) => pass.diff_shared(self, *a, *b),
            (S::Array(a), S::Array(b)) => self.diff_array(pass, field, a, b),
            _ => Err(RefDeltaError::KindMismatch {
                field_id: field,
                original: original.kind_name(),
                new: new.kind_name(),
            }),
        }
    }

    fn plan_field<'a, R: TypeRegistry>(
        &self,
        pass: &mut PlanPass<'a, '_, R>,
        target: Option<&R::Object>,
        owner: TypeId,
        field: &'a FieldDescriptor,
        value: &'a SerializedInstance,
    ) -> Result<()> {
        field.check(owner, value)?;
        let SerializedInstance::Array(arr) = value else {
            return self.plan_value(pass, target, field, None, value);
        };

        let live_len = match target {
            Some(object) => {
                let registry = pass.registry();
                Some(registry.array_size(object, field, pass.context())?)
            }
            None => None,
        };
        // writes land after the resize, so they are bounded by the new length
        let bound = if arr.resized { Some(arr.len) } else { live_len };

        if arr.resized {
            pass.push(DiffCommand::ArraySize {
                field,
                size: arr.len,
            });
        }
        for (&index, element) in &arr.entries {
            field.check_element(owner, element)?;
            if let Some(len) = bound {
                if index >= len {
                    return Err(RefDeltaError::IndexOutOfRange {
                        field_id: field.id,
                        index,
                        len,
                    });
                }
            }
            // elements past the current live length only exist after the resize
            let live = target.filter(|_| live_len.is_some_and(|len| index < len));
            self.plan_value(pass, live, field, Some(index), element)?;
        }
        Ok(())
    }
}
