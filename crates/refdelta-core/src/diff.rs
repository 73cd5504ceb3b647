//! Diff generation pass.
//!
//! [`DiffPass`] owns the call-scoped state of one `generate_diff` call: the
//! identity-pair memo for shared objects, the output identity chosen for
//! every new-side shared object, and the builder receiving the output graph.
//! The per-instance comparison is delegated to a [`DiffHandler`].
//!
//! ## Shared references and cycles
//!
//! Each `(original, new)` pair of shared objects is diffed at most once. The
//! pair is marked in progress before recursing; meeting it again while still
//! in progress contributes no difference, since the object it names is being
//! patched through the enclosing path and the reference itself is unchanged.
//! This is what keeps self-diffs of cyclic graphs empty and guarantees
//! termination.
//!
//! ## Identity
//!
//! Every new-side shared object gets exactly one output object, so the apply
//! resolves every reference to it to one live object. The first site that
//! reaches it decides which:
//!
//! - paired with an original object nobody claimed yet, it is patched in
//!   place through that pair;
//! - otherwise (a null original, a changed type, an original already claimed
//!   by another new object) it is copied whole. A copy made because the new
//!   side split one original identity in two is marked fresh and names the
//!   pair it split from.
//!
//! Later sites link to that output object, including sites pairing it with a
//! different original (the new side merged two identities into one). A pair
//! something links to is emitted even when it has no difference, so the
//! apply meets it at its own site first and binds it to the right live
//! object. When a link only turns up after its pair finished unchanged, the
//! pass is run a second time with that pair known up front; traversal does
//! not depend on what is emitted, so the second run makes the same choices.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::trace;

use crate::errors::{RefDeltaError, Result};
use crate::handler::DiffHandler;
use crate::model::{
    GraphBuilder, ObjectId, SerializedArray, SerializedField, SerializedGraph, SerializedInstance,
    SerializedObject, TypeId,
};

/// `(original, new)` ids of a pair of shared objects
type Pair = (ObjectId, ObjectId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairState {
    /// Being diffed; carries the reserved output slot
    InProgress(ObjectId),
    Done { slot: ObjectId, changed: bool },
}

/// Output identity of a new-side shared object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Identity {
    /// Patched in place through its pair with this original object
    Paired(ObjectId),
    /// Copied whole into this output slot
    Copied(ObjectId),
}

/// State of one diff generation call.
pub struct DiffPass<'a> {
    original: &'a SerializedGraph,
    new: &'a SerializedGraph,
    pairs: HashMap<Pair, PairState>,
    /// Original object to the new object it was first paired with
    claimed: HashMap<ObjectId, ObjectId>,
    identities: HashMap<ObjectId, Identity>,
    /// Pairs other sites link to
    linked: HashSet<Pair>,
    /// A link reached a pair that had already finished unchanged
    late: bool,
    out: GraphBuilder,
}

impl<'a> DiffPass<'a> {
    pub fn new(original: &'a SerializedGraph, new: &'a SerializedGraph) -> Self {
        Self {
            original,
            new,
            pairs: HashMap::new(),
            claimed: HashMap::new(),
            identities: HashMap::new(),
            linked: HashSet::new(),
            late: false,
            out: GraphBuilder::new(),
        }
    }

    /// Diff the two root objects
    ///
    /// # Errors
    ///
    /// `TypeMismatch` when the roots differ in type, plus anything raised by
    /// the handler.
    pub fn run<H: DiffHandler>(mut self, handler: &H) -> Result<Option<SerializedGraph>> {
        let diff = self.generate(handler)?;
        if !self.late {
            return Ok(diff);
        }
        trace!(linked = self.linked.len(), "link reached a finished pair, regenerating");
        let mut rerun = DiffPass::new(self.original, self.new);
        rerun.linked = self.linked;
        rerun.generate(handler)
    }

    fn generate<H: DiffHandler>(&mut self, handler: &H) -> Result<Option<SerializedGraph>> {
        let original = self.original;
        let new = self.new;
        let org_root = original.root_object();
        let new_root = new.root_object();
        if org_root.type_id != new_root.type_id {
            return Err(RefDeltaError::TypeMismatch {
                expected: org_root.type_id,
                found: new_root.type_id,
            });
        }

        let pair = (original.root(), new.root());
        let slot = self.begin_pair(pair)?;
        let diff = self.diff_object(handler, org_root, new_root)?;
        if self.finish_pair(pair, slot, new_root.type_id, diff).is_none() {
            return Ok(None);
        }
        std::mem::take(&mut self.out).finish(slot).map(Some)
    }

    /// Diff two objects field by field in the new object's declared order
    ///
    /// Fields missing from the original are copied wholesale. Returns `None`
    /// when nothing differs.
    ///
    /// # Errors
    ///
    /// Propagates handler errors.
    pub fn diff_object<H: DiffHandler>(
        &mut self,
        handler: &H,
        original: &SerializedObject,
        new: &SerializedObject,
    ) -> Result<Option<SerializedObject>> {
        let mut fields = Vec::new();
        for field in &new.fields {
            let delta = match original.field(field.id) {
                Some(org_value) => handler.diff_instance(self, field.id, org_value, &field.value)?,
                None => Some(self.copy_instance(&field.value)?),
            };
            if let Some(value) = delta {
                fields.push(SerializedField {
                    id: field.id,
                    value,
                });
            }
        }
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(SerializedObject {
            type_id: new.type_id,
            fields,
        }))
    }

    /// Diff a pair of shared references
    ///
    /// # Errors
    ///
    /// `DanglingReference` when either id does not resolve in its graph.
    pub fn diff_shared<H: DiffHandler>(
        &mut self,
        handler: &H,
        original: Option<ObjectId>,
        new: Option<ObjectId>,
    ) -> Result<Option<SerializedInstance>> {
        let (org_id, new_id) = match (original, new) {
            (None, None) => return Ok(None),
            (Some(_), None) => return Ok(Some(SerializedInstance::ReflectablePtr(None))),
            (None, Some(new_id)) => return self.link(new_id).map(pointer),
            (Some(org_id), Some(new_id)) => (org_id, new_id),
        };

        let original_graph = self.original;
        let new_graph = self.new;
        let org_obj = original_graph
            .get(org_id)
            .ok_or(RefDeltaError::DanglingReference { object_id: org_id })?;
        let new_obj = new_graph
            .get(new_id)
            .ok_or(RefDeltaError::DanglingReference { object_id: new_id })?;

        if org_obj.type_id != new_obj.type_id {
            return self.link(new_id).map(pointer);
        }

        let pair = (org_id, new_id);
        match self.identities.get(&new_id).copied() {
            Some(Identity::Paired(paired)) if paired == org_id => {}
            Some(_) => {
                trace!(original = %org_id, new = %new_id, "identity merge");
                return self.link(new_id).map(pointer);
            }
            None => {
                if let Some(&claimant) = self.claimed.get(&org_id) {
                    trace!(original = %org_id, new = %new_id, claimant = %claimant, "identity split");
                    let from = self.link_pair((org_id, claimant))?;
                    let copy = self.copy_shared(new_id)?;
                    self.out.mark_fresh(copy, from);
                    return Ok(pointer(copy));
                }
                let slot = self.begin_pair(pair)?;
                let diff = self.diff_object(handler, org_obj, new_obj)?;
                return Ok(self
                    .finish_pair(pair, slot, new_obj.type_id, diff)
                    .map(|slot| SerializedInstance::ReflectablePtr(Some(slot))));
            }
        }

        match self.pairs.get(&pair).copied() {
            Some(PairState::InProgress(_)) => {
                trace!(original = %org_id, new = %new_id, "pair in progress, no further difference");
                Ok(None)
            }
            Some(PairState::Done { slot, changed }) => {
                trace!(original = %org_id, new = %new_id, "pair reused");
                Ok(changed.then(|| SerializedInstance::ReflectablePtr(Some(slot))))
            }
            None => Err(RefDeltaError::DanglingReference { object_id: new_id }),
        }
    }

    /// Deep-copy a new-side value into the output graph
    ///
    /// # Errors
    ///
    /// `DanglingReference` for unresolved shared references.
    pub fn copy_instance(&mut self, value: &SerializedInstance) -> Result<SerializedInstance> {
        Ok(match value {
            SerializedInstance::Reflectable(obj) => {
                SerializedInstance::Reflectable(self.copy_object(obj)?)
            }
            SerializedInstance::ReflectablePtr(Some(id)) => {
                SerializedInstance::ReflectablePtr(Some(self.link(*id)?))
            }
            SerializedInstance::Array(arr) => {
                let mut entries = BTreeMap::new();
                for (&index, element) in &arr.entries {
                    entries.insert(index, self.copy_instance(element)?);
                }
                SerializedInstance::Array(SerializedArray {
                    len: arr.len,
                    entries,
                    resized: arr.resized,
                })
            }
            SerializedInstance::Plain(_)
            | SerializedInstance::ReflectablePtr(None)
            | SerializedInstance::DataBlock(_) => value.clone(),
        })
    }

    /// Deep-copy a new-side object into the output graph
    ///
    /// # Errors
    ///
    /// `DanglingReference` for unresolved shared references.
    pub fn copy_object(&mut self, obj: &SerializedObject) -> Result<SerializedObject> {
        let mut fields = Vec::with_capacity(obj.fields.len());
        for field in &obj.fields {
            fields.push(SerializedField {
                id: field.id,
                value: self.copy_instance(&field.value)?,
            });
        }
        Ok(SerializedObject {
            type_id: obj.type_id,
            fields,
        })
    }

    fn begin_pair(&mut self, pair: Pair) -> Result<ObjectId> {
        let slot = self.out.reserve()?;
        self.pairs.insert(pair, PairState::InProgress(slot));
        self.claimed.insert(pair.0, pair.1);
        self.identities.insert(pair.1, Identity::Paired(pair.0));
        Ok(slot)
    }

    /// Store a pair's result; returns the slot when its site must be emitted
    fn finish_pair(
        &mut self,
        pair: Pair,
        slot: ObjectId,
        type_id: TypeId,
        diff: Option<SerializedObject>,
    ) -> Option<ObjectId> {
        let changed = diff.is_some();
        self.out.set(slot, diff.unwrap_or_else(|| SerializedObject::new(type_id)));
        self.pairs.insert(pair, PairState::Done { slot, changed });
        (changed || self.linked.contains(&pair)).then_some(slot)
    }

    /// Output object of a new-side shared object, copying it if it has none
    fn link(&mut self, new_id: ObjectId) -> Result<ObjectId> {
        match self.identities.get(&new_id).copied() {
            Some(Identity::Paired(org_id)) => self.link_pair((org_id, new_id)),
            Some(Identity::Copied(slot)) => Ok(slot),
            None => self.copy_shared(new_id),
        }
    }

    /// Output slot of a pair, recording that its site must be emitted
    fn link_pair(&mut self, pair: Pair) -> Result<ObjectId> {
        let state = self
            .pairs
            .get(&pair)
            .copied()
            .ok_or(RefDeltaError::DanglingReference { object_id: pair.1 })?;
        let newly_linked = self.linked.insert(pair);
        Ok(match state {
            PairState::InProgress(slot) => slot,
            PairState::Done { slot, changed } => {
                if newly_linked && !changed {
                    self.late = true;
                }
                slot
            }
        })
    }

    /// Copy a new-side shared object once, returning its id in the output
    fn copy_shared(&mut self, new_id: ObjectId) -> Result<ObjectId> {
        let new_graph = self.new;
        let obj = new_graph
            .get(new_id)
            .ok_or(RefDeltaError::DanglingReference { object_id: new_id })?;
        let slot = self.out.reserve()?;
        self.identities.insert(new_id, Identity::Copied(slot));
        let copy = self.copy_object(obj)?;
        self.out.set(slot, copy);
        Ok(slot)
    }
}

fn pointer(id: ObjectId) -> Option<SerializedInstance> {
    Some(SerializedInstance::ReflectablePtr(Some(id)))
}
