//! Intermediate serialized form of reflective objects.
//!
//! A snapshot of an object graph is a [`SerializedGraph`]: an arena of
//! [`SerializedObject`]s addressed by [`ObjectId`]. Inline sub-objects are
//! owned by value inside their parent; shared sub-objects live in the arena
//! and are referenced by id, which is how shared ownership and cycles are
//! expressed without reference-counted cycles.
//!
//! Diff trees use exactly the same shape, so anything that can persist a
//! snapshot can persist a diff.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::errors::{RefDeltaError, Result};

/// Identifier of a reflective type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub u32);

/// Identifier of a field, unique within a type's inheritance chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub u32);

/// Index of an object inside a [`SerializedGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Narrow a count to the 32-bit width used for ids and lengths
///
/// # Errors
///
/// `CapacityExceeded` when `count` does not fit.
pub fn to_u32(count: usize, what: &'static str) -> Result<u32> {
    u32::try_from(count).map_err(|_| RefDeltaError::CapacityExceeded { what, count })
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One `(field-id, value)` pair of a serialized object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedField {
    pub id: FieldId,
    pub value: SerializedInstance,
}

/// Snapshot of one reflective object.
///
/// `fields` covers the type's whole inheritance chain in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedObject {
    pub type_id: TypeId,
    pub fields: Vec<SerializedField>,
}

impl SerializedObject {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            fields: Vec::new(),
        }
    }

    /// Append a field (builder style)
    pub fn with_field(mut self, id: FieldId, value: SerializedInstance) -> Self {
        self.fields.push(SerializedField { id, value });
        self
    }

    /// Look up a field value by id
    pub fn field(&self, id: FieldId) -> Option<&SerializedInstance> {
        self.fields.iter().find(|f| f.id == id).map(|f| &f.value)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn collect_refs(&self, out: &mut Vec<ObjectId>) {
        for field in &self.fields {
            field.value.collect_refs(out);
        }
    }

    fn remap_refs(&mut self, remap: &HashMap<ObjectId, ObjectId>) {
        for field in &mut self.fields {
            field.value.remap_refs(remap);
        }
    }
}

/// A serialized field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SerializedInstance {
    /// Raw value bytes, copied verbatim and never interpreted
    Plain(#[serde(with = "base64_bytes")] Vec<u8>),
    /// An inline nested object owned by its parent
    Reflectable(SerializedObject),
    /// A reference to a shared object in the enclosing graph, or null
    ReflectablePtr(Option<ObjectId>),
    /// An opaque byte stream
    DataBlock(#[serde(with = "base64_bytes")] Vec<u8>),
    Array(SerializedArray),
}

impl SerializedInstance {
    /// Short name of the variant, used in error reports
    pub fn kind_name(&self) -> &'static str {
        match self {
            SerializedInstance::Plain(_) => "plain",
            SerializedInstance::Reflectable(_) => "reflectable",
            SerializedInstance::ReflectablePtr(_) => "reflectable_ptr",
            SerializedInstance::DataBlock(_) => "data_block",
            SerializedInstance::Array(_) => "array",
        }
    }

    fn collect_refs(&self, out: &mut Vec<ObjectId>) {
        match self {
            SerializedInstance::Reflectable(obj) => obj.collect_refs(out),
            SerializedInstance::ReflectablePtr(Some(id)) => out.push(*id),
            SerializedInstance::Array(arr) => {
                for value in arr.entries.values() {
                    value.collect_refs(out);
                }
            }
            SerializedInstance::Plain(_)
            | SerializedInstance::ReflectablePtr(None)
            | SerializedInstance::DataBlock(_) => {}
        }
    }

    fn remap_refs(&mut self, remap: &HashMap<ObjectId, ObjectId>) {
        match self {
            SerializedInstance::Reflectable(obj) => obj.remap_refs(remap),
            SerializedInstance::ReflectablePtr(Some(id)) => {
                if let Some(new_id) = remap.get(id) {
                    *id = *new_id;
                }
            }
            SerializedInstance::Array(arr) => {
                for value in arr.entries.values_mut() {
                    value.remap_refs(remap);
                }
            }
            SerializedInstance::Plain(_)
            | SerializedInstance::ReflectablePtr(None)
            | SerializedInstance::DataBlock(_) => {}
        }
    }
}

/// A serialized array.
///
/// Snapshots carry every element; diffs carry only the entries that changed.
/// `resized` is set on diffs whose array length changed, in which case `len`
/// is the new length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SerializedArray {
    pub len: u32,
    pub entries: BTreeMap<u32, SerializedInstance>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resized: bool,
}

impl SerializedArray {
    /// Dense array with every element present
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` past `u32::MAX` elements.
    pub fn from_elements(elements: Vec<SerializedInstance>) -> Result<Self> {
        let len = to_u32(elements.len(), "array elements")?;
        let entries = (0..len).zip(elements).collect();
        Ok(Self {
            len,
            entries,
            resized: false,
        })
    }
}

/// An object graph in serialized form.
///
/// The root always resolves. Shared references are checked by
/// [`SerializedGraph::validate`], which deserialization runs before handing
/// out a graph.
///
/// Diff graphs may mark objects as fresh. A fresh object is a complete copy
/// of a new-side object that split away from an identity the original
/// shared, and it names the diff object still standing for that identity.
/// The applier must never place a fresh object on the live counterpart of
/// the object it split from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGraph")]
pub struct SerializedGraph {
    objects: Vec<SerializedObject>,
    root: ObjectId,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    fresh: BTreeMap<ObjectId, ObjectId>,
}

#[derive(Deserialize)]
struct RawGraph {
    objects: Vec<SerializedObject>,
    root: ObjectId,
    #[serde(default)]
    fresh: BTreeMap<ObjectId, ObjectId>,
}

impl TryFrom<RawGraph> for SerializedGraph {
    type Error = RefDeltaError;

    fn try_from(raw: RawGraph) -> Result<Self> {
        let graph = SerializedGraph {
            objects: raw.objects,
            root: raw.root,
            fresh: raw.fresh,
        };
        graph.validate()?;
        Ok(graph)
    }
}

impl SerializedGraph {
    /// Graph holding a single object with no shared references
    pub fn single(root: SerializedObject) -> Self {
        Self {
            objects: vec![root],
            root: ObjectId(0),
            fresh: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn root_object(&self) -> &SerializedObject {
        // root is validated on every construction path
        &self.objects[self.root.index()]
    }

    pub fn get(&self, id: ObjectId) -> Option<&SerializedObject> {
        self.objects.get(id.index())
    }

    pub fn is_fresh(&self, id: ObjectId) -> bool {
        self.fresh.contains_key(&id)
    }

    /// Diff object whose live counterpart a fresh object must not reuse
    pub fn split_from(&self, id: ObjectId) -> Option<ObjectId> {
        self.fresh.get(&id).copied()
    }

    /// Number of shared objects in the arena, root included
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate objects together with their ids
    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &SerializedObject)> {
        (0..).map(ObjectId).zip(&self.objects)
    }

    /// Check that the root and every shared reference resolve
    ///
    /// # Errors
    ///
    /// `DanglingReference` naming the first id that does not resolve,
    /// `CapacityExceeded` when the arena outgrows 32-bit ids.
    pub fn validate(&self) -> Result<()> {
        to_u32(self.objects.len(), "objects")?;
        if self.get(self.root).is_none() {
            return Err(RefDeltaError::DanglingReference {
                object_id: self.root,
            });
        }
        let mut refs: Vec<ObjectId> = self
            .fresh
            .iter()
            .flat_map(|(id, from)| [*id, *from])
            .collect();
        for obj in &self.objects {
            obj.collect_refs(&mut refs);
        }
        match refs.into_iter().find(|id| self.get(*id).is_none()) {
            Some(object_id) => Err(RefDeltaError::DanglingReference { object_id }),
            None => Ok(()),
        }
    }

    /// Encode as JSON; byte payloads become base64 strings
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON
    ///
    /// # Errors
    ///
    /// `Serialization` for malformed input, including graphs whose root or
    /// shared references do not resolve.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Incremental builder for [`SerializedGraph`].
///
/// Ids are reserved before their objects exist, which is what makes cyclic
/// graphs constructible. [`GraphBuilder::finish`] keeps only objects
/// reachable from the root and renumbers them in breadth-first order, so
/// reserved-but-abandoned slots never leak into the result.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    slots: Vec<Option<SerializedObject>>,
    fresh: HashMap<ObjectId, ObjectId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id whose object will be supplied later
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` once every 32-bit id is taken.
    pub fn reserve(&mut self) -> Result<ObjectId> {
        let id = ObjectId(to_u32(self.slots.len(), "objects")?);
        self.slots.push(None);
        Ok(id)
    }

    /// Fill a reserved slot
    pub fn set(&mut self, id: ObjectId, object: SerializedObject) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            *slot = Some(object);
        }
    }

    /// Reserve and fill in one step
    ///
    /// # Errors
    ///
    /// See [`GraphBuilder::reserve`].
    pub fn push(&mut self, object: SerializedObject) -> Result<ObjectId> {
        let id = self.reserve()?;
        self.set(id, object);
        Ok(id)
    }

    /// Mark `id` as a fresh copy split away from the identity of `from`
    pub fn mark_fresh(&mut self, id: ObjectId, from: ObjectId) {
        self.fresh.insert(id, from);
    }

    /// Build the graph rooted at `root`
    ///
    /// # Errors
    ///
    /// `DanglingReference` if a reachable id was never filled.
    pub fn finish(mut self, root: ObjectId) -> Result<SerializedGraph> {
        let mut remap: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([root]);
        remap.insert(root, ObjectId(0));

        while let Some(old) = queue.pop_front() {
            let obj = self
                .slots
                .get(old.index())
                .and_then(Option::as_ref)
                .ok_or(RefDeltaError::DanglingReference { object_id: old })?;
            let mut refs = Vec::new();
            obj.collect_refs(&mut refs);
            for id in refs {
                if !remap.contains_key(&id) {
                    remap.insert(id, ObjectId(to_u32(remap.len(), "objects")?));
                    queue.push_back(id);
                }
            }
            order.push(old);
        }

        let mut objects = Vec::with_capacity(order.len());
        for old in order {
            if let Some(mut obj) = self.slots[old.index()].take() {
                obj.remap_refs(&remap);
                objects.push(obj);
            }
        }

        // a mark is kept only while both ends stay reachable
        let fresh = self
            .fresh
            .iter()
            .filter_map(|(id, from)| Some((*remap.get(id)?, *remap.get(from)?)))
            .collect();

        Ok(SerializedGraph {
            objects,
            root: ObjectId(0),
            fresh,
        })
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(v: u8) -> SerializedInstance {
        SerializedInstance::Plain(vec![v])
    }

    #[test]
    fn test_builder_drops_unreachable_slots() {
        let mut builder = GraphBuilder::new();
        let root = builder.reserve().unwrap();
        let orphan = builder.reserve().unwrap();
        let child = builder
            .push(SerializedObject::new(TypeId(2)).with_field(FieldId(1), plain(1)))
            .unwrap();
        builder.set(
            root,
            SerializedObject::new(TypeId(1))
                .with_field(FieldId(1), SerializedInstance::ReflectablePtr(Some(child))),
        );
        let _ = orphan;

        let graph = builder.finish(root).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.root(), ObjectId(0));
        assert_eq!(
            graph.root_object().field(FieldId(1)),
            Some(&SerializedInstance::ReflectablePtr(Some(ObjectId(1))))
        );
    }

    #[test]
    fn test_builder_keeps_cycles() {
        let mut builder = GraphBuilder::new();
        let root = builder.reserve().unwrap();
        builder.set(
            root,
            SerializedObject::new(TypeId(1))
                .with_field(FieldId(1), SerializedInstance::ReflectablePtr(Some(root))),
        );
        let graph = builder.finish(root).unwrap();
        assert_eq!(graph.len(), 1);
        graph.validate().unwrap();
    }

    #[test]
    fn test_builder_rejects_unfilled_reachable_slot() {
        let mut builder = GraphBuilder::new();
        let hole = builder.reserve().unwrap();
        let root = builder
            .push(
                SerializedObject::new(TypeId(1))
                    .with_field(FieldId(1), SerializedInstance::ReflectablePtr(Some(hole))),
            )
            .unwrap();
        let err = builder.finish(root).unwrap_err();
        assert_eq!(err, RefDeltaError::DanglingReference { object_id: hole });
    }

    #[test]
    fn test_validate_detects_dangling_reference() {
        let graph = SerializedGraph::single(
            SerializedObject::new(TypeId(1))
                .with_field(FieldId(1), SerializedInstance::ReflectablePtr(Some(ObjectId(7)))),
        );
        assert!(matches!(
            graph.validate(),
            Err(RefDeltaError::DanglingReference { object_id }) if object_id == ObjectId(7)
        ));
    }

    #[test]
    fn test_from_json_rejects_dangling_root() {
        let err = SerializedGraph::from_json(r#"{"objects":[],"root":0}"#).unwrap_err();
        assert!(matches!(err, RefDeltaError::Serialization { ref message } if message.contains("Dangling")));
    }

    #[test]
    fn test_json_encodes_bytes_as_base64() {
        let graph = SerializedGraph::single(
            SerializedObject::new(TypeId(1)).with_field(FieldId(1), plain(0xff)),
        );
        let json = graph.to_json().unwrap();
        assert!(json.contains("\"/w==\""));
        assert_eq!(SerializedGraph::from_json(&json).unwrap(), graph);
    }

    #[test]
    fn test_fresh_marks_follow_renumbering() {
        let mut builder = GraphBuilder::new();
        let orphan = builder.push(SerializedObject::new(TypeId(3))).unwrap();
        let child = builder.push(SerializedObject::new(TypeId(2))).unwrap();
        let root = builder.reserve().unwrap();
        builder.set(
            root,
            SerializedObject::new(TypeId(1))
                .with_field(FieldId(1), SerializedInstance::ReflectablePtr(Some(child))),
        );
        builder.mark_fresh(child, root);
        builder.mark_fresh(orphan, root);

        let graph = builder.finish(root).unwrap();
        assert!(graph.is_fresh(ObjectId(1)));
        assert_eq!(graph.split_from(ObjectId(1)), Some(ObjectId(0)));
        assert!(!graph.is_fresh(ObjectId(0)));

        let json = graph.to_json().unwrap();
        assert_eq!(SerializedGraph::from_json(&json).unwrap(), graph);
    }

    #[test]
    fn test_validate_rejects_dangling_fresh_origin() {
        let json = r#"{"objects":[{"type_id":1,"fields":[]}],"root":0,"fresh":{"0":4}}"#;
        let err = SerializedGraph::from_json(json).unwrap_err();
        assert!(matches!(err, RefDeltaError::Serialization { ref message } if message.contains("#4")));
    }

    #[test]
    fn test_from_elements_is_dense() {
        let arr = SerializedArray::from_elements(vec![plain(1), plain(2)]).unwrap();
        assert_eq!(arr.len, 2);
        assert_eq!(arr.entries.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert!(!arr.resized);
    }
}
