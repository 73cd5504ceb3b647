//! In-memory reflective object model.
//!
//! A small dynamically-typed object model that implements [`TypeRegistry`]:
//! types are registered at runtime as ordered field descriptor lists, live
//! objects are reference-counted [`DynObject`]s with interior mutability, and
//! shared references are plain `Rc` clones. It also provides the two
//! conversions the engine itself leaves to callers: [`snapshot`] (live object
//! to serialized graph) and [`materialize`] (serialized graph to live object).
//!
//! Cyclic graphs built here leak unless the caller breaks the cycle; this
//! model is sized for tests and tooling, not long-lived state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::errors::{RefDeltaError, Result};
use crate::model::{
    to_u32, FieldId, GraphBuilder, ObjectId, SerializedArray, SerializedField, SerializedGraph,
    SerializedInstance, SerializedObject, TypeId,
};
use crate::registry::{FieldDescriptor, FieldKind, TypeRegistry};

/// Shared handle to a live object
pub type DynRef = Rc<DynObject>;

/// A live object: its type plus one value per field of the type's chain.
pub struct DynObject {
    type_id: TypeId,
    values: RefCell<Vec<DynValue>>,
}

impl DynObject {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl fmt::Debug for DynObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("DynObject");
        out.field("type_id", &self.type_id);
        match self.values.try_borrow() {
            Ok(values) => out.field("values", &*values),
            Err(_) => out.field("values", &"<borrowed>"),
        };
        out.finish()
    }
}

/// Value held by one field of a [`DynObject`].
#[derive(Clone)]
pub enum DynValue {
    Plain(Vec<u8>),
    DataBlock(Vec<u8>),
    /// Inline object, owned by the field that holds it
    Inline(DynRef),
    /// Shared reference, or null
    Ptr(Option<DynRef>),
    Array(Vec<DynValue>),
}

impl DynValue {
    /// Little-endian `u32` as a plain value
    pub fn u32(value: u32) -> Self {
        DynValue::Plain(value.to_le_bytes().to_vec())
    }

    /// UTF-8 string as a plain value
    pub fn str(value: &str) -> Self {
        DynValue::Plain(value.as_bytes().to_vec())
    }

    pub fn ptr(target: &DynRef) -> Self {
        DynValue::Ptr(Some(Rc::clone(target)))
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            DynValue::Plain(bytes) => <[u8; 4]>::try_from(bytes.as_slice())
                .ok()
                .map(u32::from_le_bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynValue::Plain(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<&DynRef> {
        match self {
            DynValue::Ptr(target) => target.as_ref(),
            _ => None,
        }
    }

    pub fn as_inline(&self) -> Option<&DynRef> {
        match self {
            DynValue::Inline(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[DynValue]> {
        match self {
            DynValue::Array(items) => Some(items),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            DynValue::Plain(_) => "plain",
            DynValue::DataBlock(_) => "data_block",
            DynValue::Inline(_) => "reflectable",
            DynValue::Ptr(_) => "reflectable_ptr",
            DynValue::Array(_) => "array",
        }
    }

    /// Byte equality for payloads, identity for objects
    fn same(&self, other: &DynValue) -> bool {
        match (self, other) {
            (DynValue::Plain(a), DynValue::Plain(b))
            | (DynValue::DataBlock(a), DynValue::DataBlock(b)) => a == b,
            (DynValue::Inline(a), DynValue::Inline(b)) => Rc::ptr_eq(a, b),
            (DynValue::Ptr(a), DynValue::Ptr(b)) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                _ => false,
            },
            (DynValue::Array(a), DynValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
            }
            _ => false,
        }
    }

    fn fits(&self, field: &FieldDescriptor) -> bool {
        match self {
            DynValue::Array(items) => {
                field.is_array && items.iter().all(|v| v.fits_kind(field.kind))
            }
            other => !field.is_array && other.fits_kind(field.kind),
        }
    }

    fn fits_kind(&self, kind: FieldKind) -> bool {
        matches!(
            (self, kind),
            (DynValue::Plain(_), FieldKind::Plain)
                | (DynValue::DataBlock(_), FieldKind::DataBlock)
                | (DynValue::Inline(_), FieldKind::Reflectable)
                | (DynValue::Ptr(_), FieldKind::ReflectablePtr)
        )
    }
}

// pointers print as type and address only, so cyclic graphs stay printable
impl fmt::Debug for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynValue::Plain(bytes) => f.debug_tuple("Plain").field(bytes).finish(),
            DynValue::DataBlock(bytes) => write!(f, "DataBlock({} bytes)", bytes.len()),
            DynValue::Inline(object) => f.debug_tuple("Inline").field(object).finish(),
            DynValue::Ptr(None) => f.write_str("Ptr(null)"),
            DynValue::Ptr(Some(target)) => {
                write!(f, "Ptr(type {} @ {:p})", target.type_id, Rc::as_ptr(target))
            }
            DynValue::Array(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// A registered type.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub id: TypeId,
    pub name: String,
    /// Flattened chain, base fields first
    pub fields: Vec<FieldDescriptor>,
}

/// Per-call counters threaded through the registry as its context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynContext {
    /// Field writes performed
    pub writes: usize,
    /// Writes that actually changed a value
    pub changes: usize,
    /// Instances created through `create_instance`
    pub allocations: usize,
    /// Objects entered by the executor
    pub objects_visited: usize,
}

/// Registry of dynamically defined types.
#[derive(Debug, Clone, Default)]
pub struct DynRegistry {
    types: HashMap<TypeId, TypeDef>,
    allocation_limit: Option<usize>,
}

impl DynRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `create_instance` once a context has allocated `limit` objects
    pub fn with_allocation_limit(mut self, limit: usize) -> Self {
        self.allocation_limit = Some(limit);
        self
    }

    /// Register (or replace) a type
    pub fn register(&mut self, id: u32, name: &str, fields: Vec<FieldDescriptor>) -> TypeId {
        let type_id = TypeId(id);
        self.types.insert(
            type_id,
            TypeDef {
                id: type_id,
                name: name.to_string(),
                fields,
            },
        );
        type_id
    }

    /// Register a type extending `base`; the base chain's fields come first
    ///
    /// # Errors
    ///
    /// `UnknownType` if `base` is not registered.
    pub fn register_derived(
        &mut self,
        id: u32,
        name: &str,
        base: TypeId,
        fields: Vec<FieldDescriptor>,
    ) -> Result<TypeId> {
        let mut chain = self.type_def(base)?.fields.clone();
        chain.extend(fields);
        Ok(self.register(id, name, chain))
    }

    /// # Errors
    ///
    /// `UnknownType` if the id is not registered.
    pub fn type_def(&self, type_id: TypeId) -> Result<&TypeDef> {
        self.types
            .get(&type_id)
            .ok_or(RefDeltaError::UnknownType { type_id })
    }

    /// Create an instance with every field at its default
    ///
    /// Plain values and data blocks start empty, references null, arrays
    /// empty, and inline objects are instantiated recursively.
    ///
    /// # Errors
    ///
    /// `UnknownType` for the type or any inline field type.
    pub fn instantiate(&self, type_id: TypeId) -> Result<DynRef> {
        let def = self.type_def(type_id)?;
        let values = def
            .fields
            .iter()
            .map(|field| self.default_value(type_id, field))
            .collect::<Result<Vec<_>>>()?;
        Ok(Rc::new(DynObject {
            type_id,
            values: RefCell::new(values),
        }))
    }

    /// # Errors
    ///
    /// See [`DynRegistry::default_element`].
    pub fn default_value(&self, owner: TypeId, field: &FieldDescriptor) -> Result<DynValue> {
        if field.is_array {
            return Ok(DynValue::Array(Vec::new()));
        }
        self.default_element(owner, field)
    }

    /// Default for one element of `field`, ignoring array-ness
    ///
    /// # Errors
    ///
    /// `AllocationFailed` when an inline field names no type, `UnknownType`
    /// when the named type is not registered.
    pub fn default_element(&self, owner: TypeId, field: &FieldDescriptor) -> Result<DynValue> {
        Ok(match field.kind {
            FieldKind::Plain => DynValue::Plain(Vec::new()),
            FieldKind::DataBlock => DynValue::DataBlock(Vec::new()),
            FieldKind::ReflectablePtr => DynValue::Ptr(None),
            FieldKind::Reflectable => {
                let nested = field.type_id.ok_or_else(|| RefDeltaError::AllocationFailed {
                    type_id: owner,
                    reason: format!("inline field '{}' declares no type", field.name),
                })?;
                DynValue::Inline(self.instantiate(nested)?)
            }
        })
    }

    /// Slot index of a field within objects of `type_id`
    ///
    /// # Errors
    ///
    /// `UnknownType` or `UnknownField`.
    pub fn position(&self, type_id: TypeId, field_id: FieldId) -> Result<usize> {
        self.type_def(type_id)?
            .fields
            .iter()
            .position(|f| f.id == field_id)
            .ok_or(RefDeltaError::UnknownField { type_id, field_id })
    }

    fn named(&self, type_id: TypeId, name: &str) -> Result<(usize, &FieldDescriptor)> {
        self.type_def(type_id)?
            .fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .ok_or_else(|| RefDeltaError::UnknownFieldName {
                type_id,
                name: name.to_string(),
            })
    }

    /// Read a field by name
    ///
    /// # Errors
    ///
    /// `UnknownType` or `UnknownFieldName`.
    pub fn read(&self, object: &DynRef, name: &str) -> Result<DynValue> {
        let (pos, field) = self.named(object.type_id, name)?;
        object
            .values
            .borrow()
            .get(pos)
            .cloned()
            .ok_or(RefDeltaError::UnknownField {
                type_id: object.type_id,
                field_id: field.id,
            })
    }

    /// Overwrite a field by name
    ///
    /// # Errors
    ///
    /// `UnknownType`, `UnknownFieldName`, or `FieldKindMismatch` when the
    /// value does not fit the field.
    pub fn write(&self, object: &DynRef, name: &str, value: DynValue) -> Result<()> {
        let (pos, field) = self.named(object.type_id, name)?;
        if !value.fits(field) {
            return Err(mismatch(object.type_id, field, &value));
        }
        let mut values = object.values.borrow_mut();
        let slot = values.get_mut(pos).ok_or(RefDeltaError::UnknownField {
            type_id: object.type_id,
            field_id: field.id,
        })?;
        *slot = value;
        Ok(())
    }

    /// Run `f` on the value slot addressed by `field` and `index`
    fn slot<T>(
        &self,
        object: &DynObject,
        field: &FieldDescriptor,
        index: Option<u32>,
        f: impl FnOnce(&mut DynValue) -> Result<T>,
    ) -> Result<T> {
        let pos = self.position(object.type_id, field.id)?;
        let mut values = object.values.borrow_mut();
        let value = values.get_mut(pos).ok_or(RefDeltaError::UnknownField {
            type_id: object.type_id,
            field_id: field.id,
        })?;
        let Some(index) = index else {
            return f(value);
        };
        match value {
            DynValue::Array(items) => {
                let len = to_u32(items.len(), "array elements")?;
                let item = items
                    .get_mut(index as usize)
                    .ok_or(RefDeltaError::IndexOutOfRange {
                        field_id: field.id,
                        index,
                        len,
                    })?;
                f(item)
            }
            other => Err(mismatch(object.type_id, field, other)),
        }
    }

    fn expect_kind(
        &self,
        object: &DynObject,
        field: &FieldDescriptor,
        index: Option<u32>,
        kind: FieldKind,
    ) -> Result<()> {
        if field.kind == kind && field.is_array == index.is_some() {
            return Ok(());
        }
        Err(RefDeltaError::FieldKindMismatch {
            type_id: object.type_id,
            field_id: field.id,
            expected: field.describe(),
            found: kind.as_str(),
        })
    }

    fn store(
        &self,
        object: &DynObject,
        field: &FieldDescriptor,
        index: Option<u32>,
        value: DynValue,
        ctx: &mut DynContext,
    ) -> Result<()> {
        let changed = self.slot(object, field, index, |slot| {
            let changed = !slot.same(&value);
            *slot = value;
            Ok(changed)
        })?;
        ctx.writes += 1;
        if changed {
            ctx.changes += 1;
        }
        Ok(())
    }
}

fn mismatch(owner: TypeId, field: &FieldDescriptor, found: &DynValue) -> RefDeltaError {
    RefDeltaError::FieldKindMismatch {
        type_id: owner,
        field_id: field.id,
        expected: field.describe(),
        found: found.kind_name(),
    }
}

impl TypeRegistry for DynRegistry {
    type Object = DynRef;
    type Context = DynContext;

    fn type_of(&self, object: &DynRef) -> TypeId {
        object.type_id
    }

    fn same_object(&self, a: &DynRef, b: &DynRef) -> bool {
        Rc::ptr_eq(a, b)
    }

    fn resolve(&self, type_id: TypeId) -> Result<&[FieldDescriptor]> {
        Ok(&self.type_def(type_id)?.fields)
    }

    fn create_instance(&self, type_id: TypeId, ctx: &mut DynContext) -> Result<DynRef> {
        if let Some(limit) = self.allocation_limit {
            if ctx.allocations >= limit {
                return Err(RefDeltaError::AllocationFailed {
                    type_id,
                    reason: format!("allocation limit of {limit} reached"),
                });
            }
        }
        let object = self.instantiate(type_id)?;
        ctx.allocations += 1;
        Ok(object)
    }

    fn nested(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        index: Option<u32>,
        _ctx: &mut DynContext,
    ) -> Result<DynRef> {
        self.expect_kind(object, field, index, FieldKind::Reflectable)?;
        self.slot(object, field, index, |slot| match slot {
            DynValue::Inline(inner) => Ok(Rc::clone(inner)),
            other => Err(mismatch(object.type_id, field, other)),
        })
    }

    fn replace_nested(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        index: Option<u32>,
        value: &DynRef,
        ctx: &mut DynContext,
    ) -> Result<()> {
        self.expect_kind(object, field, index, FieldKind::Reflectable)?;
        self.store(object, field, index, DynValue::Inline(Rc::clone(value)), ctx)
    }

    fn get_ptr(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        index: Option<u32>,
        _ctx: &mut DynContext,
    ) -> Result<Option<DynRef>> {
        self.expect_kind(object, field, index, FieldKind::ReflectablePtr)?;
        self.slot(object, field, index, |slot| match slot {
            DynValue::Ptr(target) => Ok(target.clone()),
            other => Err(mismatch(object.type_id, field, other)),
        })
    }

    fn array_size(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        _ctx: &mut DynContext,
    ) -> Result<u32> {
        self.slot(object, field, None, |slot| match slot {
            DynValue::Array(items) => to_u32(items.len(), "array elements"),
            other => Err(mismatch(object.type_id, field, other)),
        })
    }

    fn set_plain(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        index: Option<u32>,
        bytes: &[u8],
        ctx: &mut DynContext,
    ) -> Result<()> {
        self.expect_kind(object, field, index, FieldKind::Plain)?;
        self.store(object, field, index, DynValue::Plain(bytes.to_vec()), ctx)
    }

    fn set_data_block(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        index: Option<u32>,
        data: &[u8],
        ctx: &mut DynContext,
    ) -> Result<()> {
        self.expect_kind(object, field, index, FieldKind::DataBlock)?;
        self.store(object, field, index, DynValue::DataBlock(data.to_vec()), ctx)
    }

    fn set_ptr(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        index: Option<u32>,
        target: Option<&DynRef>,
        ctx: &mut DynContext,
    ) -> Result<()> {
        self.expect_kind(object, field, index, FieldKind::ReflectablePtr)?;
        self.store(object, field, index, DynValue::Ptr(target.cloned()), ctx)
    }

    fn set_array_size(
        &self,
        object: &DynRef,
        field: &FieldDescriptor,
        size: u32,
        ctx: &mut DynContext,
    ) -> Result<()> {
        let owner = object.type_id;
        let changed = self.slot(object, field, None, |slot| match slot {
            DynValue::Array(items) => {
                let size = size as usize;
                let changed = items.len() != size;
                items.truncate(size);
                while items.len() < size {
                    items.push(self.default_element(owner, field)?);
                }
                Ok(changed)
            }
            other => Err(mismatch(owner, field, other)),
        })?;
        ctx.writes += 1;
        if changed {
            ctx.changes += 1;
        }
        Ok(())
    }

    fn on_object_start(&self, _object: &DynRef, ctx: &mut DynContext) {
        ctx.objects_visited += 1;
    }
}

// ========== Conversions ==========

/// Serialize a live object graph
///
/// Every object reachable through a reference field becomes one arena entry,
/// however many references point at it; the root is an arena entry too, so
/// references back to it close the cycle.
///
/// # Errors
///
/// `UnknownType` for unregistered types.
pub fn snapshot(registry: &DynRegistry, root: &DynRef) -> Result<SerializedGraph> {
    let mut snapshotter = Snapshotter {
        registry,
        builder: GraphBuilder::new(),
        ids: HashMap::new(),
    };
    let root_id = snapshotter.shared(root)?;
    snapshotter.builder.finish(root_id)
}

struct Snapshotter<'r> {
    registry: &'r DynRegistry,
    builder: GraphBuilder,
    ids: HashMap<*const DynObject, ObjectId>,
}

impl Snapshotter<'_> {
    fn shared(&mut self, object: &DynRef) -> Result<ObjectId> {
        let key = Rc::as_ptr(object);
        if let Some(id) = self.ids.get(&key) {
            return Ok(*id);
        }
        let id = self.builder.reserve()?;
        self.ids.insert(key, id);
        let serialized = self.object(object)?;
        self.builder.set(id, serialized);
        Ok(id)
    }

    fn object(&mut self, object: &DynObject) -> Result<SerializedObject> {
        let registry = self.registry;
        let descriptors = registry.resolve(object.type_id)?;
        let values = object.values.borrow();
        let mut fields = Vec::with_capacity(descriptors.len());
        for (field, value) in descriptors.iter().zip(values.iter()) {
            fields.push(SerializedField {
                id: field.id,
                value: self.instance(value)?,
            });
        }
        Ok(SerializedObject {
            type_id: object.type_id,
            fields,
        })
    }

    fn instance(&mut self, value: &DynValue) -> Result<SerializedInstance> {
        Ok(match value {
            DynValue::Plain(bytes) => SerializedInstance::Plain(bytes.clone()),
            DynValue::DataBlock(bytes) => SerializedInstance::DataBlock(bytes.clone()),
            DynValue::Inline(object) => SerializedInstance::Reflectable(self.object(object)?),
            DynValue::Ptr(None) => SerializedInstance::ReflectablePtr(None),
            DynValue::Ptr(Some(target)) => {
                SerializedInstance::ReflectablePtr(Some(self.shared(target)?))
            }
            DynValue::Array(items) => {
                let elements = items
                    .iter()
                    .map(|item| self.instance(item))
                    .collect::<Result<Vec<_>>>()?;
                SerializedInstance::Array(SerializedArray::from_elements(elements)?)
            }
        })
    }
}

/// Build a fresh live object graph from a serialized one
///
/// Fields absent from a serialized object keep their defaults, as do array
/// elements absent from a sparse array.
///
/// # Errors
///
/// Schema errors when the graph does not fit the registered types,
/// `DanglingReference` for unresolved ids.
pub fn materialize(registry: &DynRegistry, graph: &SerializedGraph) -> Result<DynRef> {
    let mut materializer = Materializer {
        registry,
        graph,
        objects: HashMap::new(),
    };
    materializer.shared(graph.root())
}

/// Independent copy of a live graph with the same sharing structure
///
/// # Errors
///
/// `UnknownType` for unregistered types.
pub fn deep_copy(registry: &DynRegistry, root: &DynRef) -> Result<DynRef> {
    materialize(registry, &snapshot(registry, root)?)
}

struct Materializer<'r, 'g> {
    registry: &'r DynRegistry,
    graph: &'g SerializedGraph,
    objects: HashMap<ObjectId, DynRef>,
}

impl Materializer<'_, '_> {
    fn shared(&mut self, id: ObjectId) -> Result<DynRef> {
        if let Some(object) = self.objects.get(&id) {
            return Ok(Rc::clone(object));
        }
        let graph = self.graph;
        let serialized = graph
            .get(id)
            .ok_or(RefDeltaError::DanglingReference { object_id: id })?;
        let object = self.registry.instantiate(serialized.type_id)?;
        self.objects.insert(id, Rc::clone(&object));
        self.fill(&object, serialized)?;
        Ok(object)
    }

    fn fill(&mut self, object: &DynRef, serialized: &SerializedObject) -> Result<()> {
        let registry = self.registry;
        for entry in &serialized.fields {
            let field = registry.field(serialized.type_id, entry.id)?;
            field.check(serialized.type_id, &entry.value)?;
            let pos = registry.position(serialized.type_id, entry.id)?;
            let value = self.value(serialized.type_id, field, &entry.value)?;
            let mut values = object.values.borrow_mut();
            let slot = values.get_mut(pos).ok_or(RefDeltaError::UnknownField {
                type_id: serialized.type_id,
                field_id: entry.id,
            })?;
            *slot = value;
        }
        Ok(())
    }

    fn value(
        &mut self,
        owner: TypeId,
        field: &FieldDescriptor,
        value: &SerializedInstance,
    ) -> Result<DynValue> {
        Ok(match value {
            SerializedInstance::Plain(bytes) => DynValue::Plain(bytes.clone()),
            SerializedInstance::DataBlock(bytes) => DynValue::DataBlock(bytes.clone()),
            SerializedInstance::Reflectable(serialized) => {
                let inner = self.registry.instantiate(serialized.type_id)?;
                self.fill(&inner, serialized)?;
                DynValue::Inline(inner)
            }
            SerializedInstance::ReflectablePtr(None) => DynValue::Ptr(None),
            SerializedInstance::ReflectablePtr(Some(id)) => DynValue::Ptr(Some(self.shared(*id)?)),
            SerializedInstance::Array(arr) => {
                let mut items = Vec::with_capacity(arr.len as usize);
                for index in 0..arr.len {
                    let item = match arr.entries.get(&index) {
                        Some(element) => {
                            field.check_element(owner, element)?;
                            self.value(owner, field, element)?
                        }
                        None => self.registry.default_element(owner, field)?,
                    };
                    items.push(item);
                }
                DynValue::Array(items)
            }
        })
    }
}
