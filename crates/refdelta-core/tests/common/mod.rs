use refdelta_core::dynamic::{snapshot, DynContext, DynRef, DynRegistry, DynValue};
use refdelta_core::{DiffEngine, FieldDescriptor, SerializedGraph, TypeId};

pub const RECORD: TypeId = TypeId(1);
pub const NODE: TypeId = TypeId(2);
pub const SHAPE: TypeId = TypeId(3);
pub const CIRCLE: TypeId = TypeId(4);
pub const SQUARE: TypeId = TypeId(5);
pub const HOLDER: TypeId = TypeId(10);

/// Registry with the test schema
///
/// - `Record { a, b }`
/// - `Node { value, next: ptr Node }`
/// - `Shape { name }`, `Circle: Shape { radius }`, `Square: Shape { side }`
/// - `Holder` with one field of every kind, scalar and array, plus
///   `shape`, `figure` and `figures` holding a `Shape` by reference, inline
///   and in an inline array
#[allow(dead_code)]
pub fn schema() -> DynRegistry {
    let mut registry = DynRegistry::new();
    registry.register(
        RECORD.0,
        "Record",
        vec![FieldDescriptor::plain(1, "a"), FieldDescriptor::plain(2, "b")],
    );
    registry.register(
        NODE.0,
        "Node",
        vec![
            FieldDescriptor::plain(1, "value"),
            FieldDescriptor::reflectable_ptr(2, "next", NODE),
        ],
    );
    registry.register(SHAPE.0, "Shape", vec![FieldDescriptor::plain(1, "name")]);
    registry
        .register_derived(CIRCLE.0, "Circle", SHAPE, vec![FieldDescriptor::plain(2, "radius")])
        .unwrap();
    registry
        .register_derived(SQUARE.0, "Square", SHAPE, vec![FieldDescriptor::plain(2, "side")])
        .unwrap();
    registry.register(
        HOLDER.0,
        "Holder",
        vec![
            FieldDescriptor::plain(1, "title"),
            FieldDescriptor::reflectable_ptr(2, "left", NODE),
            FieldDescriptor::reflectable_ptr(3, "right", NODE),
            FieldDescriptor::reflectable(4, "inner", RECORD),
            FieldDescriptor::plain(5, "items").array(),
            FieldDescriptor::reflectable_ptr(6, "nodes", NODE).array(),
            FieldDescriptor::data_block(7, "blob"),
            FieldDescriptor::reflectable(8, "records", RECORD).array(),
            FieldDescriptor::reflectable_ptr(9, "shape", SHAPE),
            FieldDescriptor::reflectable(10, "figure", SHAPE),
            FieldDescriptor::reflectable(11, "figures", SHAPE).array(),
        ],
    );
    registry
}

#[allow(dead_code)]
pub fn record(registry: &DynRegistry, a: u32, b: &str) -> DynRef {
    let object = registry.instantiate(RECORD).unwrap();
    registry.write(&object, "a", DynValue::u32(a)).unwrap();
    registry.write(&object, "b", DynValue::str(b)).unwrap();
    object
}

#[allow(dead_code)]
pub fn node(registry: &DynRegistry, value: u32) -> DynRef {
    let object = registry.instantiate(NODE).unwrap();
    registry.write(&object, "value", DynValue::u32(value)).unwrap();
    object
}

#[allow(dead_code)]
pub fn link(registry: &DynRegistry, from: &DynRef, to: &DynRef) {
    registry.write(from, "next", DynValue::ptr(to)).unwrap();
}

/// Nodes linked in a ring, last back to first
#[allow(dead_code)]
pub fn ring(registry: &DynRegistry, values: &[u32]) -> Vec<DynRef> {
    let nodes: Vec<DynRef> = values.iter().map(|v| node(registry, *v)).collect();
    for (i, from) in nodes.iter().enumerate() {
        link(registry, from, &nodes[(i + 1) % nodes.len()]);
    }
    nodes
}

#[allow(dead_code)]
pub fn shape(registry: &DynRegistry, type_id: TypeId, name: &str, size: u32) -> DynRef {
    let object = registry.instantiate(type_id).unwrap();
    registry.write(&object, "name", DynValue::str(name)).unwrap();
    let size_field = if type_id == CIRCLE { "radius" } else { "side" };
    registry.write(&object, size_field, DynValue::u32(size)).unwrap();
    object
}

/// A plain `Shape`, neither circle nor square
#[allow(dead_code)]
pub fn base_shape(registry: &DynRegistry, name: &str) -> DynRef {
    let object = registry.instantiate(SHAPE).unwrap();
    registry.write(&object, "name", DynValue::str(name)).unwrap();
    object
}

#[allow(dead_code)]
pub fn holder(registry: &DynRegistry) -> DynRef {
    registry.instantiate(HOLDER).unwrap()
}

#[allow(dead_code)]
pub fn u32s(values: &[u32]) -> DynValue {
    DynValue::Array(values.iter().map(|v| DynValue::u32(*v)).collect())
}

#[allow(dead_code)]
pub fn read_u32s(registry: &DynRegistry, object: &DynRef, name: &str) -> Vec<u32> {
    registry
        .read(object, name)
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u32().unwrap())
        .collect()
}

#[allow(dead_code)]
pub fn read_u32(registry: &DynRegistry, object: &DynRef, name: &str) -> u32 {
    registry.read(object, name).unwrap().as_u32().unwrap()
}

#[allow(dead_code)]
pub fn read_str(registry: &DynRegistry, object: &DynRef, name: &str) -> String {
    registry
        .read(object, name)
        .unwrap()
        .as_str()
        .unwrap()
        .to_string()
}

#[allow(dead_code)]
pub fn ptr(registry: &DynRegistry, object: &DynRef, name: &str) -> Option<DynRef> {
    registry.read(object, name).unwrap().as_ptr().cloned()
}

#[allow(dead_code)]
pub fn snap(registry: &DynRegistry, object: &DynRef) -> SerializedGraph {
    snapshot(registry, object).unwrap()
}

/// Diff between two live objects, through their snapshots
#[allow(dead_code)]
pub fn diff(registry: &DynRegistry, original: &DynRef, new: &DynRef) -> Option<SerializedGraph> {
    DiffEngine::new()
        .generate_diff(&snap(registry, original), &snap(registry, new))
        .unwrap()
}

/// Apply a diff and return the registry counters
#[allow(dead_code)]
pub fn apply(registry: &DynRegistry, live: &DynRef, diff: &SerializedGraph) -> DynContext {
    let mut ctx = DynContext::default();
    DiffEngine::new()
        .apply_diff(registry, live, diff, &mut ctx)
        .unwrap();
    ctx
}

/// Assert two live graphs are structurally equal
#[allow(dead_code)]
pub fn assert_same(registry: &DynRegistry, left: &DynRef, right: &DynRef) {
    assert_eq!(snap(registry, left), snap(registry, right));
}
