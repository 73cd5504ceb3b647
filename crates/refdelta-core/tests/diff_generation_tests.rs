//! Diff Generation Tests
//!
//! ## Scenarios Covered
//!
//! 1. Identical snapshots produce no diff
//! 2. Only changed fields appear, at any depth
//! 3. Reference changes: null transitions, type changes, content changes
//! 4. Array size changes and per-index entries
//! 5. Consistency errors for mismatched inputs

mod common;

use common::*;
use refdelta_core::dynamic::{DynRef, DynRegistry, DynValue};
use refdelta_core::{
    DiffEngine, FieldId, RdErrorKind, RefDeltaError, SerializedArray, SerializedGraph,
    SerializedInstance, SerializedObject,
};
use std::collections::BTreeMap;

fn populated(registry: &DynRegistry) -> DynRef {
    let h = holder(registry);
    registry.write(&h, "title", DynValue::str("t")).unwrap();
    let shared = node(registry, 1);
    registry.write(&h, "left", DynValue::ptr(&shared)).unwrap();
    registry.write(&h, "right", DynValue::ptr(&shared)).unwrap();
    registry.write(&h, "items", u32s(&[1, 2, 3])).unwrap();
    registry
        .write(&h, "nodes", DynValue::Array(vec![DynValue::ptr(&shared)]))
        .unwrap();
    registry
        .write(&h, "blob", DynValue::DataBlock(vec![0xde, 0xad]))
        .unwrap();
    registry
        .write(&h, "shape", DynValue::ptr(&shape(registry, CIRCLE, "c", 2)))
        .unwrap();
    h
}

#[test]
fn test_identical_snapshots_produce_no_diff() {
    // GIVEN a holder using every field kind
    let registry = schema();
    let h = populated(&registry);

    // WHEN diffing it against itself
    let result = diff(&registry, &h, &h);

    // THEN there is no diff
    assert!(result.is_none());
}

#[test]
fn test_only_changed_field_is_included() {
    // GIVEN {a:5, b:"x"} and {a:5, b:"y"}
    let registry = schema();
    let original = record(&registry, 5, "x");
    let new = record(&registry, 5, "y");

    // WHEN diffing
    let d = diff(&registry, &original, &new).unwrap();

    // THEN only b is present
    let root = d.root_object();
    assert_eq!(root.type_id, RECORD);
    assert_eq!(root.fields.len(), 1);
    assert_eq!(
        root.field(FieldId(2)),
        Some(&SerializedInstance::Plain(b"y".to_vec()))
    );
    assert_eq!(d.len(), 1);
}

#[test]
fn test_inline_change_is_nested() {
    // GIVEN two holders whose inline record differs in one field
    let registry = schema();
    let original = holder(&registry);
    let new = holder(&registry);
    let inner = registry.read(&new, "inner").unwrap();
    registry
        .write(inner.as_inline().unwrap(), "a", DynValue::u32(9))
        .unwrap();

    // WHEN diffing
    let d = diff(&registry, &original, &new).unwrap();

    // THEN the diff holds just the inline object with just that field
    let root = d.root_object();
    assert_eq!(root.fields.len(), 1);
    let Some(SerializedInstance::Reflectable(nested)) = root.field(FieldId(4)) else {
        panic!("expected inline diff");
    };
    assert_eq!(nested.type_id, RECORD);
    assert_eq!(
        nested.fields.iter().map(|f| f.id).collect::<Vec<_>>(),
        vec![FieldId(1)]
    );
}

#[test]
fn test_data_block_change_copies_bytes() {
    let registry = schema();
    let original = holder(&registry);
    let new = holder(&registry);
    registry
        .write(&new, "blob", DynValue::DataBlock(vec![1, 2, 3]))
        .unwrap();

    let d = diff(&registry, &original, &new).unwrap();

    assert_eq!(
        d.root_object().field(FieldId(7)),
        Some(&SerializedInstance::DataBlock(vec![1, 2, 3]))
    );
}

#[test]
fn test_pointer_to_null_is_explicit_null_entry() {
    // GIVEN a holder whose left pointer is cleared
    let registry = schema();
    let original = holder(&registry);
    registry
        .write(&original, "left", DynValue::ptr(&node(&registry, 1)))
        .unwrap();
    let new = holder(&registry);

    // WHEN diffing
    let d = diff(&registry, &original, &new).unwrap();

    // THEN the diff assigns null
    assert_eq!(
        d.root_object().field(FieldId(2)),
        Some(&SerializedInstance::ReflectablePtr(None))
    );
}

#[test]
fn test_null_to_pointer_copies_target_wholesale() {
    // GIVEN a holder gaining a two-node chain
    let registry = schema();
    let original = holder(&registry);
    let new = holder(&registry);
    let first = node(&registry, 1);
    link(&registry, &first, &node(&registry, 2));
    registry.write(&new, "left", DynValue::ptr(&first)).unwrap();

    // WHEN diffing
    let d = diff(&registry, &original, &new).unwrap();

    // THEN both nodes are carried with all their fields
    assert_eq!(d.len(), 3);
    for (id, object) in d.objects().skip(1) {
        assert_eq!(object.type_id, NODE, "object {id}");
        assert_eq!(object.fields.len(), 2);
    }
}

#[test]
fn test_pointee_type_change_copies_new_object() {
    // GIVEN a shape changing from circle to square
    let registry = schema();
    let original = holder(&registry);
    registry
        .write(&original, "shape", DynValue::ptr(&shape(&registry, CIRCLE, "s", 1)))
        .unwrap();
    let new = holder(&registry);
    registry
        .write(&new, "shape", DynValue::ptr(&shape(&registry, SQUARE, "s", 1)))
        .unwrap();

    // WHEN diffing
    let d = diff(&registry, &original, &new).unwrap();

    // THEN the square is copied whole, even its unchanged name
    let Some(SerializedInstance::ReflectablePtr(Some(id))) = d.root_object().field(FieldId(9))
    else {
        panic!("expected pointer entry");
    };
    let square = d.get(*id).unwrap();
    assert_eq!(square.type_id, SQUARE);
    assert_eq!(square.fields.len(), 2);
}

#[test]
fn test_unchanged_pointee_contributes_nothing() {
    // GIVEN two holders pointing at distinct but equal nodes
    let registry = schema();
    let original = holder(&registry);
    registry
        .write(&original, "left", DynValue::ptr(&node(&registry, 4)))
        .unwrap();
    let new = holder(&registry);
    registry
        .write(&new, "left", DynValue::ptr(&node(&registry, 4)))
        .unwrap();

    // THEN no diff
    assert!(diff(&registry, &original, &new).is_none());
}

#[test]
fn test_array_shrink_records_only_size() {
    // GIVEN [1,2,3] -> [1,2]
    let registry = schema();
    let original = holder(&registry);
    registry.write(&original, "items", u32s(&[1, 2, 3])).unwrap();
    let new = holder(&registry);
    registry.write(&new, "items", u32s(&[1, 2])).unwrap();

    // WHEN diffing
    let d = diff(&registry, &original, &new).unwrap();

    // THEN only the size change is recorded
    assert_eq!(
        d.root_object().field(FieldId(5)),
        Some(&SerializedInstance::Array(SerializedArray {
            len: 2,
            entries: BTreeMap::new(),
            resized: true,
        }))
    );
}

#[test]
fn test_array_growth_records_size_and_tail() {
    // GIVEN [1,2] -> [1,2,3,4]
    let registry = schema();
    let original = holder(&registry);
    registry.write(&original, "items", u32s(&[1, 2])).unwrap();
    let new = holder(&registry);
    registry.write(&new, "items", u32s(&[1, 2, 3, 4])).unwrap();

    // WHEN diffing
    let d = diff(&registry, &original, &new).unwrap();

    // THEN size 4 plus entries 2 and 3
    let Some(SerializedInstance::Array(arr)) = d.root_object().field(FieldId(5)) else {
        panic!("expected array diff");
    };
    assert!(arr.resized);
    assert_eq!(arr.len, 4);
    assert_eq!(
        arr.entries,
        BTreeMap::from([
            (2, SerializedInstance::Plain(3u32.to_le_bytes().to_vec())),
            (3, SerializedInstance::Plain(4u32.to_le_bytes().to_vec())),
        ])
    );
}

#[test]
fn test_field_missing_on_original_is_copied() {
    // GIVEN an original snapshot that lacks field b entirely
    let original = SerializedGraph::single(
        SerializedObject::new(RECORD).with_field(FieldId(1), SerializedInstance::Plain(vec![5])),
    );
    let new = SerializedGraph::single(
        SerializedObject::new(RECORD)
            .with_field(FieldId(1), SerializedInstance::Plain(vec![5]))
            .with_field(FieldId(2), SerializedInstance::Plain(vec![7])),
    );

    // WHEN diffing
    let d = DiffEngine::new().generate_diff(&original, &new).unwrap().unwrap();

    // THEN b is included
    assert_eq!(
        d.root_object().fields.iter().map(|f| f.id).collect::<Vec<_>>(),
        vec![FieldId(2)]
    );
}

#[test]
fn test_instance_kind_change_is_consistency_error() {
    let original = SerializedGraph::single(
        SerializedObject::new(RECORD).with_field(FieldId(1), SerializedInstance::Plain(vec![1])),
    );
    let new = SerializedGraph::single(
        SerializedObject::new(RECORD)
            .with_field(FieldId(1), SerializedInstance::DataBlock(vec![1])),
    );

    let err = DiffEngine::new().generate_diff(&original, &new).unwrap_err();

    assert_eq!(
        err,
        RefDeltaError::KindMismatch {
            field_id: FieldId(1),
            original: "plain",
            new: "data_block",
        }
    );
    assert_eq!(err.kind(), RdErrorKind::Consistency);
}

#[test]
fn test_root_type_mismatch_is_consistency_error() {
    let registry = schema();
    let err = DiffEngine::new()
        .generate_diff(
            &snap(&registry, &record(&registry, 1, "a")),
            &snap(&registry, &node(&registry, 1)),
        )
        .unwrap_err();

    assert_eq!(
        err,
        RefDeltaError::TypeMismatch {
            expected: RECORD,
            found: NODE,
        }
    );
    assert_eq!(err.kind(), RdErrorKind::Consistency);
}
