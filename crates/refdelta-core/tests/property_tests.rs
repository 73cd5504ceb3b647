//! Property Tests
//!
//! ## Scenarios Covered
//!
//! 1. Diffing a graph against itself or a structural copy yields nothing
//! 2. Applying diff(A, B) to a copy of A reproduces B
//! 3. Re-applying the same diff changes no value and allocates nothing
//!
//! Generated holders vary every field kind: plain scalars, an inline
//! record, plain and inline arrays, a data block, and a node chain reached
//! both from `left` and from every element of `nodes`. The chain may close
//! into a ring, and `right` is null, the chain head, or a node of its own,
//! so pairs of holders split and merge shared nodes. Shapes held by
//! reference, inline, and in an inline array vary between the base type and
//! both derived types.

mod common;

use proptest::prelude::*;

use common::*;
use refdelta_core::dynamic::{deep_copy, DynRef, DynRegistry, DynValue};
use refdelta_core::TypeId;

#[derive(Debug, Clone)]
enum Right {
    Null,
    Head,
    Own(u32),
}

#[derive(Debug, Clone)]
struct ShapeState {
    type_id: TypeId,
    name: String,
    size: u32,
}

#[derive(Debug, Clone)]
struct HolderState {
    title: String,
    inner: (u32, String),
    items: Vec<u32>,
    blob: Vec<u8>,
    records: Vec<(u32, String)>,
    chain: Vec<u32>,
    ring: bool,
    right: Right,
    shape: Option<ShapeState>,
    figure: ShapeState,
    figures: Vec<ShapeState>,
}

fn right() -> impl Strategy<Value = Right> {
    prop_oneof![
        Just(Right::Null),
        Just(Right::Head),
        (0u32..4).prop_map(Right::Own),
    ]
}

fn shape_state() -> impl Strategy<Value = ShapeState> {
    (prop_oneof![Just(SHAPE), Just(CIRCLE), Just(SQUARE)], "[st]{0,1}", 0u32..3)
        .prop_map(|(type_id, name, size)| ShapeState {
            type_id,
            name,
            size,
        })
}

/// Small value domains so that generated pairs often share fields
fn holder_state() -> impl Strategy<Value = HolderState> {
    (
        "[a-c]{0,3}",
        (0u32..3, "[xy]{0,2}"),
        prop::collection::vec(0u32..4, 0..5),
        prop::collection::vec(0u8..3, 0..4),
        prop::collection::vec((0u32..3, "[pq]{0,1}"), 0..4),
        prop::collection::vec(0u32..4, 0..4),
        (any::<bool>(), right()),
        (
            prop::option::of(shape_state()),
            shape_state(),
            prop::collection::vec(shape_state(), 0..3),
        ),
    )
        .prop_map(
            |(title, inner, items, blob, records, chain, (ring, right), (shape, figure, figures))| {
                HolderState {
                    title,
                    inner,
                    items,
                    blob,
                    records,
                    chain,
                    ring,
                    right,
                    shape,
                    figure,
                    figures,
                }
            },
        )
}

fn build_shape(registry: &DynRegistry, state: &ShapeState) -> DynRef {
    if state.type_id == SHAPE {
        base_shape(registry, &state.name)
    } else {
        shape(registry, state.type_id, &state.name, state.size)
    }
}

fn build(registry: &DynRegistry, state: &HolderState) -> DynRef {
    let h = holder(registry);
    registry.write(&h, "title", DynValue::str(&state.title)).unwrap();

    let inner = registry.read(&h, "inner").unwrap();
    let inner = inner.as_inline().unwrap();
    registry.write(inner, "a", DynValue::u32(state.inner.0)).unwrap();
    registry.write(inner, "b", DynValue::str(&state.inner.1)).unwrap();

    registry.write(&h, "items", u32s(&state.items)).unwrap();
    registry
        .write(&h, "blob", DynValue::DataBlock(state.blob.clone()))
        .unwrap();
    registry
        .write(
            &h,
            "records",
            DynValue::Array(
                state
                    .records
                    .iter()
                    .map(|(a, b)| DynValue::Inline(record(registry, *a, b)))
                    .collect(),
            ),
        )
        .unwrap();

    let nodes: Vec<DynRef> = state.chain.iter().map(|v| node(registry, *v)).collect();
    for pair in nodes.windows(2) {
        link(registry, &pair[0], &pair[1]);
    }
    if let Some(first) = nodes.first() {
        registry.write(&h, "left", DynValue::ptr(first)).unwrap();
        if state.ring {
            link(registry, &nodes[nodes.len() - 1], first);
        }
    }
    let right = match state.right {
        Right::Null => None,
        Right::Head => nodes.first().cloned(),
        Right::Own(value) => Some(node(registry, value)),
    };
    if let Some(target) = &right {
        registry.write(&h, "right", DynValue::ptr(target)).unwrap();
    }
    registry
        .write(
            &h,
            "nodes",
            DynValue::Array(nodes.iter().map(DynValue::ptr).collect()),
        )
        .unwrap();

    if let Some(state) = &state.shape {
        registry
            .write(&h, "shape", DynValue::ptr(&build_shape(registry, state)))
            .unwrap();
    }
    registry
        .write(&h, "figure", DynValue::Inline(build_shape(registry, &state.figure)))
        .unwrap();
    registry
        .write(
            &h,
            "figures",
            DynValue::Array(
                state
                    .figures
                    .iter()
                    .map(|f| DynValue::Inline(build_shape(registry, f)))
                    .collect(),
            ),
        )
        .unwrap();
    h
}

proptest! {
    #[test]
    fn test_self_diff_is_empty(state in holder_state()) {
        let registry = schema();
        let a = build(&registry, &state);
        let copy = deep_copy(&registry, &a).unwrap();

        prop_assert!(diff(&registry, &a, &a).is_none());
        prop_assert!(diff(&registry, &a, &copy).is_none());
    }

    #[test]
    fn test_apply_reproduces_new(from in holder_state(), to in holder_state()) {
        let registry = schema();
        let a = build(&registry, &from);
        let b = build(&registry, &to);
        let live = deep_copy(&registry, &a).unwrap();

        if let Some(d) = diff(&registry, &a, &b) {
            apply(&registry, &live, &d);
        }

        prop_assert_eq!(snap(&registry, &live), snap(&registry, &b));
    }

    #[test]
    fn test_reapply_changes_nothing(from in holder_state(), to in holder_state()) {
        let registry = schema();
        let a = build(&registry, &from);
        let b = build(&registry, &to);
        let live = deep_copy(&registry, &a).unwrap();
        let Some(d) = diff(&registry, &a, &b) else {
            return Ok(());
        };

        apply(&registry, &live, &d);
        let again = apply(&registry, &live, &d);

        prop_assert_eq!(again.changes, 0);
        prop_assert_eq!(again.allocations, 0);
        prop_assert_eq!(snap(&registry, &live), snap(&registry, &b));
    }
}
