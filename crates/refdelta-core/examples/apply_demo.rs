//! Diff two versions of a small linked structure and patch a third copy.
//!
//! Run with `RUST_LOG=refdelta_core=trace` to see every pass event.

use refdelta_core::dynamic::{deep_copy, snapshot, DynContext, DynRegistry, DynValue};
use refdelta_core::logging_facility::{init, Profile};
use refdelta_core::{DiffEngine, FieldDescriptor, Result, TypeId};

const NODE: TypeId = TypeId(1);
const LIST: TypeId = TypeId(2);

fn main() -> Result<()> {
    init(Profile::Development);

    let mut registry = DynRegistry::new();
    registry.register(
        NODE.0,
        "Node",
        vec![
            FieldDescriptor::plain(1, "value"),
            FieldDescriptor::reflectable_ptr(2, "next", NODE),
        ],
    );
    registry.register(
        LIST.0,
        "List",
        vec![
            FieldDescriptor::plain(1, "name"),
            FieldDescriptor::reflectable_ptr(2, "head", NODE),
            FieldDescriptor::plain(3, "weights").array(),
        ],
    );

    let build = |name: &str, values: &[u32], weights: &[u32]| -> Result<_> {
        let list = registry.instantiate(LIST)?;
        registry.write(&list, "name", DynValue::str(name))?;
        let mut next = None;
        for value in values.iter().rev() {
            let node = registry.instantiate(NODE)?;
            registry.write(&node, "value", DynValue::u32(*value))?;
            if let Some(next) = &next {
                registry.write(&node, "next", DynValue::ptr(next))?;
            }
            next = Some(node);
        }
        if let Some(head) = &next {
            registry.write(&list, "head", DynValue::ptr(head))?;
        }
        let weights = weights.iter().map(|w| DynValue::u32(*w)).collect();
        registry.write(&list, "weights", DynValue::Array(weights))?;
        Ok(list)
    };

    let before = build("before", &[1, 2, 3], &[10, 20, 30])?;
    let after = build("after", &[1, 5, 3, 4], &[10, 25])?;

    let engine = DiffEngine::new();
    let Some(diff) = engine.generate_diff(
        &snapshot(&registry, &before)?,
        &snapshot(&registry, &after)?,
    )?
    else {
        println!("no difference");
        return Ok(());
    };
    println!("diff: {}", diff.to_json()?);

    let live = deep_copy(&registry, &before)?;
    let mut ctx = DynContext::default();
    let commands = engine.plan(&registry, &live, &diff, &mut ctx)?;
    for command in &commands {
        println!("  {}", command.name());
    }
    engine.execute(&registry, &commands, &mut ctx)?;

    println!(
        "writes={} changes={} allocations={}",
        ctx.writes, ctx.changes, ctx.allocations
    );
    println!(
        "patched equals target: {}",
        snapshot(&registry, &live)? == snapshot(&registry, &after)?
    );
    Ok(())
}
