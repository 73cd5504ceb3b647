//! Command replay against live objects.
//!
//! The executor keeps a stack of write targets. `ObjectStart` and
//! `SubObjectStart` push the object they carry, `Reflectable` pushes the
//! inline object held by a field of the current top (after installing its
//! replacement, if the command carries one), and `ObjectEnd` pops.
//! Field writes always go to the top of the stack.

use tracing::trace;

use crate::errors::{RefDeltaError, Result};
use crate::patch::DiffCommand;
use crate::registry::TypeRegistry;

/// Check that object brackets pair up and every write happens inside one
///
/// # Errors
///
/// `UnbalancedCommands` describing the first offending position.
pub fn check_balanced<O>(commands: &[DiffCommand<'_, O>]) -> Result<()> {
    let mut depth: usize = 0;
    for (position, command) in commands.iter().enumerate() {
        match command {
            DiffCommand::ObjectStart { .. } | DiffCommand::SubObjectStart { .. } => depth += 1,
            DiffCommand::Reflectable { .. } => {
                if depth == 0 {
                    return Err(unbalanced(position, "nested object entered outside any object"));
                }
                depth += 1;
            }
            DiffCommand::ObjectEnd => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| unbalanced(position, "object end without a start"))?;
            }
            DiffCommand::Plain { .. }
            | DiffCommand::ReflectablePtr { .. }
            | DiffCommand::DataBlock { .. }
            | DiffCommand::ArraySize { .. } => {
                if depth == 0 {
                    return Err(unbalanced(position, "field write outside any object"));
                }
            }
        }
    }
    if depth != 0 {
        return Err(RefDeltaError::UnbalancedCommands {
            reason: format!("{depth} object(s) left open at end of list"),
        });
    }
    Ok(())
}

fn unbalanced(position: usize, what: &str) -> RefDeltaError {
    RefDeltaError::UnbalancedCommands {
        reason: format!("{what} at command {position}"),
    }
}

/// Replay a command list in order
///
/// Commands are applied strictly in sequence; there is no rollback if a
/// registry write fails part way through.
///
/// # Errors
///
/// `UnbalancedCommands` before any write when the brackets do not pair up,
/// otherwise whatever the registry raises.
pub fn execute<R: TypeRegistry>(
    registry: &R,
    commands: &[DiffCommand<'_, R::Object>],
    ctx: &mut R::Context,
) -> Result<()> {
    check_balanced(commands)?;

    let mut stack: Vec<R::Object> = Vec::new();
    for command in commands {
        trace!(command = command.name(), depth = stack.len(), "executing");
        match command {
            DiffCommand::ObjectStart { object } | DiffCommand::SubObjectStart { object } => {
                registry.on_object_start(object, ctx);
                stack.push(object.clone());
            }
            DiffCommand::ObjectEnd => {
                if let Some(object) = stack.pop() {
                    registry.on_object_end(&object, ctx);
                }
            }
            DiffCommand::Reflectable {
                field,
                index,
                replace,
            } => {
                let top = top(&stack)?;
                let nested = match replace {
                    Some(object) => {
                        registry.replace_nested(top, field, *index, object, ctx)?;
                        object.clone()
                    }
                    None => registry.nested(top, field, *index, ctx)?,
                };
                registry.on_object_start(&nested, ctx);
                stack.push(nested);
            }
            DiffCommand::Plain {
                field,
                index,
                bytes,
            } => registry.set_plain(top(&stack)?, field, *index, bytes, ctx)?,
            DiffCommand::DataBlock { field, index, data } => {
                registry.set_data_block(top(&stack)?, field, *index, data, ctx)?
            }
            DiffCommand::ReflectablePtr {
                field,
                index,
                target,
            } => registry.set_ptr(top(&stack)?, field, *index, target.as_ref(), ctx)?,
            DiffCommand::ArraySize { field, size } => {
                registry.set_array_size(top(&stack)?, field, *size, ctx)?
            }
        }
    }
    Ok(())
}

fn top<O>(stack: &[O]) -> Result<&O> {
    stack.last().ok_or_else(|| RefDeltaError::UnbalancedCommands {
        reason: "write with empty target stack".to_string(),
    })
}
