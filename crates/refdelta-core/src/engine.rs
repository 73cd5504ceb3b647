//! Engine facade.
//!
//! [`DiffEngine`] is the public entry point: it owns the injected
//! [`DiffHandler`] and wraps each pass with call correlation and the
//! start/end/error logging contract. Every method opens a span carrying a
//! fresh [`CallId`] so nested trace events can be tied back to one call.
//!
//! ## Example
//!
//! ```
//! use refdelta_core::dynamic::{snapshot, DynContext, DynRegistry, DynValue};
//! use refdelta_core::registry::FieldDescriptor;
//! use refdelta_core::DiffEngine;
//!
//! let mut registry = DynRegistry::new();
//! let point = registry.register(1, "Point", vec![
//!     FieldDescriptor::plain(1, "x"),
//!     FieldDescriptor::plain(2, "y"),
//! ]);
//!
//! let a = registry.instantiate(point).unwrap();
//! registry.write(&a, "x", DynValue::u32(1)).unwrap();
//! let b = registry.instantiate(point).unwrap();
//! registry.write(&b, "x", DynValue::u32(2)).unwrap();
//!
//! let engine = DiffEngine::new();
//! let diff = engine
//!     .generate_diff(&snapshot(&registry, &a).unwrap(), &snapshot(&registry, &b).unwrap())
//!     .unwrap()
//!     .unwrap();
//!
//! let mut ctx = DynContext::default();
//! engine.apply_diff(&registry, &a, &diff, &mut ctx).unwrap();
//! assert_eq!(registry.read(&a, "x").unwrap().as_u32(), Some(2));
//! ```

use refdelta_core_types::CallId;

use crate::diff::DiffPass;
use crate::errors::Result;
use crate::handler::{BinaryDiff, DiffHandler};
use crate::model::SerializedGraph;
use crate::patch::{executor, CommandList, DiffCommand, PlanPass};
use crate::registry::TypeRegistry;
use crate::{log_op_end, log_op_error, log_op_start};

/// Diff generation and application, parameterized by a diff strategy.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine<H = BinaryDiff> {
    handler: H,
}

impl DiffEngine<BinaryDiff> {
    pub fn new() -> Self {
        Self {
            handler: BinaryDiff,
        }
    }
}

impl<H: DiffHandler> DiffEngine<H> {
    pub fn with_handler(handler: H) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Compute the diff turning `original` into `new`
    ///
    /// Returns `None` when nothing differs at any depth. Neither input is
    /// modified.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` when the root types differ, `KindMismatch` when a
    /// field changes instance kind, `DanglingReference` for unresolved ids.
    pub fn generate_diff(
        &self,
        original: &SerializedGraph,
        new: &SerializedGraph,
    ) -> Result<Option<SerializedGraph>> {
        let call_id = CallId::new();
        let span = tracing::info_span!("generate_diff", call_id = %call_id);
        let _guard = span.enter();

        log_op_start!(
            "generate_diff",
            type_id = original.root_object().type_id.0,
            object_count = new.len()
        );
        let start = std::time::Instant::now();

        let diff = DiffPass::new(original, new)
            .run(&self.handler)
            .map_err(|e| {
                log_op_error!(
                    "generate_diff",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
                e
            })?;

        log_op_end!(
            "generate_diff",
            duration_ms = start.elapsed().as_millis() as u64,
            object_count = diff.as_ref().map_or(0, SerializedGraph::len)
        );
        Ok(diff)
    }

    /// Build the command list that would apply `diff` to `live`
    ///
    /// Nothing is written to `live`; the registry may still allocate the
    /// objects the commands will point at.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for a wrong root, schema errors for fields that no
    /// longer fit, `DanglingReference`, and allocation failures.
    pub fn plan<'a, R: TypeRegistry>(
        &self,
        registry: &'a R,
        live: &R::Object,
        diff: &'a SerializedGraph,
        ctx: &mut R::Context,
    ) -> Result<CommandList<'a, R::Object>> {
        let call_id = CallId::new();
        let span = tracing::info_span!("plan", call_id = %call_id);
        let _guard = span.enter();

        log_op_start!("plan", object_count = diff.len());
        let start = std::time::Instant::now();

        let commands = self.plan_impl(registry, live, diff, ctx).map_err(|e| {
            log_op_error!(
                "plan",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "plan",
            duration_ms = start.elapsed().as_millis() as u64,
            command_count = commands.len()
        );
        Ok(commands)
    }

    /// Replay a command list produced by [`DiffEngine::plan`]
    ///
    /// # Errors
    ///
    /// `UnbalancedCommands` before any write, otherwise registry errors.
    pub fn execute<R: TypeRegistry>(
        &self,
        registry: &R,
        commands: &[DiffCommand<'_, R::Object>],
        ctx: &mut R::Context,
    ) -> Result<()> {
        let call_id = CallId::new();
        let span = tracing::info_span!("execute", call_id = %call_id);
        let _guard = span.enter();

        log_op_start!("execute", command_count = commands.len());
        let start = std::time::Instant::now();

        executor::execute(registry, commands, ctx).map_err(|e| {
            log_op_error!(
                "execute",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!("execute", duration_ms = start.elapsed().as_millis() as u64);
        Ok(())
    }

    /// Plan and execute `diff` against `live` in one call
    ///
    /// Every schema and reference problem is detected while planning, so an
    /// error from those classes leaves `live` untouched.
    ///
    /// # Errors
    ///
    /// Anything [`DiffEngine::plan`] or [`DiffEngine::execute`] raises.
    pub fn apply_diff<R: TypeRegistry>(
        &self,
        registry: &R,
        live: &R::Object,
        diff: &SerializedGraph,
        ctx: &mut R::Context,
    ) -> Result<()> {
        let call_id = CallId::new();
        let span = tracing::info_span!("apply_diff", call_id = %call_id);
        let _guard = span.enter();

        log_op_start!("apply_diff", object_count = diff.len());
        let start = std::time::Instant::now();

        let command_count = self
            .apply_diff_impl(registry, live, diff, ctx)
            .map_err(|e| {
                log_op_error!(
                    "apply_diff",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64
                );
                e
            })?;

        log_op_end!(
            "apply_diff",
            duration_ms = start.elapsed().as_millis() as u64,
            command_count = command_count
        );
        Ok(())
    }

    fn plan_impl<'a, R: TypeRegistry>(
        &self,
        registry: &'a R,
        live: &R::Object,
        diff: &'a SerializedGraph,
        ctx: &mut R::Context,
    ) -> Result<CommandList<'a, R::Object>> {
        PlanPass::new(registry, diff, ctx).run(&self.handler, live)
    }

    fn apply_diff_impl<R: TypeRegistry>(
        &self,
        registry: &R,
        live: &R::Object,
        diff: &SerializedGraph,
        ctx: &mut R::Context,
    ) -> Result<usize> {
        let commands = self.plan_impl(registry, live, diff, ctx)?;
        executor::execute(registry, &commands, ctx)?;
        Ok(commands.len())
    }
}
