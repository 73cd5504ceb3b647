//! Diff application, plan then execute.
//!
//! Planning walks the diff graph against the live object and records every
//! write as a [`DiffCommand`] without touching the target. Only once the
//! whole plan exists does [`executor::execute`] replay it. Splitting the two
//! is what lets shared references resolve to one live instance, lets freshly
//! allocated objects exist before anything points at them, and makes schema
//! drift abort before the first write.
//!
//! Commands borrow field descriptors from the registry and payload bytes from
//! the diff, so a command list cannot outlive either.

pub mod executor;

use std::collections::HashMap;

use tracing::trace;

use crate::errors::{RefDeltaError, Result};
use crate::handler::DiffHandler;
use crate::model::{ObjectId, SerializedGraph, SerializedObject};
use crate::registry::{FieldDescriptor, TypeRegistry};

/// A deferred write against the live object graph.
///
/// `index` is `Some` for writes into array elements.
#[derive(Debug, Clone)]
pub enum DiffCommand<'a, O> {
    /// Copy raw bytes into a plain field
    Plain {
        field: &'a FieldDescriptor,
        index: Option<u32>,
        bytes: &'a [u8],
    },
    /// Enter the inline nested object stored in a field
    ///
    /// With `replace` set, that object is first swapped for the given
    /// instance, which is how an inline field changes its dynamic type.
    Reflectable {
        field: &'a FieldDescriptor,
        index: Option<u32>,
        replace: Option<O>,
    },
    /// Point a reference field at a live object (or null)
    ReflectablePtr {
        field: &'a FieldDescriptor,
        index: Option<u32>,
        target: Option<O>,
    },
    DataBlock {
        field: &'a FieldDescriptor,
        index: Option<u32>,
        data: &'a [u8],
    },
    ArraySize {
        field: &'a FieldDescriptor,
        size: u32,
    },
    /// Enter the root object of the apply
    ObjectStart { object: O },
    /// Leave the current object
    ObjectEnd,
    /// Enter a shared object, reused or freshly allocated
    SubObjectStart { object: O },
}

impl<O> DiffCommand<'_, O> {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            DiffCommand::Plain { .. } => "plain",
            DiffCommand::Reflectable { .. } => "reflectable",
            DiffCommand::ReflectablePtr { .. } => "reflectable_ptr",
            DiffCommand::DataBlock { .. } => "data_block",
            DiffCommand::ArraySize { .. } => "array_size",
            DiffCommand::ObjectStart { .. } => "object_start",
            DiffCommand::ObjectEnd => "object_end",
            DiffCommand::SubObjectStart { .. } => "sub_object_start",
        }
    }

    /// Whether this command writes into an array element
    pub fn is_array(&self) -> bool {
        match self {
            DiffCommand::Plain { index, .. }
            | DiffCommand::Reflectable { index, .. }
            | DiffCommand::ReflectablePtr { index, .. }
            | DiffCommand::DataBlock { index, .. } => index.is_some(),
            DiffCommand::ArraySize { .. }
            | DiffCommand::ObjectStart { .. }
            | DiffCommand::ObjectEnd
            | DiffCommand::SubObjectStart { .. } => false,
        }
    }

    /// Field targeted by this command, if any
    pub fn field(&self) -> Option<&FieldDescriptor> {
        match self {
            DiffCommand::Plain { field, .. }
            | DiffCommand::Reflectable { field, .. }
            | DiffCommand::ReflectablePtr { field, .. }
            | DiffCommand::DataBlock { field, .. }
            | DiffCommand::ArraySize { field, .. } => Some(field),
            DiffCommand::ObjectStart { .. }
            | DiffCommand::ObjectEnd
            | DiffCommand::SubObjectStart { .. } => None,
        }
    }
}

/// Ordered output of the plan phase
pub type CommandList<'a, O> = Vec<DiffCommand<'a, O>>;

/// State of one plan call.
///
/// `objects` is the apply-time object map: diff object id to the live
/// object standing in for it.
pub struct PlanPass<'a, 'c, R: TypeRegistry> {
    registry: &'a R,
    graph: &'a SerializedGraph,
    ctx: &'c mut R::Context,
    objects: HashMap<ObjectId, R::Object>,
    commands: CommandList<'a, R::Object>,
}

impl<'a, 'c, R: TypeRegistry> PlanPass<'a, 'c, R> {
    pub fn new(registry: &'a R, graph: &'a SerializedGraph, ctx: &'c mut R::Context) -> Self {
        Self {
            registry,
            graph,
            ctx,
            objects: HashMap::new(),
            commands: Vec::new(),
        }
    }

    /// Plan the whole diff against `live`
    ///
    /// # Errors
    ///
    /// `TypeMismatch` when `live` is not of the diff's root type, plus any
    /// schema, reference or allocation error met while planning.
    pub fn run<H: DiffHandler>(
        mut self,
        handler: &H,
        live: &R::Object,
    ) -> Result<CommandList<'a, R::Object>> {
        let graph = self.graph;
        let root = graph.root_object();
        self.objects.insert(graph.root(), live.clone());
        self.push(DiffCommand::ObjectStart {
            object: live.clone(),
        });
        self.plan_object(handler, Some(live), root)?;
        self.push(DiffCommand::ObjectEnd);
        Ok(self.commands)
    }

    pub fn registry(&self) -> &'a R {
        self.registry
    }

    pub fn context(&mut self) -> &mut R::Context {
        self.ctx
    }

    pub fn push(&mut self, command: DiffCommand<'a, R::Object>) {
        self.commands.push(command);
    }

    /// Plan every entry of one diff object
    ///
    /// `target` is the live counterpart when it exists at planning time; it
    /// must have the diff object's type.
    ///
    /// # Errors
    ///
    /// `TypeMismatch`, `UnknownType`, `UnknownField`, or whatever the handler
    /// raises.
    pub fn plan_object<H: DiffHandler>(
        &mut self,
        handler: &H,
        target: Option<&R::Object>,
        diff: &'a SerializedObject,
    ) -> Result<()> {
        let registry = self.registry;
        if let Some(object) = target {
            let found = registry.type_of(object);
            if found != diff.type_id {
                return Err(RefDeltaError::TypeMismatch {
                    expected: diff.type_id,
                    found,
                });
            }
        }
        for entry in &diff.fields {
            let field = registry.field(diff.type_id, entry.id)?;
            handler.plan_field(self, target, diff.type_id, field, &entry.value)?;
        }
        Ok(())
    }

    /// Plan a diff entry for the inline object stored in `field`
    ///
    /// The live nested object is kept when it already has the diff's type.
    /// Without a live owner the field's default element stands in, so the
    /// declared type decides. Otherwise a new instance of the diff's type is
    /// allocated and swapped in ahead of its writes.
    ///
    /// # Errors
    ///
    /// Allocation errors, plus anything raised planning the nested entries.
    pub fn plan_inline<H: DiffHandler>(
        &mut self,
        handler: &H,
        field: &'a FieldDescriptor,
        index: Option<u32>,
        owner: Option<&R::Object>,
        diff: &'a SerializedObject,
    ) -> Result<()> {
        let registry = self.registry;
        let nested = match owner {
            Some(owner) => {
                let nested = registry.nested(owner, field, index, self.ctx)?;
                (registry.type_of(&nested) == diff.type_id).then_some(nested)
            }
            None => None,
        };
        let keeps_default = owner.is_none() && field.type_id == Some(diff.type_id);

        if nested.is_some() || keeps_default {
            self.push(DiffCommand::Reflectable {
                field,
                index,
                replace: None,
            });
            self.plan_object(handler, nested.as_ref(), diff)?;
        } else {
            trace!(field = %field.name, type_id = %diff.type_id, "replacing inline object");
            let object = registry.create_instance(diff.type_id, self.ctx)?;
            self.push(DiffCommand::Reflectable {
                field,
                index,
                replace: Some(object.clone()),
            });
            self.plan_object(handler, Some(&object), diff)?;
        }
        self.push(DiffCommand::ObjectEnd);
        Ok(())
    }

    /// Resolve a shared diff object to the live object that will receive it
    ///
    /// Already-resolved ids return the cached object. Otherwise `current`
    /// (the live reference's present target) is reused when its type
    /// matches; else a new instance is allocated. A fresh object may only
    /// reuse `current` when it is not the live object its split origin
    /// resolved to, since that one keeps the origin's identity. The mapping
    /// is recorded before recursing so cycles and later references resolve
    /// to it.
    ///
    /// # Errors
    ///
    /// `DanglingReference` when the id is not in the diff graph, allocation
    /// errors, and anything raised planning the object's own entries.
    pub fn plan_shared<H: DiffHandler>(
        &mut self,
        handler: &H,
        id: ObjectId,
        current: Option<R::Object>,
    ) -> Result<R::Object> {
        if let Some(object) = self.objects.get(&id) {
            trace!(object_id = %id, "shared object already resolved");
            return Ok(object.clone());
        }
        let graph = self.graph;
        let registry = self.registry;
        let diff = graph
            .get(id)
            .ok_or(RefDeltaError::DanglingReference { object_id: id })?;

        // for fresh objects: the live object the split origin landed on, if resolved
        let origin = graph
            .split_from(id)
            .map(|from| self.objects.get(&from).cloned());
        let reusable = |object: &R::Object| {
            let taken = match &origin {
                None => false,
                Some(None) => true,
                Some(Some(kept)) => registry.same_object(kept, object),
            };
            !taken && registry.type_of(object) == diff.type_id
        };
        let object = match current {
            Some(object) if reusable(&object) => object,
            _ => {
                trace!(object_id = %id, type_id = %diff.type_id, "allocating shared object");
                registry.create_instance(diff.type_id, self.ctx)?
            }
        };
        self.objects.insert(id, object.clone());
        self.push(DiffCommand::SubObjectStart {
            object: object.clone(),
        });
        self.plan_object(handler, Some(&object), diff)?;
        self.push(DiffCommand::ObjectEnd);
        Ok(object)
    }
}
