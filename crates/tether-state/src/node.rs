//! Node variants, changes and the emission seam
//!
//! `ObjectNode` and `ListNode` share a receive/resolve/flush contract and are
//! held by their parent as a tagged `Node`. Local mutations hand a
//! `Mutation` to an `Emitter`, which journals it and sends it outward.

use tether_core::{EventId, ListKind, OpKind, Outbound, PathAddress, TetherResult, Value};

use crate::{ListNode, ObjectNode};

/// Live subscriber of a single field
///
/// Only values are delivered. A field that goes back to unset (rollback of
/// its first write) reports through its [`UnsetHook`] instead.
pub type Subscriber = Box<dyn FnMut(&Value) + Send>;

/// Called when a field loses its value
pub type UnsetHook = Box<dyn FnMut() + Send>;

/// Live subscriber of a whole list
pub type ListSubscriber = Box<dyn FnMut(&ListSnapshot) + Send>;

/// Shallow copy of a list handed to list subscribers
#[derive(Clone, Debug, PartialEq)]
pub enum ListSnapshot {
    Unknown,
    Primitive(Vec<Value>),
    Keyed(Vec<String>),
    Positional(usize),
}

/// An element removed from a list, kept so a rollback can put it back
#[derive(Debug)]
pub enum Element {
    Scalar(Value),
    Keyed { key: String, object: ObjectNode },
    Object(ObjectNode),
}

/// Value a mutation replaced
#[derive(Debug)]
pub enum Previous {
    Scalar(Value),
    Element(Element),
}

/// Operation carried by a locally-originated mutation
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOp {
    Set(Value),
    Append { kind: ListKind, value: Option<Value> },
    Delete,
}

/// A locally-originated mutation with what it needs to be undone
#[derive(Debug)]
pub struct Mutation {
    pub path: PathAddress,
    pub op: MutationOp,
    pub previous: Option<Previous>,
    /// Position inside the owning list, for list mutations
    pub index: Option<usize>,
}

impl Mutation {
    pub fn set(path: PathAddress, value: Value, previous: Option<Value>) -> Self {
        Mutation {
            path,
            op: MutationOp::Set(value),
            previous: previous.map(Previous::Scalar),
            index: None,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self.op {
            MutationOp::Set(_) => OpKind::Set,
            MutationOp::Append { .. } => OpKind::Append,
            MutationOp::Delete => OpKind::Delete,
        }
    }

    /// Outbound message announcing this mutation under `id`
    pub fn to_outbound(&self, id: EventId) -> Outbound {
        let path = self.path.clone();
        match &self.op {
            MutationOp::Set(value) => Outbound::Set {
                path,
                value: value.clone(),
                id,
            },
            MutationOp::Append { kind, value } => Outbound::Append {
                path,
                value: value.clone(),
                primitive: kind.is_primitive(),
                key: kind.key_field().to_string(),
                id,
            },
            MutationOp::Delete => Outbound::Delete { path, id },
        }
    }
}

/// Receives local mutations after they have been applied to the tree
pub trait Emitter {
    /// Journal and send a mutation; its first echo is a plain ack
    fn emit(&mut self, mutation: Mutation) -> EventId;

    /// Journal and send a mutation whose first echo must still be applied once
    fn emit_after_init(&mut self, mutation: Mutation) -> EventId;
}

/// A change dispatched down the tree
#[derive(Debug)]
pub enum Change {
    Set(Value),
    /// `create_only` appends force the list into existence without adding
    /// a visible element
    Append { kind: ListKind, create_only: bool },
    Delete,
    /// Undo the journaled mutation
    Rollback(Mutation),
}

impl Change {
    pub fn op_name(&self) -> &'static str {
        match self {
            Change::Set(_) => "set",
            Change::Append { .. } => "append",
            Change::Delete => "delete",
            Change::Rollback(_) => "rollback",
        }
    }
}

/// Child of an object node
#[derive(Debug)]
pub enum Node {
    Object(ObjectNode),
    List(ListNode),
}

/// Borrowed view of a resolved node
#[derive(Debug)]
pub enum NodeMut<'a> {
    Object(&'a mut ObjectNode),
    List(&'a mut ListNode),
}

impl Node {
    pub fn path(&self) -> &PathAddress {
        match self {
            Node::Object(object) => object.path(),
            Node::List(list) => list.path(),
        }
    }

    pub fn receive(&mut self, path: PathAddress, change: Change) -> TetherResult<()> {
        match self {
            Node::Object(object) => object.receive(path, change),
            Node::List(list) => list.receive(path, change),
        }
    }

    pub fn resolve(&mut self, path: PathAddress) -> TetherResult<NodeMut<'_>> {
        match self {
            Node::Object(object) => object.resolve(path),
            Node::List(list) => list.resolve(path),
        }
    }

    pub fn flush(&mut self) {
        match self {
            Node::Object(object) => object.flush(),
            Node::List(list) => list.flush(),
        }
    }

    pub fn rebase(&mut self, path: PathAddress) {
        match self {
            Node::Object(object) => object.rebase(path),
            Node::List(list) => list.rebase(path),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Object(_) => "object",
            Node::List(_) => "list",
        }
    }
}

impl<'a> NodeMut<'a> {
    pub fn into_object(self) -> Option<&'a mut ObjectNode> {
        match self {
            NodeMut::Object(object) => Some(object),
            NodeMut::List(_) => None,
        }
    }

    pub fn into_list(self) -> Option<&'a mut ListNode> {
        match self {
            NodeMut::List(list) => Some(list),
            NodeMut::Object(_) => None,
        }
    }
}
