//! Object node - named scalar fields and nested child nodes

use std::collections::HashMap;
use std::fmt;

use tether_core::{EventId, PathAddress, Scalar, Segment, TetherError, TetherResult, Value};
use tracing::debug;

use crate::{
    Change, Emitter, Field, ListNode, Mutation, Node, NodeMut, Previous, Subscriber, UnsetHook,
};

/// Reactive mapping of fields and children, owned by its parent
pub struct ObjectNode {
    path: PathAddress,
    fields: HashMap<String, Field>,
    children: HashMap<String, Node>,
}

impl ObjectNode {
    pub fn new(path: PathAddress) -> Self {
        ObjectNode {
            path,
            fields: HashMap::new(),
            children: HashMap::new(),
        }
    }

    pub fn path(&self) -> &PathAddress {
        &self.path
    }

    pub fn field_path(&self, name: &str) -> PathAddress {
        self.path.extend(name, false)
    }

    /// Read a field and subscribe to it
    ///
    /// An unset field is seeded with `default`; nothing is emitted upstream.
    pub fn value<T: Scalar + Clone>(&mut self, name: &str, default: T, subscriber: Subscriber) -> T {
        let field = self.fields.entry(name.to_string()).or_default();
        if !field.is_set() {
            field.replace(default.clone().into_value());
        }
        field.subscribe(subscriber);
        match field.value().and_then(T::from_value) {
            Some(value) => value,
            None => {
                debug!(path = %self.path, field = name, "field holds another type, using default");
                default
            }
        }
    }

    /// Attach a subscriber without seeding the field
    pub fn subscribe(&mut self, name: &str, subscriber: Subscriber) -> Option<Subscriber> {
        self.fields.entry(name.to_string()).or_default().subscribe(subscriber)
    }

    /// Run `hook` whenever the field goes back to unset
    pub fn on_unset(&mut self, name: &str, hook: UnsetHook) -> Option<UnsetHook> {
        self.fields.entry(name.to_string()).or_default().on_unset(hook)
    }

    pub fn unsubscribe(&mut self, name: &str) -> Option<Subscriber> {
        self.fields.get_mut(name).and_then(Field::unsubscribe)
    }

    /// Non-subscribing read; `None` when unset or of another type
    pub fn concrete<T: Scalar>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(T::from_value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(Field::value)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Update a field, notify its subscriber and emit the mutation
    pub fn set<T: Scalar>(&mut self, name: &str, value: T, emitter: &mut dyn Emitter) -> TetherResult<EventId> {
        let value = value.into_value();
        let previous = self.set_silent(name, value.clone())?;
        Ok(emitter.emit(Mutation::set(self.field_path(name), value, previous)))
    }

    /// Update a field and notify its subscriber without emitting
    pub fn set_silent(&mut self, name: &str, value: Value) -> TetherResult<Option<Value>> {
        if self.children.contains_key(name) {
            return Err(TetherError::type_mismatch(self.field_path(name), "is a nested node, not a field"));
        }
        let field = self.fields.entry(name.to_string()).or_default();
        let previous = field.replace(value);
        field.notify();
        Ok(previous)
    }

    /// Child list, created on first use
    pub fn list(&mut self, name: &str) -> TetherResult<&mut ListNode> {
        self.check_not_field(name)?;
        let path = &self.path;
        let child = self
            .children
            .entry(name.to_string())
            .or_insert_with(|| Node::List(ListNode::new(path.extend(name, false))));
        match child {
            Node::List(list) => Ok(list),
            Node::Object(object) => Err(TetherError::type_mismatch(object.path(), "is an object, not a list")),
        }
    }

    /// Child object, created on first use
    pub fn object(&mut self, name: &str) -> TetherResult<&mut ObjectNode> {
        self.check_not_field(name)?;
        let path = &self.path;
        let child = self
            .children
            .entry(name.to_string())
            .or_insert_with(|| Node::Object(ObjectNode::new(path.extend(name, false))));
        match child {
            Node::Object(object) => Ok(object),
            Node::List(list) => Err(TetherError::type_mismatch(list.path(), "is a list, not an object")),
        }
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.get_mut(name)
    }

    /// Apply a change addressed by `path`, whose cursor names a member of this node
    pub fn receive(&mut self, mut path: PathAddress, change: Change) -> TetherResult<()> {
        match change {
            Change::Set(value) => {
                if path.peek_final() {
                    self.set_silent(path.value(), value)?;
                    return Ok(());
                }
                let child = self.vivify(&path)?;
                path.increment();
                child.receive(path, Change::Set(value))
            }
            Change::Append { kind, create_only } => {
                if path.peek_final() {
                    return Err(TetherError::type_mismatch(
                        self.field_path(path.value()),
                        "cannot append to a field",
                    ));
                }
                // This node owns the target list when the next segment is the last one
                if path.cursor() + 2 == path.len() {
                    let list = self.list(path.value())?;
                    list.stamp(&kind)?;
                    path.increment();
                    return list.receive(path, Change::Append { kind, create_only });
                }
                let child = self.vivify(&path)?;
                path.increment();
                child.receive(path, Change::Append { kind, create_only })
            }
            Change::Delete => {
                if path.peek_final() {
                    return Err(TetherError::type_mismatch(
                        self.field_path(path.value()),
                        "only list elements can be deleted",
                    ));
                }
                let child = self.existing_child(&path)?;
                path.increment();
                child.receive(path, Change::Delete)
            }
            Change::Rollback(mutation) => {
                if !path.peek_final() {
                    let child = self.existing_child(&path)?;
                    path.increment();
                    return child.receive(path, Change::Rollback(mutation));
                }
                self.restore(path.value(), mutation.previous)
            }
        }
    }

    fn restore(&mut self, name: &str, previous: Option<Previous>) -> TetherResult<()> {
        let field = match self.fields.get_mut(name) {
            Some(field) => field,
            None => return Err(TetherError::PathNotFound(self.field_path(name).to_string())),
        };
        match previous {
            Some(Previous::Scalar(value)) => {
                field.replace(value);
                field.notify();
            }
            // The field did not exist before the mutation
            None => field.clear(),
            Some(Previous::Element(_)) => {
                return Err(TetherError::type_mismatch(
                    self.path.extend(name, false),
                    "a list element cannot be restored into a field",
                ))
            }
        }
        Ok(())
    }

    /// Navigate to the node addressed by `path`, creating intermediate nodes
    pub fn resolve(&mut self, mut path: PathAddress) -> TetherResult<NodeMut<'_>> {
        if path.is_final() {
            return Ok(NodeMut::Object(self));
        }
        let child = self.vivify(&path)?;
        path.increment();
        child.resolve(path)
    }

    /// Re-deliver every current value to its subscriber, depth first
    pub fn flush(&mut self) {
        for field in self.fields.values_mut() {
            field.notify();
        }
        for child in self.children.values_mut() {
            child.flush();
        }
    }

    /// Move this subtree to a new address
    pub fn rebase(&mut self, path: PathAddress) {
        self.path = path;
        for (name, child) in self.children.iter_mut() {
            let bracketed = child.path().last().is_bracketed();
            child.rebase(self.path.extend(name.as_str(), bracketed));
        }
    }

    fn check_not_field(&self, name: &str) -> TetherResult<()> {
        if self.fields.contains_key(name) && !self.children.contains_key(name) {
            return Err(TetherError::type_mismatch(self.field_path(name), "is a field, not a nested node"));
        }
        Ok(())
    }

    fn existing_child(&mut self, path: &PathAddress) -> TetherResult<&mut Node> {
        let own = &self.path;
        self.children
            .get_mut(path.value())
            .ok_or_else(|| TetherError::PathNotFound(own.extend(path.value(), false).to_string()))
    }

    /// Child named by the cursor, created on demand; a list when the next
    /// segment uses bracket addressing
    fn vivify(&mut self, path: &PathAddress) -> TetherResult<&mut Node> {
        let name = path.value();
        self.check_not_field(name)?;
        let list_next = path.peek_next().map_or(false, Segment::is_bracketed);
        let own = &self.path;
        let bracketed = path.segment().is_bracketed();
        Ok(self.children.entry(name.to_string()).or_insert_with(|| {
            let child_path = own.extend(name, bracketed);
            if list_next {
                Node::List(ListNode::new(child_path))
            } else {
                Node::Object(ObjectNode::new(child_path))
            }
        }))
    }
}

impl fmt::Debug for ObjectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectNode")
            .field("path", &self.path.to_string())
            .field("fields", &self.fields)
            .field("children", &self.children)
            .finish()
    }
}
