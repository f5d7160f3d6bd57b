//! List node - ordered sequence whose structural kind is fixed by the first append

use std::fmt;

use tether_core::{EventId, ListKind, PathAddress, TetherError, TetherResult, Value};
use tracing::{debug, warn};

use crate::{
    Change, Element, Emitter, ListSnapshot, ListSubscriber, Mutation, MutationOp, NodeMut, ObjectNode,
    Previous,
};

#[derive(Debug)]
enum Elements {
    Unknown,
    Primitive(Vec<Value>),
    Keyed {
        key_field: String,
        entries: Vec<(String, ObjectNode)>,
    },
    Positional(Vec<ObjectNode>),
}

impl Elements {
    fn empty(kind: &ListKind) -> Self {
        match kind {
            ListKind::Primitive => Elements::Primitive(Vec::new()),
            ListKind::Keyed { key_field } => Elements::Keyed {
                key_field: key_field.clone(),
                entries: Vec::new(),
            },
            ListKind::Positional => Elements::Positional(Vec::new()),
        }
    }

    fn kind(&self) -> Option<ListKind> {
        match self {
            Elements::Unknown => None,
            Elements::Primitive(_) => Some(ListKind::Primitive),
            Elements::Keyed { key_field, .. } => Some(ListKind::keyed(key_field.as_str())),
            Elements::Positional(_) => Some(ListKind::Positional),
        }
    }

    fn len(&self) -> usize {
        match self {
            Elements::Unknown => 0,
            Elements::Primitive(values) => values.len(),
            Elements::Keyed { entries, .. } => entries.len(),
            Elements::Positional(objects) => objects.len(),
        }
    }
}

fn parse_index(path: &PathAddress, segment: &str) -> TetherResult<usize> {
    segment.parse().map_err(|_| TetherError::InvalidIndex {
        path: path.to_string(),
        index: segment.to_string(),
    })
}

/// Outcome of a local append
pub struct Appended<'a> {
    pub id: EventId,
    /// The new object element; `None` for primitive lists
    pub element: Option<&'a mut ObjectNode>,
}

/// Reactive ordered or keyed sequence
pub struct ListNode {
    path: PathAddress,
    elements: Elements,
    /// Re-notify list subscribers when a nested element changes
    reactive: bool,
    subscriber: Option<ListSubscriber>,
    /// Nested changes that arrived before the kind was known
    deferred: Vec<(PathAddress, Change)>,
}

impl ListNode {
    pub fn new(path: PathAddress) -> Self {
        ListNode {
            path,
            elements: Elements::Unknown,
            reactive: false,
            subscriber: None,
            deferred: Vec::new(),
        }
    }

    pub fn path(&self) -> &PathAddress {
        &self.path
    }

    /// Structural kind, `None` until the first append
    pub fn kind(&self) -> Option<ListKind> {
        self.elements.kind()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_reactive(&self) -> bool {
        self.reactive
    }

    pub fn set_reactive(&mut self, reactive: bool) {
        self.reactive = reactive;
    }

    /// Fix the structural kind; a contradicting kind is rejected
    ///
    /// Nested changes deferred while the kind was unknown are replayed once
    /// it is fixed.
    pub fn stamp(&mut self, kind: &ListKind) -> TetherResult<()> {
        match self.elements.kind() {
            None => {
                self.elements = Elements::empty(kind);
                self.replay_deferred();
                Ok(())
            }
            Some(fixed) if &fixed == kind => Ok(()),
            Some(fixed) => Err(TetherError::KindMismatch {
                path: self.path.to_string(),
                fixed,
                requested: kind.clone(),
            }),
        }
    }

    /// Position addressed by a segment: key scan for keyed lists, numeric
    /// index otherwise. `None` when no such element exists.
    pub fn position(&self, segment: &str) -> TetherResult<Option<usize>> {
        match &self.elements {
            Elements::Unknown => Ok(None),
            Elements::Keyed { entries, .. } => Ok(entries.iter().position(|(key, _)| key == segment)),
            Elements::Primitive(_) | Elements::Positional(_) => {
                let index = parse_index(&self.path, segment)?;
                Ok((index < self.len()).then_some(index))
            }
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        match &self.elements {
            Elements::Keyed { entries, .. } => entries.iter().map(|(key, _)| key.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Primitive element at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        match &self.elements {
            Elements::Primitive(values) => values.get(index),
            _ => None,
        }
    }

    /// Non-creating lookup of an object element
    pub fn get_element(&self, segment: &str) -> Option<&ObjectNode> {
        let index = self.position(segment).ok()??;
        match &self.elements {
            Elements::Keyed { entries, .. } => entries.get(index).map(|(_, object)| object),
            Elements::Positional(objects) => objects.get(index),
            Elements::Primitive(_) | Elements::Unknown => None,
        }
    }

    /// Object element addressed by key or index
    pub fn element(&mut self, segment: &str) -> TetherResult<&mut ObjectNode> {
        self.element_for(segment, false)
    }

    pub fn snapshot(&self) -> ListSnapshot {
        match &self.elements {
            Elements::Unknown => ListSnapshot::Unknown,
            Elements::Primitive(values) => ListSnapshot::Primitive(values.clone()),
            Elements::Keyed { entries, .. } => {
                ListSnapshot::Keyed(entries.iter().map(|(key, _)| key.clone()).collect())
            }
            Elements::Positional(objects) => ListSnapshot::Positional(objects.len()),
        }
    }

    /// Subscribe to the whole list and read its current contents
    pub fn values(&mut self, subscriber: ListSubscriber) -> ListSnapshot {
        self.subscriber = Some(subscriber);
        self.snapshot()
    }

    pub fn unsubscribe(&mut self) -> Option<ListSubscriber> {
        self.subscriber.take()
    }

    pub fn notify(&mut self) {
        if self.subscriber.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber(&snapshot);
        }
    }

    /// Append locally, notify and emit
    ///
    /// An undetermined list is fixed as primitive when a value is given and
    /// as positional when neither key nor value is; keyed lists must be
    /// stamped first so the key field name is known.
    pub fn append(
        &mut self,
        key: Option<&str>,
        value: Option<Value>,
        emitter: &mut dyn Emitter,
    ) -> TetherResult<Appended<'_>> {
        if let Some(key) = key {
            self.check_key(key)?;
        }
        if let Elements::Unknown = self.elements {
            let kind = match (key, &value) {
                (_, Some(_)) => ListKind::Primitive,
                (None, None) => ListKind::Positional,
                (Some(_), None) => return Err(TetherError::KindUnknown(self.path.to_string())),
            };
            self.stamp(&kind)?;
        }

        let index = self.len();
        let element_path;
        let op;
        let mut seed = None;
        match &mut self.elements {
            Elements::Unknown => return Err(TetherError::KindUnknown(self.path.to_string())),
            Elements::Primitive(values) => {
                let value = value.ok_or_else(|| TetherError::ValueRequired(self.path.to_string()))?;
                element_path = self.path.extend(index.to_string(), true);
                values.push(value.clone());
                op = MutationOp::Append {
                    kind: ListKind::Primitive,
                    value: Some(value),
                };
            }
            Elements::Keyed { key_field, entries } => {
                let key = key.ok_or_else(|| TetherError::KeyRequired(self.path.to_string()))?;
                if entries.iter().any(|(existing, _)| existing == key) {
                    return Err(TetherError::DuplicateKey {
                        path: self.path.to_string(),
                        key: key.to_string(),
                    });
                }
                element_path = self.path.extend(key, true);
                let mut object = ObjectNode::new(element_path.clone());
                object.set_silent(key_field, Value::from(key))?;
                entries.push((key.to_string(), object));
                seed = Some((element_path.extend(key_field.as_str(), false), Value::from(key)));
                op = MutationOp::Append {
                    kind: ListKind::keyed(key_field.as_str()),
                    value: None,
                };
            }
            Elements::Positional(objects) => {
                if key.is_some() {
                    return Err(TetherError::type_mismatch(&self.path, "positional lists are addressed by index"));
                }
                element_path = self.path.extend(index.to_string(), true);
                objects.push(ObjectNode::new(element_path.clone()));
                op = MutationOp::Append {
                    kind: ListKind::Positional,
                    value: None,
                };
            }
        }

        self.notify();
        let id = emitter.emit(Mutation {
            path: element_path,
            op,
            previous: None,
            index: Some(index),
        });
        // The key field was written locally; its first echo still applies once
        if let Some((key_path, key)) = seed {
            emitter.emit_after_init(Mutation::set(key_path, key, None));
        }

        Ok(Appended {
            id,
            element: self.object_at(index),
        })
    }

    /// Remove an element locally, notify and emit; the removed element is
    /// journaled for rollback
    pub fn delete(&mut self, segment: &str, emitter: &mut dyn Emitter) -> TetherResult<EventId> {
        let index = match self.position(segment)? {
            Some(index) => index,
            None => return Err(TetherError::ElementNotFound(self.path.extend(segment, true).to_string())),
        };
        let element_path = self.path.extend(segment, true);
        let element = match self.remove_at(index) {
            Some(element) => element,
            None => return Err(TetherError::ElementNotFound(element_path.to_string())),
        };
        self.notify();
        Ok(emitter.emit(Mutation {
            path: element_path,
            op: MutationOp::Delete,
            previous: Some(Previous::Element(element)),
            index: Some(index),
        }))
    }

    /// Replace (or push, when `index == len`) a primitive element and emit
    pub fn set(&mut self, index: usize, value: Value, emitter: &mut dyn Emitter) -> TetherResult<EventId> {
        if let Elements::Unknown = self.elements {
            self.stamp(&ListKind::Primitive)?;
        }
        let previous = match &mut self.elements {
            Elements::Primitive(values) if index < values.len() => {
                Some(std::mem::replace(&mut values[index], value.clone()))
            }
            Elements::Primitive(values) if index == values.len() => {
                values.push(value.clone());
                None
            }
            Elements::Primitive(_) => {
                return Err(TetherError::InvalidIndex {
                    path: self.path.to_string(),
                    index: index.to_string(),
                })
            }
            _ => return Err(TetherError::type_mismatch(&self.path, "list is not primitive")),
        };
        self.notify();
        Ok(emitter.emit(Mutation {
            path: self.path.extend(index.to_string(), true),
            op: MutationOp::Set(value),
            previous: previous.map(Previous::Scalar),
            index: Some(index),
        }))
    }

    /// Number of nested changes waiting for the list kind
    pub fn deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Apply a change whose cursor names an element of this list
    pub fn receive(&mut self, mut path: PathAddress, change: Change) -> TetherResult<()> {
        if !path.peek_final() {
            let vivify = matches!(change, Change::Set(_) | Change::Append { .. });
            if vivify && self.kind().is_none() {
                // The append that stamps this list may still be in flight
                debug!(path = %path, op = change.op_name(), "nested change deferred until the list kind is known");
                self.deferred.push((path, change));
                return Ok(());
            }
            let element = self.element_for(path.value(), vivify)?;
            path.increment();
            element.receive(path, change)?;
            if self.reactive {
                self.notify();
            }
            return Ok(());
        }

        let segment = path.value();
        match change {
            Change::Append { kind, create_only } => self.receive_append(segment, &kind, create_only),
            Change::Set(value) => self.receive_set(segment, value),
            Change::Delete => {
                match self.position(segment)? {
                    Some(index) => {
                        self.remove_at(index);
                        self.notify();
                    }
                    None => debug!(path = %self.path, element = segment, "delete of missing element skipped"),
                }
                Ok(())
            }
            Change::Rollback(mutation) => self.rollback(segment, mutation),
        }
    }

    fn receive_append(&mut self, segment: &str, kind: &ListKind, create_only: bool) -> TetherResult<()> {
        self.stamp(kind)?;
        if create_only {
            debug!(path = %self.path, "list created by guard append");
            return Ok(());
        }
        let index = self.len();
        let path = &self.path;
        match &mut self.elements {
            Elements::Keyed { key_field, entries } => {
                if entries.iter().any(|(key, _)| key == segment) {
                    debug!(path = %path, key = segment, "duplicate keyed append ignored");
                    return Ok(());
                }
                let mut object = ObjectNode::new(path.extend(segment, true));
                object.set_silent(key_field, Value::from(segment))?;
                entries.push((segment.to_string(), object));
            }
            Elements::Positional(objects) => {
                if segment.parse::<usize>().map_or(false, |at| at < index) {
                    debug!(path = %path, index = segment, "positional element already present");
                    return Ok(());
                }
                objects.push(ObjectNode::new(path.extend(index.to_string(), true)))
            }
            // Primitive values arrive with the set that follows
            Elements::Primitive(_) | Elements::Unknown => return Ok(()),
        }
        self.notify();
        Ok(())
    }

    fn receive_set(&mut self, segment: &str, value: Value) -> TetherResult<()> {
        // A scalar written at an index fixes an undetermined list as primitive
        if let Elements::Unknown = self.elements {
            self.stamp(&ListKind::Primitive)?;
        }
        let path = &self.path;
        match &mut self.elements {
            Elements::Primitive(values) => {
                let index = parse_index(path, segment)?;
                if index < values.len() {
                    values[index] = value;
                } else if index == values.len() {
                    values.push(value);
                } else {
                    return Err(TetherError::InvalidIndex {
                        path: path.to_string(),
                        index: segment.to_string(),
                    });
                }
            }
            _ => {
                return Err(TetherError::type_mismatch(
                    path.extend(segment, true),
                    "elements of this list are objects",
                ))
            }
        }
        self.notify();
        Ok(())
    }

    /// Undo a journaled mutation addressed at one of this list's elements
    fn rollback(&mut self, segment: &str, mutation: Mutation) -> TetherResult<()> {
        match mutation.op {
            MutationOp::Set(_) => {
                let index = parse_index(&self.path, segment)?;
                match mutation.previous {
                    Some(Previous::Scalar(value)) => match &mut self.elements {
                        Elements::Primitive(values) if index < values.len() => values[index] = value,
                        _ => {
                            debug!(path = %self.path, element = segment, "rollback of missing element skipped");
                            return Ok(());
                        }
                    },
                    // The set pushed a new element
                    None => {
                        if self.remove_at(index).is_none() {
                            debug!(path = %self.path, element = segment, "rollback of missing element skipped");
                            return Ok(());
                        }
                    }
                    Some(Previous::Element(_)) => {
                        return Err(TetherError::type_mismatch(&self.path, "set record carries an element"))
                    }
                }
            }
            MutationOp::Delete => match mutation.previous {
                Some(Previous::Element(element)) => {
                    let index = mutation.index.unwrap_or_else(|| self.len());
                    self.insert_at(index, element)?;
                }
                _ => return Err(TetherError::type_mismatch(&self.path, "delete record carries no element")),
            },
            MutationOp::Append { .. } => match self.position(segment)? {
                Some(index) => {
                    self.remove_at(index);
                }
                None => {
                    debug!(path = %self.path, element = segment, "appended element already gone");
                    return Ok(());
                }
            },
        }
        self.notify();
        Ok(())
    }

    /// Navigate to the node addressed by `path`
    pub fn resolve(&mut self, mut path: PathAddress) -> TetherResult<NodeMut<'_>> {
        if path.is_final() {
            return Ok(NodeMut::List(self));
        }
        let element = self.element_for(path.value(), false)?;
        path.increment();
        element.resolve(path)
    }

    /// Re-deliver current values of every element, then the list itself
    pub fn flush(&mut self) {
        match &mut self.elements {
            Elements::Keyed { entries, .. } => {
                for (_, object) in entries.iter_mut() {
                    object.flush();
                }
            }
            Elements::Positional(objects) => {
                for object in objects.iter_mut() {
                    object.flush();
                }
            }
            Elements::Primitive(_) | Elements::Unknown => {}
        }
        self.notify();
    }

    /// Move this list to a new address, carrying its elements along
    pub fn rebase(&mut self, path: PathAddress) {
        self.path = path;
        if let Elements::Keyed { entries, .. } = &mut self.elements {
            for (key, object) in entries.iter_mut() {
                object.rebase(self.path.extend(key.as_str(), true));
            }
        }
        self.rebase_from(0);
    }

    fn rebase_from(&mut self, start: usize) {
        if let Elements::Positional(objects) = &mut self.elements {
            for (index, object) in objects.iter_mut().enumerate().skip(start) {
                object.rebase(self.path.extend(index.to_string(), true));
            }
        }
    }

    /// A key must come back unchanged from the wire form of its element path
    fn check_key(&self, key: &str) -> TetherResult<()> {
        let element = self.path.extend(key, true);
        let text = element.to_string();
        match PathAddress::parse(&text) {
            Ok(parsed) if parsed == element => Ok(()),
            _ => Err(TetherError::invalid_path(text, "key cannot be addressed as a path segment")),
        }
    }

    fn replay_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        for (path, change) in std::mem::take(&mut self.deferred) {
            if let Err(e) = self.receive(path.clone(), change) {
                warn!(path = %path, error = %e, "deferred change does not apply");
            }
        }
        self.notify();
    }

    fn object_at(&mut self, index: usize) -> Option<&mut ObjectNode> {
        match &mut self.elements {
            Elements::Keyed { entries, .. } => entries.get_mut(index).map(|(_, object)| object),
            Elements::Positional(objects) => objects.get_mut(index),
            Elements::Primitive(_) | Elements::Unknown => None,
        }
    }

    /// Object element for `segment`; with `vivify`, a missing keyed element
    /// or the next positional index is created
    fn element_for(&mut self, segment: &str, vivify: bool) -> TetherResult<&mut ObjectNode> {
        let position = self.position(segment)?;
        let path = &self.path;
        let missing = || TetherError::ElementNotFound(path.extend(segment, true).to_string());
        match &mut self.elements {
            Elements::Unknown => Err(TetherError::KindUnknown(path.to_string())),
            Elements::Primitive(_) => Err(TetherError::type_mismatch(
                path.extend(segment, true),
                "primitive elements have no members",
            )),
            Elements::Keyed { key_field, entries } => {
                let index = match position {
                    Some(index) => index,
                    None if vivify => {
                        let mut object = ObjectNode::new(path.extend(segment, true));
                        object.set_silent(key_field, Value::from(segment))?;
                        entries.push((segment.to_string(), object));
                        entries.len() - 1
                    }
                    None => return Err(missing()),
                };
                Ok(&mut entries[index].1)
            }
            Elements::Positional(objects) => {
                let index = match position {
                    Some(index) => index,
                    None if vivify && parse_index(path, segment)? == objects.len() => {
                        objects.push(ObjectNode::new(path.extend(segment, true)));
                        objects.len() - 1
                    }
                    None => return Err(missing()),
                };
                Ok(&mut objects[index])
            }
        }
    }

    fn remove_at(&mut self, index: usize) -> Option<Element> {
        if index >= self.len() {
            return None;
        }
        let element = match &mut self.elements {
            Elements::Unknown => return None,
            Elements::Primitive(values) => Element::Scalar(values.remove(index)),
            Elements::Keyed { entries, .. } => {
                let (key, object) = entries.remove(index);
                Element::Keyed { key, object }
            }
            Elements::Positional(objects) => Element::Object(objects.remove(index)),
        };
        self.rebase_from(index);
        Some(element)
    }

    fn insert_at(&mut self, index: usize, element: Element) -> TetherResult<()> {
        let path = &self.path;
        let mismatch = || TetherError::type_mismatch(path, "removed element does not match the list kind");
        let at = match element {
            Element::Scalar(value) => match &mut self.elements {
                Elements::Primitive(values) => {
                    let at = index.min(values.len());
                    values.insert(at, value);
                    at
                }
                _ => return Err(mismatch()),
            },
            Element::Keyed { key, mut object } => match &mut self.elements {
                Elements::Keyed { entries, .. } => {
                    if entries.iter().any(|(existing, _)| *existing == key) {
                        debug!(path = %path, key = %key, "element already restored");
                        return Ok(());
                    }
                    object.rebase(path.extend(key.as_str(), true));
                    let at = index.min(entries.len());
                    entries.insert(at, (key, object));
                    at
                }
                _ => return Err(mismatch()),
            },
            Element::Object(object) => match &mut self.elements {
                Elements::Positional(objects) => {
                    let at = index.min(objects.len());
                    objects.insert(at, object);
                    at
                }
                _ => return Err(mismatch()),
            },
        };
        self.rebase_from(at);
        Ok(())
    }
}

impl fmt::Debug for ListNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListNode")
            .field("path", &self.path.to_string())
            .field("elements", &self.elements)
            .field("reactive", &self.reactive)
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::*;
    use crate::node::testing::{path, RecordingEmitter};

    /// Path with its cursor on segment `cursor`
    fn at(text: &str, cursor: usize) -> PathAddress {
        let mut path = path(text);
        for _ in 0..cursor {
            path.increment();
        }
        path
    }

    fn keyed(text: &str) -> ListNode {
        let mut list = ListNode::new(path(text));
        list.stamp(&ListKind::keyed("name")).unwrap();
        list
    }

    fn snapshots(list: &mut ListNode) -> Arc<Mutex<Vec<ListSnapshot>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        list.values(Box::new(move |s: &ListSnapshot| sink.lock().push(s.clone())));
        seen
    }

    #[test]
    fn test_local_keyed_append() {
        let mut list = keyed("state.macros");
        let mut emitter = RecordingEmitter::default();
        let seen = snapshots(&mut list);

        let appended = list.append(Some("a1"), None, &mut emitter).unwrap();
        let element = appended.element.unwrap();
        assert_eq!(element.path().to_string(), "state.macros[a1]");
        assert_eq!(element.concrete::<String>("name"), Some("a1".to_string()));

        assert_eq!(emitter.emitted.len(), 2);
        let (_, append, processed) = &emitter.emitted[0];
        assert!(*processed);
        assert_eq!(append.path.to_string(), "state.macros[a1]");
        let (_, seed, processed) = &emitter.emitted[1];
        assert!(!*processed, "key field echo must still apply once");
        assert_eq!(seed.path.to_string(), "state.macros[a1].name");

        assert_eq!(*seen.lock(), vec![ListSnapshot::Keyed(vec!["a1".to_string()])]);
        assert!(matches!(
            list.append(Some("a1"), None, &mut emitter),
            Err(TetherError::DuplicateKey { .. })
        ));
        assert!(matches!(
            list.append(None, None, &mut emitter),
            Err(TetherError::KeyRequired(_))
        ));
    }

    #[test]
    fn test_remote_keyed_append_is_idempotent() {
        let mut list = ListNode::new(path("state.macros"));
        let append = || Change::Append {
            kind: ListKind::keyed("name"),
            create_only: false,
        };
        list.receive(at("state.macros[a1]", 2), append()).unwrap();
        list.receive(at("state.macros[a1]", 2), append()).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.keys(), vec!["a1"]);
        assert_eq!(
            list.element("a1").unwrap().concrete::<String>("name"),
            Some("a1".to_string())
        );
    }

    #[test]
    fn test_kind_is_fixed_by_first_append() {
        let mut list = ListNode::new(path("state.tags"));
        assert_eq!(list.kind(), None);
        list.receive(
            at("state.tags[0]", 2),
            Change::Append {
                kind: ListKind::Primitive,
                create_only: false,
            },
        )
        .unwrap();
        list.receive(at("state.tags[0]", 2), Change::Set(Value::from("red")))
            .unwrap();

        let contradicting = list.receive(
            at("state.tags[x]", 2),
            Change::Append {
                kind: ListKind::keyed("name"),
                create_only: false,
            },
        );
        assert!(matches!(contradicting, Err(TetherError::KindMismatch { .. })));
        assert_eq!(list.kind(), Some(ListKind::Primitive));
        assert_eq!(list.get(0), Some(&Value::from("red")));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_guard_append_creates_empty_list() {
        let mut list = ListNode::new(path("state.macros"));
        list.receive(
            at("state.macros[_init]", 2),
            Change::Append {
                kind: ListKind::keyed("name"),
                create_only: true,
            },
        )
        .unwrap();
        assert_eq!(list.kind(), Some(ListKind::keyed("name")));
        assert!(list.is_empty());
    }

    #[test]
    fn test_append_infers_kind() {
        let mut emitter = RecordingEmitter::default();

        let mut primitive = ListNode::new(path("state.tags"));
        let appended = primitive.append(None, Some(Value::from(3i64)), &mut emitter).unwrap();
        assert!(appended.element.is_none());
        assert_eq!(primitive.kind(), Some(ListKind::Primitive));

        let mut positional = ListNode::new(path("state.presets"));
        positional.append(None, None, &mut emitter).unwrap();
        assert_eq!(positional.kind(), Some(ListKind::Positional));

        let mut undetermined = ListNode::new(path("state.macros"));
        assert!(matches!(
            undetermined.append(Some("a"), None, &mut emitter),
            Err(TetherError::KindUnknown(_))
        ));
    }

    #[test]
    fn test_positional_delete_and_rollback_rebase_paths() {
        let mut list = ListNode::new(path("database.presets"));
        let mut emitter = RecordingEmitter::default();
        for name in ["a", "b", "c"] {
            let appended = list.append(None, None, &mut emitter).unwrap();
            appended
                .element
                .unwrap()
                .set_silent("label", Value::from(name))
                .unwrap();
        }

        let id = list.delete("0", &mut emitter).unwrap();
        assert_eq!(list.len(), 2);
        let first = list.element("0").unwrap();
        assert_eq!(first.concrete::<String>("label"), Some("b".to_string()));
        assert_eq!(first.path().to_string(), "database.presets[0]");

        let mutation = emitter.take(id);
        list.receive(at("database.presets[0]", 2), Change::Rollback(mutation))
            .unwrap();
        assert_eq!(list.len(), 3);
        for (index, label) in ["a", "b", "c"].iter().enumerate() {
            let element = list.element(&index.to_string()).unwrap();
            assert_eq!(element.concrete::<String>("label"), Some(label.to_string()));
            assert_eq!(element.path().to_string(), format!("database.presets[{}]", index));
        }
    }

    #[test]
    fn test_keyed_delete_rollback_restores_subtree() {
        let mut list = keyed("database.accounts");
        let mut emitter = RecordingEmitter::default();
        list.append(Some("alice"), None, &mut emitter).unwrap();
        list.append(Some("bob"), None, &mut emitter).unwrap();
        list.element("alice")
            .unwrap()
            .set_silent("score", Value::from(10i64))
            .unwrap();

        let id = list.delete("alice", &mut emitter).unwrap();
        assert_eq!(list.keys(), vec!["bob"]);

        let mutation = emitter.take(id);
        let target = mutation.path.clone();
        let mut cursor = target.clone();
        cursor.increment().increment();
        list.receive(cursor, Change::Rollback(mutation)).unwrap();

        assert_eq!(list.keys(), vec!["alice", "bob"]);
        assert_eq!(list.element("alice").unwrap().concrete::<i64>("score"), Some(10));
    }

    #[test]
    fn test_remote_delete_missing_is_skipped() {
        let mut list = keyed("state.macros");
        assert!(list.receive(at("state.macros[ghost]", 2), Change::Delete).is_ok());
        assert!(list.is_empty());
    }

    #[test]
    fn test_nested_change_notifies_reactive_list() {
        let mut list = keyed("state.macros");
        list.receive(
            at("state.macros[a1]", 2),
            Change::Append {
                kind: ListKind::keyed("name"),
                create_only: false,
            },
        )
        .unwrap();
        let seen = snapshots(&mut list);

        list.receive(at("state.macros[a1].running", 2), Change::Set(Value::Bool(true)))
            .unwrap();
        assert!(seen.lock().is_empty());

        list.set_reactive(true);
        list.receive(at("state.macros[a1].running", 2), Change::Set(Value::Bool(false)))
            .unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_set_on_missing_keyed_element_vivifies() {
        let mut list = keyed("state.macros");
        list.receive(at("state.macros[late].running", 2), Change::Set(Value::Bool(true)))
            .unwrap();
        assert_eq!(list.keys(), vec!["late"]);
        assert!(list
            .receive(at("state.macros[other].running", 2), Change::Delete)
            .is_err());
    }

    #[test]
    fn test_nested_set_before_append_is_replayed() {
        let mut list = ListNode::new(path("state.macros"));
        list.receive(at("state.macros[a1].running", 2), Change::Set(Value::Bool(true)))
            .unwrap();
        assert_eq!(list.kind(), None);
        assert_eq!(list.deferred(), 1);
        let seen = snapshots(&mut list);

        list.receive(
            at("state.macros[a1]", 2),
            Change::Append {
                kind: ListKind::keyed("name"),
                create_only: false,
            },
        )
        .unwrap();

        assert_eq!(list.deferred(), 0);
        assert_eq!(list.keys(), vec!["a1"]);
        let element = list.element("a1").unwrap();
        assert_eq!(element.concrete::<bool>("running"), Some(true));
        assert_eq!(element.concrete::<String>("name"), Some("a1".to_string()));
        assert_eq!(*seen.lock(), vec![ListSnapshot::Keyed(vec!["a1".to_string()])]);
    }

    #[test]
    fn test_deferred_positional_element_is_not_duplicated() {
        let mut list = ListNode::new(path("state.presets"));
        list.receive(at("state.presets[0].label", 2), Change::Set(Value::from("warm")))
            .unwrap();
        list.receive(
            at("state.presets[0]", 2),
            Change::Append {
                kind: ListKind::Positional,
                create_only: false,
            },
        )
        .unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(
            list.element("0").unwrap().concrete::<String>("label"),
            Some("warm".to_string())
        );
    }

    #[test]
    fn test_keys_must_survive_path_parsing() {
        let mut list = keyed("state.macros");
        let mut emitter = RecordingEmitter::default();
        for key in ["a[", "b]", ""] {
            assert!(
                matches!(list.append(Some(key), None, &mut emitter), Err(TetherError::InvalidPath { .. })),
                "{:?} should be rejected",
                key
            );
        }
        assert!(list.is_empty());
        assert!(emitter.emitted.is_empty());

        list.append(Some("macro-1"), None, &mut emitter).unwrap();
        assert_eq!(list.keys(), vec!["macro-1"]);
    }

    #[test]
    fn test_resolve_element() {
        let mut list = keyed("database.accounts");
        list.receive(
            at("database.accounts[bob]", 2),
            Change::Append {
                kind: ListKind::keyed("name"),
                create_only: false,
            },
        )
        .unwrap();

        let node = list.resolve(at("database.accounts[bob].profile", 2)).unwrap();
        let profile = node.into_object().unwrap();
        assert_eq!(profile.path().to_string(), "database.accounts[bob].profile");
        assert!(list.resolve(at("database.accounts[eve]", 2)).is_err());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Push(i64),
        Set(usize, i64),
        Delete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<i64>().prop_map(Op::Push),
            (0usize..8, any::<i64>()).prop_map(|(i, v)| Op::Set(i, v)),
            (0usize..8).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn prop_rollback_newest_first_restores(
            initial in proptest::collection::vec(any::<i64>(), 0..5),
            ops in proptest::collection::vec(op_strategy(), 1..12),
        ) {
            let mut list = ListNode::new(path("state.values"));
            let mut setup = RecordingEmitter::default();
            list.stamp(&ListKind::Primitive).unwrap();
            for value in &initial {
                list.append(None, Some(Value::from(*value)), &mut setup).unwrap();
            }
            let before = list.snapshot();

            let mut emitter = RecordingEmitter::default();
            for op in ops {
                let len = list.len();
                let _ = match op {
                    Op::Push(value) => list.append(None, Some(Value::from(value)), &mut emitter).map(|a| a.id),
                    Op::Set(index, value) => list.set(index.min(len), Value::from(value), &mut emitter),
                    Op::Delete(index) if len > 0 => list.delete(&(index % len).to_string(), &mut emitter),
                    Op::Delete(_) => continue,
                };
            }

            while let Some((_, mutation, _)) = emitter.emitted.pop() {
                let mut cursor = mutation.path.clone();
                cursor.increment().increment();
                list.receive(cursor, Change::Rollback(mutation)).unwrap();
            }
            prop_assert_eq!(list.snapshot(), before);
        }
    }
}
