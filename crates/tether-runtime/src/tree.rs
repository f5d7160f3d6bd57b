//! The set of named roots and whole-path navigation

use std::collections::HashMap;

use tether_core::{PathAddress, Segment, TetherError, TetherResult, Value};
use tether_state::{Change, ListNode, Node, NodeMut, ObjectNode};

/// Root objects of the mirror, one per configured root name
#[derive(Debug)]
pub struct Tree {
    roots: HashMap<String, ObjectNode>,
}

enum NodeRef<'a> {
    Object(&'a ObjectNode),
    List(&'a ListNode),
}

impl Tree {
    pub fn new(names: &[String]) -> TetherResult<Self> {
        let mut roots = HashMap::with_capacity(names.len());
        for name in names {
            roots.insert(name.clone(), ObjectNode::new(PathAddress::parse(name)?));
        }
        Ok(Tree { roots })
    }

    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    pub fn root(&mut self, name: &str) -> TetherResult<&mut ObjectNode> {
        self.roots
            .get_mut(name)
            .ok_or_else(|| TetherError::UnknownRoot(name.to_string()))
    }

    /// Route a change to the node its path addresses
    pub fn dispatch(&mut self, mut path: PathAddress, change: Change) -> TetherResult<()> {
        path.reset();
        if path.len() < 2 {
            return Err(TetherError::type_mismatch(&path, "a root cannot be the target of a change"));
        }
        let root = self.root(path.root())?;
        path.increment();
        root.receive(path, change)
    }

    /// Navigate to any node, creating intermediate objects and lists
    pub fn resolve(&mut self, path: &PathAddress) -> TetherResult<NodeMut<'_>> {
        let mut path = path.clone();
        path.reset();
        let root = self.root(path.root())?;
        path.increment();
        root.resolve(path)
    }

    pub fn object(&mut self, path: &PathAddress) -> TetherResult<&mut ObjectNode> {
        match self.resolve(path)? {
            NodeMut::Object(object) => Ok(object),
            NodeMut::List(_) => Err(TetherError::type_mismatch(path, "is a list, not an object")),
        }
    }

    pub fn list(&mut self, path: &PathAddress) -> TetherResult<&mut ListNode> {
        if path.len() < 2 {
            return Err(TetherError::type_mismatch(path, "a root is always an object"));
        }
        // Resolving a bare trailing segment would create an object there
        let parent = path.parent().ok_or_else(|| TetherError::PathNotFound(path.to_string()))?;
        let name = path.last();
        if name.is_bracketed() {
            return match self.resolve(path)? {
                NodeMut::List(list) => Ok(list),
                NodeMut::Object(_) => Err(TetherError::type_mismatch(path, "is an object, not a list")),
            };
        }
        self.object(&parent)?.list(name.name())
    }

    /// Owner object of the field `path` ends in
    pub fn field_owner(&mut self, path: &PathAddress) -> TetherResult<&mut ObjectNode> {
        if path.last().is_bracketed() {
            return Err(TetherError::type_mismatch(path, "does not name a field"));
        }
        let parent = path
            .parent()
            .ok_or_else(|| TetherError::type_mismatch(path, "a root is not a field"))?;
        self.object(&parent)
    }

    /// Non-creating lookup of an object
    pub fn lookup_object(&self, path: &PathAddress) -> Option<&ObjectNode> {
        match self.lookup(path.segments())? {
            NodeRef::Object(object) => Some(object),
            NodeRef::List(_) => None,
        }
    }

    /// Non-creating read of a field or primitive list element
    pub fn get(&self, path: &PathAddress) -> Option<&Value> {
        let (last, parent) = path.segments().split_last()?;
        match self.lookup(parent)? {
            NodeRef::Object(object) if !last.is_bracketed() => object.get(last.name()),
            NodeRef::List(list) => list.get(last.name().parse().ok()?),
            NodeRef::Object(_) => None,
        }
    }

    fn lookup(&self, segments: &[Segment]) -> Option<NodeRef<'_>> {
        let (first, rest) = segments.split_first()?;
        let mut node = NodeRef::Object(self.roots.get(first.name())?);
        for segment in rest {
            node = match node {
                NodeRef::Object(object) => match object.child(segment.name())? {
                    Node::Object(child) => NodeRef::Object(child),
                    Node::List(child) => NodeRef::List(child),
                },
                NodeRef::List(list) => NodeRef::Object(list.get_element(segment.name())?),
            };
        }
        Some(node)
    }

    /// Re-deliver current values under `path`
    pub fn flush(&mut self, path: &PathAddress) -> TetherResult<()> {
        match self.resolve(path)? {
            NodeMut::Object(object) => object.flush(),
            NodeMut::List(list) => list.flush(),
        }
        Ok(())
    }

    pub fn flush_all(&mut self) {
        for root in self.roots.values_mut() {
            root.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::ListKind;

    fn tree() -> Tree {
        Tree::new(&["settings".to_string(), "state".to_string()]).unwrap()
    }

    fn path(text: &str) -> PathAddress {
        PathAddress::parse(text).unwrap()
    }

    #[test]
    fn test_dispatch_and_get() {
        let mut tree = tree();
        tree.dispatch(path("settings.game.speed"), Change::Set(Value::from(3i64)))
            .unwrap();
        assert_eq!(tree.get(&path("settings.game.speed")), Some(&Value::Number(3.0)));
        assert_eq!(tree.get(&path("settings.game.other")), None);
        assert_eq!(tree.get(&path("settings.nothing.here")), None);
    }

    #[test]
    fn test_unknown_root_and_root_target() {
        let mut tree = tree();
        assert_eq!(
            tree.dispatch(path("database.x"), Change::Set(Value::Bool(true))),
            Err(TetherError::UnknownRoot("database".to_string()))
        );
        assert!(tree
            .dispatch(path("state"), Change::Set(Value::Bool(true)))
            .is_err());
    }

    #[test]
    fn test_list_lookup_through_elements() {
        let mut tree = tree();
        tree.dispatch(
            path("state.macros[m1]"),
            Change::Append {
                kind: ListKind::keyed("name"),
                create_only: false,
            },
        )
        .unwrap();
        tree.dispatch(path("state.macros[m1].running"), Change::Set(Value::Bool(true)))
            .unwrap();

        assert_eq!(tree.get(&path("state.macros[m1].running")), Some(&Value::Bool(true)));
        assert_eq!(tree.get(&path("state.macros[m1].name")), Some(&Value::from("m1")));
        assert!(tree.lookup_object(&path("state.macros[m1]")).is_some());
        assert!(tree.lookup_object(&path("state.macros[m2]")).is_none());

        let list = tree.list(&path("state.macros")).unwrap();
        assert_eq!(list.len(), 1);
        assert!(tree.object(&path("state.macros")).is_err());
    }

    #[test]
    fn test_primitive_element_read() {
        let mut tree = tree();
        tree.dispatch(path("state.tags[0]"), Change::Set(Value::from("a")))
            .unwrap();
        assert_eq!(tree.get(&path("state.tags[0]")), Some(&Value::from("a")));
        assert_eq!(tree.get(&path("state.tags[1]")), None);
    }
}
