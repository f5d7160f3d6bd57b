//! Bound views - subscribers that follow a selected subtree
//!
//! A view watches one selector field (for instance the active account name)
//! and renders a target path from its value. Subscribers bound to the view
//! are attached to fields under the current target; when the selector
//! changes they are moved to the new target, which is then flushed so they
//! see its current values immediately.
//!
//! Bound subscribers stay owned by the view. The tree only holds forwarding
//! closures, so removing a target element never loses a subscriber.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tether_core::{IntoPath, PathAddress, TetherError, TetherResult, Value};
use tether_state::{Field, Subscriber};

use crate::Tree;

/// Placeholder replaced by the selector value in a target template
pub const SELECTOR_PLACEHOLDER: &str = "{}";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewId(usize);

/// Source field plus the template its value is rendered into
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    source: PathAddress,
    target_template: String,
}

impl Selector {
    /// `target_template` must contain `{}` and render to a valid path
    pub fn new(source: impl IntoPath, target_template: impl Into<String>) -> TetherResult<Self> {
        let source = source.into_path()?;
        let target_template = target_template.into();
        if !target_template.contains(SELECTOR_PLACEHOLDER) {
            return Err(TetherError::invalid_path(
                target_template.as_str(),
                "target template has no {} placeholder",
            ));
        }
        PathAddress::parse(&target_template.replace(SELECTOR_PLACEHOLDER, "x"))?;
        Ok(Selector { source, target_template })
    }

    pub fn source(&self) -> &PathAddress {
        &self.source
    }

    pub fn target_template(&self) -> &str {
        &self.target_template
    }

    pub fn target_for(&self, value: &Value) -> TetherResult<PathAddress> {
        PathAddress::parse(&self.target_template.replace(SELECTOR_PLACEHOLDER, &value.to_string()))
    }
}

type SharedSubscriber = Arc<Mutex<Subscriber>>;

struct Binding {
    relative: PathAddress,
    default: Value,
    subscriber: SharedSubscriber,
}

impl Binding {
    fn forwarder(&self) -> Subscriber {
        let shared = self.subscriber.clone();
        Box::new(move |value: &Value| {
            let mut subscriber = shared.lock();
            (*subscriber)(value)
        })
    }

    fn is_attached(&self, tree: &Tree, target: &PathAddress) -> bool {
        let full = target.join(&self.relative);
        full.parent()
            .and_then(|owner| tree.lookup_object(&owner))
            .and_then(|owner| owner.field(full.last().name()))
            .map_or(false, Field::has_subscriber)
    }

    /// Attach a forwarder under `target`, seeding the default; returns the
    /// field's current value
    fn attach(&self, tree: &mut Tree, target: &PathAddress) -> TetherResult<Value> {
        let full = target.join(&self.relative);
        let owner = tree.field_owner(&full)?;
        Ok(owner.value(full.last().name(), self.default.clone(), self.forwarder()))
    }

    fn detach(&self, tree: &mut Tree, target: &PathAddress) {
        let full = target.join(&self.relative);
        if let Ok(owner) = tree.field_owner(&full) {
            owner.unsubscribe(full.last().name());
        }
    }
}

struct BoundView {
    selector: Selector,
    target: Option<PathAddress>,
    bindings: Vec<Binding>,
}

impl BoundView {
    fn select(&self, tree: &Tree) -> Option<PathAddress> {
        let value = tree.get(&self.selector.source)?;
        match self.selector.target_for(value) {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(source = %self.selector.source, error = %e, "selector value does not render a path");
                None
            }
        }
    }

    /// Attach every binding not yet attached under the current target;
    /// returns whether anything was attached
    fn attach_missing(&self, tree: &mut Tree) -> bool {
        let target = match &self.target {
            Some(target) => target,
            None => return false,
        };
        let mut attached = false;
        for binding in &self.bindings {
            if binding.is_attached(tree, target) {
                continue;
            }
            match binding.attach(tree, target) {
                Ok(_) => attached = true,
                Err(e) => debug!(target = %target, field = %binding.relative, error = %e, "bound field not reachable yet"),
            }
        }
        attached
    }

    fn detach_all(&self, tree: &mut Tree) {
        if let Some(target) = &self.target {
            for binding in &self.bindings {
                binding.detach(tree, target);
            }
        }
    }

    /// Follow the selector; returns whether the target changed
    fn refresh(&mut self, tree: &mut Tree) -> bool {
        let selected = self.select(tree);
        if selected == self.target {
            if self.attach_missing(tree) {
                flush_target(tree, self.target.as_ref());
            }
            return false;
        }

        self.detach_all(tree);
        info!(
            source = %self.selector.source,
            from = ?self.target.as_ref().map(ToString::to_string),
            to = ?selected.as_ref().map(ToString::to_string),
            "retargeting bound view"
        );
        self.target = selected;
        self.attach_missing(tree);
        flush_target(tree, self.target.as_ref());
        true
    }
}

fn flush_target(tree: &mut Tree, target: Option<&PathAddress>) {
    if let Some(target) = target {
        if let Err(e) = tree.flush(target) {
            debug!(target = %target, error = %e, "bound target not reachable yet");
        }
    }
}

/// All bound views of a runtime
#[derive(Default)]
pub struct Views {
    views: Vec<Option<BoundView>>,
}

impl Views {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tree: &mut Tree, selector: Selector) -> ViewId {
        let mut view = BoundView {
            selector,
            target: None,
            bindings: Vec::new(),
        };
        view.refresh(tree);
        self.views.push(Some(view));
        ViewId(self.views.len() - 1)
    }

    /// Drop a view and detach everything bound to it
    pub fn remove(&mut self, tree: &mut Tree, id: ViewId) -> TetherResult<()> {
        let view = self
            .views
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| unknown_view(id))?;
        view.detach_all(tree);
        Ok(())
    }

    pub fn target(&self, id: ViewId) -> Option<&PathAddress> {
        self.get(id).ok()?.target.as_ref()
    }

    /// Bind a subscriber to `relative` under the view's target
    ///
    /// Returns the current value at the target, or `default` while the
    /// target is unset or not reachable.
    pub fn bind_value(
        &mut self,
        tree: &mut Tree,
        id: ViewId,
        relative: PathAddress,
        default: Value,
        subscriber: Subscriber,
    ) -> TetherResult<Value> {
        let view = self.get_mut(id)?;
        if view.bindings.iter().any(|binding| binding.relative == relative) {
            return Err(TetherError::DuplicateKey {
                path: view.selector.target_template.clone(),
                key: relative.to_string(),
            });
        }
        let binding = Binding {
            relative,
            default: default.clone(),
            subscriber: Arc::new(Mutex::new(subscriber)),
        };
        let value = match &view.target {
            Some(target) => binding.attach(tree, target).unwrap_or(default),
            None => default,
        };
        view.bindings.push(binding);
        Ok(value)
    }

    pub fn unbind_value(&mut self, tree: &mut Tree, id: ViewId, relative: &PathAddress) -> TetherResult<()> {
        let view = self.get_mut(id)?;
        let index = view
            .bindings
            .iter()
            .position(|binding| &binding.relative == relative)
            .ok_or_else(|| TetherError::PathNotFound(relative.to_string()))?;
        let binding = view.bindings.remove(index);
        if let Some(target) = &view.target {
            binding.detach(tree, target);
        }
        Ok(())
    }

    /// Re-evaluate every selector; returns how many views were retargeted
    pub fn refresh(&mut self, tree: &mut Tree) -> usize {
        self.views
            .iter_mut()
            .flatten()
            .map(|view| view.refresh(tree))
            .filter(|retargeted| *retargeted)
            .count()
    }

    pub fn len(&self) -> usize {
        self.views.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, id: ViewId) -> TetherResult<&BoundView> {
        self.views
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| unknown_view(id))
    }

    fn get_mut(&mut self, id: ViewId) -> TetherResult<&mut BoundView> {
        self.views
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| unknown_view(id))
    }
}

fn unknown_view(id: ViewId) -> TetherError {
    TetherError::PathNotFound(format!("bound view #{}", id.0))
}
