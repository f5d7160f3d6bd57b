//! Field - a scalar value and its live subscriber

use std::fmt;

use tether_core::Value;

use crate::{Subscriber, UnsetHook};

/// A single scalar slot of an object node
#[derive(Default)]
pub struct Field {
    value: Option<Value>,
    subscriber: Option<Subscriber>,
    on_unset: Option<UnsetHook>,
}

impl Field {
    pub fn new() -> Self {
        Field::default()
    }

    pub fn with_value(value: Value) -> Self {
        Field {
            value: Some(value),
            subscriber: None,
            on_unset: None,
        }
    }

    /// Current value, `None` while unset
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    /// Store a new value without notifying; returns the old one
    pub fn replace(&mut self, value: Value) -> Option<Value> {
        self.value.replace(value)
    }

    /// Put back a previous value (or unset the field) without notifying
    pub fn restore(&mut self, value: Option<Value>) {
        self.value = value;
    }

    /// Unset the field, running the unset hook if a value was dropped
    pub fn clear(&mut self) {
        if self.value.take().is_some() {
            if let Some(hook) = self.on_unset.as_mut() {
                hook();
            }
        }
    }

    /// Deliver the current value to the subscriber, if both exist
    pub fn notify(&mut self) {
        if let (Some(value), Some(subscriber)) = (&self.value, self.subscriber.as_mut()) {
            subscriber(value);
        }
    }

    /// Attach a subscriber, returning the one it displaced
    pub fn subscribe(&mut self, subscriber: Subscriber) -> Option<Subscriber> {
        self.subscriber.replace(subscriber)
    }

    pub fn unsubscribe(&mut self) -> Option<Subscriber> {
        self.subscriber.take()
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.is_some()
    }

    /// Install the hook run by `clear`, returning the one it displaced
    pub fn on_unset(&mut self, hook: UnsetHook) -> Option<UnsetHook> {
        self.on_unset.replace(hook)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("value", &self.value)
            .field("subscribed", &self.subscriber.is_some())
            .field("unset_hook", &self.on_unset.is_some())
            .finish()
    }
}
