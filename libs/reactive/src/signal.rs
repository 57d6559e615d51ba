//! Local signals and properties
//!
//! [`Signal`] is a lifetime-scoped event source: each subscription lives until
//! the lifetime passed to [`Signal::advise`] terminates. [`Property`] adds a
//! current value on top and fires only on actual changes.

use crate::lifetime::Lifetime;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registrations<T: 'static> {
    next_id: u64,
    entries: Vec<(u64, Handler<T>)>,
}

/// Multicast event source with lifetime-bound subscriptions
pub struct Signal<T: 'static> {
    registrations: Arc<Mutex<Registrations<T>>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            registrations: Arc::new(Mutex::new(Registrations {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Subscribe `handler` until `lifetime` terminates
    ///
    /// Subscribing with a terminated lifetime does nothing.
    pub fn advise<F>(&self, lifetime: &Lifetime, handler: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let handler: Handler<T> = Arc::new(handler);
        let id = {
            let mut registrations = self.registrations.lock();
            let id = registrations.next_id;
            registrations.next_id += 1;
            id
        };

        let registrations = Arc::clone(&self.registrations);
        let weak: Weak<Mutex<Registrations<T>>> = Arc::downgrade(&self.registrations);
        lifetime.bracket(
            move || registrations.lock().entries.push((id, handler)),
            move || {
                if let Some(registrations) = weak.upgrade() {
                    let removed = {
                        let mut registrations = registrations.lock();
                        registrations
                            .entries
                            .iter()
                            .position(|(entry, _)| *entry == id)
                            .map(|position| registrations.entries.remove(position))
                    };
                    drop(removed);
                    trace!(subscription = id, "Signal subscription removed");
                }
            },
        );
    }

    /// Deliver `value` to every current subscriber, in subscription order
    pub fn fire(&self, value: &T) {
        let handlers: Vec<Handler<T>> = self
            .registrations
            .lock()
            .entries
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler(value);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.registrations.lock().entries.len()
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            registrations: Arc::clone(&self.registrations),
        }
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// Observable value
pub struct Property<T: Clone + PartialEq + 'static> {
    value: Mutex<T>,
    change: Signal<T>,
}

impl<T: Clone + PartialEq + 'static> Property<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            change: Signal::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Replace the value, notifying subscribers if it changed
    ///
    /// Returns `true` when the value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.value.lock();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.change.fire(&value);
        true
    }

    /// Call `handler` with the current value now and with every later change
    pub fn advise<F>(&self, lifetime: &Lifetime, handler: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if lifetime.is_terminated() {
            return;
        }
        handler(&self.get());
        self.change.advise(lifetime, handler);
    }

    /// Change notifications only, without the initial value
    pub fn change(&self) -> &Signal<T> {
        &self.change
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + fmt::Debug + 'static> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &self.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::LifetimeDefinition;

    #[test]
    fn test_subscription_ends_with_lifetime() {
        let signal = Signal::<i32>::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let definition = LifetimeDefinition::new();

        let sink = Arc::clone(&received);
        signal.advise(&definition.lifetime(), move |value| sink.lock().push(*value));
        signal.fire(&1);
        assert_eq!(signal.handler_count(), 1);

        definition.terminate().unwrap();
        signal.fire(&2);
        assert_eq!(*received.lock(), vec![1]);
        assert_eq!(signal.handler_count(), 0);
    }

    #[test]
    fn test_advise_on_terminated_lifetime_is_ignored() {
        let signal = Signal::<i32>::new();
        let definition = LifetimeDefinition::new();
        definition.terminate().unwrap();

        signal.advise(&definition.lifetime(), |_| panic!("must not be called"));
        signal.fire(&1);
        assert_eq!(signal.handler_count(), 0);
    }

    #[test]
    fn test_property_fires_on_change_only() {
        let property = Property::new(0);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        property.advise(&Lifetime::eternal(), move |value| sink.lock().push(*value));
        assert!(property.set(5));
        assert!(!property.set(5));
        assert!(property.set(7));

        assert_eq!(*received.lock(), vec![0, 5, 7]);
        assert_eq!(property.get(), 7);
    }

    #[test]
    fn test_handler_may_resubscribe_while_firing() {
        let signal = Signal::<i32>::new();
        let nested = signal.clone();
        let definition = LifetimeDefinition::new();
        let lifetime = definition.lifetime();

        signal.advise(&definition.lifetime(), move |_| {
            nested.advise(&lifetime, |_| {});
        });
        signal.fire(&0);
        assert_eq!(signal.handler_count(), 2);
    }
}
