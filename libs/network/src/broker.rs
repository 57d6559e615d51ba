//! Message Broker
//!
//! Routes inbound payloads to the handler advised for their id. Every delivery
//! runs as a task on the wire's scheduler and never under the broker lock.
//!
//! Messages may arrive before the receiving entity is bound. They are buffered
//! per id, bounded by [`WireConfig::max_pending_per_id`], and replayed in
//! arrival order once a handler is advised. Deliveries that arrive while a
//! replay is running join the back of the replay queue so ordering holds even
//! when handlers run inline. The number of distinct unadvised ids buffered at
//! once is capped by [`WireConfig::max_pending_ids`].

use crate::config::WireConfig;
use bytes::Bytes;
use codec::{Buffer, RdId};
use parking_lot::Mutex;
use reactive::{Lifetime, Scheduler, SchedulerToken};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Inbound payload handler for one id
pub type WireHandler = Arc<dyn Fn(&SchedulerToken, Buffer) + Send + Sync>;

struct Subscription {
    handler: WireHandler,
    generation: u64,
}

#[derive(Default)]
struct Route {
    subscription: Option<Subscription>,
    pending: VecDeque<Bytes>,
    replaying: bool,
}

impl Route {
    fn is_idle(&self) -> bool {
        self.subscription.is_none() && self.pending.is_empty()
    }
}

#[derive(Default)]
struct State {
    routes: HashMap<RdId, Route>,
    next_generation: u64,
}

impl State {
    fn unbound_routes(&self) -> usize {
        self.routes
            .values()
            .filter(|route| route.subscription.is_none())
            .count()
    }

    fn current_handler(&self, id: RdId, generation: u64) -> Option<WireHandler> {
        match &self.routes.get(&id)?.subscription {
            Some(subscription) if subscription.generation == generation => {
                Some(Arc::clone(&subscription.handler))
            }
            _ => None,
        }
    }
}

/// Id-to-handler dispatch shared by every wire implementation
pub struct MessageBroker {
    scheduler: Arc<dyn Scheduler>,
    state: Arc<Mutex<State>>,
    max_pending_per_id: usize,
    max_pending_ids: usize,
}

impl MessageBroker {
    pub fn new(scheduler: Arc<dyn Scheduler>, config: &WireConfig) -> Self {
        Self {
            scheduler,
            state: Arc::new(Mutex::new(State::default())),
            max_pending_per_id: config.max_pending_per_id,
            max_pending_ids: config.max_pending_ids,
        }
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Route an inbound payload
    ///
    /// The delivery task re-checks the subscription under the lock, so a
    /// message queued before its handler's lifetime ends is dropped.
    pub fn dispatch(&self, id: RdId, payload: Bytes) {
        let generation = {
            let mut state = self.state.lock();
            if !state.routes.contains_key(&id) && state.unbound_routes() >= self.max_pending_ids {
                warn!(
                    %id,
                    limit = self.max_pending_ids,
                    "Too many unbound ids, dropped message"
                );
                return;
            }
            let route = state.routes.entry(id).or_default();

            match &route.subscription {
                Some(subscription) if !route.replaying => subscription.generation,
                _ => {
                    route.pending.push_back(payload);
                    if route.pending.len() > self.max_pending_per_id {
                        route.pending.pop_front();
                        warn!(
                            %id,
                            limit = self.max_pending_per_id,
                            "Pending buffer full, dropped oldest message"
                        );
                    }
                    debug!(%id, pending = route.pending.len(), "Buffered message for unbound id");
                    return;
                }
            }
        };

        trace!(%id, bytes = payload.len(), "Dispatching message");
        let state = Arc::downgrade(&self.state);
        self.scheduler
            .invoke(move |token| deliver(&state, id, generation, payload, token));
    }

    /// Deliver messages for `id` to `handler` until `lifetime` terminates
    ///
    /// Messages buffered before this call are replayed first, in order.
    /// Advising an id that already has a handler replaces it.
    pub fn advise(&self, lifetime: &Lifetime, id: RdId, handler: WireHandler) {
        let state = Arc::clone(&self.state);
        let weak = Arc::downgrade(&self.state);
        let scheduler = Arc::clone(&self.scheduler);

        let generation = {
            let mut state = self.state.lock();
            let generation = state.next_generation;
            state.next_generation += 1;
            generation
        };

        lifetime.bracket(
            move || {
                let replay = {
                    let mut state = state.lock();
                    let route = state.routes.entry(id).or_default();
                    if route.subscription.is_some() {
                        warn!(%id, "Replacing existing handler");
                    }
                    route.subscription = Some(Subscription {
                        handler,
                        generation,
                    });
                    route.replaying = !route.pending.is_empty();
                    route.replaying
                };

                if replay {
                    debug!(%id, "Replaying buffered messages");
                    let state = Arc::downgrade(&state);
                    scheduler.invoke(move |token| replay_pending(&state, id, generation, token));
                }
            },
            move || {
                if let Some(state) = weak.upgrade() {
                    unsubscribe(&state, id, generation);
                }
            },
        );
    }

    /// Whether `id` currently has a handler
    pub fn is_advised(&self, id: RdId) -> bool {
        self.state
            .lock()
            .routes
            .get(&id)
            .map_or(false, |route| route.subscription.is_some())
    }

    /// Ids with buffered messages and no handler
    pub fn unbound_count(&self) -> usize {
        self.state.lock().unbound_routes()
    }

    /// Messages buffered for `id` awaiting delivery
    pub fn pending_count(&self, id: RdId) -> usize {
        self.state
            .lock()
            .routes
            .get(&id)
            .map_or(0, |route| route.pending.len())
    }
}

fn deliver(
    state: &Weak<Mutex<State>>,
    id: RdId,
    generation: u64,
    payload: Bytes,
    token: &SchedulerToken,
) {
    let handler = match state.upgrade() {
        Some(state) => {
            let handler = state.lock().current_handler(id, generation);
            handler
        }
        None => None,
    };
    match handler {
        Some(handler) => handler(token, Buffer::from_bytes(payload)),
        None => trace!(%id, "Handler gone before delivery, dropped message"),
    }
}

fn replay_pending(state: &Weak<Mutex<State>>, id: RdId, generation: u64, token: &SchedulerToken) {
    let Some(state) = state.upgrade() else {
        return;
    };

    loop {
        let (handler, payload) = {
            let mut state = state.lock();
            let Some(route) = state.routes.get_mut(&id) else {
                return;
            };
            let handler = match &route.subscription {
                Some(subscription) if subscription.generation == generation => {
                    Arc::clone(&subscription.handler)
                }
                // Unsubscribed or replaced; the newer subscription owns the queue
                _ => return,
            };
            match route.pending.pop_front() {
                Some(payload) => (handler, payload),
                None => {
                    route.replaying = false;
                    return;
                }
            }
        };

        trace!(%id, bytes = payload.len(), "Replaying buffered message");
        handler(token, Buffer::from_bytes(payload));
    }
}

fn unsubscribe(state: &Mutex<State>, id: RdId, generation: u64) {
    let removed = {
        let mut state = state.lock();
        let Some(route) = state.routes.get_mut(&id) else {
            return;
        };
        let current = route
            .subscription
            .as_ref()
            .map_or(false, |subscription| subscription.generation == generation);
        if !current {
            return;
        }
        let removed = route.subscription.take();
        route.replaying = false;
        if route.is_idle() {
            state.routes.remove(&id);
        }
        removed
    };

    // Handler captures are released outside the lock
    drop(removed);
    trace!(%id, "Handler unsubscribed");
}

impl std::fmt::Debug for MessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBroker")
            .field("scheduler", &self.scheduler.name())
            .field("routes", &self.state.lock().routes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactive::{ImmediateScheduler, LifetimeDefinition, ManualScheduler};

    fn collecting_handler() -> (Arc<Mutex<Vec<Vec<u8>>>>, WireHandler) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: WireHandler = Arc::new(move |_token: &SchedulerToken, buffer: Buffer| {
            sink.lock().push(buffer.as_slice().to_vec());
        });
        (received, handler)
    }

    #[test]
    fn test_dispatch_to_advised_handler() {
        let broker = MessageBroker::new(Arc::new(ImmediateScheduler::default()), &WireConfig::default());
        let (received, handler) = collecting_handler();
        let definition = LifetimeDefinition::new();

        broker.advise(&definition.lifetime(), RdId::of(1), handler);
        broker.dispatch(RdId::of(1), Bytes::from_static(b"a"));
        broker.dispatch(RdId::of(2), Bytes::from_static(b"other"));

        assert_eq!(*received.lock(), vec![b"a".to_vec()]);
        assert_eq!(broker.pending_count(RdId::of(2)), 1);
    }

    #[test]
    fn test_buffered_messages_replay_in_order() {
        let broker = MessageBroker::new(Arc::new(ImmediateScheduler::default()), &WireConfig::default());
        for payload in [b"1", b"2", b"3"] {
            broker.dispatch(RdId::of(7), Bytes::from_static(payload));
        }
        assert_eq!(broker.pending_count(RdId::of(7)), 3);

        let (received, handler) = collecting_handler();
        broker.advise(&Lifetime::eternal(), RdId::of(7), handler);
        broker.dispatch(RdId::of(7), Bytes::from_static(b"4"));

        assert_eq!(
            *received.lock(),
            vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]
        );
        assert_eq!(broker.pending_count(RdId::of(7)), 0);
    }

    #[test]
    fn test_dispatch_during_replay_keeps_order() {
        let scheduler = Arc::new(ManualScheduler::new("manual"));
        let broker = MessageBroker::new(scheduler.clone(), &WireConfig::default());
        broker.dispatch(RdId::of(3), Bytes::from_static(b"early"));

        let (received, handler) = collecting_handler();
        broker.advise(&Lifetime::eternal(), RdId::of(3), handler);
        // Arrives before the replay task has run
        broker.dispatch(RdId::of(3), Bytes::from_static(b"late"));

        scheduler.pump();
        assert_eq!(*received.lock(), vec![b"early".to_vec(), b"late".to_vec()]);

        broker.dispatch(RdId::of(3), Bytes::from_static(b"direct"));
        scheduler.pump();
        assert_eq!(received.lock().len(), 3);
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let config = WireConfig {
            max_pending_per_id: 2,
            ..WireConfig::default()
        };
        let broker = MessageBroker::new(Arc::new(ImmediateScheduler::default()), &config);
        for payload in [b"a", b"b", b"c"] {
            broker.dispatch(RdId::of(9), Bytes::from_static(payload));
        }

        let (received, handler) = collecting_handler();
        broker.advise(&Lifetime::eternal(), RdId::of(9), handler);
        assert_eq!(*received.lock(), vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_handler_removed_with_lifetime() {
        let broker = MessageBroker::new(Arc::new(ImmediateScheduler::default()), &WireConfig::default());
        let (received, handler) = collecting_handler();
        let definition = LifetimeDefinition::new();

        broker.advise(&definition.lifetime(), RdId::of(4), handler);
        assert!(broker.is_advised(RdId::of(4)));
        definition.terminate().unwrap();
        assert!(!broker.is_advised(RdId::of(4)));

        broker.dispatch(RdId::of(4), Bytes::from_static(b"after"));
        assert!(received.lock().is_empty());
        assert_eq!(broker.pending_count(RdId::of(4)), 1);
    }

    #[test]
    fn test_terminated_lifetime_never_advises() {
        let broker = MessageBroker::new(Arc::new(ImmediateScheduler::default()), &WireConfig::default());
        let (_received, handler) = collecting_handler();
        let definition = LifetimeDefinition::new();
        definition.terminate().unwrap();

        broker.advise(&definition.lifetime(), RdId::of(5), handler);
        assert!(!broker.is_advised(RdId::of(5)));
    }

    #[test]
    fn test_queued_delivery_dropped_after_unsubscribe() {
        let scheduler = Arc::new(ManualScheduler::new("manual"));
        let broker = MessageBroker::new(scheduler.clone(), &WireConfig::default());
        let (received, handler) = collecting_handler();
        let definition = LifetimeDefinition::new();

        broker.advise(&definition.lifetime(), RdId::of(1), handler);
        broker.dispatch(RdId::of(1), Bytes::from_static(b"queued"));
        definition.terminate().unwrap();

        scheduler.pump();
        assert!(received.lock().is_empty());
        assert!(!broker.is_advised(RdId::of(1)));
    }

    #[test]
    fn test_queued_delivery_dropped_after_replacement() {
        let scheduler = Arc::new(ManualScheduler::new("manual"));
        let broker = MessageBroker::new(scheduler.clone(), &WireConfig::default());
        let (first, first_handler) = collecting_handler();
        let (second, second_handler) = collecting_handler();

        broker.advise(&Lifetime::eternal(), RdId::of(2), first_handler);
        broker.dispatch(RdId::of(2), Bytes::from_static(b"old"));
        broker.advise(&Lifetime::eternal(), RdId::of(2), second_handler);
        broker.dispatch(RdId::of(2), Bytes::from_static(b"new"));

        scheduler.pump();
        assert!(first.lock().is_empty());
        assert_eq!(*second.lock(), vec![b"new".to_vec()]);
    }

    #[test]
    fn test_unbound_ids_are_bounded() {
        let config = WireConfig {
            max_pending_ids: 16,
            ..WireConfig::default()
        };
        let broker = MessageBroker::new(Arc::new(ImmediateScheduler::default()), &config);
        for id in 0..10_000 {
            broker.dispatch(RdId::of(id), Bytes::from_static(b"x"));
        }

        assert_eq!(broker.unbound_count(), 16);
        assert_eq!(broker.pending_count(RdId::of(15)), 1);
        assert_eq!(broker.pending_count(RdId::of(16)), 0);

        // Known ids keep buffering and bound ids keep receiving
        broker.dispatch(RdId::of(3), Bytes::from_static(b"y"));
        assert_eq!(broker.pending_count(RdId::of(3)), 2);

        let (received, handler) = collecting_handler();
        broker.advise(&Lifetime::eternal(), RdId::of(3), handler);
        assert_eq!(received.lock().len(), 2);
        assert_eq!(broker.unbound_count(), 15);
    }
}
