//! Entity Identities
//!
//! [`RdId`] addresses an entity on the wire. Statically declared entities derive
//! their id from a name so both peers agree without negotiation. Dynamically
//! created entities draw ids from [`Identities`], where client and server use
//! disjoint parities so their allocations never collide.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

const HASH_SEED: i64 = 19;
const HASH_FACTOR: i64 = 31;

/// Stable string hash shared by ids and discriminators
pub(crate) fn stable_hash(seed: i64, text: &str) -> i64 {
    text.chars().fold(seed, |acc, c| {
        acc.wrapping_mul(HASH_FACTOR).wrapping_add(c as i64)
    })
}

/// Wire identity of a synchronized entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RdId(i64);

impl RdId {
    /// Reserved id that never addresses an entity
    pub const NULL: RdId = RdId(0);

    pub const fn of(value: i64) -> Self {
        RdId(value)
    }

    /// Id derived from a static name, identical on every peer
    pub fn mix(name: &str) -> Self {
        RdId(stable_hash(HASH_SEED, name))
    }

    /// Child id derived from this id and a name
    pub fn mix_str(self, tail: &str) -> Self {
        RdId(stable_hash(self.0, tail))
    }

    /// Child id derived from this id and a number
    pub fn mix_id(self, tail: i64) -> Self {
        RdId(self.0.wrapping_mul(HASH_FACTOR).wrapping_add(tail.wrapping_add(1)))
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RdId> for i64 {
    fn from(id: RdId) -> Self {
        id.0
    }
}

/// Which side of a connection allocates ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// Odd ids
    #[default]
    Client,
    /// Even ids
    Server,
}

impl IdKind {
    fn first(self) -> i64 {
        match self {
            IdKind::Client => 1,
            IdKind::Server => 2,
        }
    }
}

/// Lock-free monotonic id allocator
#[derive(Debug)]
pub struct Identities {
    kind: IdKind,
    next: AtomicI64,
}

impl Identities {
    const STEP: i64 = 2;

    pub fn new(kind: IdKind) -> Self {
        Self {
            kind,
            next: AtomicI64::new(kind.first()),
        }
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// Allocate a fresh id; never repeats within this allocator
    pub fn next(&self) -> RdId {
        RdId(self.next.fetch_add(Self::STEP, Ordering::Relaxed))
    }

    /// Allocate a fresh id scoped under `parent`
    ///
    /// Mixed ids are stable for a given parent and counter value but do not
    /// keep the allocator's parity.
    pub fn next_after(&self, parent: RdId) -> RdId {
        parent.mix_id(self.next().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_static_ids_are_stable() {
        assert_eq!(RdId::mix("root"), RdId::mix("root"));
        assert_ne!(RdId::mix("root"), RdId::mix("roots"));
        // 19 * 31 + 'a'
        assert_eq!(RdId::mix("a").value(), 19 * 31 + 97);
        assert_eq!(RdId::mix("").value(), 19);
        assert!(RdId::NULL.is_null());
    }

    #[test]
    fn test_client_and_server_never_collide() {
        let client = Identities::new(IdKind::Client);
        let server = Identities::new(IdKind::Server);

        let client_ids: HashSet<_> = (0..1000).map(|_| client.next()).collect();
        let server_ids: HashSet<_> = (0..1000).map(|_| server.next()).collect();

        assert!(client_ids.iter().all(|id| id.value() % 2 == 1));
        assert!(server_ids.iter().all(|id| id.value() % 2 == 0));
        assert!(client_ids.is_disjoint(&server_ids));
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let identities = Arc::new(Identities::new(IdKind::Server));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let identities = Arc::clone(&identities);
                thread::spawn(move || (0..1000).map(|_| identities.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(all.len(), 8000);
    }

    #[test]
    fn test_sequential_ids_increase() {
        let identities = Identities::new(IdKind::Client);
        let first = identities.next();
        let second = identities.next();
        assert!(second > first);
        assert_ne!(identities.next_after(first), identities.next_after(first));
    }
}
