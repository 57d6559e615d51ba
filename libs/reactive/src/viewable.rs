//! Viewable change vocabulary
//!
//! The closed set of change kinds emitted by observable collections. Codes are
//! stable because they travel on the wire.

use std::fmt;

/// Change kind for keyed collections
///
/// `Ack` never carries a value: it confirms a provisional change made by the
/// master side of an acknowledged container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    Add = 0,
    Update = 1,
    Remove = 2,
    Ack = 3,
}

impl Op {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Op::Add),
            1 => Some(Op::Update),
            2 => Some(Op::Remove),
            3 => Some(Op::Ack),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Add => "Add",
            Op::Update => "Update",
            Op::Remove => "Remove",
            Op::Ack => "Ack",
        }
    }

    /// Whether a change of this kind carries a value on the wire
    pub fn carries_value(self) -> bool {
        matches!(self, Op::Add | Op::Update)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Change kind for sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddRemove {
    Add = 0,
    Remove = 1,
}

impl AddRemove {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AddRemove::Add),
            1 => Some(AddRemove::Remove),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AddRemove::Add => "Add",
            AddRemove::Remove => "Remove",
        }
    }
}

impl fmt::Display for AddRemove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Change to a keyed collection as seen by subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent<K, V> {
    Add { key: K, value: V },
    Update { key: K, old: V, new: V },
    Remove { key: K, old: V },
}

impl<K, V> MapEvent<K, V> {
    pub fn key(&self) -> &K {
        match self {
            MapEvent::Add { key, .. } | MapEvent::Update { key, .. } | MapEvent::Remove { key, .. } => key,
        }
    }

    pub fn op(&self) -> Op {
        match self {
            MapEvent::Add { .. } => Op::Add,
            MapEvent::Update { .. } => Op::Update,
            MapEvent::Remove { .. } => Op::Remove,
        }
    }

    /// Value after the change, if the entry still exists
    pub fn new_value(&self) -> Option<&V> {
        match self {
            MapEvent::Add { value, .. } => Some(value),
            MapEvent::Update { new, .. } => Some(new),
            MapEvent::Remove { .. } => None,
        }
    }
}

/// Change to a set as seen by subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEvent<T> {
    pub kind: AddRemove,
    pub value: T,
}

impl<T> SetEvent<T> {
    pub fn added(value: T) -> Self {
        Self {
            kind: AddRemove::Add,
            value,
        }
    }

    pub fn removed(value: T) -> Self {
        Self {
            kind: AddRemove::Remove,
            value,
        }
    }
}
