use std::fmt::Debug;
use std::time::Instant;

use crate::id::Id;

/// `{id, addr, last_seen}` per spec.md §3.
///
/// Two contacts are equal iff their ids are equal — an address change for
/// the same id is an *update*, not a duplicate.
#[derive(Clone, Debug)]
pub struct Contact<A> {
    pub id: Id,
    pub addr: A,
    pub last_seen: Instant,
}

impl<A> PartialEq for Contact<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<A> Eq for Contact<A> {}

impl<A: Clone + Debug> Contact<A> {
    pub fn new(id: Id, addr: A, last_seen: Instant) -> Self {
        Contact { id, addr, last_seen }
    }
}
