use std::time::Instant;

use crate::{
    config::RoutingConfig,
    consts::ID_LEN_BITS,
    contact::Contact,
    id::Id,
    kbucket::{InsertOutcome, KBucket, ResolveOutcome},
};

/// What a routing-table insert did, naming which bucket it happened in so
/// a deferred probe can be resolved against the right one later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingOutcome {
    Refreshed,
    Inserted,
    Queued,
    /// The target bucket is full: probe its current tail (`bucket_index`)
    /// asynchronously and report the result through `resolve_probe`.
    ProbeNeeded { bucket_index: usize },
}

/// A node's view of the network: one bucket per common-prefix length with
/// the local id, holding up to `bucket_size` contacts each.
pub struct RoutingTable<A> {
    local_id: Id,
    bucket_size: usize,
    buckets: [KBucket<A>; ID_LEN_BITS],
}

impl<A: Clone> RoutingTable<A> {
    pub fn new(local_id: Id, config: &RoutingConfig) -> Self {
        RoutingTable {
            local_id,
            bucket_size: config.bucket_size,
            buckets: std::array::from_fn(|_| KBucket::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts().len()).sum()
    }

    /// Which bucket holds contacts at this prefix length from `local_id`.
    fn bucket_index(&self, id: &Id) -> usize {
        (self.local_id.index(id)).min(ID_LEN_BITS - 1)
    }

    /// Applies the non-blocking half of the spec.md §4.2 insert policy.
    /// Returns `None` for the local id itself (never routed to). Never
    /// probes anything itself: a `ProbeNeeded` outcome means the caller
    /// must probe that bucket's `tail_of` and call `resolve_probe`.
    pub fn insert(&mut self, candidate: Contact<A>) -> Option<RoutingOutcome> {
        if candidate.id == self.local_id {
            return None;
        }
        let index = self.bucket_index(&candidate.id);
        Some(match self.buckets[index].insert(candidate, self.bucket_size) {
            InsertOutcome::Refreshed => RoutingOutcome::Refreshed,
            InsertOutcome::Inserted => RoutingOutcome::Inserted,
            InsertOutcome::Queued => RoutingOutcome::Queued,
            InsertOutcome::ProbeNeeded => RoutingOutcome::ProbeNeeded { bucket_index: index },
        })
    }

    /// The contact a `ProbeNeeded { bucket_index }` outcome wants probed.
    pub fn tail_of(&self, bucket_index: usize) -> Option<Contact<A>> {
        self.buckets[bucket_index].tail().cloned()
    }

    /// Reports the result of probing `tail_id`, the tail of `bucket_index`
    /// at the time `ProbeNeeded` was returned.
    pub fn resolve_probe(&mut self, bucket_index: usize, tail_id: &Id, responded: bool, now: Instant) -> Option<ResolveOutcome> {
        self.buckets[bucket_index].resolve_probe(tail_id, responded, now)
    }

    pub fn remove(&mut self, id: &Id) -> bool {
        let index = self.bucket_index(id);
        self.buckets[index].remove(id)
    }

    pub fn refresh(&mut self, id: &Id, now: Instant) -> bool {
        let index = self.bucket_index(id);
        self.buckets[index].refresh(id, now)
    }

    /// The `size` contacts closest to `target`, across all buckets.
    pub fn k_closest(&self, target: &Id, size: usize) -> Vec<Contact<A>> {
        let mut all: Vec<Contact<A>> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts().iter().cloned())
            .collect();
        all.sort_unstable_by(|a, b| Id::closer(target, &a.id, &b.id));
        all.truncate(size);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(hex: &str, now: Instant) -> Contact<u32> {
        Contact::new(Id::from_hex(hex), 0, now)
    }

    #[test]
    fn insert_rejects_local_id() {
        let now = Instant::now();
        let id = Id::from_hex("a0000000");
        let config = RoutingConfig { bucket_size: 2 };
        let mut table: RoutingTable<u32> = RoutingTable::new(id, &config);
        assert_eq!(table.insert(contact("a0000000", now)), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn insert_grows_size_until_bucket_full() {
        let now = Instant::now();
        let id = Id::from_hex("a0000000");
        let config = RoutingConfig { bucket_size: 2 };
        let mut table: RoutingTable<u32> = RoutingTable::new(id, &config);
        assert_eq!(table.insert(contact("b0000001", now)), Some(RoutingOutcome::Inserted));
        assert_eq!(table.insert(contact("b0000010", now)), Some(RoutingOutcome::Inserted));
        assert_eq!(table.len(), 2);

        // Bucket full: insert requests a probe rather than deciding inline.
        let outcome = table.insert(contact("b0000011", now));
        let Some(RoutingOutcome::ProbeNeeded { bucket_index }) = outcome else {
            panic!("expected ProbeNeeded, got {outcome:?}");
        };
        assert_eq!(table.len(), 2);

        let tail = table.tail_of(bucket_index).unwrap();
        table.resolve_probe(bucket_index, &tail.id, false, now);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn k_closest_orders_by_xor_distance() {
        let now = Instant::now();
        let id = Id::from_hex("a0000000");
        let config = RoutingConfig { bucket_size: 20 };
        let mut table: RoutingTable<u32> = RoutingTable::new(id, &config);
        table.insert(contact("b0000000", now));
        table.insert(contact("b0001000", now));
        table.insert(contact("a0001000", now));
        table.insert(contact("a0000001", now));

        let target = Id::from_hex("b0001001");
        let closest = table.k_closest(&target, 3);
        let ids: Vec<_> = closest.iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            vec![
                Id::from_hex("b0001000"),
                Id::from_hex("b0000000"),
                Id::from_hex("a0001000"),
            ]
        );
    }
}
