use std::time::Instant;

use crate::{contact::Contact, id::Id};

/// Up to `k` contacts, ordered most-recently-seen first (head = most
/// recent). Bucket identity (which common-prefix length it holds) is the
/// routing table's concern, not the bucket's.
#[derive(Debug)]
pub struct KBucket<A> {
    entries: Vec<Contact<A>>,
    /// Set while a liveness probe for the current tail is outstanding; the
    /// freshest candidate seen meanwhile waits here to take its place if
    /// the probe fails. Per spec.md §9's replacement-cache note: the probe
    /// itself is never run by `insert` — the caller dispatches it
    /// asynchronously and reports the result back through `resolve_probe`,
    /// so a full bucket never blocks whichever task discovered the
    /// candidate (notably the transport's inbound receive loop).
    replacement: Option<Contact<A>>,
    probing: bool,
}

impl<A> Default for KBucket<A> {
    fn default() -> Self {
        KBucket { entries: Vec::new(), replacement: None, probing: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The contact was already present; its address/last_seen was refreshed.
    Refreshed,
    /// The bucket had room; the contact was added.
    Inserted,
    /// The bucket is full and already has a tail probe in flight; the
    /// candidate was stashed as the replacement to use if that probe fails.
    Queued,
    /// The bucket is full and no probe is in flight yet: the caller must
    /// probe the tail asynchronously and report back via `resolve_probe`.
    ProbeNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The tail responded: it was kept (refreshed to head) and whatever
    /// candidate was queued as its replacement was discarded.
    DiscardedCandidate,
    /// The tail did not respond: it was evicted and the queued replacement
    /// (if any) took its place at the head.
    EvictedStale,
}

impl<A: Clone> KBucket<A> {
    pub fn contacts(&self) -> &[Contact<A>] {
        &self.entries
    }

    fn position(&self, id: &Id) -> Option<usize> {
        self.entries.iter().position(|c| &c.id == id)
    }

    /// Brings an already-present contact to the head, refreshing `last_seen`.
    pub fn refresh(&mut self, id: &Id, now: Instant) -> bool {
        match self.position(id) {
            Some(index) => {
                let mut c = self.entries.remove(index);
                c.last_seen = now;
                self.entries.insert(0, c);
                true
            }
            None => false,
        }
    }

    /// Applies the non-blocking half of the spec.md §4.2 insert policy for
    /// a bucket already known to be the right one for `candidate.id`. Never
    /// probes anything itself; on `ProbeNeeded` the caller must probe
    /// `tail()` and call `resolve_probe` with the outcome.
    pub fn insert(&mut self, candidate: Contact<A>, k: usize) -> InsertOutcome {
        if let Some(index) = self.position(&candidate.id) {
            let mut c = self.entries.remove(index);
            c.addr = candidate.addr;
            c.last_seen = candidate.last_seen;
            self.entries.insert(0, c);
            return InsertOutcome::Refreshed;
        }

        if self.entries.len() < k {
            self.entries.insert(0, candidate);
            return InsertOutcome::Inserted;
        }

        if self.probing {
            self.replacement = Some(candidate);
            return InsertOutcome::Queued;
        }

        self.probing = true;
        self.replacement = Some(candidate);
        InsertOutcome::ProbeNeeded
    }

    /// The contact a `ProbeNeeded` outcome wants probed: the bucket's
    /// current tail, i.e. its least-recently-seen entry.
    pub fn tail(&self) -> Option<&Contact<A>> {
        self.entries.last()
    }

    /// Reports the result of probing `tail_id`, applying spec.md §4.2 step
    /// 4. A no-op if no probe is outstanding for `tail_id` (e.g. it was
    /// concurrently removed).
    pub fn resolve_probe(&mut self, tail_id: &Id, responded: bool, now: Instant) -> Option<ResolveOutcome> {
        if !self.probing {
            return None;
        }
        self.probing = false;
        let candidate = self.replacement.take();
        let tail_index = self.position(tail_id)?;

        if responded {
            let mut tail = self.entries.remove(tail_index);
            tail.last_seen = now;
            self.entries.insert(0, tail);
            Some(ResolveOutcome::DiscardedCandidate)
        } else {
            self.entries.remove(tail_index);
            if let Some(candidate) = candidate {
                self.entries.insert(0, candidate);
            }
            Some(ResolveOutcome::EvictedStale)
        }
    }

    pub fn remove(&mut self, id: &Id) -> bool {
        match self.position(id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }
}
