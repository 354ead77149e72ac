use std::{collections::HashSet, future::Future, iter};

use futures::prelude::*;
use futures::stream::FuturesUnordered;
use tracing::{debug, instrument, warn};

use crate::{
    contact::Contact,
    dht::KademliaDht,
    messaging::{Messaging, Request, Response},
    Id,
};

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum QueryState {
    Waiting,
    Querying,
    Responded,
    Failed,
}

/// Whether a lookup is routing towards a node or chasing a value, per
/// spec.md §4.6 "mode".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LookupMode {
    Node,
    Value,
}

pub enum LookupOutcome<A> {
    /// The `k` closest responded contacts, distance-ascending.
    Contacts(Vec<Contact<A>>),
    /// A value was found; the caller still gets the contacts queried so
    /// far, matching `(contacts_so_far, Some(value))` in the spec.
    Value(Vec<Contact<A>>, Vec<u8>),
}

/// Iterative lookup, grounded in the classic Kademlia algorithm: keep a
/// `k`-wide shortlist ordered by distance to the target, query up to `α`
/// unqueried entries at a time, fold newly learned contacts in, and stop
/// once the whole shortlist has answered.
pub struct LookupEngine<'a, M: Messaging> {
    dht: &'a KademliaDht<M>,
    target: Id,
    mode: LookupMode,
}

impl<'a, M: Messaging> LookupEngine<'a, M> {
    pub fn new(dht: &'a KademliaDht<M>, target: Id, mode: LookupMode) -> Self {
        Self { dht, target, mode }
    }

    fn start_query(
        &self,
        shortlist: &mut [(QueryState, Contact<M::Address>)],
    ) -> Option<impl Future<Output = (Id, Result<Response<M::Address>, M::Error>)> + 'a> {
        let entry = shortlist.iter_mut().find(|x| x.0 == QueryState::Waiting)?;
        entry.0 = QueryState::Querying;
        let id = entry.1.id;
        let addr = entry.1.addr.clone();

        let request = match self.mode {
            LookupMode::Node => Request::FindContact { target: self.target },
            LookupMode::Value => Request::FindValue { target: self.target },
        };

        let fut = self.dht.messaging().send_request(&addr, request);
        Some(fut.map(move |res| (id, res)))
    }

    fn sort_shortlist(&self, shortlist: &mut [(QueryState, Contact<M::Address>)]) {
        shortlist.sort_by(|a, b| Id::closer(&self.target, &a.1.id, &b.1.id));
    }

    #[instrument(skip_all, fields(target = %self.target))]
    pub async fn run(&self, seed: Vec<Contact<M::Address>>) -> LookupOutcome<M::Address> {
        let bucket_size = self.dht.config().routing.bucket_size;
        let parallelism = self.dht.config().lookup.parallelism;

        let mut queried: HashSet<Id> = seed.iter().map(|c| c.id).collect();
        queried.insert(self.dht.local_id());

        // Seed a fictitious, pre-queried self contact so that a lone node
        // is always correctly judged against its own distance to the
        // target, without ever being dispatched a request.
        let self_contact = Contact::new(
            self.dht.local_id(),
            self.dht.messaging().local_address(),
            self.dht.clock_now(),
        );
        let mut shortlist: Vec<(QueryState, Contact<M::Address>)> = seed
            .into_iter()
            .map(|c| (QueryState::Waiting, c))
            .chain(iter::once((QueryState::Responded, self_contact)))
            .collect();
        self.sort_shortlist(&mut shortlist);

        let pending: FuturesUnordered<_> = (0..parallelism)
            .filter_map(|_| self.start_query(&mut shortlist))
            .collect();
        let mut available = parallelism - pending.len();
        tokio::pin!(pending);

        while let Some((id, res)) = pending.next().await {
            available += 1;

            match res {
                Err(err) => {
                    debug!(%id, %err, "lookup request failed, dropping contact");
                    if let Some(entry) = shortlist.iter_mut().find(|x| x.1.id == id) {
                        entry.0 = QueryState::Failed;
                    }
                    self.dht.routing_remove(&id);
                }
                Ok(Response::Contacts { contacts, .. }) => {
                    if let Some(entry) = shortlist.iter_mut().find(|x| x.1.id == id) {
                        entry.0 = QueryState::Responded;
                    }
                    if let Some(responder) = shortlist.iter().find(|x| x.1.id == id).map(|x| x.1.clone()) {
                        self.dht.insert_contact(responder);
                    }
                    self.merge_contacts(&mut shortlist, &mut queried, contacts);
                    self.sort_shortlist(&mut shortlist);
                    shortlist.truncate(bucket_size);
                }
                Ok(Response::FoundValue { value, contacts, .. }) => {
                    if let Some(entry) = shortlist.iter_mut().find(|x| x.1.id == id) {
                        entry.0 = QueryState::Responded;
                    }
                    if let Some(responder) = shortlist.iter().find(|x| x.1.id == id).map(|x| x.1.clone()) {
                        self.dht.insert_contact(responder);
                    }
                    if self.mode == LookupMode::Value {
                        self.merge_contacts(&mut shortlist, &mut queried, contacts);
                        if let Some(forward_to) = shortlist
                            .iter()
                            .find(|x| x.0 == QueryState::Responded && x.1.id != id)
                            .map(|x| x.1.clone())
                        {
                            self.dht.cache_forward_store(forward_to, self.target, value.clone());
                        }
                        let contacts = shortlist
                            .into_iter()
                            .filter(|x| x.0 == QueryState::Responded)
                            .map(|x| x.1)
                            .collect();
                        return LookupOutcome::Value(contacts, value);
                    } else {
                        warn!(%id, "node returned a value to a node-mode lookup");
                    }
                }
                Ok(other) => warn!(%id, ?other, "node returned an unexpected response"),
            }

            // Re-dispatch into every free slot regardless of which arm ran
            // above: a failure or unexpected reply frees a slot exactly
            // like a `Contacts` response does, and must refill it the same
            // way or the lookup can stall with unqueried entries still
            // waiting and nothing in flight to wake `pending.next()`.
            while available > 0 {
                match self.start_query(&mut shortlist) {
                    None => break,
                    Some(fut) => {
                        pending.push(fut);
                        available -= 1;
                    }
                }
            }

            if shortlist.iter().all(|x| !matches!(x.0, QueryState::Waiting | QueryState::Querying)) {
                break;
            }
        }

        // Only contacts that actually answered count as the lookup's
        // result (spec.md §4.6 step 3: "the top-k responded contacts").
        // Unreachable ones were already dropped from the routing table
        // above; they must not reappear in what the caller sees either.
        LookupOutcome::Contacts(
            shortlist
                .into_iter()
                .filter(|x| x.0 == QueryState::Responded)
                .map(|x| x.1)
                .collect(),
        )
    }

    fn merge_contacts(
        &self,
        shortlist: &mut Vec<(QueryState, Contact<M::Address>)>,
        queried: &mut HashSet<Id>,
        nodes: Vec<crate::messaging::ContactInfo<M::Address>>,
    ) {
        let now = self.dht.clock_now();
        shortlist.extend(
            nodes
                .into_iter()
                .filter(|info| info.id != self.dht.local_id() && queried.insert(info.id))
                .map(|info| (QueryState::Waiting, Contact::new(info.id, info.addr, now))),
        );
    }
}
