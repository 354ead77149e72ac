use std::{
    sync::{Arc, Mutex, Weak},
    time::Instant,
};

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, instrument, warn};

use crate::{
    clock::Clock,
    config::SystemConfig,
    contact::Contact,
    error::DhtError,
    id::Id,
    messaging::{ContactInfo, Messaging, Request, Response},
    rng::RandomSource,
    routing_table::{RoutingOutcome, RoutingTable},
    search::{LookupEngine, LookupMode, LookupOutcome},
    storage::ValueStore,
};

/// The Kademlia orchestrator: owns the routing table and value store, and
/// wires requests from `Messaging` to them. Generic over `Messaging` so
/// the hot send path is monomorphized; `ValueStore`/`Clock`/`RandomSource`
/// are trait objects since nothing on those paths needs to be zero-cost.
pub struct KademliaDht<M: Messaging> {
    config: SystemConfig,
    local_id: Id,
    messaging: M,
    routing: Mutex<RoutingTable<M::Address>>,
    store: Arc<dyn ValueStore>,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
    /// Lets `insert_contact` spawn a self-referencing task (the deferred
    /// tail probe) without an ownership cycle: the spawned task upgrades
    /// this to an owned `Arc` for its lifetime and drops it when done.
    weak_self: Weak<Self>,
}

impl<M: Messaging> KademliaDht<M> {
    /// Constructs the orchestrator and binds `messaging`'s inbound handler
    /// to it. The handler closure holds only a `Weak` reference back, so
    /// `messaging` (owned directly by the returned `Arc<Self>`) never forms
    /// an ownership cycle.
    pub fn new(
        config: SystemConfig,
        local_id: Id,
        messaging: M,
        store: Arc<dyn ValueStore>,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
    ) -> Arc<Self> {
        let routing = Mutex::new(RoutingTable::new(local_id, &config.routing));
        let dht = Arc::new_cyclic(|weak_self| Self {
            config,
            local_id,
            messaging,
            routing,
            store,
            clock,
            rng,
            weak_self: weak_self.clone(),
        });

        let weak = dht.weak_self.clone();
        dht.messaging.bind_handler(Arc::new(move |sender_id, sender_addr, request| {
            match weak.upgrade() {
                Some(dht) => dht.handle_inbound(sender_id, sender_addr, request),
                None => Response::Contacts { sender_id, contacts: Vec::new() },
            }
        }));

        dht
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn local_id(&self) -> Id {
        self.local_id
    }

    pub fn messaging(&self) -> &M {
        &self.messaging
    }

    pub fn clock_now(&self) -> Instant {
        self.clock.now()
    }

    pub fn routing_table_len(&self) -> usize {
        self.routing.lock().unwrap().len()
    }

    pub(crate) fn routing_remove(&self, id: &Id) {
        self.routing.lock().unwrap().remove(id);
    }

    fn k_closest(&self, target: Id) -> Vec<Contact<M::Address>> {
        self.routing
            .lock()
            .unwrap()
            .k_closest(&target, self.config.routing.bucket_size)
    }

    /// Drops value-store entries past their lifetime. Intended to be
    /// driven by a periodic task in the hosting binary.
    pub fn run_maintenance(&self) {
        self.store.expire(self.clock.now());
    }

    /// Inserts a freshly-seen contact, applying spec.md §4.2's
    /// insert-or-probe policy if its bucket is full. Never blocks: a full
    /// bucket's tail is probed by a spawned task rather than inline, since
    /// `insert_contact` is reached from `handle_inbound` and, on a real
    /// transport, that runs on the same task that reads the socket —
    /// blocking it on a `Ping`/`Pong` round trip would starve its own
    /// reply out of the receive queue. See spec.md §9's replacement-cache
    /// note.
    pub(crate) fn insert_contact(&self, contact: Contact<M::Address>) {
        let outcome = self.routing.lock().unwrap().insert(contact.clone());
        match outcome {
            Some(RoutingOutcome::ProbeNeeded { bucket_index }) => self.spawn_tail_probe(bucket_index),
            Some(outcome) => debug!(id = %contact.id, ?outcome, "routing table insert"),
            None => {}
        }
    }

    /// Probes a full bucket's tail asynchronously and reports the result
    /// back once it resolves, rather than blocking the caller that
    /// triggered the insert. A no-op if `self` is already being dropped.
    fn spawn_tail_probe(&self, bucket_index: usize) {
        let Some(dht) = self.weak_self.upgrade() else { return };
        let Some(tail) = dht.routing.lock().unwrap().tail_of(bucket_index) else { return };

        tokio::spawn(async move {
            let nonce = dht.rng.random_u64();
            let responded = matches!(
                dht.messaging.send_request(&tail.addr, Request::Ping { nonce }).await,
                Ok(Response::Pong { nonce: got, .. }) if got == nonce
            );
            let now = dht.clock.now();
            let outcome = dht.routing.lock().unwrap().resolve_probe(bucket_index, &tail.id, responded, now);
            debug!(id = %tail.id, responded, ?outcome, "tail liveness probe resolved");
        });
    }

    fn refresh_contact(&self, id: &Id) -> bool {
        self.routing.lock().unwrap().refresh(id, self.clock.now())
    }

    fn contacts_to_wire(contacts: Vec<Contact<M::Address>>, target: Id) -> Vec<ContactInfo<M::Address>> {
        contacts
            .into_iter()
            .map(|c| {
                let is_exact = c.id == target;
                ContactInfo { id: c.id, addr: c.addr, is_exact }
            })
            .collect()
    }

    /// Answers one inbound request. Handlers are pure functions of input
    /// plus current state per spec.md §4.5: replaying the same request
    /// twice leaves the same state and yields the same reply.
    fn handle_inbound(&self, sender_id: Id, sender_addr: M::Address, request: Request) -> Response<M::Address> {
        if sender_id != self.local_id && !self.refresh_contact(&sender_id) {
            self.insert_contact(Contact::new(sender_id, sender_addr, self.clock.now()));
        }

        match request {
            Request::Ping { nonce } => Response::Pong { sender_id: self.local_id, nonce },
            Request::Store { key, value } => {
                if let Err(err) = self.store.put(key, value, self.clock.now()) {
                    warn!(%key, %err, "rejecting inbound store");
                }
                Response::StoreOk { sender_id: self.local_id, key }
            }
            Request::FindContact { target } => Response::Contacts {
                sender_id: self.local_id,
                contacts: Self::contacts_to_wire(self.k_closest(target), target),
            },
            Request::FindValue { target } => match self.store.get(&target) {
                Some(value) => Response::FoundValue {
                    sender_id: self.local_id,
                    value,
                    contacts: Self::contacts_to_wire(self.k_closest(target), target),
                },
                None => Response::Contacts {
                    sender_id: self.local_id,
                    contacts: Self::contacts_to_wire(self.k_closest(target), target),
                },
            },
        }
    }

    /// Issues a `Store` RPC to `to` on behalf of a lookup's cache-forward
    /// optimization. Best-effort: failures are logged, never surfaced.
    pub(crate) fn cache_forward_store(&self, to: Contact<M::Address>, key: Id, value: Vec<u8>) {
        let fut = self.messaging.send_request(&to.addr, Request::Store { key, value });
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                debug!(id = %to.id, %err, "cache-forward store failed");
            }
        });
    }

    #[instrument(skip(self))]
    pub async fn ping(&self, addr: M::Address) -> Result<(), DhtError> {
        let nonce = self.rng.random_u64();
        match self.messaging.send_request(&addr, Request::Ping { nonce }).await {
            Ok(Response::Pong { sender_id, nonce: got }) if got == nonce => {
                self.insert_contact(Contact::new(sender_id, addr, self.clock.now()));
                Ok(())
            }
            Ok(_) => Err(DhtError::Unreachable),
            Err(_) => Err(DhtError::Unreachable),
        }
    }

    async fn lookup(&self, target: Id, mode: LookupMode) -> Result<LookupOutcome<M::Address>, DhtError> {
        let seed = self.k_closest(target);
        if seed.is_empty() {
            return Err(DhtError::NoKnownContacts);
        }
        Ok(LookupEngine::new(self, target, mode).run(seed).await)
    }

    #[instrument(skip(self, value))]
    pub async fn store(&self, key_bytes: &[u8], value: Vec<u8>) -> Result<Id, DhtError> {
        let id = Id::hash(key_bytes);
        let contacts = match self.lookup(id, LookupMode::Node).await {
            Ok(LookupOutcome::Contacts(contacts)) => contacts,
            Ok(LookupOutcome::Value(..)) => unreachable!("node-mode lookup never returns a value"),
            Err(DhtError::NoKnownContacts) => Vec::new(),
            Err(err) => return Err(err),
        };

        let mut stored_locally = false;
        if contacts.iter().any(|c| c.id == self.local_id) || contacts.is_empty() {
            if let Err(err) = self.store.put(id, value.clone(), self.clock.now()) {
                warn!(%id, %err, "local store of own replica failed");
            } else {
                stored_locally = true;
            }
        }

        let remote_count = contacts.len();
        let mut replies = contacts
            .into_iter()
            .filter(|c| c.id != self.local_id)
            .map(|c| {
                let value = value.clone();
                async move {
                    self.messaging
                        .send_request(&c.addr, Request::Store { key: id, value })
                        .await
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut ok_count = 0;
        while let Some(res) = replies.next().await {
            match res {
                Ok(Response::StoreOk { .. }) => ok_count += 1,
                Ok(_) => warn!(%id, "unexpected response to store"),
                Err(err) => debug!(%id, %err, "store rpc failed"),
            }
        }

        if !stored_locally && ok_count == 0 && remote_count > 0 {
            return Err(DhtError::StoreFailed);
        }
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn find_value(&self, id: Id) -> Result<(Vec<Contact<M::Address>>, Option<Vec<u8>>), DhtError> {
        if let Some(value) = self.store.get(&id) {
            return Ok((Vec::new(), Some(value)));
        }

        match self.lookup(id, LookupMode::Value).await {
            Ok(LookupOutcome::Value(contacts, value)) => Ok((contacts, Some(value))),
            Ok(LookupOutcome::Contacts(contacts)) => Ok((contacts, None)),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self))]
    pub async fn find_contact(&self, id: Id) -> Result<(Vec<Contact<M::Address>>, Option<Contact<M::Address>>), DhtError> {
        match self.lookup(id, LookupMode::Node).await {
            Ok(LookupOutcome::Contacts(contacts)) => {
                let exact = contacts.iter().find(|c| c.id == id).cloned();
                Ok((contacts, exact))
            }
            Ok(LookupOutcome::Value(..)) => unreachable!("node-mode lookup never returns a value"),
            Err(err) => Err(err),
        }
    }

    /// `ping(bootstrap)` followed by `find_contact(self_id)`, populating
    /// the routing table from a single known address.
    #[instrument(skip(self))]
    pub async fn join(&self, bootstrap: M::Address) -> Result<(), DhtError> {
        self.ping(bootstrap).await?;
        match self.find_contact(self.local_id).await {
            Ok(_) => Ok(()),
            Err(DhtError::NoKnownContacts) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
