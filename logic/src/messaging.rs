use std::{fmt::Debug, future::Future, hash::Hash, sync::Arc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::id::Id;

/// A peer's routable identity as carried over the wire, paired with
/// whatever address the transport needs to reach it.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactInfo<A> {
    pub id: Id,
    pub addr: A,
    /// Set when this entry is an exact id match for the request's target,
    /// per spec.md §4.5 ("included and tagged as exact"), not merely one
    /// of the k closest.
    pub is_exact: bool,
}

/// Request payloads per the §6 wire message table. `sender_id` is not
/// carried here: the transport attaches it to the envelope and passes it
/// separately to `InboundHandler`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Request {
    Ping { nonce: u64 },
    Store { key: Id, value: Vec<u8> },
    FindContact { target: Id },
    FindValue { target: Id },
}

/// Reply payloads. Every variant carries the responder's `sender_id` per
/// the §6 wire message table, so that a bare address-directed RPC (e.g.
/// `ping` to a not-yet-routed address) still learns who answered.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Response<A> {
    Pong { sender_id: Id, nonce: u64 },
    StoreOk { sender_id: Id, key: Id },
    Contacts { sender_id: Id, contacts: Vec<ContactInfo<A>> },
    FoundValue { sender_id: Id, value: Vec<u8>, contacts: Vec<ContactInfo<A>> },
}

/// Installed once at construction time to answer inbound requests.
///
/// Held by the `Messaging` implementation, not by the orchestrator: the
/// closure itself captures a `Weak` reference back to the orchestrator,
/// which is what keeps `Messaging` and `KademliaDht` from forming an
/// ownership cycle even though the orchestrator owns its `Messaging`.
pub type InboundHandler<A> = Arc<dyn Fn(Id, A, Request) -> Response<A> + Send + Sync>;

/// Injected transport (§6: `Messaging::send_request`, `Messaging::serve`).
///
/// Implementors own the wire codec and the network socket; the orchestrator
/// only ever sees `Request`/`Response` values and peer addresses.
pub trait Messaging: Send + Sync + 'static {
    type Address: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;
    type SendFut: Future<Output = Result<Response<Self::Address>, Self::Error>> + Send + 'static;

    /// Sends `request` to `to` and resolves with its response, or errors on
    /// timeout/transport failure. Never blocks waiting for a handler to be
    /// bound.
    fn send_request(&self, to: &Self::Address, request: Request) -> Self::SendFut;

    /// Installs the inbound-request handler. Called exactly once, from
    /// `KademliaDht::new`, before any outbound request is issued.
    fn bind_handler(&self, handler: InboundHandler<Self::Address>);

    /// This node's own address, as it should be advertised to peers (e.g.
    /// in the self-contact seeded into every lookup's shortlist).
    fn local_address(&self) -> Self::Address;
}
