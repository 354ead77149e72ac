//! In-memory `Messaging` for multi-node tests, without any real sockets.
//!
//! Grounded in the teacher's `simulate` module: a shared directory maps
//! addresses to inbound handlers, and `send_request` is a direct call into
//! the target's handler rather than a network round-trip.

use std::{collections::HashMap, future::Future, pin::Pin, sync::{Arc, Mutex}};

use thiserror::Error;

use crate::{
    id::Id,
    messaging::{InboundHandler, Messaging, Request, Response},
};

pub type InMemoryAddress = u64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InMemoryError {
    #[error("no peer registered at address {0}")]
    UnknownPeer(InMemoryAddress),
}

#[derive(Default, Clone)]
pub struct InMemoryNetwork {
    peers: Arc<Mutex<HashMap<InMemoryAddress, InboundHandler<InMemoryAddress>>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `Messaging` endpoint at `address` for a node identified
    /// by `local_id`. The endpoint registers itself with the network the
    /// first time `bind_handler` is called (i.e. from `KademliaDht::new`).
    pub fn node(&self, address: InMemoryAddress, local_id: Id) -> InMemoryMessaging {
        InMemoryMessaging {
            address,
            local_id,
            network: self.clone(),
        }
    }

    /// Simulates a node going dark: deregisters its handler so any further
    /// `send_request` aimed at `address` fails with `UnknownPeer` instead
    /// of being answered, without affecting contacts already learned about
    /// it elsewhere.
    pub fn disconnect(&self, address: InMemoryAddress) {
        self.peers.lock().unwrap().remove(&address);
    }
}

#[derive(Clone)]
pub struct InMemoryMessaging {
    address: InMemoryAddress,
    local_id: Id,
    network: InMemoryNetwork,
}

impl Messaging for InMemoryMessaging {
    type Address = InMemoryAddress;
    type Error = InMemoryError;
    type SendFut = Pin<Box<dyn Future<Output = Result<Response<InMemoryAddress>, InMemoryError>> + Send>>;

    fn send_request(&self, to: &InMemoryAddress, request: Request) -> Self::SendFut {
        let to = *to;
        let from_id = self.local_id;
        let from_addr = self.address;
        let network = self.network.clone();
        Box::pin(async move {
            let handler = network.peers.lock().unwrap().get(&to).cloned();
            match handler {
                Some(handler) => Ok(handler(from_id, from_addr, request)),
                None => Err(InMemoryError::UnknownPeer(to)),
            }
        })
    }

    fn bind_handler(&self, handler: InboundHandler<InMemoryAddress>) {
        self.network.peers.lock().unwrap().insert(self.address, handler);
    }

    fn local_address(&self) -> InMemoryAddress {
        self.address
    }
}
