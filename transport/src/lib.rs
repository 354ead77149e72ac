//! UDP-based `Messaging`: a length-prefixed bincode codec over a single
//! `UdpSocket`, with token-correlated request/response matching.
#![forbid(unsafe_code)]

use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use kadht_logic::{
    messaging::{InboundHandler, Messaging, Request, Response},
    Id,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{net::UdpSocket, sync::oneshot, time::timeout};
use tracing::{debug, warn};

const MAX_DATAGRAM: usize = 16 * 1024;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("response channel dropped before a reply arrived")]
    ChannelClosed,
    #[error("failed to encode outbound message: {0}")]
    Encode(bincode::Error),
    #[error("failed to decode inbound message: {0}")]
    Decode(bincode::Error),
}

#[derive(Serialize, Deserialize)]
enum WireMessage {
    Request { sender_id: Id, token: u64, request: Request },
    Response { sender_id: Id, token: u64, response: Response<SocketAddr> },
}

struct Inner {
    socket: UdpSocket,
    local_id: Id,
    request_timeout: Duration,
    next_token: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Response<SocketAddr>>>>,
    handler: Mutex<Option<InboundHandler<SocketAddr>>>,
}

/// A cheaply-cloneable handle to a UDP node. Cloning shares the same
/// socket, pending-request table, and inbound handler.
#[derive(Clone)]
pub struct UdpMessaging {
    inner: Arc<Inner>,
}

impl UdpMessaging {
    pub async fn bind(addr: SocketAddr, local_id: Id, request_timeout: Duration) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let inner = Arc::new(Inner {
            socket,
            local_id,
            request_timeout,
            next_token: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            handler: Mutex::new(None),
        });
        let messaging = UdpMessaging { inner: inner.clone() };
        tokio::spawn(recv_loop(inner));
        Ok(messaging)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }
}

async fn recv_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match inner.socket.recv_from(&mut buf).await {
            Ok(x) => x,
            Err(err) => {
                warn!(%err, "udp recv failed, stopping receive loop");
                return;
            }
        };

        let message: WireMessage = match bincode::deserialize(&buf[..len]) {
            Ok(m) => m,
            Err(err) => {
                warn!(%err, %from, "dropping malformed inbound datagram");
                continue;
            }
        };

        match message {
            WireMessage::Request { sender_id, token, request } => {
                let handler = inner.handler.lock().unwrap().clone();
                let Some(handler) = handler else {
                    warn!(%sender_id, "dropping inbound request: no handler bound yet");
                    continue;
                };
                let response = handler(sender_id, from, request);
                let reply = WireMessage::Response {
                    sender_id: inner.local_id,
                    token,
                    response,
                };
                match bincode::serialize(&reply) {
                    Ok(bytes) => {
                        if let Err(err) = inner.socket.send_to(&bytes, from).await {
                            warn!(%err, %from, "failed to send reply");
                        }
                    }
                    Err(err) => warn!(%err, "failed to encode reply"),
                }
            }
            WireMessage::Response { token, response, .. } => {
                if let Some(waiter) = inner.pending.lock().unwrap().remove(&token) {
                    let _ = waiter.send(response);
                } else {
                    debug!(token, "response for unknown/expired request token");
                }
            }
        }
    }
}

impl Messaging for UdpMessaging {
    type Address = SocketAddr;
    type Error = TransportError;
    type SendFut = Pin<Box<dyn Future<Output = Result<Response<SocketAddr>, TransportError>> + Send>>;

    fn send_request(&self, to: &SocketAddr, request: Request) -> Self::SendFut {
        let inner = self.inner.clone();
        let to = *to;
        Box::pin(async move {
            let token = inner.next_token.fetch_add(1, Ordering::Relaxed);
            let message = WireMessage::Request {
                sender_id: inner.local_id,
                token,
                request,
            };
            let bytes = bincode::serialize(&message).map_err(TransportError::Encode)?;

            let (tx, rx) = oneshot::channel();
            inner.pending.lock().unwrap().insert(token, tx);

            if let Err(err) = inner.socket.send_to(&bytes, to).await {
                inner.pending.lock().unwrap().remove(&token);
                return Err(err.into());
            }

            let result = timeout(inner.request_timeout, rx).await;
            match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(TransportError::ChannelClosed),
                Err(_) => {
                    inner.pending.lock().unwrap().remove(&token);
                    Err(TransportError::Timeout)
                }
            }
        })
    }

    fn bind_handler(&self, handler: InboundHandler<SocketAddr>) {
        *self.inner.handler.lock().unwrap() = Some(handler);
    }

    fn local_address(&self) -> SocketAddr {
        self.inner
            .socket
            .local_addr()
            .expect("bound socket always has a local address")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kadht_logic::{
        clock::SystemClock, config::SystemConfig, rng::ThreadRandomSource, storage::InMemoryValueStore,
        KademliaDht,
    };
    use std::sync::Arc as StdArc;

    async fn spawn_node(id: Id) -> (StdArc<KademliaDht<UdpMessaging>>, SocketAddr) {
        let messaging = UdpMessaging::bind("127.0.0.1:0".parse().unwrap(), id, Duration::from_secs(2))
            .await
            .unwrap();
        let addr = messaging.local_addr().unwrap();
        let config = SystemConfig::default();
        let store = StdArc::new(InMemoryValueStore::new(config.storage.clone()));
        let clock: StdArc<dyn kadht_logic::clock::Clock> = StdArc::new(SystemClock);
        let rng: StdArc<dyn kadht_logic::rng::RandomSource> = StdArc::new(ThreadRandomSource);
        (KademliaDht::new(config, id, messaging, store, clock, rng), addr)
    }

    #[tokio::test]
    async fn ping_round_trips_over_real_sockets() {
        let (a, _addr_a) = spawn_node(Id::hash(b"node-a")).await;
        let (b, addr_b) = spawn_node(Id::hash(b"node-b")).await;

        a.ping(addr_b).await.unwrap();
        assert_eq!(a.routing_table_len(), 1);
        let _ = &b;
    }

    #[tokio::test]
    async fn store_and_find_value_over_real_sockets() {
        let (a, addr_a) = spawn_node(Id::hash(b"node-a")).await;
        let (b, _addr_b) = spawn_node(Id::hash(b"node-b")).await;

        b.join(addr_a).await.unwrap();
        let id = b.store(b"x", b"1".to_vec()).await.unwrap();

        let (_, value) = a.find_value(id).await.unwrap();
        assert_eq!(value, Some(b"1".to_vec()));
    }
}
