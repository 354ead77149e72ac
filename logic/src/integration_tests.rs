//! Multi-node scenarios end-to-end over `test_support::InMemoryNetwork`,
//! exercising the same RPC path a real transport would use.

use std::{sync::Arc, time::Instant};

use crate::{
    clock::{Clock, SystemClock},
    config::SystemConfig,
    dht::KademliaDht,
    error::DhtError,
    id::Id,
    messaging::{Messaging, Request, Response},
    rng::{RandomSource, ThreadRandomSource},
    storage::InMemoryValueStore,
    test_support::InMemoryNetwork,
};

fn spawn_node(network: &InMemoryNetwork, address: u64, id: Id, config: SystemConfig) -> Arc<KademliaDht<crate::test_support::InMemoryMessaging>> {
    let messaging = network.node(address, id);
    let store = Arc::new(InMemoryValueStore::new(config.storage.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rng: Arc<dyn RandomSource> = Arc::new(ThreadRandomSource);
    KademliaDht::new(config, id, messaging, store, clock, rng)
}

#[tokio::test]
async fn s1_single_node_local_store_and_find() {
    let network = InMemoryNetwork::new();
    let config = SystemConfig::default();
    let a = spawn_node(&network, 1, Id::from_hex("01"), config);

    let id = a.store(b"hello", b"world".to_vec()).await.unwrap();
    assert_eq!(id, Id::hash(b"hello"));

    let (contacts, value) = a.find_value(id).await.unwrap();
    assert!(contacts.is_empty());
    assert_eq!(value, Some(b"world".to_vec()));
}

#[tokio::test]
async fn s2_two_node_store_then_find() {
    let network = InMemoryNetwork::new();
    let config = SystemConfig::default();
    let a = spawn_node(&network, 1, Id::from_hex("01"), config.clone());
    let b = spawn_node(&network, 2, Id::from_hex("80"), config);

    b.join(1).await.unwrap();

    let id_x = b.store(b"x", b"1".to_vec()).await.unwrap();

    let (_, value) = a.find_value(id_x).await.unwrap();
    assert_eq!(value, Some(b"1".to_vec()));
}

#[tokio::test]
async fn s5_find_contact_returns_exact_match() {
    let network = InMemoryNetwork::new();
    let config = SystemConfig::default();
    let a = spawn_node(&network, 1, Id::from_hex("01"), config.clone());
    let b = spawn_node(&network, 2, Id::from_hex("80"), config);
    b.join(1).await.unwrap();

    let (_, exact) = a.find_contact(Id::from_hex("80")).await.unwrap();
    assert_eq!(exact.map(|c| c.id), Some(Id::from_hex("80")));
}

#[tokio::test]
async fn find_contact_reply_tags_exact_match_on_the_wire() {
    let network = InMemoryNetwork::new();
    let config = SystemConfig::default();
    let a = spawn_node(&network, 1, Id::from_hex("01"), config.clone());
    let b = spawn_node(&network, 2, Id::from_hex("80"), config);
    b.join(1).await.unwrap();

    let response = a
        .messaging()
        .send_request(&2, Request::FindContact { target: Id::from_hex("01") })
        .await
        .unwrap();
    let contacts = match response {
        Response::Contacts { contacts, .. } => contacts,
        other => panic!("unexpected response: {other:?}"),
    };
    let exact = contacts.iter().find(|c| c.id == Id::from_hex("01")).expect("exact match present");
    assert!(exact.is_exact);
    assert!(contacts.iter().filter(|c| c.id != Id::from_hex("01")).all(|c| !c.is_exact));
}

#[tokio::test]
async fn s6_fresh_node_find_value_fails_with_no_known_contacts() {
    let network = InMemoryNetwork::new();
    let config = SystemConfig::default();
    let a = spawn_node(&network, 1, Id::from_hex("01"), config);

    let err = a.find_value(Id::from_hex("ff")).await.unwrap_err();
    assert!(matches!(err, DhtError::NoKnownContacts));
}

#[tokio::test]
async fn s4_lookup_converges_and_drops_dead_node() {
    let network = InMemoryNetwork::new();
    // `bucket_size` doubles as the lookup's seed width (§4.6 step 1), so it
    // must be wide enough that all four known contacts land in the seed
    // shortlist, including the one about to go dark.
    let config = SystemConfig {
        routing: crate::config::RoutingConfig { bucket_size: 10 },
        lookup: crate::config::LookupConfig {
            parallelism: 2,
            ..Default::default()
        },
        ..Default::default()
    };

    let seeker = spawn_node(&network, 1, Id::from_hex("00"), config.clone());
    let live_a = spawn_node(&network, 2, Id::from_hex("10"), config.clone());
    let live_b = spawn_node(&network, 3, Id::from_hex("20"), config.clone());
    let live_c = spawn_node(&network, 4, Id::from_hex("30"), config.clone());
    let doomed = spawn_node(&network, 5, Id::from_hex("40"), config);

    live_a.join(1).await.unwrap();
    live_b.join(1).await.unwrap();
    live_c.join(1).await.unwrap();

    // `doomed` pings the seeker once so its contact is learned for real
    // (via the seeker's `handle_inbound`, exactly as a live peer would be),
    // then goes dark: its handler is deregistered so any further request
    // to it fails, without touching what the seeker already knows.
    doomed.ping(1).await.unwrap();
    network.disconnect(5);

    assert_eq!(seeker.routing_table_len(), 4);

    let (contacts, _) = seeker.find_value(Id::from_hex("ff")).await.unwrap();
    assert!(!contacts.iter().any(|c| c.id == Id::from_hex("40")));
    assert_eq!(seeker.routing_table_len(), 3);
}

#[tokio::test]
async fn lookup_response_inserts_responder_into_routing_table() {
    let network = InMemoryNetwork::new();
    let config = SystemConfig::default();
    let a = spawn_node(&network, 1, Id::from_hex("01"), config.clone());
    let _b = spawn_node(&network, 2, Id::from_hex("80"), config.clone());
    let c = spawn_node(&network, 3, Id::from_hex("81"), config);

    // A only ever learns about B directly (via join's `ping`); C only ever
    // appears as an entry in B's FindContact reply during the join's
    // lookup, never via a direct ping from A.
    c.join(2).await.unwrap();
    a.join(2).await.unwrap();

    // join()'s find_contact(self_id) lookup already queried C (it was
    // returned by B and has plenty of room in a 3-wide α round), so its
    // response must have landed C in A's routing table too.
    assert_eq!(a.routing_table_len(), 2);
}

#[tokio::test]
async fn ping_inserts_responder_into_routing_table() {
    let network = InMemoryNetwork::new();
    let config = SystemConfig::default();
    let a = spawn_node(&network, 1, Id::from_hex("01"), config.clone());
    let b = spawn_node(&network, 2, Id::from_hex("02"), config);

    assert_eq!(a.routing_table_len(), 0);
    a.ping(2).await.unwrap();
    assert_eq!(a.routing_table_len(), 1);
    let _ = b.routing_table_len();
    let _ = Instant::now();
}
