use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use kadht_logic::{
    clock::SystemClock, config::SystemConfig, rng::ThreadRandomSource, storage::InMemoryValueStore, Id,
    KademliaDht,
};
use kadht_transport::UdpMessaging;
use tracing::info;

mod config;

use config::load_config;

/// A standalone Kademlia node: binds a UDP socket, optionally joins an
/// existing network through a bootstrap peer, then either serves forever
/// or performs a single put/get and exits.
#[derive(Parser, Debug)]
#[clap(name = "kadht-server", version)]
struct Cli {
    /// Address to bind the UDP socket to.
    #[clap(long, default_value = "127.0.0.1:0")]
    listen: SocketAddr,

    /// Address of an existing node to join the network through.
    #[clap(long)]
    bootstrap: Option<SocketAddr>,

    /// Derives this node's id by hashing the given seed string. A random
    /// id is generated if omitted.
    #[clap(long)]
    id_seed: Option<String>,

    /// Path to a TOML file overriding the default `SystemConfig`.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Store `VALUE` under `KEY`, print the resulting id, then exit.
    #[clap(long, value_names = &["KEY", "VALUE"], number_of_values = 2)]
    put: Option<Vec<String>>,

    /// Look up the value stored under `KEY`, print it, then exit.
    #[clap(long)]
    get: Option<String>,
}

fn local_id(seed: Option<&str>) -> Id {
    match seed {
        Some(seed) => Id::hash(seed.as_bytes()),
        None => Id(rand::random()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config: SystemConfig = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => SystemConfig::default(),
    };

    let id = local_id(cli.id_seed.as_deref());
    info!(%id, listen = %cli.listen, "starting node");

    let messaging = UdpMessaging::bind(cli.listen, id, config.lookup.request_timeout)
        .await
        .context("binding udp socket")?;
    let bound_addr = messaging.local_addr().context("reading bound socket address")?;
    info!(addr = %bound_addr, "listening");

    let store = std::sync::Arc::new(InMemoryValueStore::new(config.storage.clone()));
    let clock = std::sync::Arc::new(SystemClock);
    let rng = std::sync::Arc::new(ThreadRandomSource);
    let dht = KademliaDht::new(config, id, messaging, store, clock, rng);

    if let Some(bootstrap) = cli.bootstrap {
        dht.join(bootstrap).await.context("joining network through bootstrap peer")?;
        info!(peers = dht.routing_table_len(), "joined network");
    }

    if let Some(kv) = cli.put {
        let (key, value) = (&kv[0], &kv[1]);
        let id = dht.store(key.as_bytes(), value.clone().into_bytes()).await?;
        println!("{id}");
        return Ok(());
    }

    if let Some(key) = cli.get {
        let id = Id::hash(key.as_bytes());
        let (_, value) = dht.find_value(id).await?;
        match value {
            Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
            None => println!("(not found)"),
        }
        return Ok(());
    }

    let maintenance_dht = dht.clone();
    let maintenance = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            maintenance_dht.run_maintenance();
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    maintenance.abort();
    Ok(())
}
