//! schedule-hub: runs the sync hub, or joins one as a headless peer.
//!
//! ```text
//! schedule-hub serve     hub: ws topic endpoint + GET /api/state
//! schedule-hub join      peer: engine driven by the channel and stdin commands
//! ```
//!
//! Configuration comes from the environment (`RUST_LOG` for logging).

mod commands;

use std::env;
use std::error::Error;
use std::time::Duration;

use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use schedule_collab::presence::random_user_name;
use schedule_collab::{
    ChannelClient, ClientConfig, EngineConfig, HttpSnapshotSource, HubConfig, HubServer, ImmediateCommit,
    ReconciliationEngine, Snapshot, TransportError,
};

const KEEPALIVE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mode = env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    match mode.as_str() {
        "serve" => serve().await,
        "join" => join().await,
        other => Err(format!("unknown mode {other:?}, expected serve or join").into()),
    }
}

async fn serve() -> Result<(), Box<dyn Error>> {
    let mut config = HubConfig::default();
    if let Ok(addr) = env::var("HUB_WS_ADDR") {
        config.ws_addr = addr;
    }
    if let Ok(addr) = env::var("HUB_HTTP_ADDR") {
        config.http_addr = addr;
    }
    if let Ok(secs) = env::var("HUB_HISTORY_SECS") {
        config.history_window = Duration::from_secs(secs.parse()?);
    }
    if let Ok(path) = env::var("HUB_SEED") {
        let raw = std::fs::read_to_string(&path)?;
        config.seed = serde_json::from_str::<Snapshot>(&raw)?;
        info!("Seeded {} events from {path}", config.seed.data.events.len());
    }

    info!(
        "Starting hub: ws://{} state http://{}/api/state",
        config.ws_addr, config.http_addr
    );
    HubServer::new(config).run().await?;
    Ok(())
}

async fn join() -> Result<(), Box<dyn Error>> {
    let name = env::var("PEER_NAME").unwrap_or_else(|_| random_user_name().to_string());
    let mut client_config = ClientConfig {
        client_id: name.clone(),
        ..ClientConfig::default()
    };
    if let Ok(url) = env::var("HUB_URL") {
        client_config.url = url;
    }
    if let Ok(secs) = env::var("PEER_REWIND_SECS") {
        client_config.rewind = Duration::from_secs(secs.parse()?);
    }
    let state_url = env::var("HUB_STATE_URL").unwrap_or_else(|_| "http://127.0.0.1:3000/api/state".to_string());

    let mut client = ChannelClient::new(client_config);
    let inbound = client.take_event_rx().ok_or("event receiver already taken")?;
    let handle = client.connect().await?;
    info!("Joined {} as {name}", client.config().url);

    let keepalive = handle.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEPALIVE);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match keepalive.ping() {
                Ok(()) => {}
                Err(TransportError::Closed) => break,
                Err(e) => log::debug!("Keepalive skipped: {e}"),
            }
        }
    });

    let (local_tx, local_rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match commands::parse(&line) {
                Ok(change) => {
                    if local_tx.send(change).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("{e}"),
            }
        }
    });

    let config = EngineConfig {
        user_name: name,
        ..EngineConfig::default()
    };
    let mut engine = ReconciliationEngine::new(config, handle, ImmediateCommit);
    engine
        .run(&HttpSnapshotSource::new(state_url), inbound, local_rx)
        .await;

    let view = engine.view();
    info!(
        "Left with {} events, watermark {}",
        engine.store().len(),
        engine.store().timestamp()
    );
    if let Some((start, end)) = view.time_span {
        info!("Time span {start} .. {end}");
    }
    Ok(())
}
