//! VBAN Receiver Application
//!
//! Subscribes to an audio stream and the chat channel and reports what
//! arrives.
//!
//! Usage: `receiver [stream-name] [source]`. The source may be an IPv4
//! address or a hostname learned through discovery; without one any sender
//! of the stream is accepted.

use anyhow::{Context, Result};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vban_transport::{
    audio::{create_shared_pool, NetInput},
    config::AppConfig,
    constants::*,
    protocol::StreamName,
    service::{DataInput, DataKind},
    transport::{SystemClock, UdpSocket},
    ui::{create_shared_snapshot, WebServer},
    Transport,
};

const CHANNELS: usize = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VBAN Receiver");

    let config = AppConfig::load().context("loading config")?;

    let name = std::env::args().nth(1).unwrap_or_else(|| "Stream1".to_string());
    let name = StreamName::new(&name)?;
    let source = std::env::args().nth(2);
    let (hostname, addr) = match source.as_deref() {
        Some(s) => match s.parse::<Ipv4Addr>() {
            Ok(ip) => (None, Some(ip)),
            Err(_) => (Some(s), None),
        },
        None => (None, None),
    };

    let mut socket = UdpSocket::bind(config.network.bind_addr()?)?;
    if let Some(broadcast) = config.network.broadcast()? {
        socket = socket.with_broadcast(broadcast);
    }
    let mut transport = Transport::from_config(socket, SystemClock::new(), &config);
    tracing::info!(
        "Listening on UDP port {} as '{}'",
        config.network.udp_port,
        config.identity.hostname
    );

    let snapshot = create_shared_snapshot();
    if config.ui.enabled {
        let _web_handle = WebServer::new(config.ui.clone(), snapshot.clone()).start_background();
        tracing::info!(
            "Status API available at http://{}:{}",
            config.ui.bind_address,
            config.ui.http_port
        );
    }

    let pool = create_shared_pool(CHANNELS * 4);
    let mut input = NetInput::new(CHANNELS, pool);
    if input.subscribe(&mut transport, name, hostname, addr).is_none() {
        anyhow::bail!("no free subscription slot");
    }
    let mut chat = DataInput::new(DataKind::chat());
    chat.subscribe(&mut transport, StreamName::truncated("Chat"), hostname, addr);

    tracing::info!("Waiting for '{}'...", name);

    let period = Duration::from_micros((AUDIO_BLOCK_SAMPLES as u64 * 1_000_000) / 44_100);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut last_snapshot = Instant::now();
    let mut last_stats = Instant::now();
    let mut peak = 0i16;
    let mut was_linked = false;

    loop {
        ticker.tick().await;
        transport.poll();

        if let Some(blocks) = input.update() {
            for block in &blocks {
                peak = block.iter().fold(peak, |p, &s| p.max(s.saturating_abs()));
            }
            input.release(blocks);
        }

        while let Some(text) = chat.read_text() {
            tracing::info!("Chat: {}", text);
        }

        let linked = input
            .subscription()
            .and_then(|sub| transport.subscription_stream(sub))
            .is_some();
        if linked != was_linked {
            was_linked = linked;
            if linked {
                tracing::info!("Stream '{}' linked", name);
            } else {
                tracing::warn!("Stream '{}' lost", name);
            }
        }

        if last_snapshot.elapsed() >= Duration::from_millis(HOUSEKEEPING_INTERVAL_MS) {
            last_snapshot = Instant::now();
            *snapshot.write() = transport.snapshot();
        }

        // Periodic stats
        if last_stats.elapsed() >= Duration::from_secs(5) {
            last_stats = Instant::now();
            let stats = transport.stats();
            let audio = input.stats();
            tracing::info!(
                "Receiver stats: {} datagrams, {} bytes, {} malformed, {} queued, {} tail drops",
                stats.datagrams_received,
                stats.bytes_received,
                stats.malformed,
                stats.queued,
                stats.tail_drops
            );
            tracing::info!(
                "Audio '{}': {} blocks, {} missed, {} frames dropped, peak {}",
                name,
                audio.blocks,
                audio.missed,
                audio.frames_dropped,
                peak
            );
            peak = 0;
        }
    }
}
