//! VBAN Sender Application
//!
//! Streams a test tone and a periodic chat message over UDP.
//!
//! Usage: `sender [target-ip] [stream-name]`. Without a target the stream is
//! broadcast.

use anyhow::{Context, Result};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vban_transport::{
    audio::{create_shared_pool, BlockAllocator, NetOutput},
    config::AppConfig,
    constants::*,
    protocol::StreamName,
    service::DataOutput,
    transport::{SystemClock, UdpSocket},
    ui::{create_shared_snapshot, WebServer},
    Transport,
};

const TONE_HZ: f32 = 440.0;
const SAMPLE_RATE: f32 = 44_100.0;
const CHANNELS: usize = 2;

/// Sine generator producing one block per call
struct Tone {
    phase: f32,
    step: f32,
}

impl Tone {
    fn new(freq: f32) -> Self {
        Self {
            phase: 0.0,
            step: freq * std::f32::consts::TAU / SAMPLE_RATE,
        }
    }

    fn fill(&mut self, block: &mut [i16]) {
        for s in block.iter_mut() {
            *s = (self.phase.sin() * 8000.0) as i16;
            self.phase = (self.phase + self.step) % std::f32::consts::TAU;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting VBAN Sender");

    let config = AppConfig::load().context("loading config")?;

    let target: Ipv4Addr = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("invalid target address")?,
        None => Ipv4Addr::UNSPECIFIED,
    };
    let name = std::env::args().nth(2).unwrap_or_else(|| "Stream1".to_string());
    let name = StreamName::new(&name)?;

    let mut socket = UdpSocket::bind(config.network.bind_addr()?)?;
    if let Some(broadcast) = config.network.broadcast()? {
        socket = socket.with_broadcast(broadcast);
    }
    let mut transport = Transport::from_config(socket, SystemClock::new(), &config);
    tracing::info!(
        "Bound UDP port {} as '{}'",
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

    let mut output = NetOutput::new(name, CHANNELS);
    if output.register(&mut transport, target).is_none() {
        anyhow::bail!("no free output stream slot");
    }
    let mut chat = DataOutput::chat(StreamName::truncated("Chat"));
    chat.register(&mut transport, target);

    tracing::info!(
        "Sending '{}' ({} ch) to {}",
        name,
        CHANNELS,
        if target.is_unspecified() { "broadcast".to_string() } else { target.to_string() }
    );

    let pool = create_shared_pool(CHANNELS * 4);
    let mut tones: Vec<Tone> = (0..CHANNELS)
        .map(|c| Tone::new(TONE_HZ * (c + 1) as f32))
        .collect();

    let period = Duration::from_micros(
        (AUDIO_BLOCK_SAMPLES as u64 * 1_000_000) / SAMPLE_RATE as u64,
    );
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut last_chat = Instant::now();
    let mut last_snapshot = Instant::now();
    let mut last_stats = Instant::now();
    let mut chat_count = 0u64;

    loop {
        ticker.tick().await;

        let mut blocks = Vec::with_capacity(CHANNELS);
        for tone in tones.iter_mut() {
            match pool.allocate() {
                Some(mut block) => {
                    tone.fill(&mut block);
                    blocks.push(block);
                }
                None => break,
            }
        }
        let refs: Vec<Option<&[i16]>> = blocks.iter().map(|b| Some(&b[..])).collect();
        output.transmit(&refs);
        for block in blocks {
            pool.release(block);
        }

        transport.poll();

        if last_chat.elapsed() >= Duration::from_secs(2) {
            last_chat = Instant::now();
            chat_count += 1;
            chat.send_text(&format!("{} says hello #{}", config.identity.hostname, chat_count));
        }

        if last_snapshot.elapsed() >= Duration::from_millis(HOUSEKEEPING_INTERVAL_MS) {
            last_snapshot = Instant::now();
            *snapshot.write() = transport.snapshot();
        }

        if last_stats.elapsed() >= Duration::from_secs(5) {
            last_stats = Instant::now();
            let stats = transport.stats();
            let out = output.stats();
            tracing::info!(
                "Sender stats: {} datagrams sent, {} send failures, {} blocks, {} dropped, {} hosts known",
                stats.datagrams_sent,
                stats.send_failures,
                out.blocks,
                out.dropped_blocks,
                transport.hosts().active_count()
            );
        }
    }
}
