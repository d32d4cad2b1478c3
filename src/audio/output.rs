//! Network audio output: sample blocks in, packets out
//!
//! Each period's blocks are interleaved and split into as few packets as the
//! payload limit allows. With 128-sample blocks that is one packet for up to
//! five channels and two beyond that.

use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

use crate::constants::{AUDIO_BLOCK_SAMPLES, BYTES_PER_SAMPLE, MAX_CHANNELS, MAX_PAYLOAD_SIZE};
use crate::protocol::header::ACCEPTED_AUDIO_FORMAT_SR;
use crate::protocol::{PacketKind, StreamName, WireHeader};
use crate::transport::{Clock, DatagramSocket, PacketQueue, QueuedPacket, Transport};

/// Samples per channel in one packet is limited by the `format_nbs` field
const MAX_PACKET_SAMPLES: usize = 256;

/// Packing counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub blocks: u64,
    pub packets: u64,
    /// Blocks discarded because the output queue had no room
    pub dropped_blocks: u64,
}

/// Audio output feeding one network stream
pub struct NetOutput {
    name: StreamName,
    channels: usize,
    queue: PacketQueue,
    stream: Option<usize>,
    frame: u32,
    stats: OutputStats,
}

impl NetOutput {
    /// Create an output sending `channels` channels (1..=8) as `name`
    pub fn new(name: StreamName, channels: usize) -> Self {
        Self {
            name,
            channels: channels.clamp(1, MAX_CHANNELS),
            queue: PacketQueue::for_kind(PacketKind::Audio),
            stream: None,
            frame: 0,
            stats: OutputStats::default(),
        }
    }

    pub fn name(&self) -> StreamName {
        self.name
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn stream(&self) -> Option<usize> {
        self.stream
    }

    /// Register with the transport; the unspecified address broadcasts
    pub fn register<S: DatagramSocket, C: Clock>(
        &mut self,
        transport: &mut Transport<S, C>,
        target: Ipv4Addr,
    ) -> Option<usize> {
        if self.stream.is_some() {
            return self.stream;
        }
        self.stream =
            transport.register_output(self.name, ACCEPTED_AUDIO_FORMAT_SR, 0, target, &self.queue);
        if self.stream.is_none() {
            tracing::warn!("No free output stream slot for '{}'", self.name);
        }
        self.stream
    }

    pub fn unregister<S: DatagramSocket, C: Clock>(&mut self, transport: &mut Transport<S, C>) {
        if let Some(stream) = self.stream.take() {
            transport.unregister_output(stream);
        }
        self.queue.clear();
    }

    /// Samples per channel that fit in one packet
    pub fn samples_per_packet(&self) -> usize {
        (MAX_PAYLOAD_SIZE / (self.channels * BYTES_PER_SAMPLE)).min(MAX_PACKET_SAMPLES)
    }

    /// Queue one period of audio
    ///
    /// `blocks[c]` is channel `c`; a missing or short channel is sent as
    /// silence. Returns false if the block was dropped because the queue had
    /// no room for all of its packets.
    pub fn transmit(&mut self, blocks: &[Option<&[i16]>]) -> bool {
        let per_packet = self.samples_per_packet();
        let mut packets = Vec::with_capacity(AUDIO_BLOCK_SAMPLES.div_ceil(per_packet));
        let mut frame = self.frame;

        let mut start = 0;
        while start < AUDIO_BLOCK_SAMPLES {
            let samples = per_packet.min(AUDIO_BLOCK_SAMPLES - start);
            let mut payload = BytesMut::with_capacity(samples * self.channels * BYTES_PER_SAMPLE);
            for j in start..start + samples {
                for ch in 0..self.channels {
                    let sample = blocks
                        .get(ch)
                        .copied()
                        .flatten()
                        .and_then(|block| block.get(j))
                        .copied()
                        .unwrap_or(0);
                    payload.put_i16_le(sample);
                }
            }

            packets.push(QueuedPacket {
                stream: self.stream.unwrap_or_default(),
                kind: PacketKind::Audio,
                header: WireHeader::audio(self.name, samples, self.channels, frame),
                payload: payload.freeze(),
            });
            frame = frame.wrapping_add(1);
            start += samples;
        }

        let count = packets.len() as u64;
        if self.queue.push_all(packets).is_err() {
            self.stats.dropped_blocks += 1;
            tracing::trace!("Output '{}' queue full, block dropped", self.name);
            return false;
        }
        self.frame = frame;
        self.stats.blocks += 1;
        self.stats.packets += count;
        true
    }

    pub fn stats(&self) -> OutputStats {
        self.stats
    }
}
