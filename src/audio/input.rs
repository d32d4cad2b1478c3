//! Network audio input: packets in, fixed-size sample blocks out
//!
//! Packets carry a variable number of interleaved samples (1..=256 per
//! channel); the audio graph wants exactly `AUDIO_BLOCK_SAMPLES` per channel
//! per period. The [`Reassembler`] bridges the two with a fill cursor into
//! the block being built and a read offset into the packet at the head of
//! the queue.

use std::net::Ipv4Addr;

use super::block::{BlockAllocator, SampleBlock};
use crate::constants::{AUDIO_BLOCK_SAMPLES, BYTES_PER_SAMPLE, MAX_CHANNELS};
use crate::directory::SubscriptionSpec;
use crate::protocol::{PacketKind, StreamName};
use crate::transport::{Clock, DatagramSocket, PacketQueue, QueuedPacket, Transport};

/// Reassembly counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    /// Complete block sets produced
    pub blocks: u64,
    /// Periods that produced no output
    pub missed: u64,
    /// Packets whose frame number did not follow the previous one
    pub frames_dropped: u64,
    /// Packets fully consumed and removed from the queue
    pub packets: u64,
}

/// De-interleaves queued packets into per-channel blocks
#[derive(Debug, Clone, Default)]
pub struct Reassembler {
    fill: usize,
    read_offset: usize,
    last_frame: Option<u32>,
    stats: InputStats,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples already written into the block being built
    pub fn fill_level(&self) -> usize {
        self.fill
    }

    pub fn stats(&self) -> InputStats {
        self.stats
    }

    /// Copy from `queue` into `blocks` until they are full or the queue is empty
    ///
    /// Returns true when the blocks are complete; the fill cursor then resets
    /// for the next period. Channels beyond those in a packet are written as
    /// silence. A packet leaves the queue only once all of its samples have
    /// been used.
    pub fn fill(&mut self, queue: &PacketQueue, blocks: &mut [SampleBlock]) -> bool {
        while self.fill < AUDIO_BLOCK_SAMPLES {
            let step = queue.with_front(|packet| self.copy_from(packet, blocks));
            let Some((copied, available, frame)) = step else {
                break;
            };

            self.fill += copied;
            if copied == available {
                queue.pop();
                self.read_offset = 0;
                self.last_frame = Some(frame);
                self.stats.packets += 1;
            } else {
                self.read_offset += copied;
            }
        }

        if self.fill == AUDIO_BLOCK_SAMPLES {
            self.fill = 0;
            self.stats.blocks += 1;
            true
        } else {
            false
        }
    }

    fn copy_from(&mut self, packet: &QueuedPacket, blocks: &mut [SampleBlock]) -> (usize, usize, u32) {
        let header = &packet.header;
        let channels = header.channels();
        let available = header.samples().saturating_sub(self.read_offset);
        let needed = AUDIO_BLOCK_SAMPLES - self.fill;
        let copied = available.min(needed);

        if self.read_offset == 0 {
            if let Some(last) = self.last_frame {
                if header.frame != last.wrapping_add(1) {
                    self.stats.frames_dropped += 1;
                }
            }
        }

        let payload = &packet.payload[..];
        for (ch, block) in blocks.iter_mut().enumerate() {
            let out = &mut block[self.fill..self.fill + copied];
            if ch >= channels {
                out.fill(0);
                continue;
            }
            for (j, sample) in out.iter_mut().enumerate() {
                let at = ((self.read_offset + j) * channels + ch) * BYTES_PER_SAMPLE;
                *sample = payload
                    .get(at..at + BYTES_PER_SAMPLE)
                    .map_or(0, |b| i16::from_le_bytes([b[0], b[1]]));
            }
        }
        (copied, available, header.frame)
    }

    /// Forget any partial block and frame history, keeping the counters
    pub fn reset(&mut self) {
        self.fill = 0;
        self.read_offset = 0;
        self.last_frame = None;
    }

    fn missed(&mut self) {
        self.stats.missed += 1;
    }
}

/// Audio input fed by one subscribed network stream
pub struct NetInput<A: BlockAllocator> {
    channels: usize,
    queue: PacketQueue,
    subscription: Option<usize>,
    allocator: A,
    pending: Vec<SampleBlock>,
    reassembler: Reassembler,
}

impl<A: BlockAllocator> NetInput<A> {
    /// Create an input producing `channels` blocks per period (1..=8)
    pub fn new(channels: usize, allocator: A) -> Self {
        Self {
            channels: channels.clamp(1, MAX_CHANNELS),
            queue: PacketQueue::for_kind(PacketKind::Audio),
            subscription: None,
            allocator,
            pending: Vec::new(),
            reassembler: Reassembler::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn subscription(&self) -> Option<usize> {
        self.subscription
    }

    /// Subscribe to `name`, optionally from one host or address
    ///
    /// An input holds at most one subscription; subscribing again returns the
    /// existing slot.
    pub fn subscribe<S: DatagramSocket, C: Clock>(
        &mut self,
        transport: &mut Transport<S, C>,
        name: StreamName,
        hostname: Option<&str>,
        addr: Option<Ipv4Addr>,
    ) -> Option<usize> {
        if self.subscription.is_some() {
            return self.subscription;
        }
        let mut spec = SubscriptionSpec::audio(name);
        if let Some(hostname) = hostname {
            spec = spec.from_host(hostname);
        }
        if let Some(addr) = addr {
            spec = spec.from_addr(addr);
        }
        self.subscription = transport.subscribe(spec, &self.queue);
        if self.subscription.is_none() {
            tracing::warn!("No free subscription slot for audio stream '{}'", name);
        }
        self.subscription
    }

    /// Release the subscription; queued packets are discarded
    pub fn unsubscribe<S: DatagramSocket, C: Clock>(&mut self, transport: &mut Transport<S, C>) {
        if let Some(sub) = self.subscription.take() {
            transport.unsubscribe(sub);
        }
        self.queue.clear();
        self.release_pending();
        self.reassembler.reset();
    }

    /// Run one audio period
    ///
    /// Returns one block per channel when a full period could be assembled.
    /// The caller hands the blocks back to the allocator when done.
    pub fn update(&mut self) -> Option<Vec<SampleBlock>> {
        if self.pending.is_empty() {
            if self.queue.is_empty() {
                self.reassembler.missed();
                return None;
            }
            if !self.allocate_pending() {
                self.reassembler.missed();
                return None;
            }
        }

        if self.reassembler.fill(&self.queue, &mut self.pending) {
            Some(std::mem::take(&mut self.pending))
        } else {
            self.reassembler.missed();
            None
        }
    }

    fn allocate_pending(&mut self) -> bool {
        for _ in 0..self.channels {
            match self.allocator.allocate() {
                Some(block) => self.pending.push(block),
                None => {
                    tracing::trace!("Block pool exhausted");
                    self.release_pending();
                    return false;
                }
            }
        }
        true
    }

    fn release_pending(&mut self) {
        for block in self.pending.drain(..) {
            self.allocator.release(block);
        }
    }

    /// Return blocks obtained from [`NetInput::update`]
    pub fn release(&self, blocks: Vec<SampleBlock>) {
        for block in blocks {
            self.allocator.release(block);
        }
    }

    pub fn stats(&self) -> InputStats {
        self.reassembler.stats()
    }
}

impl<A: BlockAllocator> Drop for NetInput<A> {
    fn drop(&mut self) {
        self.release_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::block::{create_shared_pool, SharedBlockPool};
    use crate::protocol::WireHeader;
    use bytes::Bytes;
    use proptest::prelude::*;

    /// Interleaved packet whose sample value encodes (frame index, channel)
    fn packet(samples: usize, channels: usize, frame: u32, start: i16) -> QueuedPacket {
        let header = WireHeader::audio(StreamName::truncated("in"), samples, channels, frame);
        let mut payload = Vec::with_capacity(samples * channels * 2);
        for s in 0..samples {
            for c in 0..channels {
                let value = (start + s as i16) * 10 + c as i16;
                payload.extend_from_slice(&value.to_le_bytes());
            }
        }
        QueuedPacket {
            stream: 0,
            kind: PacketKind::Audio,
            header,
            payload: Bytes::from(payload),
        }
    }

    fn blocks(n: usize) -> Vec<SampleBlock> {
        (0..n).map(|_| SampleBlock::new()).collect()
    }

    #[test]
    fn test_single_full_packet() {
        let queue = PacketQueue::new(12);
        queue.push(packet(128, 2, 0, 0)).unwrap();
        let mut r = Reassembler::new();
        let mut out = blocks(2);
        assert!(r.fill(&queue, &mut out));
        assert!(queue.is_empty());
        assert_eq!(out[0][0], 0);
        assert_eq!(out[1][0], 1);
        assert_eq!(out[0][127], 1270);
        assert_eq!(out[1][127], 1271);
    }

    #[test]
    fn test_packet_spans_two_blocks() {
        let queue = PacketQueue::new(12);
        queue.push(packet(89, 1, 0, 0)).unwrap();
        queue.push(packet(89, 1, 1, 89)).unwrap();
        queue.push(packet(89, 1, 2, 178)).unwrap();
        let mut r = Reassembler::new();

        let mut first = blocks(1);
        assert!(r.fill(&queue, &mut first));
        assert_eq!(queue.len(), 2);
        assert_eq!(first[0][88], 880);
        assert_eq!(first[0][89], 890);

        let mut second = blocks(1);
        assert!(r.fill(&queue, &mut second));
        assert_eq!(queue.len(), 1);
        assert_eq!(second[0][0], 1280);

        let mut third = blocks(1);
        assert!(!r.fill(&queue, &mut third));
        assert_eq!(r.fill_level(), 267 - 256);
        assert!(queue.is_empty());
        assert_eq!(r.stats().frames_dropped, 0);
        assert_eq!(r.stats().packets, 3);
    }

    #[test]
    fn test_missing_channels_zero_filled() {
        let queue = PacketQueue::new(12);
        queue.push(packet(128, 1, 0, 1)).unwrap();
        let mut r = Reassembler::new();
        let mut out = blocks(3);
        out[2][7] = 99;
        assert!(r.fill(&queue, &mut out));
        assert_eq!(out[0][0], 10);
        assert!(out[1].iter().all(|&s| s == 0));
        assert!(out[2].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_extra_packet_channels_ignored() {
        let queue = PacketQueue::new(12);
        queue.push(packet(128, 4, 0, 0)).unwrap();
        let mut r = Reassembler::new();
        let mut out = blocks(2);
        assert!(r.fill(&queue, &mut out));
        assert_eq!(out[1][3], 31);
    }

    #[test]
    fn test_frame_gap_counted_once_per_packet() {
        let queue = PacketQueue::new(12);
        queue.push(packet(100, 1, 5, 0)).unwrap();
        queue.push(packet(100, 1, 9, 0)).unwrap();
        queue.push(packet(100, 1, 10, 0)).unwrap();
        let mut r = Reassembler::new();
        let mut out = blocks(1);
        assert!(r.fill(&queue, &mut out));
        assert!(r.fill(&queue, &mut out));
        assert_eq!(r.stats().frames_dropped, 1);
    }

    #[test]
    fn test_net_input_missed_and_pool() {
        let pool: SharedBlockPool = create_shared_pool(2);
        let mut input = NetInput::new(2, pool.clone());

        assert!(input.update().is_none());
        assert_eq!(input.stats().missed, 1);

        input.queue().push(packet(64, 2, 0, 0)).unwrap();
        assert!(input.update().is_none());
        assert_eq!(input.stats().missed, 2);
        assert_eq!(pool.available(), 0);

        input.queue().push(packet(64, 2, 1, 64)).unwrap();
        let out = input.update().unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][64], 640);

        // pool is empty while the caller holds the blocks
        input.queue().push(packet(128, 2, 2, 0)).unwrap();
        assert!(input.update().is_none());
        assert_eq!(input.stats().missed, 3);
        assert_eq!(pool.exhausted_count(), 1);

        input.release(out);
        assert!(input.update().is_some());
    }

    proptest! {
        #[test]
        fn prop_lossless_reassembly_reproduces_stream(
            sizes in proptest::collection::vec(1usize..=256, 1..12),
            channels in 1usize..=4,
        ) {
            let queue = PacketQueue::new(64);
            let mut offset = 0usize;
            for (frame, &n) in sizes.iter().enumerate() {
                queue.push(packet(n, channels, frame as u32, offset as i16)).unwrap();
                offset += n;
            }
            let total = offset;

            let mut r = Reassembler::new();
            let mut produced = 0usize;
            loop {
                let mut out = blocks(channels);
                if !r.fill(&queue, &mut out) {
                    break;
                }
                for j in 0..AUDIO_BLOCK_SAMPLES {
                    for (c, block) in out.iter().enumerate() {
                        let expected = ((produced + j) as i16).wrapping_mul(10).wrapping_add(c as i16);
                        prop_assert_eq!(block[j], expected);
                    }
                }
                produced += AUDIO_BLOCK_SAMPLES;
            }
            prop_assert_eq!(produced, total / AUDIO_BLOCK_SAMPLES * AUDIO_BLOCK_SAMPLES);
            prop_assert_eq!(r.stats().frames_dropped, 0);
        }
    }
}
