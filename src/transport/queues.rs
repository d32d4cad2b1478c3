//! Bounded packet queues and the enqueue path
//!
//! A queue is owned by its consumer (`NetInput`, `DataInput`, or the producer
//! side of an output stream). The transport only ever holds a [`QueueHandle`],
//! a weak reference that stops resolving once the owner drops the queue.
//!
//! Backpressure is tail-drop: when a queue is full the newest packet is
//! discarded and counted, everything already queued is kept.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use crate::constants::{HEADER_SIZE, MAX_AUDIO_QUEUE, MAX_DATA_QUEUE, MAX_PAYLOAD_SIZE};
use crate::directory::streams::StreamRecord;
use crate::directory::SubscriptionTable;
use crate::protocol::{PacketKind, WireHeader};

/// One packet held in a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    /// Stream slot the packet belongs to
    pub stream: usize,
    pub kind: PacketKind,
    pub header: WireHeader,
    pub payload: Bytes,
}

impl QueuedPacket {
    /// Bytes of payload in use
    pub fn used_len(&self) -> usize {
        self.payload.len()
    }

    /// Length of the datagram this packet puts on the wire
    ///
    /// Audio length is derived from the header fields, everything else from
    /// the stored payload.
    pub fn wire_len(&self) -> usize {
        if self.kind.is_audio() {
            self.header.audio_payload_len() + HEADER_SIZE
        } else {
            self.used_len() + HEADER_SIZE
        }
    }

    /// Serialize header and payload into a datagram of `wire_len()` bytes
    pub fn to_datagram(&self) -> BytesMut {
        let len = self.wire_len();
        let body = len - HEADER_SIZE;
        let mut buf = BytesMut::with_capacity(len);
        self.header.encode(&mut buf);
        let copied = body.min(self.payload.len());
        buf.put_slice(&self.payload[..copied]);
        buf.put_bytes(0, body - copied);
        buf
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub tail_drops: u64,
}

#[derive(Debug)]
struct QueueInner {
    packets: VecDeque<QueuedPacket>,
    capacity: usize,
    stats: QueueStats,
}

/// Owning handle to a bounded packet queue
#[derive(Debug, Clone)]
pub struct PacketQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                packets: VecDeque::with_capacity(capacity),
                capacity,
                stats: QueueStats::default(),
            })),
        }
    }

    /// Queue sized for the given packet kind
    pub fn for_kind(kind: PacketKind) -> Self {
        Self::new(queue_capacity(kind))
    }

    /// Weak handle for the transport side
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Append a packet; a full queue hands the packet back
    pub fn push(&self, packet: QueuedPacket) -> std::result::Result<(), QueuedPacket> {
        let mut inner = self.inner.lock();
        if inner.packets.len() >= inner.capacity {
            inner.stats.tail_drops += 1;
            return Err(packet);
        }
        inner.packets.push_back(packet);
        inner.stats.enqueued += 1;
        Ok(())
    }

    /// Append all packets or none of them
    ///
    /// Used for audio blocks split across several packets, which are useless
    /// to the receiver in part.
    pub fn push_all(&self, packets: Vec<QueuedPacket>) -> std::result::Result<(), Vec<QueuedPacket>> {
        let mut inner = self.inner.lock();
        if inner.packets.len() + packets.len() > inner.capacity {
            inner.stats.tail_drops += packets.len() as u64;
            return Err(packets);
        }
        inner.stats.enqueued += packets.len() as u64;
        inner.packets.extend(packets);
        Ok(())
    }

    pub fn pop(&self) -> Option<QueuedPacket> {
        let mut inner = self.inner.lock();
        let packet = inner.packets.pop_front();
        if packet.is_some() {
            inner.stats.dequeued += 1;
        }
        packet
    }

    /// Run `f` on the front packet without removing it
    pub fn with_front<R>(&self, f: impl FnOnce(&QueuedPacket) -> R) -> Option<R> {
        self.inner.lock().packets.front().map(f)
    }

    /// Used length of the front packet
    pub fn front_len(&self) -> Option<usize> {
        self.with_front(QueuedPacket::used_len)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().packets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.packets.len() >= inner.capacity
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Drop everything queued, returning how many packets were discarded
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.packets.len();
        inner.packets.clear();
        n
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }
}

/// Weak reference to a consumer-owned queue
#[derive(Debug, Clone, Default)]
pub struct QueueHandle {
    inner: Weak<Mutex<QueueInner>>,
}

impl QueueHandle {
    /// Resolve to the queue if its owner still holds it
    pub fn upgrade(&self) -> Option<PacketQueue> {
        self.inner.upgrade().map(|inner| PacketQueue { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Whether both handles refer to the same live queue
    pub fn same_queue(&self, other: &QueueHandle) -> bool {
        self.is_alive() && Weak::ptr_eq(&self.inner, &other.inner)
    }
}

/// Queue capacity used for packets of `kind`
pub fn queue_capacity(kind: PacketKind) -> usize {
    if kind.is_audio() {
        MAX_AUDIO_QUEUE
    } else {
        MAX_DATA_QUEUE
    }
}

/// What happened to an incoming packet on the enqueue path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Stream has no resolved subscription
    Unsubscribed,
    /// Subscription's owner dropped its queue
    QueueGone,
    /// Queue at capacity; the packet was discarded
    QueueFull,
    /// Datagram shorter than its header implies, or payload too large
    Malformed,
}

/// Place the payload of an accepted datagram on the subscriber's queue
///
/// The stream's last-packet time is refreshed before anything else so that
/// an unsubscribed stream stays alive while it keeps sending.
pub fn add_packet_to_queue(
    stream_index: usize,
    stream: &mut StreamRecord,
    subscriptions: &SubscriptionTable,
    kind: PacketKind,
    datagram: &[u8],
    now: u64,
) -> EnqueueOutcome {
    stream.last_packet = Some(now);
    stream.stats.packets += 1;

    let Some(sub) = stream.subscription.and_then(|s| subscriptions.get(s)) else {
        stream.stats.unsubscribed += 1;
        return EnqueueOutcome::Unsubscribed;
    };
    let Some(queue) = sub.queue.upgrade() else {
        stream.stats.unsubscribed += 1;
        return EnqueueOutcome::QueueGone;
    };

    let header = stream.header;
    let body = datagram.get(HEADER_SIZE..).unwrap_or_default();
    let used = if kind.is_audio() {
        header.audio_payload_len()
    } else {
        body.len().min(MAX_PAYLOAD_SIZE)
    };
    if used > body.len() || used > MAX_PAYLOAD_SIZE {
        tracing::trace!(
            "Malformed packet on '{}': {} bytes, header implies {}",
            header.stream_name,
            body.len(),
            used
        );
        return EnqueueOutcome::Malformed;
    }

    let packet = QueuedPacket {
        stream: stream_index,
        kind,
        header,
        payload: Bytes::copy_from_slice(&body[..used]),
    };
    if queue.push(packet).is_err() {
        stream.stats.tail_drops += 1;
        tracing::trace!("Queue full for '{}', dropping frame {}", header.stream_name, header.frame);
        return EnqueueOutcome::QueueFull;
    }

    if let Some(last) = stream.last_frame {
        let gap = header.frame.wrapping_sub(last);
        if gap != 1 {
            stream.stats.frames_dropped += u64::from(gap);
        }
    }
    stream.last_frame = Some(header.frame);
    stream.stats.queued += 1;
    EnqueueOutcome::Queued
}
