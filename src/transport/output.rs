//! Outbound stream table and the output multiplexer
//!
//! Each tick sends at most one packet per output stream: the head of its
//! queue. A failed send leaves the packet where it is for the next tick.

use std::net::{Ipv4Addr, SocketAddrV4};

use super::queues::{PacketQueue, QueueHandle};
use super::socket::DatagramSocket;
use crate::directory::{StreamDirectory, StreamRecord};
use crate::protocol::{PacketKind, WireHeader};

/// Result of one multiplexer pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub sent: usize,
    pub failed: usize,
}

/// Local output streams and the queues feeding them
#[derive(Debug, Clone)]
pub struct OutputStreams {
    table: StreamDirectory,
    queues: Vec<QueueHandle>,
}

impl OutputStreams {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: StreamDirectory::new(capacity),
            queues: vec![QueueHandle::default(); capacity],
        }
    }

    /// Claim the first free slot
    pub fn register(
        &mut self,
        template: WireHeader,
        target: Ipv4Addr,
        kind: PacketKind,
        queue: QueueHandle,
    ) -> Option<usize> {
        let index = self.table.allocate(template, target, kind)?;
        self.queues[index] = queue;
        tracing::debug!(
            "Output stream '{}' -> {} in slot {}",
            template.stream_name,
            target,
            index
        );
        Some(index)
    }

    pub fn unregister(&mut self, index: usize) -> bool {
        if self.table.get(index).is_none() {
            return false;
        }
        self.table.deactivate(index);
        self.queues[index] = QueueHandle::default();
        true
    }

    pub fn set_host(&mut self, index: usize, host: usize) {
        if let Some(stream) = self.table.get_mut(index) {
            stream.host = Some(host);
        }
    }

    /// Attach `host` to every output aimed at `addr`
    pub fn set_host_for_addr(&mut self, addr: Ipv4Addr, host: usize) {
        for (_, stream) in self.table.iter_mut() {
            if stream.addr == addr {
                stream.host = Some(host);
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&StreamRecord> {
        self.table.get(index)
    }

    /// Queue feeding an output, if its owner still holds it
    pub fn queue(&self, index: usize) -> Option<PacketQueue> {
        self.table.get(index)?;
        self.queues.get(index)?.upgrade()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &StreamRecord)> {
        self.table.iter()
    }

    pub fn active_count(&self) -> usize {
        self.table.active_count()
    }

    /// Send the head packet of every non-empty output queue
    pub fn send_pending<S: DatagramSocket>(
        &mut self,
        socket: &S,
        now: u64,
        port: u16,
        broadcast: Ipv4Addr,
    ) -> SendReport {
        let mut report = SendReport::default();

        for (index, stream) in self.table.iter_mut() {
            let Some(queue) = self.queues[index].upgrade() else {
                continue;
            };
            let Some(datagram) = queue.with_front(|p| p.to_datagram()) else {
                continue;
            };

            let ip = if stream.addr.is_unspecified() {
                broadcast
            } else {
                stream.addr
            };
            match socket.send_to(&datagram, SocketAddrV4::new(ip, port)) {
                Ok(_) => {
                    queue.pop();
                    stream.last_packet = Some(now);
                    stream.stats.packets += 1;
                    stream.stats.sent += 1;
                    report.sent += 1;
                }
                Err(e) => {
                    tracing::debug!("Send on '{}' failed, retrying next tick: {}", stream.name(), e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}
