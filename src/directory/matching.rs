//! Stream ↔ subscription matching
//!
//! A stream and a subscription match when both are active, the stream name
//! and exact `format_SR` byte agree, the optional service-type and
//! `format_bit` filters agree, and the source is acceptable: the subscription's address, the address its
//! hostname resolves to, the explicit "any" address, or no source given at
//! all (promiscuous).
//!
//! Scan order decides ties: for each stream the lowest-index matching
//! subscription wins. Each stream feeds at most one subscription, but a
//! service or serial subscription may be fed by any number of streams.
//! Audio subscriptions take a single source, since the reassembler follows
//! one frame sequence.

use std::net::Ipv4Addr;

use super::hosts::HostDirectory;
use super::streams::{StreamDirectory, StreamRecord};
use super::subscriptions::{Subscription, SubscriptionTable};

/// Whether `sub` wants `stream`
pub fn matches(stream: &StreamRecord, sub: &Subscription, hosts: &HostDirectory) -> bool {
    if !stream.active || !sub.active {
        return false;
    }
    let spec = &sub.spec;
    if spec.stream_name != stream.header.stream_name || spec.protocol != stream.header.format_sr {
        return false;
    }
    if let Some(service_type) = spec.service_type {
        if service_type != stream.header.service_type() {
            return false;
        }
    }
    if spec.format_bit.is_some_and(|bit| bit != stream.header.format_bit) {
        return false;
    }

    match (spec.addr, spec.hostname.as_deref()) {
        (Some(addr), _) if addr == stream.addr || addr == Ipv4Addr::UNSPECIFIED => true,
        (_, Some(hostname)) if hosts.addr_for_name(hostname) == Some(stream.addr) => true,
        (None, None) => true,
        _ => false,
    }
}

/// Link `stream` and `sub` in both directions, clearing stale back-references
pub fn link(streams: &mut StreamDirectory, subs: &mut SubscriptionTable, stream: usize, sub: usize) {
    let previous_sub = streams.slot(stream).and_then(|s| s.subscription);
    if let Some(s) = streams.slot_mut(stream) {
        s.subscription = Some(sub);
    }
    if let Some(s) = subs.get_mut(sub) {
        s.stream = Some(stream);
    }
    if let Some(old) = previous_sub.filter(|&old| old != sub) {
        refresh_back_ref(streams, subs, old);
    }
}

/// Break the link held by `stream`, if any
pub fn unlink_stream(streams: &mut StreamDirectory, subs: &mut SubscriptionTable, stream: usize) {
    let Some(record) = streams.slot_mut(stream) else {
        return;
    };
    if let Some(sub) = record.subscription.take() {
        refresh_back_ref(streams, subs, sub);
    }
}

/// Point `sub` at an active stream that still feeds it, or at nothing
pub fn refresh_back_ref(streams: &StreamDirectory, subs: &mut SubscriptionTable, sub: usize) {
    let Some(s) = subs.get_mut(sub) else {
        return;
    };
    let still_fed = s
        .stream
        .is_some_and(|stream| streams.get(stream).is_some_and(|r| r.subscription == Some(sub)));
    if !still_fed {
        s.stream = streams.find_by_subscription(sub);
    }
}

/// Find the lowest-index subscription for one stream and (re)link it
///
/// Returns the linked subscription. A stream whose current link no longer
/// matches is unlinked.
pub fn match_stream(
    streams: &mut StreamDirectory,
    subs: &mut SubscriptionTable,
    hosts: &HostDirectory,
    stream: usize,
) -> Option<usize> {
    let record = streams.get(stream)?;

    let single_source = record.kind.is_audio();
    let best = subs.iter().find_map(|(i, sub)| {
        let taken_elsewhere = single_source
            && sub.stream.is_some_and(|other| {
                other != stream && streams.get(other).is_some_and(|o| o.subscription == Some(i))
            });
        (!taken_elsewhere && matches(record, sub, hosts)).then_some(i)
    });

    match best {
        Some(sub) => {
            if record.subscription != Some(sub) {
                tracing::debug!(
                    "Linked stream '{}' from {} to subscription {}",
                    record.header.stream_name,
                    record.addr,
                    sub
                );
            }
            link(streams, subs, stream, sub);
        }
        None => {
            if record.subscription.is_some() {
                tracing::debug!("Stream '{}' lost its subscription", record.header.stream_name);
                unlink_stream(streams, subs, stream);
            }
        }
    }
    best
}

/// Targeted pass over the streams originating from `addr`
pub fn match_host_streams(
    streams: &mut StreamDirectory,
    subs: &mut SubscriptionTable,
    hosts: &HostDirectory,
    addr: Ipv4Addr,
) -> usize {
    let targets: Vec<usize> = streams
        .iter()
        .filter(|(_, s)| s.addr == addr)
        .map(|(i, _)| i)
        .collect();
    targets
        .into_iter()
        .filter(|&i| match_stream(streams, subs, hosts, i).is_some())
        .count()
}

/// Global sweep: every active stream in scan order
///
/// Returns the number of streams linked after the sweep.
pub fn sweep(streams: &mut StreamDirectory, subs: &mut SubscriptionTable, hosts: &HostDirectory) -> usize {
    let mut linked = 0;
    for i in 0..streams.capacity() {
        if streams.get(i).is_some() && match_stream(streams, subs, hosts, i).is_some() {
            linked += 1;
        }
    }
    linked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::SubscriptionSpec;
    use crate::protocol::header::{SERVICE_CHAT_UTF8, SERVICE_FUNCTION_REQUEST, SERVICE_RT_PACKET};
    use crate::protocol::{PacketKind, PingPayload, StreamName, WireHeader};
    use crate::transport::queues::PacketQueue;

    const DEAD: u64 = 6000;

    struct Fixture {
        streams: StreamDirectory,
        subs: SubscriptionTable,
        hosts: HostDirectory,
        queues: Vec<PacketQueue>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                streams: StreamDirectory::new(8),
                subs: SubscriptionTable::new(8),
                hosts: HostDirectory::new(8),
                queues: Vec::new(),
            }
        }

        fn stream(&mut self, name: &str, addr: Ipv4Addr) -> usize {
            let hdr = WireHeader::audio(StreamName::truncated(name), 128, 2, 0);
            self.hosts.add_host(addr);
            self.streams
                .register(&hdr, addr, PacketKind::Audio, 0, DEAD)
                .unwrap()
        }

        fn chat_stream(&mut self, name: &str, addr: Ipv4Addr) -> usize {
            let hdr = WireHeader::service(
                StreamName::truncated(name),
                SERVICE_CHAT_UTF8,
                SERVICE_FUNCTION_REQUEST,
                0,
            );
            self.hosts.add_host(addr);
            self.streams
                .register(&hdr, addr, PacketKind::Chat, 0, DEAD)
                .unwrap()
        }

        fn subscribe(&mut self, spec: SubscriptionSpec) -> usize {
            let queue = PacketQueue::new(12);
            let idx = self.subs.add(spec, queue.handle()).unwrap();
            self.queues.push(queue);
            idx
        }

        fn sweep(&mut self) -> usize {
            sweep(&mut self.streams, &mut self.subs, &self.hosts)
        }

        fn link_of(&self, stream: usize) -> Option<usize> {
            self.streams.get(stream).and_then(|s| s.subscription)
        }
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 0, last)
    }

    fn audio(name: &str) -> SubscriptionSpec {
        SubscriptionSpec::audio(StreamName::truncated(name))
    }

    #[test]
    fn test_waiting_subscription_resolves_in_one_sweep() {
        let mut fx = Fixture::new();
        let sub = fx.subscribe(audio("mix"));
        assert_eq!(fx.sweep(), 0);

        let stream = fx.stream("mix", ip(2));
        assert_eq!(fx.sweep(), 1);
        assert_eq!(fx.link_of(stream), Some(sub));
        assert_eq!(fx.subs.get(sub).unwrap().stream, Some(stream));
    }

    #[test]
    fn test_name_and_protocol_must_match() {
        let mut fx = Fixture::new();
        let stream = fx.stream("mix", ip(2));
        fx.subscribe(audio("other"));
        fx.subscribe(SubscriptionSpec::with_protocol(StreamName::truncated("mix"), 0x03));
        fx.sweep();
        assert_eq!(fx.link_of(stream), None);
    }

    #[test]
    fn test_address_rules() {
        let mut fx = Fixture::new();
        let stream = fx.stream("mix", ip(2));

        fx.subscribe(audio("mix").from_addr(ip(3)));
        fx.sweep();
        assert_eq!(fx.link_of(stream), None);

        let any = fx.subscribe(audio("mix").from_addr(Ipv4Addr::UNSPECIFIED));
        fx.sweep();
        assert_eq!(fx.link_of(stream), Some(any));
    }

    #[test]
    fn test_hostname_resolution() {
        let mut fx = Fixture::new();
        let stream = fx.stream("mix", ip(2));
        let sub = fx.subscribe(audio("mix").from_host("studio"));
        fx.sweep();
        assert_eq!(fx.link_of(stream), None);

        let host = fx.hosts.find_by_addr(ip(2)).unwrap();
        let ping = PingPayload {
            host_name: "studio".to_string(),
            ..Default::default()
        };
        fx.hosts.set_identity(host, &ping);
        assert_eq!(
            match_host_streams(&mut fx.streams, &mut fx.subs, &fx.hosts, ip(2)),
            1
        );
        assert_eq!(fx.link_of(stream), Some(sub));
    }

    #[test]
    fn test_lowest_index_wins_specific_vs_promiscuous() {
        let mut fx = Fixture::new();
        let stream = fx.stream("mix", ip(2));
        let promiscuous = fx.subscribe(audio("mix"));
        let _specific = fx.subscribe(audio("mix").from_addr(ip(2)));
        fx.sweep();
        assert_eq!(fx.link_of(stream), Some(promiscuous));

        let mut fx = Fixture::new();
        let stream = fx.stream("mix", ip(2));
        let specific = fx.subscribe(audio("mix").from_addr(ip(2)));
        let _promiscuous = fx.subscribe(audio("mix"));
        fx.sweep();
        assert_eq!(fx.link_of(stream), Some(specific));
    }

    #[test]
    fn test_audio_subscription_takes_one_source() {
        let mut fx = Fixture::new();
        let first = fx.stream("mix", ip(2));
        let second = fx.stream("mix", ip(3));
        let sub = fx.subscribe(audio("mix"));
        fx.sweep();
        assert_eq!(fx.link_of(first), Some(sub));
        assert_eq!(fx.link_of(second), None);

        // the second source is picked up once the first goes away
        fx.streams.deactivate(first);
        fx.sweep();
        assert_eq!(fx.link_of(second), Some(sub));
        assert_eq!(fx.subs.get(sub).unwrap().stream, Some(second));
    }

    #[test]
    fn test_chat_subscription_fed_by_two_hosts() {
        let mut fx = Fixture::new();
        let first = fx.chat_stream("Chat", ip(2));
        let second = fx.chat_stream("Chat", ip(3));
        let sub = fx.subscribe(SubscriptionSpec::service(
            StreamName::truncated("Chat"),
            Some(SERVICE_CHAT_UTF8),
        ));
        assert_eq!(fx.sweep(), 2);
        assert_eq!(fx.link_of(first), Some(sub));
        assert_eq!(fx.link_of(second), Some(sub));

        // losing one source leaves the other feeding the subscription
        assert_eq!(fx.streams.deactivate(first), Some(sub));
        refresh_back_ref(&fx.streams, &mut fx.subs, sub);
        assert_eq!(fx.subs.get(sub).unwrap().stream, Some(second));
        assert_eq!(fx.sweep(), 1);
        assert_eq!(fx.link_of(second), Some(sub));
    }

    #[test]
    fn test_service_type_filter() {
        let mut fx = Fixture::new();
        let chat_hdr = WireHeader::service(
            StreamName::truncated("talk"),
            SERVICE_CHAT_UTF8,
            SERVICE_FUNCTION_REQUEST,
            0,
        );
        let rt_hdr = WireHeader::service(
            StreamName::truncated("talk"),
            SERVICE_RT_PACKET,
            SERVICE_FUNCTION_REQUEST,
            0,
        );
        let chat = fx.streams.register(&chat_hdr, ip(2), PacketKind::Chat, 0, DEAD).unwrap();
        let rt = fx.streams.register(&rt_hdr, ip(3), PacketKind::Service, 0, DEAD).unwrap();

        let sub = fx.subscribe(SubscriptionSpec::service(
            StreamName::truncated("talk"),
            Some(SERVICE_CHAT_UTF8),
        ));
        fx.sweep();
        assert_eq!(fx.link_of(chat), Some(sub));
        assert_eq!(fx.link_of(rt), None);
    }

    #[test]
    fn test_removed_subscription_unlinks_on_sweep() {
        let mut fx = Fixture::new();
        let stream = fx.stream("mix", ip(2));
        let sub = fx.subscribe(audio("mix"));
        fx.sweep();
        fx.subs.remove(sub);
        fx.sweep();
        assert_eq!(fx.link_of(stream), None);
    }

    #[test]
    fn test_relink_clears_stale_back_reference() {
        let mut fx = Fixture::new();
        let stream = fx.stream("mix", ip(2));
        let unrelated = fx.subscribe(audio("other"));
        let specific = fx.subscribe(audio("mix").from_addr(ip(2)));
        fx.sweep();
        assert_eq!(fx.link_of(stream), Some(specific));

        // a lower slot now holds a matching subscription and takes over
        fx.subs.remove(unrelated);
        let promiscuous = fx.subscribe(audio("mix"));
        assert_eq!(promiscuous, 0);
        fx.sweep();
        assert_eq!(fx.link_of(stream), Some(promiscuous));
        assert_eq!(fx.subs.get(promiscuous).unwrap().stream, Some(stream));
        assert_eq!(fx.subs.get(specific).unwrap().stream, None);
    }
}
