//! Header codec and reassembly benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vban_transport::audio::{NetOutput, Reassembler, SampleBlock};
use vban_transport::protocol::{classify_bytes, StreamName, WireHeader};

fn decode_benchmark(c: &mut Criterion) {
    let hdr = WireHeader::audio(StreamName::truncated("Stream1"), 128, 2, 42);
    let mut datagram = hdr.to_bytes().to_vec();
    datagram.resize(datagram.len() + hdr.audio_payload_len(), 0);

    c.bench_function("decode_header", |b| {
        b.iter(|| black_box(WireHeader::decode(black_box(&datagram)).unwrap()))
    });

    c.bench_function("classify_datagram", |b| {
        b.iter(|| black_box(classify_bytes(black_box(&datagram))))
    });
}

fn reassembly_benchmark(c: &mut Criterion) {
    let block = SampleBlock::new();
    let refs: Vec<Option<&[i16]>> = (0..8).map(|_| Some(&block[..])).collect();
    let mut output = NetOutput::new(StreamName::truncated("Stream1"), 8);
    let mut reassembler = Reassembler::new();
    let mut blocks: Vec<SampleBlock> = (0..8).map(|_| SampleBlock::new()).collect();

    c.bench_function("pack_and_reassemble_8ch", |b| {
        b.iter(|| {
            output.transmit(&refs);
            black_box(reassembler.fill(output.queue(), &mut blocks))
        })
    });
}

criterion_group!(benches, decode_benchmark, reassembly_benchmark);
criterion_main!(benches);
