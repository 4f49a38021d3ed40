//! Benchmark for message encode/decode.
//!
//! Run with: cargo bench --package tickmesh_networking --bench codec_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tickmesh_networking::protocol::{decode, MasterInfo, MessageSerializer, SlaveInfo};
use tickmesh_networking::{MasterPayload, Message, PeerIndex, SlavePayload, MAX_MASTER_PAYLOAD};

fn master_info(len: usize) -> Message {
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    Message::MasterInfo(MasterInfo {
        master_index: PeerIndex::FIRST,
        resync: false,
        active: [true; tickmesh_networking::MAX_PLAYERS],
        payload: MasterPayload::from_slice(&bytes).unwrap(),
    })
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_master_info");
    for len in [0usize, 64, MAX_MASTER_PAYLOAD] {
        let message = master_info(len);
        let mut serializer = MessageSerializer::new();
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(format!("{len}_bytes"), |b| {
            b.iter(|| black_box(serializer.serialize(black_box(&message)).unwrap().len()));
        });
    }
    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_master_info");
    for len in [0usize, 64, MAX_MASTER_PAYLOAD] {
        let datagram = MessageSerializer::new().serialize(&master_info(len)).unwrap().to_vec();
        group.throughput(Throughput::Bytes(datagram.len() as u64));
        group.bench_function(format!("{len}_bytes"), |b| {
            b.iter(|| black_box(decode(black_box(&datagram)).unwrap()));
        });
    }
    group.finish();
}

fn benchmark_slave_round_trip(c: &mut Criterion) {
    let message = Message::SlaveInfo(SlaveInfo {
        player_index: PeerIndex::new(1).unwrap(),
        resync_request: true,
        payload: SlavePayload::from_slice(b"x=12 y=40 firing").unwrap(),
    });
    let mut serializer = MessageSerializer::new();

    c.bench_function("slave_info_round_trip", |b| {
        b.iter(|| {
            let datagram = serializer.serialize(black_box(&message)).unwrap();
            black_box(decode(datagram).unwrap())
        });
    });
}

criterion_group!(benches, benchmark_encode, benchmark_decode, benchmark_slave_round_trip);
criterion_main!(benches);
