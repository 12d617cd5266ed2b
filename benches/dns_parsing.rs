use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wayfind_dns::dns::Message;

const A_QUERY: &[u8] = &[
    0x12, 0x34, // id
    0x01, 0x00, // flags: RD=1
    0x00, 0x01, // qdcount
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // an/ns/ar count
    0x06, b'g', b'o', b'o', b'g', b'l', b'e', 0x03, b'c', b'o', b'm', 0x00, // google.com
    0x00, 0x01, // A
    0x00, 0x01, // IN
];

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_a_query", |b| {
        b.iter(|| black_box(Message::parse(black_box(A_QUERY)).unwrap()));
    });
}

fn bench_serialize(c: &mut Criterion) {
    let query = Message::parse(A_QUERY).unwrap();
    let response = query.new_response(0, Vec::new());
    c.bench_function("serialize_empty_response", |b| {
        b.iter(|| black_box(response.serialize(Some(512)).unwrap()));
    });
}

criterion_group!(benches, bench_parse, bench_serialize);
criterion_main!(benches);
