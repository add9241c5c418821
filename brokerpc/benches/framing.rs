//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! Frame and header block benchmarks.
//!
//! Measures the per-message work the runtime adds on top of the payload:
//! - Frame encode and decode at several payload sizes
//! - Request header block write and read
//! - Reply correlation through the registry

use brokerpc::context::Context;
use brokerpc::registry::Registry;
use brokerpc::wire;
use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");

    for size in [100usize, 1024, 64 * 1024] {
        let payload = vec![0xA5u8; size];
        let frame = wire::encode(&payload).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, payload| {
            b.iter(|| wire::encode(black_box(payload)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, frame| {
            b.iter(|| wire::decode(black_box(frame)).unwrap().len());
        });
    }

    group.finish();
}

fn bench_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("headers");

    let mut ctx = Context::new();
    for i in 0..8 {
        ctx.add_request_header(format!("x-header-{i}"), "value").unwrap();
    }
    let block = wire::write_request_header(&ctx).unwrap();

    group.bench_function("write_request_header", |b| {
        b.iter(|| wire::write_request_header(black_box(&ctx)).unwrap());
    });
    group.bench_function("read_request_header", |b| {
        b.iter(|| wire::read_request_header(black_box(&block)).unwrap());
    });

    group.finish();
}

fn bench_correlation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("registry_register_execute", |b| {
        let registry = Registry::new();
        b.to_async(&rt).iter(|| {
            let ctx = Context::new();
            let reply = registry.register(&ctx).unwrap();
            let request = wire::write_request_header(&ctx).unwrap();
            let (served, _) = wire::read_request_header(&request).unwrap();
            let mut frame = BytesMut::from(&wire::write_response_header(&served).unwrap()[..]);
            frame.extend_from_slice(b"reply");
            let frame = wire::encode(&frame).unwrap();
            registry.execute(&frame).unwrap();
            async move { reply.await.unwrap() }
        });
    });
}

criterion_group!(benches, bench_frame, bench_headers, bench_correlation);
criterion_main!(benches);
