use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::{HeaderMap, HeaderValue, Method};
use serde_json::json;
use uuid::Uuid;

use idempotent_payments::config::IdempotencySettings;
use idempotent_payments::idempotency::{fingerprint, IdempotencyKey, KeyValidator, ResponseSnapshot};

fn benchmark_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for size in [128usize, 4 * 1024, 64 * 1024].iter() {
        let body = vec![b'x'; *size];
        group.bench_with_input(BenchmarkId::new("sha256_hex", size), &body, |b, body| {
            b.iter(|| black_box(fingerprint(black_box(body))))
        });
    }

    group.finish();
}

fn benchmark_key_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_validation");
    let validator = KeyValidator::new(&IdempotencySettings::default()).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(
        "Idempotency-Key",
        HeaderValue::from_str(&Uuid::new_v4().to_string().to_uppercase()).unwrap(),
    );

    group.bench_function("check_uuid_header", |b| {
        b.iter(|| black_box(validator.check(black_box(&Method::POST), black_box(&headers))))
    });

    let opaque = "order-2026-10-19-000042";
    group.bench_function("parse_opaque_key", |b| {
        b.iter(|| black_box(IdempotencyKey::parse(black_box(opaque), false)))
    });

    group.finish();
}

fn benchmark_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    let data = json!({
        "id": Uuid::new_v4(),
        "type": "payment",
        "amount": "150000.00",
        "status": "pending",
        "consumerId": Uuid::new_v4(),
    });
    let encoded = ResponseSnapshot::capture(201, "Transaction created successfully", &data)
        .unwrap()
        .encode()
        .unwrap();

    group.bench_function("decode", |b| {
        b.iter(|| black_box(ResponseSnapshot::decode(black_box(&encoded))))
    });

    group.finish();
}

criterion_group!(benches, benchmark_fingerprint, benchmark_key_validation, benchmark_snapshot);
criterion_main!(benches);
