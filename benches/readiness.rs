//! Launch and frame-path microbenchmarks.
//!
//! Covers the pure hot paths: diagnostic classification (every line an
//! emulator prints crosses it), port block draws (one per launch attempt)
//! and the realtime frame codec (one per client message).
//!
//! Run with: cargo bench --bench readiness
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use speculos_farm::launcher::{PortAllocator, ReadinessSignal, classify_line};
use speculos_farm::{ClientFrame, ServerFrame};

// ============================================================================
// Sample Data
// ============================================================================

/// Captured boot transcript of one instance, readiness line last.
const BOOT_TRANSCRIPT: &[&str] = &[
    "speculos.mcu: starting vnc server on port 41002",
    "speculos.mcu: starting automation server on port 43002",
    "Loading app app_2.4.1.elf",
    "speculos.apdu: waiting for connection",
    "speculos.seproxyhal: patching svc instructions",
    "speculos.seproxyhal: using SDK version 2.1 on nanos",
];

// ============================================================================
// Benchmark: Readiness Classification
// ============================================================================

fn bench_classify(c: &mut Criterion) {
    c.bench_function("classify_boot_transcript", |b| {
        b.iter(|| {
            BOOT_TRANSCRIPT
                .iter()
                .map(|line| classify_line(black_box(line)))
                .filter(|signal| *signal == ReadinessSignal::Ready)
                .count()
        });
    });
}

// ============================================================================
// Benchmark: Port Block Draw
// ============================================================================

fn bench_port_draw(c: &mut Criterion) {
    c.bench_function("port_block_draw", |b| {
        let allocator = PortAllocator::new();
        b.iter(|| black_box(allocator.next()));
    });
}

// ============================================================================
// Benchmark: Frame Codec
// ============================================================================

fn bench_frame_codec(c: &mut Criterion) {
    let exchange = r#"{"type":"exchange","data":"e0c4000000"}"#;

    c.bench_function("parse_exchange_frame", |b| {
        b.iter(|| serde_json::from_str::<ClientFrame>(black_box(exchange)).unwrap());
    });

    c.bench_function("encode_response_frame", |b| {
        let frame = ServerFrame::Response {
            data: "3200000400049000".to_owned(),
        };
        b.iter(|| serde_json::to_string(black_box(&frame)).unwrap());
    });
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_classify, bench_port_draw, bench_frame_codec);
criterion_main!(benches);
