//! Benchmarks for the progress record codec.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stagedeploy::config::{Configuration, FeatureToggles};
use stagedeploy::progress::{decode, encode, ProgressRecord};

fn record() -> ProgressRecord {
    ProgressRecord {
        last_completed_stage: 5,
        last_completed_stage_name: "Store configuration parameters".to_string(),
        configuration: Configuration::new("demo-a1b2c3")
            .with_region("eu-west-1")
            .with_profile("ops team")
            .with_toggles(FeatureToggles {
                skip_prerequisites: true,
                no_identifier_suffix: false,
            }),
        timestamp: Utc::now(),
    }
}

fn progress_benchmark(c: &mut Criterion) {
    let record = record();
    let text = encode(&record);

    c.bench_function("encode", |b| b.iter(|| encode(black_box(&record))));
    c.bench_function("decode", |b| b.iter(|| decode(black_box(&text))));
}

criterion_group!(benches, progress_benchmark);
criterion_main!(benches);
