//! Performance benchmarks for snapsearch
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use snapsearch::index::{ManifestIndex, ManifestIndexer, RepositoryIndexer, SearchIndexClient};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

/// Create a source tree and its manifest for the search benchmarks
fn create_benchmark_fixtures() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = temp_dir.path().to_path_buf();
    let source = root.join("source");

    for i in 0..50 {
        let dir = source.join(format!("album_{}", i % 5));
        fs::create_dir_all(&dir).expect("Failed to create dir");
        fs::write(
            dir.join(format!("track_{i:02}.mp3")),
            format!("audio payload {i}").repeat(64),
        )
        .expect("Failed to write file");
        fs::write(
            dir.join(format!("notes_{i:02}.txt")),
            format!("session notes {i}").repeat(16),
        )
        .expect("Failed to write file");
    }

    let manifest = root.join("manifest.jsonl");
    ManifestIndexer::new(&source, &manifest)
        .run(&|_| {}, &AtomicBool::new(false))
        .expect("Failed to build manifest");

    (temp_dir, manifest)
}

fn bench_query_parsing(c: &mut Criterion) {
    let queries = vec![
        "report",
        "two words",
        "type:audio",
        "size:>10mb",
        "+invoice type:document size:<=1gb",
        "modified:today",
        "updated:recently",
        "holiday type:image modified:yesterday",
    ];

    let mut group = c.benchmark_group("query_parsing");
    for query in queries {
        group.bench_with_input(BenchmarkId::from_parameter(query), &query, |b, &q| {
            b.iter(|| snapsearch::query::parse_query(black_box(q)))
        });
    }
    group.finish();
}

fn bench_manifest_search(c: &mut Criterion) {
    let (_temp_dir, manifest) = create_benchmark_fixtures();
    let index = ManifestIndex::new(&manifest);

    let mut group = c.benchmark_group("manifest_search");

    group.bench_function("word", |b| {
        let query = snapsearch::query::parse_query("track").expect("query parses");
        b.iter(|| index.search(black_box(&query)))
    });

    group.bench_function("extension", |b| {
        let query = snapsearch::query::parse_query("type:audio").expect("query parses");
        b.iter(|| index.search(black_box(&query)))
    });

    group.bench_function("size_filter", |b| {
        let query = snapsearch::query::parse_query("size:>1kb").expect("query parses");
        b.iter(|| index.search(black_box(&query)))
    });

    group.finish();
}

criterion_group!(benches, bench_query_parsing, bench_manifest_search);
criterion_main!(benches);
