use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wbs_store::{Document, DocumentStore, LockCoordinator, StoreConfig, Task};

fn bench_path(name: &str, size: usize) -> PathBuf {
    std::env::temp_dir().join(format!("wbs_store_bench_{}_{}.json", name, size))
}

fn document_with_tasks(size: usize) -> Document {
    Document {
        tasks: (0..size)
            .map(|i| {
                Task {
                    id: format!("t-{i:04}"),
                    name: format!("task {i}"),
                    start: "2024-01-01".into(),
                    end: "2024-01-08".into(),
                    ..Task::default()
                }
                .into()
            })
            .collect(),
        ..Document::default()
    }
}

fn open_store(path: &Path, pretty: bool) -> DocumentStore {
    let _ = std::fs::remove_file(path);
    DocumentStore::new(StoreConfig::new(path).pretty(pretty))
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load");
    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("tasks", size), &size, |b, &size| {
            let path = bench_path("load", size);
            let store = open_store(&path, true);
            store.write(document_with_tasks(size), None).unwrap();
            b.iter(|| black_box(store.load().unwrap()));
            let _ = std::fs::remove_file(&path);
        });
    }
}

fn bench_versioned_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("versioned_write");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(8));
    for size in [10, 100, 1000] {
        for pretty in [true, false] {
            let label = if pretty { "pretty" } else { "compact" };
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                let path = bench_path(label, size);
                let store = open_store(&path, pretty);
                let doc = document_with_tasks(size);
                let mut version = store.write(doc.clone(), None).unwrap();
                b.iter(|| {
                    version = store.write(doc.clone(), Some(version.as_str())).unwrap();
                });
                let _ = std::fs::remove_file(&path);
            });
        }
    }
}

fn bench_modify(c: &mut Criterion) {
    let mut group = c.benchmark_group("modify");
    group.sample_size(50);
    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("tasks", size), &size, |b, &size| {
            let path = bench_path("modify", size);
            let store = open_store(&path, true);
            store.write(document_with_tasks(size), None).unwrap();
            b.iter(|| {
                store
                    .modify(None, |doc| {
                        for task in &mut doc.tasks {
                            let progress = task["progress"].as_u64().unwrap_or(0);
                            task["progress"] = ((progress + 1) % 100).into();
                        }
                        Ok(())
                    })
                    .unwrap()
            });
            let _ = std::fs::remove_file(&path);
        });
    }
}

fn bench_lock(c: &mut Criterion) {
    let path = bench_path("lock", 0);
    let coordinator = LockCoordinator::new(
        &path,
        Duration::from_secs(30),
        Duration::from_millis(100),
    );
    c.bench_function("lock_acquire_release", |b| {
        b.iter(|| {
            let guard = coordinator.acquire(Duration::from_secs(1)).unwrap();
            guard.release().unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_load,
    bench_versioned_write,
    bench_modify,
    bench_lock,
);
criterion_main!(benches);
