//! Performance benchmarks for revsync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use revsync_engine::{
    Change, ClientSync, ContentHasher, DigestAlgorithm, MdEntry, MemoryAdapter, MemoryStore,
    PrimaryKey, RowData, ServerSync, SyncConfig, TableDef, TableSyncStrategies,
};
use serde_json::json;

fn config() -> SyncConfig {
    SyncConfig::new(TableSyncStrategies::default().with_table("users"))
}

fn database() -> MemoryStore {
    let db = MemoryStore::new();
    db.create_table(TableDef::new("users", "id", ["name", "email", "age"]))
        .unwrap();
    db
}

fn user(id: i64) -> RowData {
    serde_json::from_value(json!({
        "id": id,
        "name": "Test User",
        "email": format!("user{id}@example.com"),
        "age": 30
    }))
    .unwrap()
}

fn changes(size: i64, base: u64) -> Vec<Change> {
    (0..size)
        .map(|id| Change::live(MdEntry::live("users", PrimaryKey::Int(id), base, "x"), user(id)))
        .collect()
}

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");
    let row = user(1);

    for algorithm in [DigestAlgorithm::Md5, DigestAlgorithm::Sha1, DigestAlgorithm::Sha256] {
        let hasher = ContentHasher::new(algorithm);
        group.bench_function(algorithm.to_string(), |b| {
            b.iter(|| hasher.hash(black_box(Some(&row))))
        });
    }

    group.finish();
}

fn bench_apply_changes(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_changes");

    for size in [10i64, 100, 1000].iter() {
        // Fresh inserts into an empty table
        group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
            let batch = changes(size, 0);
            b.iter(|| {
                let db = database();
                let mut server = ServerSync::new(db.connect(), config(), None).unwrap();
                server.apply_changes(black_box(&batch), 0).unwrap()
            })
        });

        // Every row collides with a newer server revision
        group.bench_with_input(BenchmarkId::new("conflicts", size), size, |b, &size| {
            let db = database();
            let mut server = ServerSync::new(db.connect(), config(), None).unwrap();
            server.apply_changes(&changes(size, 0), 0).unwrap();
            server.apply_changes(&changes(size, 1), 1).unwrap();
            let stale = changes(size, 1);

            b.iter(|| {
                let current = db.revision();
                server.apply_changes(black_box(&stale), current).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_get_changes(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_changes");

    for size in [100i64, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("since_zero", size), size, |b, &size| {
            let db = database();
            let mut server = ServerSync::new(db.connect(), config(), None).unwrap();
            server.apply_changes(&changes(size, 0), 0).unwrap();

            b.iter(|| server.get_changes(black_box(0)).unwrap())
        });
    }

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_round");

    group.bench_function("client_sync_100", |b| {
        b.iter(|| {
            let server_db = database();
            let client_db = database();
            let mut server: ServerSync<MemoryAdapter> =
                ServerSync::new(server_db.connect(), config(), None).unwrap();
            let mut client = ClientSync::new(client_db.connect(), config(), None).unwrap();
            for id in 0..100 {
                client
                    .record_local_change("users", PrimaryKey::Int(id), user(id))
                    .unwrap();
            }
            client.sync(&mut server).unwrap()
        })
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    let batch = changes(100, 3);

    group.bench_function("changes_to_json", |b| {
        b.iter(|| serde_json::to_string(black_box(&batch)).unwrap())
    });

    let json = serde_json::to_string(&batch).unwrap();
    group.bench_function("changes_from_json", |b| {
        b.iter(|| serde_json::from_str::<Vec<Change>>(black_box(&json)).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_hashing,
    bench_apply_changes,
    bench_get_changes,
    bench_round_trip,
    bench_serialization,
);
criterion_main!(benches);
