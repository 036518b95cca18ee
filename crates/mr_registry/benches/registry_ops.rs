use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use fabric_mr_registry::{AccessFlags, Iovec, MrAttr, MrMode, MrRegistry};

const BATCH_SIZE: u64 = 1024;
const REGION_LEN: u64 = 0x1000;

fn attr_for(index: u64) -> MrAttr {
    let base = 0x10_0000 + index * 2 * REGION_LEN;
    MrAttr::new(
        vec![Iovec::new(base, REGION_LEN)],
        AccessFlags::REMOTE_READ | AccessFlags::REMOTE_WRITE,
    )
    .with_requested_key(base)
}

fn populated(mode: MrMode) -> (MrRegistry<u64>, Vec<u64>) {
    let mut registry = MrRegistry::open(mode);
    let keys = (0..BATCH_SIZE)
        .map(|i| registry.insert(&attr_for(i), i).expect("insert admitted"))
        .collect();
    (registry, keys)
}

fn benchmark_insert_erase(c: &mut Criterion) {
    let attrs: Vec<MrAttr> = (0..BATCH_SIZE).map(attr_for).collect();

    let mut group = c.benchmark_group("mr_registry_insert_erase");
    group.throughput(Throughput::Elements(BATCH_SIZE));
    for mode in [MrMode::Assigned, MrMode::CallerSupplied] {
        group.bench_function(format!("{mode:?}_batch_1024"), |b| {
            b.iter(|| {
                let mut registry = MrRegistry::open(mode);
                let keys: Vec<u64> = attrs
                    .iter()
                    .zip(0u64..)
                    .map(|(attr, handle)| registry.insert(attr, handle).expect("insert admitted"))
                    .collect();
                for key in keys {
                    black_box(registry.erase(key).expect("erase live key"));
                }
                registry.close().expect("empty registry closes");
            });
        });
    }
    group.finish();
}

fn benchmark_retrieve(c: &mut Criterion) {
    let (assigned, assigned_keys) = populated(MrMode::Assigned);
    let (supplied, supplied_keys) = populated(MrMode::CallerSupplied);

    let mut group = c.benchmark_group("mr_registry_retrieve");
    group.throughput(Throughput::Elements(BATCH_SIZE));
    group.bench_function("assigned_absolute", |b| {
        b.iter(|| {
            for (i, key) in assigned_keys.iter().enumerate() {
                let base = 0x10_0000 + i as u64 * 2 * REGION_LEN;
                black_box(
                    assigned
                        .retrieve(*key, base + 0x80, 0x40, AccessFlags::REMOTE_READ)
                        .expect("access granted"),
                );
            }
        });
    });
    group.bench_function("caller_supplied_relative", |b| {
        b.iter(|| {
            for key in &supplied_keys {
                black_box(
                    supplied
                        .retrieve(*key, 0x80, 0x40, AccessFlags::REMOTE_WRITE)
                        .expect("access granted"),
                );
            }
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_insert_erase, benchmark_retrieve);
criterion_main!(benches);
