use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use wallet_core::AccountId;
use wallet_infra::{
    AccountStore, InMemoryAccountStore, InMemoryReconciliationQueue, RetryPolicy,
    TransactionCoordinator, TransferSettings,
};
use wallet_ledger::Account;

type Coordinator =
    TransactionCoordinator<Arc<InMemoryAccountStore>, Arc<InMemoryReconciliationQueue>>;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn setup(rt: &Runtime, store: InMemoryAccountStore, accounts: usize) -> (Arc<Coordinator>, Vec<AccountId>) {
    let store = Arc::new(store);
    let ids = rt.block_on(async {
        let mut ids = Vec::with_capacity(accounts);
        for _ in 0..accounts {
            let account = store
                .open(Account::open(AccountId::new(), i64::MAX / 4).unwrap())
                .await
                .unwrap();
            ids.push(account.account_id());
        }
        ids
    });
    let settings = TransferSettings::default().with_retry(RetryPolicy::exponential(
        1_000,
        Duration::from_micros(100),
        Duration::from_millis(2),
    ));
    let coordinator = TransactionCoordinator::new(store, InMemoryReconciliationQueue::arc(), settings);
    (Arc::new(coordinator), ids)
}

fn bench_single_transfer_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("single_transfer_latency");

    for (name, store) in [
        ("atomic_batch", InMemoryAccountStore::new()),
        ("compensating", InMemoryAccountStore::without_atomic_batches()),
    ] {
        let (coordinator, ids) = setup(&rt, store, 2);
        let cancel = CancellationToken::new();
        group.bench_function(name, |b| {
            b.iter(|| {
                let receipt = rt.block_on(coordinator.submit_transfer(ids[0], ids[1], 1, &cancel));
                black_box(receipt);
            });
        });
    }

    group.finish();
}

fn bench_concurrent_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("concurrent_transfer_throughput");
    group.sample_size(20);

    for batch in [16usize, 64] {
        group.throughput(Throughput::Elements(batch as u64));

        // Every transfer touches its own pair of accounts.
        let (coordinator, ids) = setup(&rt, InMemoryAccountStore::new(), batch * 2);
        group.bench_with_input(BenchmarkId::new("disjoint_pairs", batch), &batch, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let tasks: Vec<_> = ids
                        .chunks(2)
                        .map(|pair| {
                            let (c, from, to) = (coordinator.clone(), pair[0], pair[1]);
                            tokio::spawn(async move {
                                c.submit_transfer(from, to, 1, &CancellationToken::new()).await
                            })
                        })
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap());
                    }
                });
            });
        });

        // Every transfer fights over the same two accounts.
        let (coordinator, ids) = setup(&rt, InMemoryAccountStore::new(), 2);
        group.bench_with_input(BenchmarkId::new("contended_pair", batch), &batch, |b, &batch| {
            b.iter(|| {
                rt.block_on(async {
                    let tasks: Vec<_> = (0..batch)
                        .map(|i| {
                            let c = coordinator.clone();
                            let (from, to) = if i % 2 == 0 { (ids[0], ids[1]) } else { (ids[1], ids[0]) };
                            tokio::spawn(async move {
                                c.submit_transfer(from, to, 1, &CancellationToken::new()).await
                            })
                        })
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap());
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_transfer_latency, bench_concurrent_throughput);
criterion_main!(benches);
