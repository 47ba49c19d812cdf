use blockseal_core::{mine::seal_block_parallel, pow, Block, Transaction};
use criterion::{criterion_group, criterion_main, Criterion};

fn sample_block() -> Block {
    let txs: Vec<Transaction> = (0..10)
        .map(|i| Transaction::unsigned(format!("alice-{i}"), "bob", f64::from(i) + 0.5))
        .collect();
    Block::new(1, txs, 1_600_000_000, "0".repeat(64))
}

fn bench_pow(c: &mut Criterion) {
    let block = sample_block();
    let control = pow::SealControl::default();

    c.bench_function("block_hash", |b| b.iter(|| block.hash()));

    c.bench_function("seal_difficulty_4", |b| {
        b.iter(|| pow::seal_block(block.clone(), 4, &control).unwrap());
    });

    c.bench_function("seal_parallel_difficulty_4", |b| {
        b.iter(|| seal_block_parallel(block.clone(), 4, &control).unwrap());
    });
}

criterion_group!(benches, bench_pow);
criterion_main!(benches);
