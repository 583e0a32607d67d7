//! Graph engine benchmarks: build (closure + sort) and cyclic execution.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use animata_core::blocks::{Constant, Gain};
use animata_core::{Clock, Executor, Network, TickPolicy};

const CHAIN_LEN: usize = 64;

fn chain_network() -> (Network, animata_core::BlockId) {
    let mut net = Network::new();
    let head = net.add_block(Constant::new(1.0));
    let mut prev = head;
    for _ in 0..CHAIN_LEN {
        let next = net.add_block(Gain::new(1.001));
        net.connect(prev.output(0), next.input(0)).unwrap();
        prev = next;
    }
    (net, head)
}

fn bench_build(c: &mut Criterion) {
    let (net, head) = chain_network();
    c.bench_function("build_chain_64", |b| {
        b.iter(|| net.build(std::hint::black_box(&[head])).unwrap())
    });
}

fn bench_run_cycle(c: &mut Criterion) {
    let (mut net, head) = chain_network();
    let order = net.build(&[head]).unwrap();
    let mut exec = Executor::new(order);
    let clock = Clock::new(Duration::from_millis(10), TickPolicy::Nominal);
    c.bench_function("run_cycle_chain_64", |b| {
        b.iter(|| exec.run_cycle(&mut net, &clock))
    });
}

criterion_group!(benches, bench_build, bench_run_cycle);
criterion_main!(benches);
