use criterion::{criterion_group, criterion_main, Criterion};
use eventide::{eval_later, EventLoop, Promise};

fn transform_chain(c: &mut Criterion) {
    c.bench_function("map_chain_1000", |b| {
        let lp = EventLoop::new();
        let mut ws = lp.wait_scope();
        b.iter(|| {
            let mut promise = Promise::ok(0u64);
            for _ in 0..1000 {
                promise = promise.map(|x| x + 1);
            }
            promise.wait(&mut ws).expect("chain failed")
        });
    });
}

fn yield_ping_pong(c: &mut Criterion) {
    c.bench_function("eval_later_chain_100", |b| {
        let lp = EventLoop::new();
        let mut ws = lp.wait_scope();
        b.iter(|| {
            let mut promise = Promise::ok(0u64);
            for _ in 0..100 {
                promise = promise.then(|x| eval_later(move || Ok(x + 1)));
            }
            promise.wait(&mut ws).expect("chain failed")
        });
    });
}

criterion_group!(benches, transform_chain, yield_ping_pong);
criterion_main!(benches);
