//! Benchmark: propagation through the reactive graph and state diffing.
//!
//! Compares:
//! - A wide diamond (one cell, N derived nodes, one effect reading all)
//! - A deep chain of derived nodes
//! - Diffing a large map state with a single changed entry

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glint_core::sync::{diff, ListEncoding, State};
use glint_core::{Cell, Derived, Effect, Runtime, Value};

fn benchmark_diamond(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond");

    for width in [4usize, 32, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let rt = Runtime::new();
            let source = Cell::new(&rt, 0_i64);
            let branches: Vec<Derived<i64>> = (0..width as i64)
                .map(|offset| {
                    let source = source.clone();
                    Derived::new(&rt, move || Ok(source.get() + offset))
                })
                .collect();

            let effect = Effect::new(&rt, move || {
                let mut total = 0;
                for branch in &branches {
                    total += branch.get()?;
                }
                black_box(total);
                Ok(None)
            })
            .unwrap();

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(black_box(next));
            });

            effect.dispose();
        });
    }

    group.finish();
}

fn benchmark_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for depth in [8usize, 64, 512] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let rt = Runtime::new();
            let source = Cell::new(&rt, 0_i64);
            let mut tail = {
                let source = source.clone();
                Derived::new(&rt, move || Ok(source.get() + 1))
            };
            for _ in 1..depth {
                let previous = tail.clone();
                tail = Derived::new(&rt, move || Ok(previous.get()? + 1));
            }

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(next);
                black_box(tail.get().unwrap())
            });
        });
    }

    group.finish();
}

fn benchmark_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");

    for size in [16usize, 256, 4096] {
        let prev: State = (0..size)
            .map(|i| (format!("key{i}"), Value::from(format!("value {i}"))))
            .collect();
        let mut next = prev.clone();
        next.insert("key0".to_string(), Value::from("changed"));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| diff(black_box(&prev), black_box(&next), ListEncoding::Indexed))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_diamond, benchmark_chain, benchmark_diff);
criterion_main!(benches);
