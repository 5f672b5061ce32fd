//! Scheduler and allocator microbenchmarks using Criterion.
//!
//! - Single job submission and fan-out
//! - Dispatch over element arrays at different group sizes
//! - Group shared memory reductions
//! - Linear, block and entity allocation
//! - Component manager churn

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tessel_bench::fixtures::scheduler;
use tessel_engine::core::memory::{BlockAllocator, LinearAllocator};
use tessel_engine::core::tasks::{BlockQueue, Context, DisjointSlice, Priority};
use tessel_engine::ecs::{Allocator, ComponentManager, Entity};

// =============================================================================
// Job Submission Benchmarks
// =============================================================================

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let scheduler = scheduler(8);

    for count in [1u64, 64, 1_024] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("empty_jobs", count), &count, |b, &n| {
            b.iter(|| {
                let ctx = Context::new(Priority::High);
                for _ in 0..n {
                    scheduler.execute(&ctx, |args| {
                        black_box(args.job_index);
                    });
                }
                scheduler.wait(&ctx);
            });
        });
    }

    group.bench_function("inline_without_workers", |b| {
        let inline = tessel_engine::core::tasks::Scheduler::new();
        b.iter(|| {
            let ctx = Context::default();
            for _ in 0..64 {
                inline.execute(&ctx, |args| {
                    black_box(args.job_index);
                });
            }
            inline.wait(&ctx);
        });
    });

    group.finish();
}

// =============================================================================
// Dispatch Benchmarks
// =============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let scheduler = scheduler(8);
    let count = 100_000u32;
    group.throughput(Throughput::Elements(u64::from(count)));

    for group_size in [1u32, 16, 64, 256, 1_024] {
        group.bench_with_input(BenchmarkId::new("square", group_size), &group_size, |b, &size| {
            let mut values = vec![0u64; count as usize];
            b.iter(|| {
                let out = DisjointSlice::new(&mut values);
                scheduler.scope(Priority::High, |ctx| {
                    scheduler.dispatch(ctx, count, size, move |args| {
                        let i = u64::from(args.job_index);
                        // SAFETY: one job per element.
                        *unsafe { out.get_mut(args.job_index as usize) } = i * i;
                    });
                });
            });
        });
    }

    group.bench_function("shared_sum", |b| {
        b.iter(|| {
            let total = AtomicU64::new(0);
            scheduler.scope(Priority::High, |ctx| {
                let total = &total;
                scheduler.dispatch_shared(ctx, count, 256, size_of::<u64>(), move |mut args| {
                    let value = u64::from(args.job_index);
                    let (first, last) = (args.is_first_job_in_group, args.is_last_job_in_group);
                    let sum = args.shared::<u64>();
                    if first {
                        *sum = 0;
                    }
                    *sum += value;
                    if last {
                        total.fetch_add(*sum, Ordering::Relaxed);
                    }
                });
            });
            black_box(total.into_inner())
        });
    });

    group.finish();
}

// =============================================================================
// Allocator Benchmarks
// =============================================================================

fn bench_allocators(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocators");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("linear_allocate_reset", |b| {
        let mut linear = LinearAllocator::with_capacity(1 << 20);
        b.iter(|| {
            for _ in 0..1_000 {
                black_box(linear.allocate(100));
            }
            linear.reset();
        });
    });

    group.bench_function("block_pool_cycle", |b| {
        let mut pool = BlockAllocator::<u64, 64>::new();
        b.iter(|| {
            let mut blocks = Vec::with_capacity(1_000);
            for _ in 0..1_000 {
                blocks.push(pool.allocate());
            }
            for block in blocks {
                pool.free(block);
            }
        });
    });

    group.bench_function("block_queue_push_pop", |b| {
        let queue = BlockQueue::new();
        b.iter(|| {
            for i in 0..1_000u32 {
                queue.push_back(i);
            }
            while let Some(value) = queue.pop_front() {
                black_box(value);
            }
        });
    });

    group.bench_function("entity_alloc_many", |b| {
        let entities = Allocator::new();
        b.iter(|| black_box(entities.alloc_many(1_000).count()));
    });

    group.finish();
}

// =============================================================================
// Component Storage Benchmarks
// =============================================================================

fn bench_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("components");

    for count in [1_000u32, 10_000] {
        group.throughput(Throughput::Elements(u64::from(count)));

        group.bench_with_input(BenchmarkId::new("create", count), &count, |b, &n| {
            b.iter(|| {
                let mut manager = ComponentManager::<[f32; 16]>::with_capacity(n as usize);
                for id in 0..n {
                    manager.create(Entity::from_raw(id + 1));
                }
                black_box(manager.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("remove_swap", count), &count, |b, &n| {
            b.iter_batched(
                || {
                    let mut manager = ComponentManager::<[f32; 16]>::with_capacity(n as usize);
                    for id in 0..n {
                        manager.create(Entity::from_raw(id + 1));
                    }
                    manager
                },
                |mut manager| {
                    for id in (0..n).step_by(2) {
                        manager.remove(Entity::from_raw(id + 1));
                    }
                    manager
                },
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("lookup", count), &count, |b, &n| {
            let mut manager = ComponentManager::<[f32; 16]>::with_capacity(n as usize);
            for id in 0..n {
                manager.create(Entity::from_raw(id + 1));
            }
            b.iter(|| {
                let mut found = 0usize;
                for id in 0..n {
                    found += usize::from(manager.contains(Entity::from_raw(id + 1)));
                }
                black_box(found)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_execute, bench_dispatch, bench_allocators, bench_components);
criterion_main!(benches);
