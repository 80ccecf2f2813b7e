use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use serde_json::json;
use tracklane_runtime::{Job, JobType, PriorityQueue};

fn filled(len: usize) -> PriorityQueue<Job> {
    let queue = PriorityQueue::new();
    for n in 0..len {
        queue.push(Job::new(JobType::FetchIssue, json!(null)).with_priority((n % 10) as i32));
    }
    queue
}

/// Insertion is a linear scan; cost should grow with backlog length.
fn bench_push_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_push");
    group.throughput(Throughput::Elements(1));

    for len in [10usize, 100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("push_into", len), &len, |b, &len| {
            let queue = filled(len);
            b.iter(|| {
                // Lowest priority: scans the whole list before appending.
                queue.push(Job::new(JobType::SearchIssues, json!(null)).with_priority(-1));
                black_box(queue.pop());
            });
        });
    }

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_drain");

    for len in [100usize, 1_000] {
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("fill_then_pop_all", len), &len, |b, &len| {
            b.iter(|| {
                let queue = filled(len);
                while let Some(job) = queue.pop() {
                    black_box(job);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_push_latency, bench_drain);
criterion_main!(benches);
