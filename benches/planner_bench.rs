// Benchmark for the trapezoid planner's back-propagation replan sweep.
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use embermill_rs::motion::junction::JunctionSolver;
use embermill_rs::motion::queue::PlannerQueue;
use embermill_rs::motion::trapezoid;
use embermill_rs::motion::types::{AxisVec, MAX_AXES};

fn fill_queue_with_zigzag(queue: &mut PlannerQueue, n: usize) -> usize {
    let mut last = None;
    for i in 0..n {
        let idx = queue.reserve_write().unwrap();
        let mut target: AxisVec = [0.0; MAX_AXES];
        target[0] = (i as f64) * 10.0;
        target[1] = if i % 2 == 0 { 0.0 } else { 5.0 };

        let block = queue.slot_mut(idx);
        block.target = target;
        block.length = 10.0;
        block.set_jerk(5.0e9);
        block.cruise_vmax = 3000.0;
        block.entry_vmax = 3000.0;
        block.exit_vmax = 3000.0;
        queue.commit_write(idx, embermill_rs::motion::block::MoveType::Aline).unwrap();
        last = Some(idx);
    }
    last.unwrap()
}

fn bench_replan_backward(c: &mut Criterion) {
    let solver = JunctionSolver::new(0.01, 200_000.0);
    c.bench_function("replan_backward over a full 32-deep zigzag queue", |b| {
        b.iter(|| {
            let mut queue = PlannerQueue::new();
            let newest = fill_queue_with_zigzag(&mut queue, queue.capacity());
            trapezoid::replan_backward(&mut queue, &solver, newest).unwrap();
        });
    });
}

criterion_group!(benches, bench_replan_backward);
criterion_main!(benches);
