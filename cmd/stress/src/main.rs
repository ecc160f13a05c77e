//! Stress test - many small work items across two workgroups
//!
//! Usage: `stress [ROOT_TASKS] [FANOUT]`
//!
//! # Environment Variables
//!
//! - `STRESS_WORKERS` - Total worker threads (default: available parallelism, min 2)
//! - `STRESS_IO_WORKERS` - Workers in the high-priority "io" group (default: 1)
//! - `STRESS_ROUNDS` - Begin/end cycles to run (default: 3)
//! - `WSCHED_*` - Scheduler configuration, see `SchedulerConfig::from_env`
//! - `WSCHED_LOG_LEVEL=debug` - Scheduler log level

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use wsched::{
    env_get, kinfo, kprintln, parallel_for, SchedError, SchedResult, Scheduler, SchedulerConfig,
    TaskContext, WorkgroupId,
};

/// Every Nth child hands a follow-up item to the io group.
const HANDOFF_EVERY: u64 = 16;

#[derive(Default)]
struct Counters {
    roots: AtomicU64,
    children: AtomicU64,
    handoffs: AtomicU64,
    loop_sum: AtomicU64,
}

/// Submit, helping with other work while the target mailbox is full.
fn submit_retry<F>(ctx: &TaskContext, group: WorkgroupId, mut make: impl FnMut() -> F)
where
    F: FnOnce(&TaskContext) + Send + 'static,
{
    while let Err(SchedError::MailboxFull) = ctx.submit(group, make()) {
        ctx.busy_work();
    }
}

fn root_task(ctx: &TaskContext, io: WorkgroupId, fanout: u64, counters: &Arc<Counters>) {
    counters.roots.fetch_add(1, Ordering::Relaxed);
    let cpu = ctx.workgroup_id();
    for i in 0..fanout {
        submit_retry(ctx, cpu, || {
            let c = counters.clone();
            move |ctx: &TaskContext| {
                c.children.fetch_add(1, Ordering::Relaxed);
                if i % HANDOFF_EVERY == 0 {
                    submit_retry(ctx, io, || {
                        let h = c.clone();
                        move |_: &TaskContext| {
                            h.handoffs.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
            }
        });
    }
}

fn setup(sched: &mut Scheduler, workers: u32, io_workers: u32) -> SchedResult<(WorkgroupId, WorkgroupId)> {
    let io = sched.create_group_auto(0, io_workers, 1)?;
    let cpu = sched.create_group_auto(io_workers, workers - io_workers, 0)?;
    Ok((io, cpu))
}

fn main() {
    let mut args = std::env::args().skip(1);
    let root_tasks: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(1_000);
    let fanout: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(64);

    let cpus = std::thread::available_parallelism().map_or(4, |n| n.get() as u32);
    let workers: u32 = env_get("STRESS_WORKERS", cpus).max(2);
    let io_workers: u32 = env_get("STRESS_IO_WORKERS", 1u32).clamp(1, workers - 1);
    let rounds: u32 = env_get("STRESS_ROUNDS", 3);

    kprintln!("=== wsched Stress Test ===");
    let config = SchedulerConfig::from_env();
    config.print();

    let mut sched = match Scheduler::new(config) {
        Ok(s) => s,
        Err(e) => {
            kprintln!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let (io, cpu) = match setup(&mut sched, workers, io_workers) {
        Ok(ids) => ids,
        Err(e) => {
            kprintln!("workgroup setup failed: {}", e);
            std::process::exit(1);
        }
    };
    kprintln!(
        "io: workers 0..{} (priority 1), cpu: workers {}..{}",
        io_workers,
        io_workers,
        workers
    );

    let expected_children = root_tasks * fanout;
    let expected_handoffs = root_tasks * fanout.div_ceil(HANDOFF_EVERY);
    let mut failed = false;

    for round in 1..=rounds {
        let counters = Arc::new(Counters::default());
        if let Err(e) = sched.begin_execution() {
            kprintln!("begin_execution failed: {}", e);
            std::process::exit(1);
        }

        let start = Instant::now();
        let mut retries = 0u64;
        for _ in 0..root_tasks {
            loop {
                let c = counters.clone();
                match sched.post(cpu, move |ctx| root_task(ctx, io, fanout, &c)) {
                    Err(SchedError::MailboxFull) => {
                        retries += 1;
                        std::thread::yield_now();
                    }
                    _ => break,
                }
            }
        }
        let post_time = start.elapsed();

        // One fork-join loop on the cpu group, driven from a task.
        let c = counters.clone();
        let _ = sched.post(cpu, move |ctx| {
            parallel_for(ctx, ctx.workgroup_id(), 0..10_000, move |i| {
                c.loop_sum.fetch_add(i as u64, Ordering::Relaxed);
            });
        });

        if let Err(e) = sched.wait_for_tasks() {
            kprintln!("wait_for_tasks failed: {}", e);
        }
        let run_time = start.elapsed();
        let _ = sched.end_execution();

        let children = counters.children.load(Ordering::Relaxed);
        let handoffs = counters.handoffs.load(Ordering::Relaxed);
        let ok = counters.roots.load(Ordering::Relaxed) == root_tasks
            && children == expected_children
            && handoffs == expected_handoffs
            && counters.loop_sum.load(Ordering::Relaxed) == 49_995_000;
        failed |= !ok;

        let total = sched.stats().total();
        kprintln!();
        kprintln!("--- round {}/{} ---", round, rounds);
        kprintln!("Root tasks:      {} (mailbox retries: {})", root_tasks, retries);
        kprintln!("Children:        {}/{}", children, expected_children);
        kprintln!("Handoffs:        {}/{}", handoffs, expected_handoffs);
        kprintln!("Post time:       {:?}", post_time);
        kprintln!("Run time:        {:?}", run_time);
        kprintln!(
            "Throughput:      {:.0} items/sec",
            total.executed as f64 / run_time.as_secs_f64()
        );
        kprintln!(
            "Executed: {}  stolen: {}  mailbox: {}  parks: {}  panics: {}",
            total.executed,
            total.stolen,
            total.from_mailbox,
            total.parks,
            total.panics
        );
        kinfo!("round {} {}", round, if ok { "ok" } else { "MISMATCH" });
    }

    kprintln!();
    kprintln!("=== Stress Test {} ===", if failed { "FAILED" } else { "Complete" });
    if failed {
        std::process::exit(1);
    }
}
