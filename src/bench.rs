//! Benchmark and stress-sweep runners that print CSV.

use anyhow::bail;

use crate::coordinator::{self, RunConfig};
use crate::types::{Token, WaitStrategy};

pub const DEFAULT_BENCH_ITEMS: usize = 1000;
pub const DEFAULT_BENCH_CONSUMERS: usize = 4;
pub const DEFAULT_STRESS_ITEM_SETS: [usize; 3] = [0, 100, 1000];
pub const DEFAULT_STRESS_CONSUMER_SETS: [usize; 3] = [2, 4, 8];
pub const DEFAULT_STRESS_WAITS: [WaitStrategy; 2] = [WaitStrategy::Block, WaitStrategy::Spin];

const CSV_HEADER: &str = "items,consumers,wait,removed,elapsed_ms,throughput_items_per_s,cpu_user_s,cpu_sys_s,leftover_items,violations";

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    use libc::{RUSAGE_SELF, getrusage, rusage, timeval};
    let mut usage = rusage {
        ru_utime: timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        ru_stime: timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        ru_maxrss: 0,
        ru_ixrss: 0,
        ru_idrss: 0,
        ru_isrss: 0,
        ru_minflt: 0,
        ru_majflt: 0,
        ru_nswap: 0,
        ru_inblock: 0,
        ru_oublock: 0,
        ru_msgsnd: 0,
        ru_msgrcv: 0,
        ru_nsignals: 0,
        ru_nvcsw: 0,
        ru_nivcsw: 0,
    };
    // SAFETY: `usage` is a valid, writable rusage for the call's duration.
    let rc = unsafe { getrusage(RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// One silent run's measurements.
#[derive(Clone, Debug)]
struct BenchResult {
    items: usize,
    consumers: usize,
    wait: WaitStrategy,
    removed: usize,
    elapsed_ms: f64,
    throughput: f64,
    cpu_user_s: Option<f64>,
    cpu_sys_s: Option<f64>,
    leftover_items: usize,
    violations: usize,
}

impl BenchResult {
    fn csv_row(&self) -> String {
        let cpu = |value: Option<f64>| {
            value
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "NA".to_string())
        };
        format!(
            "{},{},{},{},{:.2},{:.2},{},{},{},{}",
            self.items,
            self.consumers,
            self.wait,
            self.removed,
            self.elapsed_ms,
            self.throughput,
            cpu(self.cpu_user_s),
            cpu(self.cpu_sys_s),
            self.leftover_items,
            self.violations
        )
    }
}

fn benchmark_once(
    items: usize,
    consumers: usize,
    wait: WaitStrategy,
    max_delay_ms: u64,
) -> anyhow::Result<BenchResult> {
    let config = RunConfig {
        items: RunConfig::synthetic_items(items),
        consumers,
        max_delay_ms,
        wait,
        seed: None,
        color: false,
        echo: false,
        interrupt_after: None,
    };

    let cpu_start = cpu_times_seconds();
    let report = coordinator::run(&config)?;
    let cpu_end = cpu_times_seconds();

    let violations = report.verify();
    for violation in &violations {
        tracing::error!(items, consumers, %wait, "{violation}");
    }

    let elapsed_ms = report.elapsed.as_secs_f64() * 1000.0;
    let removed = report.removed();
    let throughput = if elapsed_ms > 0.0 {
        removed as f64 / (elapsed_ms / 1000.0)
    } else {
        0.0
    };
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_end) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };

    Ok(BenchResult {
        items,
        consumers,
        wait,
        removed,
        elapsed_ms,
        throughput,
        cpu_user_s,
        cpu_sys_s,
        leftover_items: report
            .remaining
            .iter()
            .filter(|token| !matches!(token, Token::EndOfStream))
            .count(),
        violations: violations.len(),
    })
}

fn print_result(result: &BenchResult) {
    println!("{}", result.csv_row());
    if result.leftover_items > 0 {
        eprintln!("# warning,leftover_items,{}", result.leftover_items);
    }
    if result.violations > 0 {
        eprintln!("# violation,count,{}", result.violations);
    }
}

/// Run a single silent benchmark. Returns `true` when no violations were found.
pub fn run_benchmark(
    items: usize,
    consumers: usize,
    wait: WaitStrategy,
    max_delay_ms: u64,
) -> anyhow::Result<bool> {
    if consumers == 0 {
        bail!("benchmark: consumers must be > 0");
    }
    let result = benchmark_once(items, consumers, wait, max_delay_ms)?;
    println!("{CSV_HEADER}");
    print_result(&result);
    Ok(result.violations == 0)
}

/// Sweep every combination of item count, consumer count and wait strategy.
pub fn run_stress(
    item_sets: &[usize],
    consumer_sets: &[usize],
    waits: &[WaitStrategy],
    max_delay_ms: u64,
) -> anyhow::Result<bool> {
    if consumer_sets.iter().any(|&consumers| consumers == 0) {
        bail!("stress: consumer sets must be > 0");
    }
    if item_sets.is_empty() || consumer_sets.is_empty() || waits.is_empty() {
        bail!("stress: every sweep set needs at least one value");
    }

    println!("{CSV_HEADER}");
    let mut clean = true;
    for &wait in waits {
        for &items in item_sets {
            for &consumers in consumer_sets {
                let result = benchmark_once(items, consumers, wait, max_delay_ms)?;
                print_result(&result);
                clean &= result.violations == 0;
            }
        }
    }
    Ok(clean)
}
