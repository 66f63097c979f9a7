// src/utils/system.rs: System functions

use std::time::Duration;

use log::warn;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::time::sleep;

/// Determines the number of logical cores and the current CPU load.
///
/// # Returns
///
/// (usize, f32) logical cores, current cpu usage in percent
pub async fn detect_cores_and_load() -> (usize, f32) {
    let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::everything());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let cores = system.cpus().len().max(1);
    sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(100))).await;
    system.refresh_cpu_usage();
    let cpu_load = system.global_cpu_usage();
    (cores, cpu_load)
}

/// Caps a requested thread count to the machine.
///
/// # Arguments
///
/// * `requested` - Threads from the command line; 0 means "all".
/// * `cores` - Logical cores available.
///
/// # Returns
/// `cores` when `requested` is 0 or more than the machine has, otherwise `requested`.
pub fn resolve_threads(requested: usize, cores: usize) -> usize {
    let cores = cores.max(1);
    if requested == 0 || requested > cores {
        cores
    } else {
        requested
    }
}

/// Number of parallel workers: never more than there are samples, never zero.
pub fn worker_count(threads: usize, samples: usize) -> usize {
    threads.min(samples).max(1)
}

/// Threads handed to each external tool so that all workers together stay
/// within `threads`.
pub fn threads_per_task(threads: usize, workers: usize) -> usize {
    (threads / workers.max(1)).max(1)
}

/// Logs the resolved thread budget, warning when the machine is already busy.
pub async fn resolve_thread_budget(requested: usize) -> usize {
    let (cores, cpu_load) = detect_cores_and_load().await;
    let threads = resolve_threads(requested, cores);
    if requested > cores {
        warn!("Requested {} threads but only {} cores are available; using {}", requested, cores, threads);
    }
    if cpu_load > 80.0 {
        warn!("CPU load is already {:.0}%; tools may run slower than expected", cpu_load);
    }
    threads
}
