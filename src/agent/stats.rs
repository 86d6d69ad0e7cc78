use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;

/// Latest kernel-level readings, refreshed once per second and stamped onto
/// every emitted data point.
#[derive(Debug, Default)]
pub(super) struct SystemStats {
    memory_used_percent: AtomicU64,
    cpu_used_percent: AtomicU64,
    dropped_packets: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SystemSnapshot {
    pub memory_used_percent: u64,
    pub cpu_used_percent: u64,
    pub dropped_packets: u64,
}

impl SystemStats {
    pub(super) fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            memory_used_percent: self.memory_used_percent.load(Ordering::Relaxed),
            cpu_used_percent: self.cpu_used_percent.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
        }
    }
}

pub(super) fn spawn_sampler(stats: Arc<SystemStats>) {
    tokio::task::spawn_blocking(move || {
        let mut system = System::new();
        loop {
            system.refresh_memory();
            system.refresh_cpu_usage();
            let total = system.total_memory();
            if total > 0 {
                stats
                    .memory_used_percent
                    .store(system.used_memory() * 100 / total, Ordering::Relaxed);
            }
            stats
                .cpu_used_percent
                .store(system.global_cpu_usage() as u64, Ordering::Relaxed);
            stats
                .dropped_packets
                .store(read_dropped_packets(), Ordering::Relaxed);
            std::thread::sleep(Duration::from_secs(1));
        }
    });
}

#[cfg(target_os = "linux")]
fn read_dropped_packets() -> u64 {
    let Ok(data) = std::fs::read_to_string("/proc/net/dev") else {
        return 0;
    };
    // First two lines are headers; field 4 is the per-interface drop counter.
    data.lines()
        .skip(2)
        .filter_map(|line| line.split_whitespace().nth(4))
        .filter_map(|field| field.parse::<u64>().ok())
        .sum()
}

#[cfg(not(target_os = "linux"))]
fn read_dropped_packets() -> u64 {
    0
}
