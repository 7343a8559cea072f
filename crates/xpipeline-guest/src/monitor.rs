//! Samples the guest process tree's elapsed time and resident memory, and
//! kills the tree as soon as either ceiling is crossed.

use std::process::ExitStatus;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::process::Child;
use xpipeline_types::{ResourceStats, SandboxViolation, SecurityPolicy, ViolationKind};

/// Source of resident-set-size readings for a process tree.
pub trait MemorySampler: Send + Sync {
    /// Bytes resident for `pid` and its descendants, `None` once it is gone.
    fn sample(&self, pid: u32) -> Option<u64>;
}

/// Reads `VmRSS` from `/proc/<pid>/status`, following `/proc/<pid>/task/*/children`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcSampler;

impl MemorySampler for ProcSampler {
    fn sample(&self, pid: u32) -> Option<u64> {
        let own = read_rss(pid)?;
        let mut total = own;
        let mut stack = children_of(pid);
        let mut seen = 0usize;
        while let Some(child) = stack.pop() {
            seen += 1;
            if seen > 4096 {
                break;
            }
            total += read_rss(child).unwrap_or(0);
            stack.extend(children_of(child));
        }
        Some(total)
    }
}

fn read_rss(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    parse_vm_rss(&status)
}

/// `VmRSS:    1234 kB` in bytes. Kernel threads and zombies have no such line.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

fn children_of(pid: u32) -> Vec<u32> {
    let Ok(tasks) = std::fs::read_dir(format!("/proc/{}/task", pid)) else {
        return Vec::new();
    };
    let mut children = Vec::new();
    for task in tasks.flatten() {
        if let Ok(list) = std::fs::read_to_string(task.path().join("children")) {
            children.extend(list.split_whitespace().filter_map(|p| p.parse::<u32>().ok()));
        }
    }
    children
}

/// How supervision ended.
#[derive(Debug)]
pub enum MonitorOutcome {
    Exited { status: ExitStatus, stats: ResourceStats },
    Breached { violation: SandboxViolation, stats: ResourceStats },
}

impl MonitorOutcome {
    pub fn stats(&self) -> &ResourceStats {
        match self {
            MonitorOutcome::Exited { stats, .. } | MonitorOutcome::Breached { stats, .. } => stats,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    /// 0 disables the memory ceiling.
    max_memory_bytes: u64,
    /// Zero disables the time ceiling.
    max_execution: Duration,
    interval: Duration,
}

impl ResourceMonitor {
    pub fn new(max_memory_bytes: u64, max_execution: Duration, interval: Duration) -> Self {
        Self {
            max_memory_bytes,
            max_execution,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn from_policy(policy: &SecurityPolicy) -> Self {
        Self::new(
            policy.max_memory_bytes(),
            Duration::from_millis(policy.max_execution_ms),
            Duration::from_millis(policy.sample_interval_ms.max(1)),
        )
    }

    /// Wait for `child` to exit while sampling it every interval.
    pub async fn supervise(&self, child: &mut Child, sampler: &dyn MemorySampler) -> std::io::Result<MonitorOutcome> {
        let started = Instant::now();
        let pid = child.id();
        let mut stats = ResourceStats::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    stats.elapsed_ms = started.elapsed().as_millis() as u64;
                    return Ok(MonitorOutcome::Exited { status, stats });
                }
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    stats.elapsed_ms = elapsed.as_millis() as u64;
                    stats.samples += 1;
                    if let Some(rss) = pid.and_then(|p| sampler.sample(p)) {
                        stats.peak_memory_bytes = stats.peak_memory_bytes.max(rss);
                    }
                    if let Some(violation) = self.breach(elapsed, &stats) {
                        tracing::warn!(
                            violation = %violation.kind,
                            peak_memory_bytes = stats.peak_memory_bytes,
                            elapsed_ms = stats.elapsed_ms,
                            "guest crossed a resource ceiling, killing it"
                        );
                        kill_tree(child).await;
                        return Ok(MonitorOutcome::Breached { violation, stats });
                    }
                }
            }
        }
    }

    fn breach(&self, elapsed: Duration, stats: &ResourceStats) -> Option<SandboxViolation> {
        if self.max_memory_bytes > 0 && stats.peak_memory_bytes > self.max_memory_bytes {
            return Some(
                SandboxViolation::new(
                    ViolationKind::MemoryLimit,
                    format!(
                        "memory limit exceeded: peak {} MB over a {} MB ceiling",
                        stats.peak_memory_bytes / (1024 * 1024),
                        self.max_memory_bytes / (1024 * 1024)
                    ),
                )
                .with_details(json!({
                    "peakMemoryBytes": stats.peak_memory_bytes,
                    "limitBytes": self.max_memory_bytes,
                    "elapsedMs": stats.elapsed_ms,
                })),
            );
        }
        if !self.max_execution.is_zero() && elapsed > self.max_execution {
            return Some(
                SandboxViolation::new(
                    ViolationKind::Timeout,
                    format!(
                        "execution time limit exceeded: {}ms over a {}ms ceiling",
                        stats.elapsed_ms,
                        self.max_execution.as_millis()
                    ),
                )
                .with_details(json!({
                    "elapsedMs": stats.elapsed_ms,
                    "limitMs": self.max_execution.as_millis() as u64,
                    "peakMemoryBytes": stats.peak_memory_bytes,
                })),
            );
        }
        None
    }
}

/// SIGKILL the child's process group, then reap the child.
async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    let _ = child.kill().await;
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
