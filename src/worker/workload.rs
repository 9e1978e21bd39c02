//! Workload simulator: what one unit of work costs and how far it moves a task.
//!
//! Planning is a pure function of the workload kind, the priority and the
//! current progress (plus a caller-supplied RNG). Execution performs the
//! planned cost: arithmetic, scratch-file IO behind a simulated latency, or an
//! idle delay.

use std::time::Duration;

use rand::Rng;
use tracing::{trace, warn};

use crate::config::PoolConfig;
use crate::error::WorkloadError;
use crate::worker::scratch::ScratchHandle;
use crate::worker::state::{Priority, WorkloadKind};

/// Progress values per burst cycle.
const BURST_CYCLE: u8 = 20;
/// Progress values at the start of each cycle that belong to the burst phase.
const BURST_PHASE_LEN: u8 = 5;

const MIN_CPU_ESTIMATE: f64 = 0.1;
const MAX_CPU_ESTIMATE: f64 = 35.0;

/// The cost of one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkStep {
    /// Busy arithmetic.
    Compute { iterations: u64 },
    /// Read a block of the scratch file after a simulated latency.
    Read {
        offset: u64,
        len: usize,
        latency: Duration,
    },
    /// Write a block of the scratch file after a simulated latency.
    Write {
        offset: u64,
        len: usize,
        latency: Duration,
    },
    /// Idle.
    Rest { delay: Duration },
}

impl WorkStep {
    pub fn touches_scratch(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Write { .. })
    }
}

/// A planned unit of work and the progress it earns.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    pub step: WorkStep,
    pub increment: u8,
}

/// Which half of a burst cycle a progress value falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstPhase {
    Burst,
    Rest,
}

impl BurstPhase {
    pub fn at(progress: u8) -> Self {
        if progress % BURST_CYCLE < BURST_PHASE_LEN {
            Self::Burst
        } else {
            Self::Rest
        }
    }
}

/// Plan the next unit of work for a task.
pub fn plan_unit<R: Rng + ?Sized>(
    kind: WorkloadKind,
    priority: Priority,
    progress: u8,
    config: &PoolConfig,
    rng: &mut R,
) -> UnitPlan {
    let base = base_increment(priority, rng);

    let (step, bonus) = match kind {
        WorkloadKind::CpuIntensive => (compute_step(priority, config), rng.gen_range(1..=2)),
        WorkloadKind::IoIntensive => (io_step(config, rng), rng.gen_range(2..=3)),
        WorkloadKind::Mixed => {
            let step = if rng.gen_bool(0.5) {
                compute_step(priority, config)
            } else {
                io_step(config, rng)
            };
            (step, 1)
        }
        WorkloadKind::Burst => match BurstPhase::at(progress) {
            BurstPhase::Burst => (compute_step(priority, config), rng.gen_range(3..=5)),
            BurstPhase::Rest => (
                WorkStep::Rest {
                    delay: config.rest_delay,
                },
                rng.gen_range(0..=1),
            ),
        },
    };

    UnitPlan {
        step,
        increment: base + bonus,
    }
}

/// Estimated CPU usage, in percent, of a task running this workload.
pub fn estimate_cpu_usage(kind: WorkloadKind, priority: Priority, progress: u8) -> f64 {
    let base = match kind {
        WorkloadKind::CpuIntensive => 22.0,
        WorkloadKind::IoIntensive => 4.0,
        WorkloadKind::Mixed => 12.0,
        WorkloadKind::Burst => match BurstPhase::at(progress) {
            BurstPhase::Burst => 24.0,
            BurstPhase::Rest => 2.5,
        },
    };

    (base * priority.cpu_multiplier()).clamp(MIN_CPU_ESTIMATE, MAX_CPU_ESTIMATE)
}

/// Perform a planned step.
///
/// Transient IO failures are logged and swallowed; the unit still counts.
/// A missing scratch resource for an IO step is a real fault and is returned.
pub async fn execute(step: &WorkStep, scratch: Option<&ScratchHandle>) -> Result<(), WorkloadError> {
    match step {
        WorkStep::Compute { iterations } => {
            let checksum = burn_cpu(*iterations);
            trace!(iterations, checksum, "Compute unit finished");
            tokio::task::yield_now().await;
        }
        WorkStep::Read {
            offset,
            len,
            latency,
        } => {
            let scratch = scratch.ok_or(WorkloadError::ScratchMissing)?;
            tokio::time::sleep(*latency).await;
            if let Err(e) = scratch.read_at(*offset, *len).await {
                warn!(offset, error = %e, "Scratch read failed");
            }
        }
        WorkStep::Write {
            offset,
            len,
            latency,
        } => {
            let scratch = scratch.ok_or(WorkloadError::ScratchMissing)?;
            tokio::time::sleep(*latency).await;
            let data = vec![(*offset % 251) as u8; *len];
            if let Err(e) = scratch.write_at(*offset, &data).await {
                warn!(offset, error = %e, "Scratch write failed");
            }
        }
        WorkStep::Rest { delay } => tokio::time::sleep(*delay).await,
    }
    Ok(())
}

fn base_increment<R: Rng + ?Sized>(priority: Priority, rng: &mut R) -> u8 {
    let (low, high) = priority.progress_range();
    rng.gen_range(low..=high)
}

fn compute_step(priority: Priority, config: &PoolConfig) -> WorkStep {
    let iterations = (config.cpu_base_iterations as f64 * priority.work_multiplier()).round();
    WorkStep::Compute {
        iterations: iterations as u64,
    }
}

fn io_step<R: Rng + ?Sized>(config: &PoolConfig, rng: &mut R) -> WorkStep {
    let len = config.io_block_size.min(config.scratch_size as usize);
    let offset = rng.gen_range(0..=config.scratch_size - len as u64);
    let latency = rng.gen_range(config.io_latency_min..=config.io_latency_max);

    if rng.gen_bool(0.5) {
        WorkStep::Read {
            offset,
            len,
            latency,
        }
    } else {
        WorkStep::Write {
            offset,
            len,
            latency,
        }
    }
}

fn burn_cpu(iterations: u64) -> u64 {
    let mut acc: u64 = 0x9e37_79b9_7f4a_7c15;
    for i in 0..iterations {
        acc = std::hint::black_box(acc.rotate_left(5) ^ i.wrapping_mul(0x100_0000_01b3));
    }
    acc
}
