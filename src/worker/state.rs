//! Task state machine and the enumerated task configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry-assigned task identifier. Monotonic, starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Lowest,
    BelowNormal,
    Normal,
    AboveNormal,
    Highest,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Self::Lowest,
        Self::BelowNormal,
        Self::Normal,
        Self::AboveNormal,
        Self::Highest,
    ];

    /// Scale applied to arithmetic work. Highest does twice the work of Lowest.
    pub fn work_multiplier(&self) -> f64 {
        match self {
            Self::Lowest => 1.0,
            Self::BelowNormal => 1.25,
            Self::Normal => 1.5,
            Self::AboveNormal => 1.75,
            Self::Highest => 2.0,
        }
    }

    /// Scale applied to the CPU-usage estimate.
    pub fn cpu_multiplier(&self) -> f64 {
        match self {
            Self::Lowest => 0.6,
            Self::BelowNormal => 0.8,
            Self::Normal => 1.0,
            Self::AboveNormal => 1.25,
            Self::Highest => 1.5,
        }
    }

    /// Inclusive range of the base progress increment per unit.
    pub fn progress_range(&self) -> (u8, u8) {
        match self {
            Self::Lowest => (1, 1),
            Self::BelowNormal => (1, 2),
            Self::Normal => (2, 3),
            Self::AboveNormal => (2, 4),
            Self::Highest => (3, 6),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lowest => "lowest",
            Self::BelowNormal => "below_normal",
            Self::Normal => "normal",
            Self::AboveNormal => "above_normal",
            Self::Highest => "highest",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "lowest" | "min" => Ok(Self::Lowest),
            "below_normal" | "belownormal" | "low" => Ok(Self::BelowNormal),
            "normal" => Ok(Self::Normal),
            "above_normal" | "abovenormal" | "high" => Ok(Self::AboveNormal),
            "highest" | "max" => Ok(Self::Highest),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Synthetic work profile simulated by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    CpuIntensive,
    IoIntensive,
    Mixed,
    Burst,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 4] = [
        Self::CpuIntensive,
        Self::IoIntensive,
        Self::Mixed,
        Self::Burst,
    ];

    /// Whether runs of this kind need a scratch resource.
    pub fn needs_scratch(&self) -> bool {
        matches!(self, Self::IoIntensive | Self::Mixed)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CpuIntensive => "cpu_intensive",
            Self::IoIntensive => "io_intensive",
            Self::Mixed => "mixed",
            Self::Burst => "burst",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cpu_intensive" | "cpuintensive" | "cpu" => Ok(Self::CpuIntensive),
            "io_intensive" | "iointensive" | "io" => Ok(Self::IoIntensive),
            "mixed" => Ok(Self::Mixed),
            "burst" => Ok(Self::Burst),
            other => Err(format!("unknown workload kind '{other}'")),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Constructed, never started.
    Ready,
    /// Run loop is executing units of work.
    Running,
    /// Run loop is parked on the pause gate.
    Paused,
    /// Run loop is waiting at a rendezvous.
    Synchronizing,
    /// Progress reached 100.
    Completed,
    /// Stopped by a command.
    Stopped,
    /// Setup or run loop fault.
    Error,
}

impl TaskStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // Start (or a setup failure) from any resting state
            (Ready | Stopped | Completed | Error, Running) |
            (Ready | Stopped | Completed | Error, Error) |
            // Pause / resume
            (Running, Paused) | (Paused, Running) |
            // Rendezvous
            (Running, Synchronizing) | (Synchronizing, Running) |
            // Stop
            (Running | Paused | Synchronizing, Stopped) |
            // Run loop outcomes; a unit already in flight may fault after a pause
            (Running, Completed) | (Running | Paused, Error)
        )
    }

    /// A run loop exists for this status.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Synchronizing)
    }

    /// Counted by the registry's active statistic.
    pub fn is_active(&self) -> bool {
        self.is_running()
    }

    /// Resting state a fresh Start can leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Synchronizing => "synchronizing",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A state transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}
