//! Priority vocabulary shared by the supervisor and the bus arbiter.
//!
//! A [`PriorityLevel`] is an abstract, totally ordered urgency class. The
//! model translates it into an [`OsSchedule`]: the POSIX policy and the
//! numeric priority (real-time classes) or niceness (time-shared class) to
//! request from the kernel.
//!
//! The mapping is monotonic: a higher level never translates into a less
//! favorable OS schedule, under its default policy or under any explicitly
//! requested one. Use [`OsSchedule::favorability`] to compare schedules
//! across policy classes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Abstract priority level, ordered `Background < Low < Medium < High < Critical < Emergency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    /// Housekeeping work that may be starved.
    Background,
    /// Best-effort work.
    Low,
    /// Regular control-plane work.
    Medium,
    /// Latency-sensitive work.
    High,
    /// Servo-class control loops.
    Critical,
    /// Safety handling; always first.
    Emergency,
}

impl PriorityLevel {
    /// Every level, lowest first.
    pub const ALL: [Self; 6] = [
        Self::Background,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
        Self::Emergency,
    ];

    /// Whether this level belongs to the servo class (Critical or Emergency).
    #[must_use]
    pub const fn is_latency_critical(self) -> bool {
        matches!(self, Self::Critical | Self::Emergency)
    }

    /// Policy used when a process does not request one explicitly.
    #[must_use]
    pub const fn default_policy(self) -> SchedPolicy {
        match self {
            Self::Emergency | Self::Critical => SchedPolicy::Fifo,
            Self::High => SchedPolicy::RoundRobin,
            Self::Medium | Self::Low | Self::Background => SchedPolicy::Normal,
        }
    }

    /// Real-time priority (1..=99) for RT-FIFO/RT-RR.
    #[must_use]
    pub const fn rt_priority(self) -> i32 {
        match self {
            Self::Emergency => 95,
            Self::Critical => 80,
            Self::High => 60,
            Self::Medium => 40,
            Self::Low => 20,
            Self::Background => 1,
        }
    }

    /// Niceness (-20..=19) under the time-shared policy.
    #[must_use]
    pub const fn niceness(self) -> i32 {
        match self {
            Self::Emergency => -20,
            Self::Critical => -15,
            Self::High => -10,
            Self::Medium => -5,
            Self::Low => 0,
            Self::Background => 10,
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Background => "background",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// OS scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    /// `SCHED_FIFO`.
    #[serde(rename = "rt_fifo")]
    Fifo,
    /// `SCHED_RR`.
    #[serde(rename = "rt_rr")]
    RoundRobin,
    /// `SCHED_OTHER` with a niceness.
    Normal,
}

impl SchedPolicy {
    /// Whether this is one of the fixed-priority real-time policies.
    #[must_use]
    pub const fn is_realtime(self) -> bool {
        matches!(self, Self::Fifo | Self::RoundRobin)
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fifo => "rt-fifo",
            Self::RoundRobin => "rt-rr",
            Self::Normal => "normal",
        })
    }
}

/// Concrete OS scheduling descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OsSchedule {
    /// Scheduling policy.
    pub policy: SchedPolicy,
    /// RT priority for real-time policies, niceness for [`SchedPolicy::Normal`].
    pub value: i32,
}

impl OsSchedule {
    /// Time-shared schedule with the given niceness.
    #[must_use]
    pub const fn nice(value: i32) -> Self {
        Self {
            policy: SchedPolicy::Normal,
            value,
        }
    }

    /// Single comparable score; larger is more favorable.
    ///
    /// Every real-time schedule (101..=199) outranks every time-shared one
    /// (-19..=20).
    #[must_use]
    pub const fn favorability(&self) -> i32 {
        if self.policy.is_realtime() {
            100 + self.value
        } else {
            -self.value
        }
    }
}

impl fmt::Display for OsSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.policy.is_realtime() {
            write!(f, "{}:{}", self.policy, self.value)
        } else {
            write!(f, "nice:{}", self.value)
        }
    }
}

/// Translate a level under its default policy.
#[must_use]
pub const fn translate(level: PriorityLevel) -> OsSchedule {
    translate_with(level, level.default_policy())
}

/// Translate a level under an explicitly requested policy.
#[must_use]
pub const fn translate_with(level: PriorityLevel, policy: SchedPolicy) -> OsSchedule {
    let value = if policy.is_realtime() {
        level.rt_priority()
    } else {
        level.niceness()
    };
    OsSchedule { policy, value }
}
