use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Smallest time slice a created-date range is allowed to shrink to.
pub fn min_time_span() -> Duration {
    Duration::days(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Done => "done",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UnitStatus::Pending),
            "in_progress" => Some(UnitStatus::InProgress),
            "done" => Some(UnitStatus::Done),
            "failed" => Some(UnitStatus::Failed),
            _ => None,
        }
    }
}

/// The slice of the keyspace one work unit is responsible for.
///
/// Created-date ranges are half-open (`start <= created_at < end`) so sibling
/// units produced by a split never overlap and always cover their parent
/// exactly. Star ranges are inclusive on both ends because stars are discrete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitRange {
    Created {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Stars {
        min: u32,
        max: u32,
    },
}

impl UnitRange {
    /// Split the range at its midpoint. Returns `None` when the range is
    /// already at minimum granularity (one day / one integer).
    pub fn bisect(&self) -> Option<(UnitRange, UnitRange)> {
        match self {
            UnitRange::Created { start, end } => {
                let span = *end - *start;
                if span <= min_time_span() {
                    return None;
                }
                let mid = *start + span / 2;
                Some((
                    UnitRange::Created {
                        start: *start,
                        end: mid,
                    },
                    UnitRange::Created {
                        start: mid,
                        end: *end,
                    },
                ))
            }
            UnitRange::Stars { min, max } => {
                if min >= max {
                    return None;
                }
                let mid = min + (max - min) / 2;
                Some((
                    UnitRange::Stars {
                        min: *min,
                        max: mid,
                    },
                    UnitRange::Stars {
                        min: mid + 1,
                        max: *max,
                    },
                ))
            }
        }
    }

    pub fn is_minimal(&self) -> bool {
        match self {
            UnitRange::Created { start, end } => *end - *start <= min_time_span(),
            UnitRange::Stars { min, max } => min >= max,
        }
    }

    /// Range qualifier in GitHub search syntax.
    pub fn query_fragment(&self) -> String {
        match self {
            UnitRange::Created { start, end } => {
                // Half-open end rendered as an inclusive bound on the last
                // whole second inside the range.
                let last = *end - Duration::seconds(1);
                format!(
                    "created:{}..{}",
                    start.format("%Y-%m-%dT%H:%M:%SZ"),
                    last.format("%Y-%m-%dT%H:%M:%SZ")
                )
            }
            UnitRange::Stars { min, max } => format!("stars:{}..{}", min, max),
        }
    }

    /// Sort key: ascending by range start.
    pub fn start_key(&self) -> i64 {
        match self {
            UnitRange::Created { start, .. } => start.timestamp(),
            UnitRange::Stars { min, .. } => *min as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    pub phase: String,
    pub range: UnitRange,
    pub status: UnitStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl WorkUnit {
    pub fn new(phase: &str, range: UnitRange) -> Self {
        Self {
            id: Self::unit_id(phase, &range),
            phase: phase.to_string(),
            range,
            status: UnitStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Deterministic id so a re-partitioned resume run maps onto the same
    /// ledger rows as the original run.
    fn unit_id(phase: &str, range: &UnitRange) -> String {
        match range {
            UnitRange::Created { start, end } => format!(
                "{}:created:{}:{}",
                phase,
                start.format("%Y%m%dT%H%M%S"),
                end.format("%Y%m%dT%H%M%S")
            ),
            UnitRange::Stars { min, max } => format!("{}:stars:{}:{}", phase, min, max),
        }
    }
}
