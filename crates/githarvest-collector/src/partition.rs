use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use githarvest_core::{UnitRange, WorkUnit};

/// Trial-count source the partitioner probes: search `total_count` for the
/// live API, the warehouse count query for historical windows.
#[async_trait]
pub trait CountProbe: Send + Sync {
    async fn count(&self, range: &UnitRange) -> Result<u64>;
}

/// Split `root` into work units whose probed result count stays below
/// `ceiling`. A count at exactly the ceiling is treated as at-or-above,
/// since the upstream truncates instead of erroring.
///
/// The returned units cover `root` exactly, with no gaps or overlaps, in
/// ascending range order. A unit at minimum granularity is accepted even
/// over the ceiling; its results past the cap are unreachable and the unit
/// is logged as possibly truncated.
pub async fn partition(
    phase: &str,
    root: UnitRange,
    ceiling: u64,
    probe: &dyn CountProbe,
) -> Result<Vec<WorkUnit>> {
    let mut stack = vec![root];
    let mut accepted = Vec::new();

    while let Some(range) = stack.pop() {
        let count = probe.count(&range).await?;
        if count >= ceiling {
            if let Some((left, right)) = range.bisect() {
                debug!(count, ceiling, "range over ceiling, bisecting");
                stack.push(right);
                stack.push(left);
                continue;
            }
            warn!(
                count,
                ceiling,
                range = %range.query_fragment(),
                "minimum-granularity unit still at or above ceiling, results may be truncated"
            );
        }
        accepted.push(range);
    }

    accepted.sort_by_key(UnitRange::start_key);
    Ok(accepted
        .into_iter()
        .map(|range| WorkUnit::new(phase, range))
        .collect())
}
