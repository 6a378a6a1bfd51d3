use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if date.year() < MIN_VALID_YEAR || date.year() > MAX_VALID_YEAR {
        return Err(EngineError::Validation("date out of supported range"));
    }
    Ok(())
}

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    validate_date(range.start)?;
    if let Some(end) = range.end {
        validate_date(end)?;
        if end < range.start {
            return Err(EngineError::Validation("end_date precedes start_date"));
        }
        if (end - range.start).num_days() + 1 > MAX_ALLOCATION_SPAN_DAYS {
            return Err(EngineError::LimitExceeded("allocation range too wide"));
        }
    }
    Ok(())
}

// ── Overlap / over-commitment detection ──────────────────────────

/// Same person AND intersecting date ranges. Symmetric by construction.
pub fn is_overlapping(a: &ResourceAllocation, b: &ResourceAllocation) -> bool {
    a.person_id == b.person_id && a.range.overlaps(&b.range)
}

/// Plain sum of the two percentages — the over-commitment figure, not a
/// time-weighted average. Two 60% rows overlapping for a single day are a
/// 120% conflict for their whole shared window.
pub fn overlap_percentage(a: &ResourceAllocation, b: &ResourceAllocation) -> f64 {
    a.percentage + b.percentage
}

/// Scan `others` for over-commitment against `candidate`: counted statuses
/// only, intersecting ranges, combined percentage strictly above 100.
/// Purely advisory — callers decide whether to block or warn.
pub fn conflicts_among<'a>(
    candidate: &ResourceAllocation,
    others: impl Iterator<Item = &'a ResourceAllocation>,
) -> Vec<CapacityConflict> {
    let mut conflicts = Vec::new();
    for other in others {
        if other.id == candidate.id || !other.status.counts_toward_capacity() {
            continue;
        }
        if !is_overlapping(candidate, other) {
            continue;
        }
        let total = overlap_percentage(candidate, other);
        if total <= 100.0 {
            continue;
        }
        // overlaps() held, so the intersection exists.
        if let Some(window) = candidate.range.intersection(&other.range) {
            conflicts.push(CapacityConflict {
                allocation_id: other.id,
                project_id: other.project_id,
                total_percentage: total,
                overlap_start: window.start,
                overlap_end: window.end,
            });
        }
    }
    conflicts
}
