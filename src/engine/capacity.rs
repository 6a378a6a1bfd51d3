use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::validate_date;
use super::{Engine, EngineError};

// ── Recompute primitives ─────────────────────────────────────────
//
// These are the only writers of the cached `allocated_hours` /
// `utilized_hours` columns. The gateway in `mod.rs` calls them on every
// event application; the public Engine methods below expose them for
// caller-driven resynchronization.

/// Set a row's allocated cache to the live sum over covering planned/active
/// allocations, creating the row with defaults if absent. Returns the sum.
pub(super) fn recompute_allocated(ps: &mut PersonState, date: NaiveDate) -> Hours {
    let sum: Hours = ps
        .allocations_covering(date)
        .filter(|a| a.status.counts_toward_capacity())
        .map(|a| a.daily_allocated_hours())
        .sum();
    ps.ensure_capacity_row(date).allocated_hours = sum;
    metrics::counter!(observability::RECOMPUTES_TOTAL, "kind" => "allocated").increment(1);
    sum
}

/// Set a row's utilized cache to the live sum over that date's counted
/// timesheets. Silently a no-op when no capacity row exists yet — callers
/// generate first. Returns the live sum either way.
pub(super) fn recompute_utilized(ps: &mut PersonState, date: NaiveDate) -> Hours {
    let sum: Hours = ps
        .timesheets_on(date)
        .filter(|t| t.status.counts_toward_utilization())
        .map(|t| t.hours)
        .sum();
    if let Some(row) = ps.capacity.get_mut(&date) {
        row.utilized_hours = sum;
        metrics::counter!(observability::RECOMPUTES_TOTAL, "kind" => "utilized").increment(1);
    }
    sum
}

/// Recompute allocated hours across an allocation's window, clamped to the
/// recompute horizon. Dates past the horizon stay caller-driven.
pub(super) fn recompute_allocation_window(ps: &mut PersonState, range: &DateRange) {
    let hard_end = range
        .start
        .checked_add_days(Days::new(RECOMPUTE_HORIZON_DAYS as u64))
        .unwrap_or(NaiveDate::MAX);
    let dates: Vec<NaiveDate> = range.iter_dates_until(hard_end).collect();
    for date in dates {
        recompute_allocated(ps, date);
    }
}

/// firstOrNew generation: create missing rows with weekday defaults and seed
/// their caches from the live sums. Existing rows are left untouched.
pub(super) fn generate_rows(ps: &mut PersonState, start: NaiveDate, end: NaiveDate) {
    let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    for date in dates {
        if !ps.capacity.contains_key(&date) {
            ps.ensure_capacity_row(date);
            recompute_allocated(ps, date);
            recompute_utilized(ps, date);
        }
    }
}

// ── Public ledger operations ─────────────────────────────────────

impl Engine {
    /// Generate capacity rows for every date in `[start, end]`. Idempotent:
    /// existing rows — including leave/working-day overrides — are never
    /// overwritten.
    pub async fn generate_capacity(
        &self,
        person_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), EngineError> {
        validate_date(start)?;
        validate_date(end)?;
        if end < start {
            return Err(EngineError::Validation("end date precedes start date"));
        }
        if (end - start).num_days() + 1 > MAX_GENERATE_SPAN_DAYS {
            return Err(EngineError::LimitExceeded("generation range too wide"));
        }

        let ps = self.person_state_or_create(person_id);
        let mut guard = ps.write().await;
        let event = Event::CapacityGenerated {
            person_id,
            start,
            end,
        };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Resynchronize a row's allocated cache with the live aggregation.
    /// Creates the row with defaults when absent. Not WAL-logged: the result
    /// is derived state, re-derivable on replay from the allocation events.
    pub async fn recompute_allocated_hours(
        &self,
        person_id: Ulid,
        date: NaiveDate,
    ) -> Result<Hours, EngineError> {
        validate_date(date)?;
        let ps = self.person_state_or_create(person_id);
        let mut guard = ps.write().await;
        Ok(recompute_allocated(&mut guard, date))
    }

    /// Resynchronize a row's utilized cache with the live aggregation.
    /// Silently no-ops (returning the live sum) when no row exists yet.
    pub async fn recompute_utilized_hours(
        &self,
        person_id: Ulid,
        date: NaiveDate,
    ) -> Result<Hours, EngineError> {
        validate_date(date)?;
        let ps = self.person_state_or_create(person_id);
        let mut guard = ps.write().await;
        Ok(recompute_utilized(&mut guard, date))
    }

    /// HR override: mark a date as leave — non-working, zero capacity.
    pub async fn mark_leave(
        &self,
        person_id: Ulid,
        date: NaiveDate,
        leave_type: String,
    ) -> Result<(), EngineError> {
        validate_date(date)?;
        if leave_type.is_empty() {
            return Err(EngineError::Validation("empty leave type"));
        }
        if leave_type.len() > MAX_LEAVE_TYPE_LEN {
            return Err(EngineError::LimitExceeded("leave type too long"));
        }

        let ps = self.person_state_or_create(person_id);
        let mut guard = ps.write().await;
        let event = Event::LeaveMarked {
            person_id,
            date,
            leave_type,
        };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// HR override: mark a date as worked at the given available hours
    /// (e.g. a scheduled Saturday or a half-day).
    pub async fn mark_working_day(
        &self,
        person_id: Ulid,
        date: NaiveDate,
        hours: Hours,
    ) -> Result<(), EngineError> {
        validate_date(date)?;
        if !hours.is_finite() || hours <= 0.0 {
            return Err(EngineError::Validation("working-day hours must be positive"));
        }
        if hours > MAX_HOURS_PER_DAY {
            return Err(EngineError::LimitExceeded("working-day hours above 24"));
        }

        let ps = self.person_state_or_create(person_id);
        let mut guard = ps.write().await;
        let event = Event::WorkingDayMarked {
            person_id,
            date,
            hours,
        };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }
}
