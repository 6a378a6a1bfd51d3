//! Hard bounds on inputs. Violations surface as `Validation` errors before
//! anything is persisted.

use crate::model::Hours;

/// Nominal daily capacity used by generation defaults and new allocations.
pub const DEFAULT_WORKING_HOURS: Hours = 8.0;

/// Sanity ceiling, well above 100 — a single row may legitimately exceed 100%.
pub const MAX_ALLOCATION_PERCENTAGE: f64 = 1_000.0;

pub const MAX_HOURS_PER_DAY: Hours = 24.0;

pub const MAX_ALLOCATIONS_PER_PERSON: usize = 4_096;

pub const MAX_TIMESHEETS_PER_PERSON: usize = 65_536;

/// Longest bounded allocation range (~10 years).
pub const MAX_ALLOCATION_SPAN_DAYS: i64 = 3_660;

/// Longest single capacity-generation request (~5 years).
pub const MAX_GENERATE_SPAN_DAYS: i64 = 1_830;

/// Longest read-query window (~5 years).
pub const MAX_QUERY_SPAN_DAYS: i64 = 1_830;

/// How far past an allocation's start the ledger is eagerly recomputed when
/// the allocation is open-ended or longer than this window. Later dates are
/// covered by explicit `recompute_allocated_hours` calls.
pub const RECOMPUTE_HORIZON_DAYS: i64 = 180;

pub const MAX_PHASE_LEN: usize = 256;

pub const MAX_LEAVE_TYPE_LEN: usize = 64;

pub const MAX_NOTES_LEN: usize = 1_024;

/// Calendar dates must fall inside this year window.
pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 2200;
