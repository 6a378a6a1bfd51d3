use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::DEFAULT_WORKING_HOURS;

/// Unix milliseconds — audit timestamps only. Calendar math uses `NaiveDate`.
pub type Ms = i64;

/// Fractional hours.
pub type Hours = f64;

pub(crate) fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Inclusive calendar-date range. `end = None` means open-ended; comparisons
/// treat the absent end as unbounded rather than substituting a sentinel date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        debug_assert!(end.is_none_or(|e| start <= e), "DateRange start must not follow end");
        Self { start, end }
    }

    pub fn open_ended(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && self.end.is_none_or(|e| date <= e)
    }

    /// Inclusive ranges intersect; an absent end compares as unbounded.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        other.end.is_none_or(|e| self.start <= e) && self.end.is_none_or(|e| other.start <= e)
    }

    /// The shared window of two ranges: `max` of starts, `min` of ends, where
    /// an open end only survives if both ends are open.
    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        if !self.overlaps(other) {
            return None;
        }
        let start = self.start.max(other.start);
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        Some(DateRange { start, end })
    }

    /// Number of days in the range, or None when open-ended.
    pub fn len_days(&self) -> Option<i64> {
        self.end.map(|e| (e - self.start).num_days() + 1)
    }

    /// Mon–Fri days in the range, or None when open-ended. Calendar rule only;
    /// holiday/leave overrides live in the capacity ledger, not here.
    pub fn weekday_count(&self) -> Option<u32> {
        let end = self.end?;
        Some(
            self.start
                .iter_days()
                .take_while(|d| *d <= end)
                .filter(|d| is_weekday(*d))
                .count() as u32,
        )
    }

    /// Dates of the range clamped to `hard_end` (open ends stop there too).
    pub fn iter_dates_until(&self, hard_end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
        let end = match self.end {
            Some(e) => e.min(hard_end),
            None => hard_end,
        };
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationStatus {
    Planned,
    Active,
    Completed,
    Cancelled,
}

impl AllocationStatus {
    /// Planned and active commitments both count toward allocated hours.
    pub fn counts_toward_capacity(&self) -> bool {
        matches!(self, AllocationStatus::Planned | AllocationStatus::Active)
    }
}

/// A person assigned to a project over a date range at a percentage of their
/// nominal daily hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub id: Ulid,
    pub person_id: Ulid,
    pub project_id: Ulid,
    /// Absent when the assignment is project-wide or the task module is not
    /// installed — the engine treats both identically.
    pub task_id: Option<Ulid>,
    pub phase: Option<String>,
    pub range: DateRange,
    /// Not capped at 100 per-row: over-commitment is a derived condition
    /// across overlapping rows, not a single-row constraint.
    pub percentage: f64,
    pub hours_per_day: Hours,
    pub status: AllocationStatus,
    pub is_confirmed: bool,
    pub is_billable: bool,
}

impl ResourceAllocation {
    pub fn new(person_id: Ulid, project_id: Ulid, range: DateRange, percentage: f64) -> Self {
        Self {
            id: Ulid::new(),
            person_id,
            project_id,
            task_id: None,
            phase: None,
            range,
            percentage,
            hours_per_day: DEFAULT_WORKING_HOURS,
            status: AllocationStatus::Planned,
            is_confirmed: false,
            is_billable: true,
        }
    }

    pub fn daily_allocated_hours(&self) -> Hours {
        self.hours_per_day * self.percentage / 100.0
    }

    /// 5-day week approximation.
    pub fn weekly_allocated_hours(&self) -> Hours {
        self.daily_allocated_hours() * 5.0
    }

    /// 22-working-day month approximation.
    pub fn monthly_allocated_hours(&self) -> Hours {
        self.daily_allocated_hours() * 22.0
    }

    /// Fixed-calendar estimate: daily hours × Mon–Fri day count, ignoring the
    /// ledger's holiday/leave overrides. None when open-ended. The ledger-true
    /// figure is `Engine::ledger_total_hours`.
    pub fn estimated_total_hours(&self) -> Option<Hours> {
        self.range
            .weekday_count()
            .map(|days| self.daily_allocated_hours() * days as f64)
    }

    /// Whether this allocation contributes to allocated hours on `date`.
    pub fn counts_on(&self, date: NaiveDate) -> bool {
        self.status.counts_toward_capacity() && self.range.covers(date)
    }
}

/// One row of the capacity ledger: a single (person, date) cell.
///
/// `allocated_hours` and `utilized_hours` are caches of the live aggregation
/// over allocations and timesheets. They are written only by the recompute
/// paths, never directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityDay {
    pub person_id: Ulid,
    pub date: NaiveDate,
    pub available_hours: Hours,
    pub allocated_hours: Hours,
    pub utilized_hours: Hours,
    pub is_working_day: bool,
    pub leave_type: Option<String>,
}

impl CapacityDay {
    /// Generation default: 8 available hours Mon–Fri, zero on weekends.
    pub fn default_for(person_id: Ulid, date: NaiveDate) -> Self {
        let working = is_weekday(date);
        Self {
            person_id,
            date,
            available_hours: if working { DEFAULT_WORKING_HOURS } else { 0.0 },
            allocated_hours: 0.0,
            utilized_hours: 0.0,
            is_working_day: working,
            leave_type: None,
        }
    }

    pub fn remaining_hours(&self) -> Hours {
        (self.available_hours - self.allocated_hours).max(0.0)
    }

    pub fn utilization_percentage(&self) -> f64 {
        if self.available_hours <= 0.0 {
            0.0
        } else {
            self.utilized_hours / self.available_hours * 100.0
        }
    }

    pub fn allocation_percentage_of_capacity(&self) -> f64 {
        if self.available_hours <= 0.0 {
            0.0
        } else {
            self.allocated_hours / self.available_hours * 100.0
        }
    }

    pub fn is_overallocated(&self) -> bool {
        self.allocated_hours > self.available_hours
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.allocated_hours >= self.available_hours
    }

    /// HR override: the day is leave; no capacity regardless of weekday.
    pub fn mark_leave(&mut self, leave_type: String) {
        self.is_working_day = false;
        self.available_hours = 0.0;
        self.leave_type = Some(leave_type);
    }

    /// HR override: the day is worked at the given capacity.
    pub fn mark_working_day(&mut self, hours: Hours) {
        self.is_working_day = true;
        self.available_hours = hours;
        self.leave_type = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimesheetStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Invoiced,
}

impl TimesheetStatus {
    /// Submitted, approved, and invoiced work all count as utilized time.
    pub fn counts_toward_utilization(&self) -> bool {
        matches!(
            self,
            TimesheetStatus::Submitted | TimesheetStatus::Approved | TimesheetStatus::Invoiced
        )
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, TimesheetStatus::Draft | TimesheetStatus::Rejected)
    }
}

/// A logged-work entry. `cost_amount` and `billable_amount` are derived from
/// hours × rates on every create/update and never set independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timesheet {
    pub id: Ulid,
    pub person_id: Ulid,
    pub project_id: Ulid,
    pub task_id: Option<Ulid>,
    pub date: NaiveDate,
    pub hours: Hours,
    pub is_billable: bool,
    pub billing_rate: f64,
    pub cost_rate: f64,
    pub cost_amount: f64,
    pub billable_amount: f64,
    pub notes: Option<String>,
    pub status: TimesheetStatus,
    pub approved_by: Option<Ulid>,
    pub approved_at: Option<Ms>,
}

impl Timesheet {
    pub fn new(person_id: Ulid, project_id: Ulid, date: NaiveDate, hours: Hours) -> Self {
        let mut entry = Self {
            id: Ulid::new(),
            person_id,
            project_id,
            task_id: None,
            date,
            hours,
            is_billable: false,
            billing_rate: 0.0,
            cost_rate: 0.0,
            cost_amount: 0.0,
            billable_amount: 0.0,
            notes: None,
            status: TimesheetStatus::Draft,
            approved_by: None,
            approved_at: None,
        };
        entry.recompute_amounts();
        entry
    }

    pub fn recompute_amounts(&mut self) {
        self.cost_amount = self.hours * self.cost_rate;
        self.billable_amount = if self.is_billable {
            self.hours * self.billing_rate
        } else {
            0.0
        };
    }
}

/// All of one person's engine state: allocations sorted by range start, the
/// capacity ledger keyed by date, and timesheet entries.
///
/// One write lock per person serializes every recompute touching that person,
/// which is stronger than the required per-(person, date) serialization.
#[derive(Debug, Clone)]
pub struct PersonState {
    pub id: Ulid,
    /// Sorted by `range.start`.
    pub allocations: Vec<ResourceAllocation>,
    pub capacity: BTreeMap<NaiveDate, CapacityDay>,
    pub timesheets: Vec<Timesheet>,
}

impl PersonState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            allocations: Vec::new(),
            capacity: BTreeMap::new(),
            timesheets: Vec::new(),
        }
    }

    /// Insert keeping sort order by range start.
    pub fn insert_allocation(&mut self, allocation: ResourceAllocation) {
        let pos = self
            .allocations
            .binary_search_by_key(&allocation.range.start, |a| a.range.start)
            .unwrap_or_else(|e| e);
        self.allocations.insert(pos, allocation);
    }

    pub fn allocation(&self, id: Ulid) -> Option<&ResourceAllocation> {
        self.allocations.iter().find(|a| a.id == id)
    }

    pub fn allocation_mut(&mut self, id: Ulid) -> Option<&mut ResourceAllocation> {
        self.allocations.iter_mut().find(|a| a.id == id)
    }

    pub fn remove_allocation(&mut self, id: Ulid) -> Option<ResourceAllocation> {
        let pos = self.allocations.iter().position(|a| a.id == id)?;
        Some(self.allocations.remove(pos))
    }

    /// Allocations whose range covers `date`, regardless of status.
    /// Binary search skips everything starting after `date`.
    pub fn allocations_covering(&self, date: NaiveDate) -> impl Iterator<Item = &ResourceAllocation> {
        let right_bound = self.allocations.partition_point(|a| a.range.start <= date);
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.range.covers(date))
    }

    pub fn insert_timesheet(&mut self, entry: Timesheet) {
        self.timesheets.push(entry);
    }

    pub fn timesheet(&self, id: Ulid) -> Option<&Timesheet> {
        self.timesheets.iter().find(|t| t.id == id)
    }

    pub fn timesheet_mut(&mut self, id: Ulid) -> Option<&mut Timesheet> {
        self.timesheets.iter_mut().find(|t| t.id == id)
    }

    pub fn remove_timesheet(&mut self, id: Ulid) -> Option<Timesheet> {
        let pos = self.timesheets.iter().position(|t| t.id == id)?;
        Some(self.timesheets.remove(pos))
    }

    pub fn timesheets_on(&self, date: NaiveDate) -> impl Iterator<Item = &Timesheet> {
        self.timesheets.iter().filter(move |t| t.date == date)
    }

    /// firstOrNew semantics: an existing row is never overwritten.
    pub fn ensure_capacity_row(&mut self, date: NaiveDate) -> &mut CapacityDay {
        let person_id = self.id;
        self.capacity
            .entry(date)
            .or_insert_with(|| CapacityDay::default_for(person_id, date))
    }
}

/// The event types — the WAL record format. Every event is scoped to exactly
/// one person, so replay and notification routing are uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AllocationCreated {
        allocation: ResourceAllocation,
    },
    AllocationUpdated {
        id: Ulid,
        person_id: Ulid,
        range: DateRange,
        percentage: f64,
        hours_per_day: Hours,
    },
    AllocationConfirmed {
        id: Ulid,
        person_id: Ulid,
    },
    AllocationCompleted {
        id: Ulid,
        person_id: Ulid,
    },
    AllocationCancelled {
        id: Ulid,
        person_id: Ulid,
    },
    AllocationRemoved {
        id: Ulid,
        person_id: Ulid,
    },
    CapacityGenerated {
        person_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },
    LeaveMarked {
        person_id: Ulid,
        date: NaiveDate,
        leave_type: String,
    },
    WorkingDayMarked {
        person_id: Ulid,
        date: NaiveDate,
        hours: Hours,
    },
    TimesheetCreated {
        entry: Timesheet,
    },
    TimesheetUpdated {
        id: Ulid,
        person_id: Ulid,
        hours: Hours,
        is_billable: bool,
        billing_rate: f64,
        cost_rate: f64,
        notes: Option<String>,
    },
    TimesheetSubmitted {
        id: Ulid,
        person_id: Ulid,
    },
    TimesheetApproved {
        id: Ulid,
        person_id: Ulid,
        approver_id: Ulid,
        at: Ms,
    },
    TimesheetRejected {
        id: Ulid,
        person_id: Ulid,
        approver_id: Ulid,
        at: Ms,
    },
    TimesheetInvoiced {
        id: Ulid,
        person_id: Ulid,
    },
    TimesheetRemoved {
        id: Ulid,
        person_id: Ulid,
    },
}

impl Event {
    pub fn person_id(&self) -> Ulid {
        match self {
            Event::AllocationCreated { allocation } => allocation.person_id,
            Event::TimesheetCreated { entry } => entry.person_id,
            Event::AllocationUpdated { person_id, .. }
            | Event::AllocationConfirmed { person_id, .. }
            | Event::AllocationCompleted { person_id, .. }
            | Event::AllocationCancelled { person_id, .. }
            | Event::AllocationRemoved { person_id, .. }
            | Event::CapacityGenerated { person_id, .. }
            | Event::LeaveMarked { person_id, .. }
            | Event::WorkingDayMarked { person_id, .. }
            | Event::TimesheetUpdated { person_id, .. }
            | Event::TimesheetSubmitted { person_id, .. }
            | Event::TimesheetApproved { person_id, .. }
            | Event::TimesheetRejected { person_id, .. }
            | Event::TimesheetInvoiced { person_id, .. }
            | Event::TimesheetRemoved { person_id, .. } => *person_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// One over-commitment hit from a conflict scan: the other allocation, the
/// summed percentage, and the shared window (open end stays open).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityConflict {
    pub allocation_id: Ulid,
    pub project_id: Ulid,
    pub total_percentage: f64,
    pub overlap_start: NaiveDate,
    pub overlap_end: Option<NaiveDate>,
}

/// Per-project effort and money rollup over approved/invoiced timesheets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffortSummary {
    pub project_id: Ulid,
    pub total_hours: Hours,
    pub billable_hours: Hours,
    pub cost_amount: f64,
    pub billable_amount: f64,
}

/// Per-person rollup over the capacity rows of a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationSummary {
    pub person_id: Ulid,
    pub available_hours: Hours,
    pub allocated_hours: Hours,
    pub utilized_hours: Hours,
    pub overallocated_days: u32,
}
