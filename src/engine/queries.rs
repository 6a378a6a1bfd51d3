use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn validate_window(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if end < start {
        return Err(EngineError::Validation("query end precedes start"));
    }
    if (end - start).num_days() + 1 > MAX_QUERY_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    pub async fn get_allocation(&self, id: Ulid) -> Result<ResourceAllocation, EngineError> {
        let person_id = self.person_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let ps = self.person_state(&person_id).ok_or(EngineError::NotFound(person_id))?;
        let guard = ps.read().await;
        guard.allocation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn get_timesheet(&self, id: Ulid) -> Result<Timesheet, EngineError> {
        let person_id = self.person_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let ps = self.person_state(&person_id).ok_or(EngineError::NotFound(person_id))?;
        let guard = ps.read().await;
        guard.timesheet(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All of a person's allocations, sorted by range start. Unknown person
    /// resolves to an empty list, same as a person with no allocations.
    pub async fn allocations_for_person(&self, person_id: Ulid) -> Vec<ResourceAllocation> {
        match self.person_state(&person_id) {
            Some(ps) => ps.read().await.allocations.clone(),
            None => Vec::new(),
        }
    }

    /// Existing capacity rows in `[start, end]` — ungenerated dates are simply
    /// absent; call `generate_capacity` first for a dense view.
    pub async fn capacity_for_person(
        &self,
        person_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CapacityDay>, EngineError> {
        validate_window(start, end)?;
        let Some(ps) = self.person_state(&person_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        Ok(guard.capacity.range(start..=end).map(|(_, row)| row.clone()).collect())
    }

    pub async fn capacity_day(&self, person_id: Ulid, date: NaiveDate) -> Option<CapacityDay> {
        let ps = self.person_state(&person_id)?;
        let guard = ps.read().await;
        guard.capacity.get(&date).cloned()
    }

    pub async fn timesheets_for_person(
        &self,
        person_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Timesheet>, EngineError> {
        validate_window(start, end)?;
        let Some(ps) = self.person_state(&person_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        Ok(guard
            .timesheets
            .iter()
            .filter(|t| start <= t.date && t.date <= end)
            .cloned()
            .collect())
    }

    /// Cross-person scan: every allocation on the project.
    pub async fn allocations_for_project(&self, project_id: Ulid) -> Vec<ResourceAllocation> {
        let mut out = Vec::new();
        let person_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for pid in person_ids {
            let Some(ps) = self.person_state(&pid) else {
                continue;
            };
            let guard = ps.read().await;
            out.extend(
                guard
                    .allocations
                    .iter()
                    .filter(|a| a.project_id == project_id)
                    .cloned(),
            );
        }
        out
    }

    /// Effort/cost rollup for a project over approved and invoiced entries.
    /// Submitted work is still pending review and is excluded from billing.
    pub async fn project_effort(&self, project_id: Ulid) -> EffortSummary {
        let mut summary = EffortSummary {
            project_id,
            total_hours: 0.0,
            billable_hours: 0.0,
            cost_amount: 0.0,
            billable_amount: 0.0,
        };
        let person_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for pid in person_ids {
            let Some(ps) = self.person_state(&pid) else {
                continue;
            };
            let guard = ps.read().await;
            for t in guard.timesheets.iter().filter(|t| {
                t.project_id == project_id
                    && matches!(
                        t.status,
                        TimesheetStatus::Approved | TimesheetStatus::Invoiced
                    )
            }) {
                summary.total_hours += t.hours;
                if t.is_billable {
                    summary.billable_hours += t.hours;
                }
                summary.cost_amount += t.cost_amount;
                summary.billable_amount += t.billable_amount;
            }
        }
        summary
    }

    /// Rollup of a person's capacity rows over a window. Only existing rows
    /// contribute — pair with `generate_capacity` for a full-window figure.
    pub async fn utilization_summary(
        &self,
        person_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<UtilizationSummary, EngineError> {
        validate_window(start, end)?;
        let mut summary = UtilizationSummary {
            person_id,
            available_hours: 0.0,
            allocated_hours: 0.0,
            utilized_hours: 0.0,
            overallocated_days: 0,
        };
        let Some(ps) = self.person_state(&person_id) else {
            return Ok(summary);
        };
        let guard = ps.read().await;
        for (_, row) in guard.capacity.range(start..=end) {
            summary.available_hours += row.available_hours;
            summary.allocated_hours += row.allocated_hours;
            summary.utilized_hours += row.utilized_hours;
            if row.is_overallocated() {
                summary.overallocated_days += 1;
            }
        }
        Ok(summary)
    }

    /// Ledger-true total hours for a bounded allocation: walks the capacity
    /// rows day by day, honoring `is_working_day` overrides; dates without a
    /// row fall back to the weekday default. None for open-ended allocations.
    ///
    /// This is the authoritative counterpart of the fixed-calendar
    /// `ResourceAllocation::estimated_total_hours` — the two diverge once
    /// holidays or extra working days are marked.
    pub async fn ledger_total_hours(&self, id: Ulid) -> Result<Option<Hours>, EngineError> {
        let person_id = self.person_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let ps = self.person_state(&person_id).ok_or(EngineError::NotFound(person_id))?;
        let guard = ps.read().await;
        let allocation = guard.allocation(id).ok_or(EngineError::NotFound(id))?;

        let Some(end) = allocation.range.end else {
            return Ok(None);
        };
        let daily = allocation.daily_allocated_hours();
        let mut total = 0.0;
        for date in allocation.range.start.iter_days().take_while(|d| *d <= end) {
            let working = match guard.capacity.get(&date) {
                Some(row) => row.is_working_day,
                None => is_weekday(date),
            };
            if working {
                total += daily;
            }
        }
        Ok(Some(total))
    }
}
