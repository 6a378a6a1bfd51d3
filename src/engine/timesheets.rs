use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::policy::ApprovalPolicy;

use super::conflict::{now_ms, validate_date};
use super::{Engine, EngineError};

fn validate_entry_fields(
    hours: Hours,
    billing_rate: f64,
    cost_rate: f64,
    notes: Option<&str>,
) -> Result<(), EngineError> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(EngineError::Validation("hours must be positive"));
    }
    if hours > MAX_HOURS_PER_DAY {
        return Err(EngineError::Validation("hours above 24 for one date"));
    }
    if !billing_rate.is_finite() || billing_rate < 0.0 {
        return Err(EngineError::Validation("billing rate must be non-negative"));
    }
    if !cost_rate.is_finite() || cost_rate < 0.0 {
        return Err(EngineError::Validation("cost rate must be non-negative"));
    }
    if let Some(notes) = notes
        && notes.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// Record a state-machine guard rejection: boolean-false outcome, not an error.
fn guard_reject(op: &'static str, reason: &'static str) -> bool {
    debug!(op, reason, "timesheet guard rejected");
    metrics::counter!(observability::GUARD_REJECTIONS_TOTAL, "op" => op).increment(1);
    false
}

impl Engine {
    /// Log work as a draft entry. Amounts are derived from hours × rates
    /// before persistence; whatever the caller put in the amount fields is
    /// overwritten.
    pub async fn create_timesheet(&self, mut entry: Timesheet) -> Result<(), EngineError> {
        validate_date(entry.date)?;
        validate_entry_fields(
            entry.hours,
            entry.billing_rate,
            entry.cost_rate,
            entry.notes.as_deref(),
        )?;
        if self.entity_to_person.contains_key(&entry.id) {
            return Err(EngineError::AlreadyExists(entry.id));
        }
        entry.status = TimesheetStatus::Draft;
        entry.approved_by = None;
        entry.approved_at = None;
        entry.recompute_amounts();

        let person_id = entry.person_id;
        let ps = self.person_state_or_create(person_id);
        let mut guard = ps.write().await;
        if guard.timesheets.len() >= MAX_TIMESHEETS_PER_PERSON {
            return Err(EngineError::LimitExceeded("too many timesheets for person"));
        }

        let event = Event::TimesheetCreated { entry };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Edit a draft or rejected entry. Editing a rejected entry returns it to
    /// draft. Returns false when the entry is not editable.
    pub async fn update_timesheet(
        &self,
        id: Ulid,
        hours: Hours,
        is_billable: bool,
        billing_rate: f64,
        cost_rate: f64,
        notes: Option<String>,
    ) -> Result<bool, EngineError> {
        validate_entry_fields(hours, billing_rate, cost_rate, notes.as_deref())?;
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let entry = guard.timesheet(id).ok_or(EngineError::NotFound(id))?;
        if !entry.status.is_editable() {
            return Ok(guard_reject("update", "not draft or rejected"));
        }

        let event = Event::TimesheetUpdated {
            id,
            person_id,
            hours,
            is_billable,
            billing_rate,
            cost_rate,
            notes,
        };
        self.persist_and_apply(person_id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Draft → submitted. Any other state is a boolean false, not an error —
    /// the caller surfaces a message instead of handling an exception.
    pub async fn submit_timesheet(&self, id: Ulid) -> Result<bool, EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let entry = guard.timesheet(id).ok_or(EngineError::NotFound(id))?;
        if entry.status != TimesheetStatus::Draft {
            return Ok(guard_reject("submit", "not draft"));
        }

        let event = Event::TimesheetSubmitted { id, person_id };
        self.persist_and_apply(person_id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Submitted → approved, by a qualified approver who is not the entry's
    /// own person. Success recomputes the date's utilized hours.
    pub async fn approve_timesheet(
        &self,
        id: Ulid,
        approver_id: Ulid,
        policy: &dyn ApprovalPolicy,
    ) -> Result<bool, EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let entry = guard.timesheet(id).ok_or(EngineError::NotFound(id))?;
        if entry.status != TimesheetStatus::Submitted {
            return Ok(guard_reject("approve", "not submitted"));
        }
        if approver_id == entry.person_id {
            return Ok(guard_reject("approve", "self-approval"));
        }
        if !policy.can_approve_timesheets(approver_id, entry.project_id) {
            return Ok(guard_reject("approve", "approver not authorized"));
        }

        let event = Event::TimesheetApproved {
            id,
            person_id,
            approver_id,
            at: now_ms(),
        };
        self.persist_and_apply(person_id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Submitted → rejected. Same guards and audit fields as approval.
    pub async fn reject_timesheet(
        &self,
        id: Ulid,
        approver_id: Ulid,
        policy: &dyn ApprovalPolicy,
    ) -> Result<bool, EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let entry = guard.timesheet(id).ok_or(EngineError::NotFound(id))?;
        if entry.status != TimesheetStatus::Submitted {
            return Ok(guard_reject("reject", "not submitted"));
        }
        if approver_id == entry.person_id {
            return Ok(guard_reject("reject", "self-rejection"));
        }
        if !policy.can_approve_timesheets(approver_id, entry.project_id) {
            return Ok(guard_reject("reject", "approver not authorized"));
        }

        let event = Event::TimesheetRejected {
            id,
            person_id,
            approver_id,
            at: now_ms(),
        };
        self.persist_and_apply(person_id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Approved → invoiced. Terminal: an invoiced entry never changes again.
    pub async fn invoice_timesheet(&self, id: Ulid) -> Result<bool, EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let entry = guard.timesheet(id).ok_or(EngineError::NotFound(id))?;
        if entry.status != TimesheetStatus::Approved {
            return Ok(guard_reject("invoice", "not approved"));
        }

        let event = Event::TimesheetInvoiced { id, person_id };
        self.persist_and_apply(person_id, &mut guard, &event).await?;
        Ok(true)
    }

    /// Withdraw a draft. Anything past draft is a boolean false.
    pub async fn remove_timesheet(&self, id: Ulid) -> Result<bool, EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let entry = guard.timesheet(id).ok_or(EngineError::NotFound(id))?;
        if entry.status != TimesheetStatus::Draft {
            return Ok(guard_reject("remove", "not draft"));
        }

        let event = Event::TimesheetRemoved { id, person_id };
        self.persist_and_apply(person_id, &mut guard, &event).await?;
        Ok(true)
    }
}
