use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{conflicts_among, validate_range};
use super::{Engine, EngineError};

fn validate_allocation(allocation: &ResourceAllocation) -> Result<(), EngineError> {
    validate_range(&allocation.range)?;
    if !allocation.percentage.is_finite() || allocation.percentage <= 0.0 {
        return Err(EngineError::Validation("allocation percentage must be positive"));
    }
    if allocation.percentage > MAX_ALLOCATION_PERCENTAGE {
        return Err(EngineError::LimitExceeded("allocation percentage absurdly high"));
    }
    if !allocation.hours_per_day.is_finite() || allocation.hours_per_day <= 0.0 {
        return Err(EngineError::Validation("hours per day must be positive"));
    }
    if allocation.hours_per_day > MAX_HOURS_PER_DAY {
        return Err(EngineError::LimitExceeded("hours per day above 24"));
    }
    if let Some(ref phase) = allocation.phase
        && phase.len() > MAX_PHASE_LEN
    {
        return Err(EngineError::LimitExceeded("phase label too long"));
    }
    Ok(())
}

impl Engine {
    /// Schedule a person onto a project. Persists as planned unless the row
    /// arrives confirmed, in which case it is active from the start. Side
    /// effect: allocated hours are recomputed across the affected window.
    ///
    /// Over-commitment does NOT block creation — run
    /// [`Engine::check_capacity_conflicts`] first and let the caller decide.
    pub async fn create_allocation(&self, mut allocation: ResourceAllocation) -> Result<(), EngineError> {
        validate_allocation(&allocation)?;
        if self.entity_to_person.contains_key(&allocation.id) {
            return Err(EngineError::AlreadyExists(allocation.id));
        }
        allocation.status = if allocation.is_confirmed {
            AllocationStatus::Active
        } else {
            AllocationStatus::Planned
        };

        let person_id = allocation.person_id;
        let ps = self.person_state_or_create(person_id);
        let mut guard = ps.write().await;
        if guard.allocations.len() >= MAX_ALLOCATIONS_PER_PERSON {
            return Err(EngineError::LimitExceeded("too many allocations for person"));
        }

        let event = Event::AllocationCreated { allocation };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Planned → active. Anything else is an invalid transition.
    pub async fn confirm_allocation(&self, id: Ulid) -> Result<(), EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let status = guard.allocation(id).ok_or(EngineError::NotFound(id))?.status;
        if status != AllocationStatus::Planned {
            return Err(EngineError::InvalidState { id, status });
        }
        let event = Event::AllocationConfirmed { id, person_id };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Active → completed; the allocation stops counting toward capacity.
    pub async fn complete_allocation(&self, id: Ulid) -> Result<(), EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let status = guard.allocation(id).ok_or(EngineError::NotFound(id))?.status;
        if status != AllocationStatus::Active {
            return Err(EngineError::InvalidState { id, status });
        }
        let event = Event::AllocationCompleted { id, person_id };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Allowed from any non-completed status.
    pub async fn cancel_allocation(&self, id: Ulid) -> Result<(), EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let status = guard.allocation(id).ok_or(EngineError::NotFound(id))?.status;
        if status == AllocationStatus::Completed {
            return Err(EngineError::InvalidState { id, status });
        }
        let event = Event::AllocationCancelled { id, person_id };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Re-plan a live allocation: new range, percentage, or daily hours.
    /// Both the old and the new windows are recomputed.
    pub async fn update_allocation(
        &self,
        id: Ulid,
        range: DateRange,
        percentage: f64,
        hours_per_day: Hours,
    ) -> Result<(), EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.allocation(id).ok_or(EngineError::NotFound(id))?;
        if !current.status.counts_toward_capacity() {
            return Err(EngineError::InvalidState {
                id,
                status: current.status,
            });
        }
        let mut updated = current.clone();
        updated.range = range;
        updated.percentage = percentage;
        updated.hours_per_day = hours_per_day;
        validate_allocation(&updated)?;

        let event = Event::AllocationUpdated {
            id,
            person_id,
            range,
            percentage,
            hours_per_day,
        };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Drop the allocation from the live set. The WAL keeps its history.
    pub async fn remove_allocation(&self, id: Ulid) -> Result<(), EngineError> {
        let (person_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.allocation(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::AllocationRemoved { id, person_id };
        self.persist_and_apply(person_id, &mut guard, &event).await
    }

    /// Advisory over-commitment scan: every other planned/active allocation
    /// of the same person whose range intersects the candidate's and whose
    /// combined percentage exceeds 100. Read-only; the candidate need not be
    /// persisted yet, and a persisted candidate is excluded from its own scan.
    pub async fn check_capacity_conflicts(
        &self,
        candidate: &ResourceAllocation,
    ) -> Result<Vec<CapacityConflict>, EngineError> {
        validate_allocation(candidate)?;
        metrics::counter!(observability::CONFLICT_SCANS_TOTAL).increment(1);

        let Some(ps) = self.person_state(&candidate.person_id) else {
            return Ok(Vec::new());
        };
        let guard = ps.read().await;
        let conflicts = conflicts_among(candidate, guard.allocations.iter());
        if !conflicts.is_empty() {
            metrics::counter!(observability::CONFLICTS_FOUND_TOTAL)
                .increment(conflicts.len() as u64);
        }
        Ok(conflicts)
    }
}
