mod allocations;
mod capacity;
mod conflict;
mod error;
mod queries;
mod timesheets;

pub use conflict::{conflicts_among, is_overlapping, overlap_percentage};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedPersonState = Arc<RwLock<PersonState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The allocation/capacity/timesheet engine. One instance per embedding
/// application; state is rebuilt from the WAL at startup.
pub struct Engine {
    pub state: DashMap<Ulid, SharedPersonState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (allocation/timesheet) id → person id
    pub(super) entity_to_person: DashMap<Ulid, Ulid>,
}

/// The mutation gateway: apply an event to a PersonState (no locking — caller
/// holds the lock). Every path that can change an aggregated sum re-runs the
/// affected recompute here, so the cached capacity figures stay equal to the
/// live sums on both the live path and WAL replay.
fn apply_to_person(ps: &mut PersonState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AllocationCreated { allocation } => {
            let window = allocation.range;
            entity_map.insert(allocation.id, allocation.person_id);
            ps.insert_allocation(allocation.clone());
            capacity::recompute_allocation_window(ps, &window);
        }
        Event::AllocationUpdated {
            id,
            range,
            percentage,
            hours_per_day,
            ..
        } => {
            // Remove + reinsert keeps the by-start sort when the range moves.
            if let Some(mut a) = ps.remove_allocation(*id) {
                let old_window = a.range;
                a.range = *range;
                a.percentage = *percentage;
                a.hours_per_day = *hours_per_day;
                ps.insert_allocation(a);
                capacity::recompute_allocation_window(ps, &old_window);
                capacity::recompute_allocation_window(ps, range);
            }
        }
        Event::AllocationConfirmed { id, .. } => {
            // Planned and active both count toward capacity — no recompute.
            if let Some(a) = ps.allocation_mut(*id) {
                a.status = AllocationStatus::Active;
                a.is_confirmed = true;
            }
        }
        Event::AllocationCompleted { id, .. } => {
            if let Some(a) = ps.allocation_mut(*id) {
                a.status = AllocationStatus::Completed;
                let window = a.range;
                capacity::recompute_allocation_window(ps, &window);
            }
        }
        Event::AllocationCancelled { id, .. } => {
            if let Some(a) = ps.allocation_mut(*id) {
                a.status = AllocationStatus::Cancelled;
                let window = a.range;
                capacity::recompute_allocation_window(ps, &window);
            }
        }
        Event::AllocationRemoved { id, .. } => {
            if let Some(a) = ps.remove_allocation(*id) {
                entity_map.remove(id);
                capacity::recompute_allocation_window(ps, &a.range);
            }
        }
        Event::CapacityGenerated { start, end, .. } => {
            capacity::generate_rows(ps, *start, *end);
        }
        Event::LeaveMarked { date, leave_type, .. } => {
            ps.ensure_capacity_row(*date).mark_leave(leave_type.clone());
            capacity::recompute_allocated(ps, *date);
            capacity::recompute_utilized(ps, *date);
        }
        Event::WorkingDayMarked { date, hours, .. } => {
            ps.ensure_capacity_row(*date).mark_working_day(*hours);
            capacity::recompute_allocated(ps, *date);
            capacity::recompute_utilized(ps, *date);
        }
        Event::TimesheetCreated { entry } => {
            let mut entry = entry.clone();
            entry.recompute_amounts();
            entity_map.insert(entry.id, entry.person_id);
            let date = entry.date;
            ps.insert_timesheet(entry);
            capacity::recompute_utilized(ps, date);
        }
        Event::TimesheetUpdated {
            id,
            hours,
            is_billable,
            billing_rate,
            cost_rate,
            notes,
            ..
        } => {
            if let Some(t) = ps.timesheet_mut(*id) {
                t.hours = *hours;
                t.is_billable = *is_billable;
                t.billing_rate = *billing_rate;
                t.cost_rate = *cost_rate;
                t.notes = notes.clone();
                // Editing a rejected entry returns it to draft; the old
                // rejection audit trail is cleared with it.
                if t.status == TimesheetStatus::Rejected {
                    t.status = TimesheetStatus::Draft;
                    t.approved_by = None;
                    t.approved_at = None;
                }
                t.recompute_amounts();
                let date = t.date;
                capacity::recompute_utilized(ps, date);
            }
        }
        Event::TimesheetSubmitted { id, .. } => {
            if let Some(t) = ps.timesheet_mut(*id) {
                t.status = TimesheetStatus::Submitted;
                let date = t.date;
                capacity::recompute_utilized(ps, date);
            }
        }
        Event::TimesheetApproved { id, approver_id, at, .. } => {
            if let Some(t) = ps.timesheet_mut(*id) {
                t.status = TimesheetStatus::Approved;
                t.approved_by = Some(*approver_id);
                t.approved_at = Some(*at);
                let date = t.date;
                capacity::recompute_utilized(ps, date);
            }
        }
        Event::TimesheetRejected { id, approver_id, at, .. } => {
            // Same audit fields as approval, with status rejected.
            if let Some(t) = ps.timesheet_mut(*id) {
                t.status = TimesheetStatus::Rejected;
                t.approved_by = Some(*approver_id);
                t.approved_at = Some(*at);
                let date = t.date;
                capacity::recompute_utilized(ps, date);
            }
        }
        Event::TimesheetInvoiced { id, .. } => {
            // Invoicing is a billing event, not an un-logging of time:
            // invoiced entries keep counting toward utilization.
            if let Some(t) = ps.timesheet_mut(*id) {
                t.status = TimesheetStatus::Invoiced;
            }
        }
        Event::TimesheetRemoved { id, .. } => {
            if let Some(t) = ps.remove_timesheet(*id) {
                entity_map.remove(id);
                capacity::recompute_utilized(ps, t.date);
            }
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_person: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        let replayed = events.len();
        for event in &events {
            let person_id = event.person_id();
            let ps_arc = engine.person_state_or_create(person_id);
            let mut guard = ps_arc.try_write().expect("replay: uncontended write");
            apply_to_person(&mut guard, event, &engine.entity_to_person);
        }
        if replayed > 0 {
            info!(events = replayed, persons = engine.state.len(), "replayed WAL");
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn person_state(&self, id: &Ulid) -> Option<SharedPersonState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Persons exist implicitly: the first event referencing one creates its
    /// state. The embedding application owns the person records themselves.
    pub(super) fn person_state_or_create(&self, id: Ulid) -> SharedPersonState {
        let arc = self
            .state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(PersonState::new(id))))
            .value()
            .clone();
        metrics::gauge!(observability::PERSONS_TRACKED).set(self.state.len() as f64);
        arc
    }

    pub fn person_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_person.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        person_id: Ulid,
        ps: &mut PersonState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_person(ps, event, &self.entity_to_person);
        metrics::counter!(
            observability::MUTATIONS_TOTAL,
            "event" => observability::event_label(event)
        )
        .increment(1);
        self.notify.send(person_id, event);
        Ok(())
    }

    /// Lookup entity → person, get person state, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<PersonState>), EngineError> {
        let person_id = self
            .person_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ps = self
            .person_state(&person_id)
            .ok_or(EngineError::NotFound(person_id))?;
        let guard = ps.write_owned().await;
        Ok((person_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Caches are re-derived by the gateway when
    /// the compacted log is replayed.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let person_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for pid in person_ids {
            let Some(ps_arc) = self.person_state(&pid) else {
                continue;
            };
            let guard = ps_arc.read().await;

            for allocation in &guard.allocations {
                events.push(Event::AllocationCreated {
                    allocation: allocation.clone(),
                });
            }
            for row in guard.capacity.values() {
                match (&row.leave_type, row.is_working_day) {
                    (Some(label), _) => events.push(Event::LeaveMarked {
                        person_id: pid,
                        date: row.date,
                        leave_type: label.clone(),
                    }),
                    (None, true)
                        if !is_weekday(row.date)
                            || row.available_hours != crate::limits::DEFAULT_WORKING_HOURS =>
                    {
                        events.push(Event::WorkingDayMarked {
                            person_id: pid,
                            date: row.date,
                            hours: row.available_hours,
                        })
                    }
                    // Default-shaped rows (and the unreachable non-working,
                    // unlabelled case) regenerate from the date alone.
                    _ => events.push(Event::CapacityGenerated {
                        person_id: pid,
                        start: row.date,
                        end: row.date,
                    }),
                }
            }
            for entry in &guard.timesheets {
                events.push(Event::TimesheetCreated {
                    entry: entry.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
