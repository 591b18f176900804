use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::*;

use super::SharedTableState;

/// In-memory indexes over the replayed event log.
pub struct InMemoryStore {
    tables: DashMap<Ulid, SharedTableState>,
    /// Reverse lookup: reservation id → table id
    reservation_to_table: DashMap<Ulid, Ulid>,
    /// Per-user `(reservation id, start)` of *active* reservations, for the daily quota.
    user_active: DashMap<Ulid, Vec<(Ulid, Ms)>>,
    /// Serializes quota-relevant writes of one user across tables.
    user_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            reservation_to_table: DashMap::new(),
            user_active: DashMap::new(),
            user_locks: DashMap::new(),
        }
    }

    // ── Tables ───────────────────────────────────────────────

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn contains_table(&self, id: &Ulid) -> bool {
        self.tables.contains_key(id)
    }

    pub fn get_table(&self, id: &Ulid) -> Option<SharedTableState> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    pub fn insert_table(&self, id: Ulid, state: SharedTableState) {
        self.tables.insert(id, state);
    }

    /// Remove a table and forget its (inactive) reservations.
    pub fn remove_table(&self, table: &TableState) {
        for r in &table.reservations {
            self.reservation_to_table.remove(&r.id);
        }
        self.tables.remove(&table.id);
    }

    pub fn table_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.tables.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ── Reservation index ────────────────────────────────────

    pub fn table_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_to_table.get(id).map(|e| *e.value())
    }

    /// Snapshot of a user's active `(id, start)` pairs.
    pub fn user_active(&self, user_id: &Ulid) -> Vec<(Ulid, Ms)> {
        self.user_active
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub async fn lock_user(&self, user_id: Ulid) -> OwnedMutexGuard<()> {
        let lock = self.user_locks.entry(user_id).or_default().clone();
        lock.lock_owned().await
    }

    fn track_active(&self, r: &Reservation) {
        self.untrack(&r.user_id, &r.id);
        if r.is_active() {
            self.user_active
                .entry(r.user_id)
                .or_default()
                .push((r.id, r.span.start));
        }
    }

    fn untrack(&self, user_id: &Ulid, id: &Ulid) {
        if let Some(mut entries) = self.user_active.get_mut(user_id) {
            entries.retain(|(rid, _)| rid != id);
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply a reservation event to the table it targets (caller holds the lock).
    ///
    /// For `ReservationUpdated` across tables the caller must also have
    /// removed the row from the previous table.
    pub fn apply_event(&self, ts: &mut TableState, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                ts.insert_reservation(reservation.clone());
                self.reservation_to_table.insert(reservation.id, ts.id);
                self.track_active(reservation);
            }
            Event::ReservationUpdated { reservation, .. } => {
                ts.remove_reservation(reservation.id);
                ts.insert_reservation(reservation.clone());
                self.reservation_to_table.insert(reservation.id, ts.id);
                self.track_active(reservation);
            }
            Event::ReservationApproved { id, at, .. } => {
                if let Some(r) = ts.get_mut(*id) {
                    r.approval = ApprovalState::Approved;
                    r.updated_at = *at;
                }
            }
            Event::ReservationRejected { id, reason, at, .. } => {
                if let Some(r) = ts.get_mut(*id) {
                    r.status = ReservationStatus::Cancelled;
                    r.approval = ApprovalState::Rejected {
                        reason: reason.clone(),
                    };
                    r.updated_at = *at;
                    self.untrack(&r.user_id, id);
                }
            }
            Event::ReservationCancelled { id, at, .. } => {
                if let Some(r) = ts.get_mut(*id) {
                    r.status = ReservationStatus::Cancelled;
                    r.updated_at = *at;
                    self.untrack(&r.user_id, id);
                }
            }
            Event::ReservationCompleted { id, at, .. } => {
                if let Some(r) = ts.get_mut(*id) {
                    r.status = ReservationStatus::Completed;
                    r.updated_at = *at;
                    self.untrack(&r.user_id, id);
                }
            }
            // Table and config events are handled by the engine, not per table.
            Event::TableCreated { .. } | Event::TableRemoved { .. } | Event::ConfigUpdated { .. } => {}
        }
    }
}

/// Table id an event applies to, for reservation events.
pub(crate) fn event_table_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation, .. } => {
            Some(reservation.resource_id)
        }
        Event::ReservationApproved { resource_id, .. }
        | Event::ReservationRejected { resource_id, .. }
        | Event::ReservationCancelled { resource_id, .. }
        | Event::ReservationCompleted { resource_id, .. } => Some(*resource_id),
        Event::TableCreated { .. } | Event::TableRemoved { .. } | Event::ConfigUpdated { .. } => None,
    }
}
