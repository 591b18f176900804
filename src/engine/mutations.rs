use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notification;
use crate::observability::{RESERVATIONS_WRITTEN_TOTAL, RULE_REJECTIONS_TOTAL};

use super::approval;
use super::conflict::{check_adjacency, check_no_conflict};
use super::window::{check_daily_quota, check_range, check_shape, check_timing, resolve_window};
use super::{Engine, EngineError};

fn validate_shape(num_members: u32, num_guests: u32, reason: Option<&str>) -> Result<(), EngineError> {
    if num_members.saturating_add(num_guests) > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    if let Some(r) = reason
        && r.len() > MAX_REASON_LEN
    {
        return Err(EngineError::LimitExceeded("reason too long"));
    }
    Ok(())
}

fn require_admin(requester: &Requester, what: &'static str) -> Result<(), EngineError> {
    if requester.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden(what))
    }
}

fn require_owner_or_admin(requester: &Requester, reservation: &Reservation) -> Result<(), EngineError> {
    if requester.is_admin() || requester.id == reservation.user_id {
        Ok(())
    } else {
        Err(EngineError::Forbidden("only the owner or an administrator may change this reservation"))
    }
}

/// Count rule rejections so policy tuning can see which rule bites.
fn observe<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(e) = &result {
        debug!(op, kind = e.kind(), "rejected: {e}");
        metrics::counter!(RULE_REJECTIONS_TOTAL, "op" => op, "kind" => e.kind()).increment(1);
    }
    result
}

impl Engine {
    // ── Tables ───────────────────────────────────────────────

    pub async fn create_table(&self, requester: &Requester, id: Ulid, name: String) -> Result<(), EngineError> {
        require_admin(requester, "only administrators can add tables")?;
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("table name too long"));
        }
        let _gate = self.compaction_gate.read().await;
        if self.store.table_count() >= MAX_TABLES {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        if self.store.contains_table(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::TableCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.store
            .insert_table(id, Arc::new(RwLock::new(TableState::new(id, name))));
        info!(table = %id, "table created");
        Ok(())
    }

    pub async fn remove_table(&self, requester: &Requester, id: Ulid) -> Result<(), EngineError> {
        require_admin(requester, "only administrators can remove tables")?;
        let _gate = self.compaction_gate.read().await;
        let table = self.store.get_table(&id).ok_or(EngineError::NotFound(id))?;
        let guard = table.write().await;
        if !self.store.contains_table(&id) {
            return Err(EngineError::NotFound(id));
        }
        if guard.active_count() > 0 {
            return Err(EngineError::HasActiveReservations(id));
        }

        self.wal_append(&Event::TableRemoved { id }).await?;
        self.store.remove_table(&guard);
        info!(table = %id, "table removed");
        Ok(())
    }

    // ── Policy ───────────────────────────────────────────────

    pub async fn update_config(&self, requester: &Requester, config: ReservationConfig) -> Result<(), EngineError> {
        require_admin(requester, "only administrators can change the booking policy")?;
        config.validate().map_err(EngineError::InvalidConfig)?;
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&Event::ConfigUpdated { config: config.clone() }).await?;
        self.swap_config(config).await;
        info!("booking policy updated");
        Ok(())
    }

    // ── Reservation lifecycle ────────────────────────────────

    /// Validate and persist a new reservation.
    ///
    /// Order: shape → table → range, past date, notice, duration, opening
    /// hours → daily quota → overlap → adjacency → approval → write. The
    /// user lock and the table write lock are held from the first read to
    /// the write, so racing conflicting requests cannot both succeed.
    pub async fn create_reservation(
        &self,
        requester: &Requester,
        request: ReservationRequest,
    ) -> Result<ReservationOutcome, EngineError> {
        observe("create", self.create_reservation_inner(requester, request).await)
    }

    async fn create_reservation_inner(
        &self,
        requester: &Requester,
        request: ReservationRequest,
    ) -> Result<ReservationOutcome, EngineError> {
        let config = self.config().await;
        validate_shape(request.num_members, request.num_guests, request.reason.as_deref())?;
        let table = self
            .store
            .get_table(&request.resource_id)
            .ok_or(EngineError::NotFound(request.resource_id))?;
        let window = resolve_window(&request.window, &config)?;

        let _gate = self.compaction_gate.read().await;
        let _user = self.store.lock_user(requester.id).await;
        let mut guard = table.write().await;
        if !self.store.contains_table(&request.resource_id) {
            return Err(EngineError::NotFound(request.resource_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_TABLE {
            return Err(EngineError::LimitExceeded("too many reservations on table"));
        }

        let now = self.clock.now_ms();
        let span = check_range(window.start, window.end)?;
        check_timing(&span, &config, now)?;
        check_shape(&span, window.all_day, &config)?;
        check_daily_quota(&self.store.user_active(&requester.id), None, span.start, &config)?;
        check_no_conflict(&guard, &span, None)?;
        check_adjacency(&guard, &span, None, &config)?;
        let approval =
            approval::initial_state(window.all_day, request.reason.as_deref(), requester, &config)?;

        let reservation = Reservation {
            id: Ulid::new(),
            user_id: requester.id,
            resource_id: request.resource_id,
            span,
            utc_offset_secs: window.utc_offset_secs,
            end_utc_offset_secs: window.end_utc_offset_secs,
            duration_hours: span.hours(),
            num_members: request.num_members,
            num_guests: request.num_guests,
            all_day: window.all_day,
            reason: request.reason,
            status: ReservationStatus::Active,
            approval,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let outcome = ReservationOutcome::new(reservation);
        metrics::counter!(RESERVATIONS_WRITTEN_TOTAL, "op" => "create", "status" => outcome.message())
            .increment(1);
        info!(
            reservation = %outcome.reservation.id,
            table = %outcome.reservation.resource_id,
            user = %requester.id,
            all_day = outcome.reservation.all_day,
            "reservation {}",
            outcome.message()
        );
        Ok(outcome)
    }

    /// Re-validate and rewrite an active reservation. Its own row is excluded
    /// from every overlap, adjacency and quota comparison.
    pub async fn update_reservation(
        &self,
        requester: &Requester,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<ReservationOutcome, EngineError> {
        observe("update", self.update_reservation_inner(requester, id, patch).await)
    }

    async fn update_reservation_inner(
        &self,
        requester: &Requester,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<ReservationOutcome, EngineError> {
        let config = self.config().await;
        let current_table = self
            .store
            .table_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let target_table = patch.resource_id.unwrap_or(current_table);
        let owner = {
            let table = self
                .store
                .get_table(&current_table)
                .ok_or(EngineError::NotFound(id))?;
            let guard = table.read().await;
            guard.get(id).map(|r| r.user_id).ok_or(EngineError::NotFound(id))?
        };

        let _gate = self.compaction_gate.read().await;
        let _user = self.store.lock_user(owner).await;

        // Lock both tables in id order to prevent deadlocks.
        let mut table_ids = vec![current_table, target_table];
        table_ids.sort();
        table_ids.dedup();
        let mut guards = Vec::with_capacity(table_ids.len());
        for tid in &table_ids {
            let table = self.store.get_table(tid).ok_or(EngineError::NotFound(*tid))?;
            guards.push(table.write_owned().await);
        }
        if self.store.table_for_reservation(&id) != Some(current_table) {
            return Err(EngineError::StoreFailure("reservation moved concurrently".into()));
        }
        if !self.store.contains_table(&target_table) {
            return Err(EngineError::NotFound(target_table));
        }
        let current_idx = table_ids.iter().position(|t| *t == current_table).unwrap_or(0);
        let target_idx = table_ids.iter().position(|t| *t == target_table).unwrap_or(0);

        let existing = guards[current_idx]
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        require_owner_or_admin(requester, &existing)?;
        if !existing.is_active() {
            return Err(EngineError::InvalidState("only active reservations can be changed"));
        }

        let num_members = patch.num_members.unwrap_or(existing.num_members);
        let num_guests = patch.num_guests.unwrap_or(existing.num_guests);
        let reason = patch.reason.or_else(|| existing.reason.clone());
        validate_shape(num_members, num_guests, reason.as_deref())?;

        let now = self.clock.now_ms();
        let (span, offsets, all_day) = match &patch.window {
            Some(requested) => {
                let window = resolve_window(requested, &config)?;
                let span = check_range(window.start, window.end)?;
                // Time-relative rules only apply to a window that actually moved.
                if span != existing.span {
                    check_timing(&span, &config, now)?;
                }
                (span, (window.utc_offset_secs, window.end_utc_offset_secs), window.all_day)
            }
            None => (
                existing.span,
                (existing.utc_offset_secs, existing.end_utc_offset_secs),
                existing.all_day,
            ),
        };
        check_shape(&span, all_day, &config)?;
        check_daily_quota(&self.store.user_active(&owner), Some(id), span.start, &config)?;
        check_no_conflict(&guards[target_idx], &span, Some(id))?;
        check_adjacency(&guards[target_idx], &span, Some(id), &config)?;
        let moved = span != existing.span || target_table != current_table;
        let approval = approval::state_after_update(
            &existing,
            all_day,
            moved,
            reason.as_deref(),
            requester,
            &config,
        )?;

        let reservation = Reservation {
            resource_id: target_table,
            span,
            utc_offset_secs: offsets.0,
            end_utc_offset_secs: offsets.1,
            duration_hours: span.hours(),
            num_members,
            num_guests,
            all_day,
            reason,
            approval,
            updated_at: now,
            ..existing
        };
        let event = Event::ReservationUpdated {
            previous_resource_id: current_table,
            reservation: reservation.clone(),
        };
        self.wal_append(&event).await?;
        if current_idx != target_idx {
            guards[current_idx].remove_reservation(id);
        }
        self.store.apply_event(&mut guards[target_idx], &event);

        let outcome = ReservationOutcome::new(reservation);
        metrics::counter!(RESERVATIONS_WRITTEN_TOTAL, "op" => "update", "status" => outcome.message())
            .increment(1);
        info!(reservation = %id, table = %target_table, "reservation updated, {}", outcome.message());
        Ok(outcome)
    }

    /// `PendingApproval -> Approved`. The owner gets an informational notice.
    pub async fn approve_reservation(&self, requester: &Requester, id: Ulid) -> Result<ReservationOutcome, EngineError> {
        observe("approve", self.approve_reservation_inner(requester, id).await)
    }

    async fn approve_reservation_inner(
        &self,
        requester: &Requester,
        id: Ulid,
    ) -> Result<ReservationOutcome, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let existing = guard.get(id).ok_or(EngineError::NotFound(id))?;
        approval::check_approve(existing, requester)?;

        let event = Event::ReservationApproved {
            id,
            resource_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let approved = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        self.notify.send(Notification::reservation(
            approved.user_id,
            id,
            "Reservation approved",
            format!("Your all-day reservation of table {} was approved.", guard.name),
        ));
        info!(reservation = %id, admin = %requester.id, "reservation approved");
        Ok(ReservationOutcome::new(approved))
    }

    /// `PendingApproval -> Rejected`. Cancels the booking and notifies the owner.
    pub async fn reject_reservation(
        &self,
        requester: &Requester,
        id: Ulid,
        reason: &str,
    ) -> Result<Reservation, EngineError> {
        observe("reject", self.reject_reservation_inner(requester, id, reason).await)
    }

    async fn reject_reservation_inner(
        &self,
        requester: &Requester,
        id: Ulid,
        reason: &str,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let existing = guard.get(id).ok_or(EngineError::NotFound(id))?;
        let reason = approval::check_reject(existing, requester, reason)?;

        let event = Event::ReservationRejected {
            id,
            resource_id,
            reason: reason.clone(),
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let rejected = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;

        self.notify.send(Notification::reservation(
            rejected.user_id,
            id,
            "Reservation rejected",
            format!("Your all-day reservation of table {} was rejected: {reason}", guard.name),
        ));
        info!(reservation = %id, admin = %requester.id, "reservation rejected");
        Ok(rejected)
    }

    pub async fn cancel_reservation(&self, requester: &Requester, id: Ulid) -> Result<Reservation, EngineError> {
        observe("cancel", self.cancel_reservation_inner(requester, id).await)
    }

    async fn cancel_reservation_inner(&self, requester: &Requester, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let existing = guard.get(id).ok_or(EngineError::NotFound(id))?;
        require_owner_or_admin(requester, existing)?;
        if !existing.is_active() {
            return Err(EngineError::InvalidState("reservation is not active"));
        }

        let event = Event::ReservationCancelled {
            id,
            resource_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(reservation = %id, by = %requester.id, "reservation cancelled");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn complete_reservation(&self, requester: &Requester, id: Ulid) -> Result<Reservation, EngineError> {
        observe("complete", self.complete_reservation_inner(requester, id).await)
    }

    async fn complete_reservation_inner(&self, requester: &Requester, id: Ulid) -> Result<Reservation, EngineError> {
        require_admin(requester, "only administrators can complete reservations")?;
        let _gate = self.compaction_gate.read().await;
        let (resource_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let existing = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if !existing.is_active() {
            return Err(EngineError::InvalidState("reservation is not active"));
        }

        let event = Event::ReservationCompleted {
            id,
            resource_id,
            at: self.clock.now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── Log maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut events = vec![Event::ConfigUpdated {
            config: (*self.config().await).clone(),
        }];
        for id in self.store.table_ids() {
            let Some(table) = self.store.get_table(&id) else { continue };
            let guard = table.read().await;
            events.push(Event::TableCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated { reservation: r.clone() });
            }
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(super::WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreFailure(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(super::WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
