use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::window::count_on_day;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_table(&self, id: Ulid) -> Result<TableInfo, EngineError> {
        let table = self.store.get_table(&id).ok_or(EngineError::NotFound(id))?;
        let guard = table.read().await;
        Ok(TableInfo {
            id: guard.id,
            name: guard.name.clone(),
            active_reservations: guard.active_count(),
        })
    }

    pub async fn list_tables(&self) -> Vec<TableInfo> {
        let mut out = Vec::new();
        for id in self.store.table_ids() {
            if let Ok(info) = self.get_table(id).await {
                out.push(info);
            }
        }
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let table_id = self
            .store
            .table_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let table = self
            .store
            .get_table(&table_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = table.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Active reservations on a table overlapping `[from, to)`, by start time.
    pub async fn list_reservations(
        &self,
        resource_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        if from >= to {
            return Err(EngineError::InvalidRange);
        }
        let table = self
            .store
            .get_table(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = table.read().await;
        Ok(guard
            .active_overlapping(&Span::new(from, to))
            .cloned()
            .collect())
    }

    /// Active all-day reservations waiting for an administrator, oldest first.
    pub async fn list_pending_approvals(&self) -> Vec<Reservation> {
        let mut pending = Vec::new();
        for id in self.store.table_ids() {
            let Some(table) = self.store.get_table(&id) else { continue };
            let guard = table.read().await;
            pending.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.is_active() && r.approval == ApprovalState::PendingApproval)
                    .cloned(),
            );
        }
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// How many active reservations `user_id` has starting on the club civil day `date`.
    pub async fn count_user_reservations_on_day(&self, user_id: Ulid, date: NaiveDate) -> usize {
        let config = self.config().await;
        count_on_day(&self.store.user_active(&user_id), None, date, &config)
    }
}
