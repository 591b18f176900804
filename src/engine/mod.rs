mod approval;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;
mod window;
#[cfg(test)]
mod tests;

pub use conflict::find_conflicts;
pub use error::EngineError;
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedTableState = Arc<RwLock<TableState>>;

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
    /// Stop the writer and drop the receiver. Used by tests only.
    #[cfg(test)]
    Shutdown { response: oneshot::Sender<()> },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it, then drain every Append already queued.
/// 3. Single flush_sync for the whole batch; answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred
                    && !handle_non_append(&mut wal, other)
                {
                    break;
                }
            }
            other => {
                if !handle_non_append(&mut wal, other) {
                    break;
                }
            }
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("wal: batch of {} failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

/// Returns false once the writer should stop.
fn handle_non_append(wal: &mut Wal, cmd: WalCommand) -> bool {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, &mut vec![(event, response)]),
        #[cfg(test)]
        WalCommand::Shutdown { response } => {
            let _ = response.send(());
            return false;
        }
    }
    true
}

/// The reservation engine: policy snapshot, per-table state and the log.
pub struct Engine {
    pub(super) store: InMemoryStore,
    config: RwLock<Arc<ReservationConfig>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    /// Mutations hold it shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an event appended meanwhile.
    pub(super) compaction_gate: RwLock<()>,
}

impl Engine {
    /// Open the engine, replaying the WAL at `wal_path`. `seed_config` is the
    /// policy used until the log contains a `ConfigUpdated` event.
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        seed_config: ReservationConfig,
    ) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, seed_config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        seed_config: ReservationConfig,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path, replay.valid_len)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::new();
        let mut config = seed_config;

        // Sole owner of every Arc here, so try_write always succeeds. Never
        // block: this may run inside an async context.
        for event in &replay.events {
            match event {
                Event::TableCreated { id, name } => {
                    let ts = TableState::new(*id, name.clone());
                    store.insert_table(*id, Arc::new(RwLock::new(ts)));
                }
                Event::TableRemoved { id } => {
                    if let Some(table) = store.get_table(id)
                        && let Ok(guard) = table.try_read()
                    {
                        store.remove_table(&guard);
                    }
                }
                Event::ConfigUpdated { config: c } => config = c.clone(),
                Event::ReservationUpdated {
                    previous_resource_id,
                    reservation,
                } if *previous_resource_id != reservation.resource_id => {
                    if let Some(prev) = store.get_table(previous_resource_id)
                        && let Ok(mut guard) = prev.try_write()
                    {
                        guard.remove_reservation(reservation.id);
                    }
                    replay_on_table(&store, event);
                }
                other => replay_on_table(&store, other),
            }
        }

        tracing::info!(
            path = %wal_path.display(),
            events = replay.events.len(),
            tables = store.table_count(),
            "engine: replayed log"
        );

        Ok(Self {
            store,
            config: RwLock::new(Arc::new(config)),
            wal_tx,
            notify,
            clock,
            compaction_gate: RwLock::new(()),
        })
    }

    /// Current policy snapshot. Read once per request and passed to every check.
    pub async fn config(&self) -> Arc<ReservationConfig> {
        self.config.read().await.clone()
    }

    pub(super) async fn swap_config(&self, config: ReservationConfig) {
        *self.config.write().await = Arc::new(config);
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StoreFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreFailure(e.to_string()))
    }

    /// Stop the WAL writer; every later append fails with `StoreFailure`.
    #[cfg(test)]
    pub(super) async fn stop_wal_writer(&self) {
        let (tx, rx) = oneshot::channel();
        if self.wal_tx.send(WalCommand::Shutdown { response: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// WAL-append, then apply. Memory is untouched if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ts: &mut TableState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(ts, event);
        Ok(())
    }

    /// Lookup reservation → table, acquire its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<TableState>), EngineError> {
        let table_id = self
            .store
            .table_for_reservation(id)
            .ok_or(EngineError::NotFound(*id))?;
        let table = self
            .store
            .get_table(&table_id)
            .ok_or(EngineError::NotFound(table_id))?;
        let guard = table.write_owned().await;
        // The row may have moved tables while we waited for the lock.
        if self.store.table_for_reservation(id) != Some(table_id) {
            return Err(EngineError::StoreFailure("reservation moved concurrently".into()));
        }
        Ok((table_id, guard))
    }
}

fn replay_on_table(store: &InMemoryStore, event: &Event) {
    if let Some(table_id) = store::event_table_id(event)
        && let Some(table) = store.get_table(&table_id)
        && let Ok(mut guard) = table.try_write()
    {
        store.apply_event(&mut guard, event);
    }
}
