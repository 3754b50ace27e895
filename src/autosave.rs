//! Debounced, per-entity persistence.
//!
//! Each entity id owns at most one pending save. Scheduling again before the
//! deadline aborts the old task and keeps only the newest payload, so a burst
//! of keystrokes ends in a single write carrying the final value. Different
//! ids never touch each other's pending saves.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[async_trait]
pub trait SaveSink<P>: Send + Sync {
    async fn save(&self, entity_id: &str, payload: P) -> anyhow::Result<()>;
}

struct PendingSave<P> {
    ticket: u64,
    payload: P,
    deadline: Instant,
    handle: JoinHandle<()>,
}

struct Ledger<P> {
    pending: HashMap<String, PendingSave<P>>,
    saved_until: HashMap<String, Instant>,
    failures: HashMap<String, String>,
    next_ticket: u64,
}

impl<P> Default for Ledger<P> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            saved_until: HashMap::new(),
            failures: HashMap::new(),
            next_ticket: 0,
        }
    }
}

pub struct AutoSaveScheduler<P> {
    ledger: Arc<Mutex<Ledger<P>>>,
    sink: Arc<dyn SaveSink<P>>,
    saved_marker: Duration,
}

impl<P: Send + 'static> AutoSaveScheduler<P> {
    pub fn new(sink: Arc<dyn SaveSink<P>>, saved_marker: Duration) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(Ledger::default())),
            sink,
            saved_marker,
        }
    }

    /// Replaces any pending save for `entity_id` with one that fires after
    /// `delay`.
    pub async fn schedule_save(&self, entity_id: &str, payload: P, delay: Duration) {
        let mut ledger = self.ledger.lock().await;
        if let Some(previous) = ledger.pending.remove(entity_id) {
            previous.handle.abort();
            debug!("Superseded pending save #{} for {}", previous.ticket, entity_id);
        }

        ledger.next_ticket += 1;
        let ticket = ledger.next_ticket;
        let deadline = Instant::now() + delay;
        let handle = tokio::spawn(fire_at(
            self.ledger.clone(),
            self.sink.clone(),
            entity_id.to_string(),
            ticket,
            deadline,
            self.saved_marker,
        ));

        ledger.pending.insert(
            entity_id.to_string(),
            PendingSave {
                ticket,
                payload,
                deadline,
                handle,
            },
        );
    }

    /// Persists the pending save for one entity right now. `None` when
    /// nothing was pending.
    pub async fn flush(&self, entity_id: &str) -> Option<anyhow::Result<()>> {
        let pending = {
            let mut ledger = self.ledger.lock().await;
            ledger.pending.remove(entity_id)
        }?;
        pending.handle.abort();
        Some(
            persist(
                &self.ledger,
                self.sink.as_ref(),
                entity_id,
                pending.payload,
                self.saved_marker,
            )
            .await,
        )
    }

    /// Persists every pending save immediately, oldest edit first, so no
    /// edit is lost when the session is left inside a debounce window.
    pub async fn flush_all(&self) -> Vec<(String, anyhow::Result<()>)> {
        let mut drained: Vec<(String, PendingSave<P>)> = {
            let mut ledger = self.ledger.lock().await;
            ledger.pending.drain().collect()
        };
        drained.sort_by_key(|(_, p)| p.ticket);

        let mut results = Vec::with_capacity(drained.len());
        for (id, pending) in drained {
            pending.handle.abort();
            let result = persist(
                &self.ledger,
                self.sink.as_ref(),
                &id,
                pending.payload,
                self.saved_marker,
            )
            .await;
            results.push((id, result));
        }
        results
    }

    /// Persists `payload` immediately, replacing anything pending for the
    /// entity. Used for manual retries after a failed save.
    pub async fn save_now(&self, entity_id: &str, payload: P) -> anyhow::Result<()> {
        self.cancel(entity_id).await;
        persist(
            &self.ledger,
            self.sink.as_ref(),
            entity_id,
            payload,
            self.saved_marker,
        )
        .await
    }

    /// Drops a pending save without persisting it.
    pub async fn cancel(&self, entity_id: &str) -> bool {
        let mut ledger = self.ledger.lock().await;
        match ledger.pending.remove(entity_id) {
            Some(pending) => {
                pending.handle.abort();
                debug!("Cancelled pending save for {}", entity_id);
                true
            }
            None => false,
        }
    }

    pub async fn is_pending(&self, entity_id: &str) -> bool {
        self.ledger.lock().await.pending.contains_key(entity_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.ledger.lock().await.pending.len()
    }

    pub async fn deadline(&self, entity_id: &str) -> Option<Instant> {
        self.ledger
            .lock()
            .await
            .pending
            .get(entity_id)
            .map(|p| p.deadline)
    }

    /// Whether the "saved" acknowledgement is still showing for this entity.
    pub async fn is_saved(&self, entity_id: &str) -> bool {
        let mut ledger = self.ledger.lock().await;
        prune_markers(&mut ledger);
        ledger.saved_until.contains_key(entity_id)
    }

    pub async fn saved_ids(&self) -> Vec<String> {
        let mut ledger = self.ledger.lock().await;
        prune_markers(&mut ledger);
        let mut ids: Vec<String> = ledger.saved_until.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Last failure message for an entity, if its most recent save failed.
    pub async fn failure(&self, entity_id: &str) -> Option<String> {
        self.ledger.lock().await.failures.get(entity_id).cloned()
    }

    pub async fn failures(&self) -> HashMap<String, String> {
        self.ledger.lock().await.failures.clone()
    }
}

fn prune_markers<P>(ledger: &mut Ledger<P>) {
    let now = Instant::now();
    ledger.saved_until.retain(|_, until| *until > now);
}

async fn fire_at<P: Send + 'static>(
    ledger: Arc<Mutex<Ledger<P>>>,
    sink: Arc<dyn SaveSink<P>>,
    entity_id: String,
    ticket: u64,
    deadline: Instant,
    saved_marker: Duration,
) {
    tokio::time::sleep_until(deadline).await;

    let payload = {
        let mut guard = ledger.lock().await;
        let still_current = guard
            .pending
            .get(&entity_id)
            .map(|p| p.ticket == ticket)
            .unwrap_or(false);
        if still_current {
            guard.pending.remove(&entity_id).map(|p| p.payload)
        } else {
            None
        }
    };

    if let Some(payload) = payload {
        // Failures are recorded in the ledger; nothing retries them.
        let _ = persist(&ledger, sink.as_ref(), &entity_id, payload, saved_marker).await;
    }
}

async fn persist<P>(
    ledger: &Mutex<Ledger<P>>,
    sink: &dyn SaveSink<P>,
    entity_id: &str,
    payload: P,
    saved_marker: Duration,
) -> anyhow::Result<()> {
    let result = sink.save(entity_id, payload).await;
    let mut guard = ledger.lock().await;
    match &result {
        Ok(()) => {
            info!("Saved changes for {}", entity_id);
            guard.failures.remove(entity_id);
            guard
                .saved_until
                .insert(entity_id.to_string(), Instant::now() + saved_marker);
        }
        Err(e) => {
            error!("Failed to save changes for {}: {}", entity_id, e);
            guard.failures.insert(entity_id.to_string(), e.to_string());
        }
    }
    result
}
