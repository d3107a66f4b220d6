// Sync scheduler
// Coalesces local mutations into debounced full-snapshot profile writes

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::local_store::{DirtyField, LocalStore};
use crate::api::store::RemoteStore;
use crate::error::Rejection;
use crate::models::user::ProfileDocument;

/// One batched write, captured at flush time
struct Payload {
    seq: u64,
    uid: String,
    fields: BTreeSet<DirtyField>,
    doc: ProfileDocument,
}

/// Sends payloads one at a time, newest capture wins
struct Writer {
    remote: Arc<dyn RemoteStore>,
    next_seq: AtomicU64,
    last_written: Mutex<u64>,
}

impl Writer {
    async fn write(&self, payload: Payload) -> Result<(), Rejection> {
        let Payload {
            seq,
            uid,
            fields,
            doc,
        } = payload;

        let mut last_written = self.last_written.lock().await;
        if seq <= *last_written {
            // A newer full snapshot already went out
            debug!("Skipping superseded batch {} for {}", seq, uid);
            return Ok(());
        }
        *last_written = seq;

        let value = serde_json::to_value(&doc).map_err(|e| {
            error!("Could not encode profile for {}: {}", uid, e);
            Rejection::RemoteWriteFailed(e.to_string())
        })?;

        match self.remote.set_profile(&uid, &value).await {
            Ok(()) => {
                debug!("Synced {} ({:?})", uid, fields);
                Ok(())
            }
            Err(e) => {
                // Not retried; the next batch carries the full snapshot again
                error!("Batched write for {} failed ({:?}): {}", uid, fields, e);
                info!("Local changes for {} stay pending until the next write", uid);
                Err(Rejection::RemoteWriteFailed(e.to_string()))
            }
        }
    }
}

#[derive(Clone)]
pub struct SyncScheduler {
    writer: Arc<Writer>,
    store: Arc<Mutex<LocalStore>>,
    debounce: Duration,
    flush_timeout: Duration,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncScheduler {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<Mutex<LocalStore>>,
        debounce: Duration,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            writer: Arc::new(Writer {
                remote,
                next_seq: AtomicU64::new(1),
                last_written: Mutex::new(0),
            }),
            store,
            debounce,
            flush_timeout,
            timer: Arc::new(Mutex::new(None)),
        }
    }

    /// Re-arm the debounce timer. The payload is read when the timer fires,
    /// so every mutation made before then lands in the same write.
    pub async fn mark_dirty(&self) {
        let mut timer = self.timer.lock().await;
        if let Some(handle) = timer.take() {
            handle.abort();
        }

        let scheduler = self.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(scheduler.debounce).await;
            // Detach the write so re-arming can never cancel it mid-flight
            if let Some(payload) = scheduler.take_payload(false).await {
                let writer = scheduler.writer.clone();
                tokio::spawn(async move { writer.write(payload).await });
            }
        }));
    }

    /// True while a debounce timer is armed and has not fired
    pub async fn is_pending(&self) -> bool {
        self.timer
            .lock()
            .await
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Write immediately, skipping the debounce. Returns the write task, if
    /// anything was dirty.
    pub async fn flush_now(&self) -> Option<JoinHandle<Result<(), Rejection>>> {
        self.abort_timer().await;
        let payload = self.take_payload(false).await?;
        let writer = self.writer.clone();
        Some(tokio::spawn(async move { writer.write(payload).await }))
    }

    /// Termination hook: write the whole profile with presence forced offline,
    /// waiting at most the configured timeout for the acknowledgement.
    pub async fn flush_final(&self) -> Result<(), Rejection> {
        self.abort_timer().await;
        let payload = self
            .take_payload(true)
            .await
            .ok_or(Rejection::NoActiveSession)?;
        let uid = payload.uid.clone();

        match tokio::time::timeout(self.flush_timeout, self.writer.write(payload)).await {
            Ok(result) => result,
            Err(_) => {
                error!("Final write for {} timed out after {:?}", uid, self.flush_timeout);
                Err(Rejection::RemoteWriteFailed("final write timed out".to_string()))
            }
        }
    }

    /// Abort the timer and forget pending changes
    pub async fn cancel(&self) {
        self.abort_timer().await;
        self.store.lock().await.forget_dirty();
    }

    async fn abort_timer(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }

    async fn take_payload(&self, going_offline: bool) -> Option<Payload> {
        let mut store = self.store.lock().await;
        if going_offline {
            // Presence never survives the process
            let _ = store.set_online(false);
        } else if !store.is_dirty() {
            return None;
        }

        let doc = store.snapshot()?;
        let fields = store.take_dirty();
        Some(Payload {
            seq: self.writer.next_seq.fetch_add(1, Ordering::SeqCst),
            uid: doc.user.uid.clone(),
            fields,
            doc,
        })
    }
}
