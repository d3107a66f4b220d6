// Presence tracking
// Online/offline from lifecycle events and an idle timeout

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::local_store::LocalStore;
use super::scheduler::SyncScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

/// Lifecycle signals from the host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Session established; `visible` is the initial visibility
    Enter { visible: bool },
    /// Any user interaction
    Activity,
    Hidden,
    Shown,
    IdleExpired,
    Terminate,
}

/// Side effects a transition asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    pub write: bool,
    pub arm_idle: bool,
    pub clear_idle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceMachine {
    pub state: Presence,
    pub visible: bool,
}

impl Default for PresenceMachine {
    fn default() -> Self {
        Self {
            state: Presence::Offline,
            visible: false,
        }
    }
}

impl PresenceMachine {
    /// Apply one event and report what must happen as a result
    pub fn apply(&mut self, event: PresenceEvent) -> Effects {
        let mut effects = Effects::default();

        match event {
            PresenceEvent::Enter { visible: true } | PresenceEvent::Shown => {
                self.visible = true;
                effects.arm_idle = true;
                effects.write = self.go(Presence::Online);
            }
            PresenceEvent::Enter { visible: false } | PresenceEvent::Hidden => {
                self.visible = false;
                effects.clear_idle = true;
                effects.write = self.go(Presence::Offline);
            }
            PresenceEvent::Activity => {
                if self.visible {
                    effects.arm_idle = true;
                    effects.write = self.go(Presence::Online);
                }
            }
            PresenceEvent::IdleExpired => {
                effects.write = self.go(Presence::Offline);
            }
            PresenceEvent::Terminate => {
                // The final flush carries the offline flag
                effects.clear_idle = true;
                self.state = Presence::Offline;
            }
        }

        effects
    }

    fn go(&mut self, next: Presence) -> bool {
        let changed = self.state != next;
        self.state = next;
        changed
    }
}

struct Inner {
    machine: Mutex<PresenceMachine>,
    idle: Mutex<Option<JoinHandle<()>>>,
    idle_timeout: Duration,
    store: Arc<Mutex<LocalStore>>,
    scheduler: SyncScheduler,
}

/// Owns the idle timer and pushes transitions into the profile
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    pub fn new(store: Arc<Mutex<LocalStore>>, scheduler: SyncScheduler, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                machine: Mutex::new(PresenceMachine::default()),
                idle: Mutex::new(None),
                idle_timeout,
                store,
                scheduler,
            }),
        }
    }

    pub async fn state(&self) -> Presence {
        self.inner.machine.lock().await.state
    }

    pub async fn handle(&self, event: PresenceEvent) -> Presence {
        let (effects, state) = {
            let mut machine = self.inner.machine.lock().await;
            (machine.apply(event), machine.state)
        };
        debug!("Presence {:?} -> {:?}", event, state);

        if effects.clear_idle || effects.arm_idle {
            self.cancel().await;
        }
        if effects.arm_idle {
            let tracker = self.clone();
            let timeout = self.inner.idle_timeout;
            *self.inner.idle.lock().await = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracker.expire_idle().await;
            }));
        }
        if effects.write {
            self.push(state).await;
        }
        state
    }

    /// Stop the idle timer without changing state
    pub async fn cancel(&self) {
        if let Some(handle) = self.inner.idle.lock().await.take() {
            handle.abort();
        }
    }

    async fn expire_idle(&self) {
        let (effects, state) = {
            let mut machine = self.inner.machine.lock().await;
            (machine.apply(PresenceEvent::IdleExpired), machine.state)
        };
        if effects.write {
            info!("Idle for {:?}, going offline", self.inner.idle_timeout);
            self.push(state).await;
        }
    }

    async fn push(&self, state: Presence) {
        let changed = self
            .inner
            .store
            .lock()
            .await
            .set_online(state == Presence::Online)
            .unwrap_or(false);
        if changed {
            let _ = self.inner.scheduler.flush_now().await;
        }
    }
}
