//! Explicit registry of live remote desktop sessions.
//!
//! Only one loop may drive a session at a time; a [`SessionLease`] is that
//! exclusive claim and is released when dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::desktop::RemoteDesktop;
use crate::error::{PilotError, PilotResult};

pub type BoxedDesktop = Box<dyn RemoteDesktop + Send>;

struct Slot {
    desktop: Arc<Mutex<BoxedDesktop>>,
    busy: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Slot>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an already-live session under its own id.
    pub fn register(&self, desktop: BoxedDesktop) -> PilotResult<String> {
        let id = desktop.session_id().to_string();
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(PilotError::Configuration(format!(
                "session {id} is already registered"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    desktop: Arc::new(Mutex::new(desktop)),
                    busy: Arc::new(AtomicBool::new(false)),
                });
                info!(session = %id, "session registered");
                Ok(id)
            }
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn lease(&self, id: &str) -> PilotResult<SessionLease> {
        let slot = self
            .sessions
            .get(id)
            .ok_or_else(|| PilotError::RemoteSession(format!("unknown session {id}")))?;
        if slot
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PilotError::Configuration(format!("session {id} is busy")));
        }
        Ok(SessionLease {
            id: id.to_string(),
            desktop: Arc::clone(&slot.desktop),
            busy: Arc::clone(&slot.busy),
        })
    }

    /// Forgets a session. Leased sessions cannot be removed.
    pub fn remove(&self, id: &str) -> PilotResult<()> {
        let removed = self
            .sessions
            .remove_if(id, |_, slot| !slot.busy.load(Ordering::SeqCst));
        match removed {
            Some(_) => {
                info!(session = %id, "session removed");
                Ok(())
            }
            None if self.sessions.contains_key(id) => {
                Err(PilotError::Configuration(format!("session {id} is busy")))
            }
            None => Err(PilotError::RemoteSession(format!("unknown session {id}"))),
        }
    }
}

pub struct SessionLease {
    id: String,
    desktop: Arc<Mutex<BoxedDesktop>>,
    busy: Arc<AtomicBool>,
}

impl SessionLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn desktop(&self) -> PilotResult<MutexGuard<'_, BoxedDesktop>> {
        self.desktop
            .lock()
            .map_err(|_| PilotError::RemoteSession(format!("session {} is poisoned", self.id)))
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}
