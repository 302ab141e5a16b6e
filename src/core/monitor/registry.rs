use parking_lot::Mutex;
use std::collections::HashSet;

use crate::error::Result;

/// Connected client ids
///
/// The first registration and the last removal run a transition hook while
/// the membership lock is held, so start and stop can never be reordered by
/// racing connects and disconnects.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashSet<String>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. `on_first` runs when the registry was empty; if it
    /// fails the client is not added. Returns false for a known id.
    pub fn register<F>(&self, id: &str, on_first: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut clients = self.clients.lock();
        if clients.contains(id) {
            return Ok(false);
        }
        if clients.is_empty() {
            on_first()?;
        }
        clients.insert(id.to_string());
        Ok(true)
    }

    /// Remove a client. `on_last` runs when the registry becomes empty.
    /// Returns false for an unknown id.
    pub fn unregister<F>(&self, id: &str, on_last: F) -> bool
    where
        F: FnOnce(),
    {
        let mut clients = self.clients.lock();
        if !clients.remove(id) {
            return false;
        }
        if clients.is_empty() {
            on_last();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.lock().contains(id)
    }
}
