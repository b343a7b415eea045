//! Cached list state shared by every resource accessor.
//!
//! DESIGN
//! ======
//! A `CachedList` publishes `ListState` through a `watch` channel so views
//! re-render on change and readers never block writers. Writes go through a
//! FIFO async gate (`tokio::sync::Mutex`): an accessor holds it across the
//! remote call and the local write, so overlapping operations land on the
//! list in the order they were issued.

use tokio::sync::{Mutex, MutexGuard, watch};
use uuid::Uuid;

use crate::types::{Profile, Project, Team, Todo};

/// Rows that can be located in a cached list by id.
pub trait Keyed {
    fn key(&self) -> Uuid;
}

impl Keyed for Profile {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for Project {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for Team {
    fn key(&self) -> Uuid {
        self.id
    }
}

impl Keyed for Todo {
    fn key(&self) -> Uuid {
        self.id
    }
}

/// Snapshot of an accessor's list plus its loading and error flags.
#[derive(Clone, Debug, PartialEq)]
pub struct ListState<T> {
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self { items: Vec::new(), loading: false, error: None }
    }
}

pub struct CachedList<T> {
    state: watch::Sender<ListState<T>>,
    gate: Mutex<()>,
}

impl<T> Default for CachedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CachedList<T> {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(ListState::default());
        Self { state, gate: Mutex::new(()) }
    }

    /// Wait for this list's turn to write.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Mark the list busy until the returned guard drops.
    #[must_use]
    pub fn busy(&self) -> Busy<'_, T> {
        self.state.send_modify(|s| s.loading = true);
        Busy { state: &self.state }
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<T>> {
        self.state.subscribe()
    }

    /// Replace every cached row and clear the error.
    pub fn replace_all(&self, items: Vec<T>) {
        self.state.send_modify(|s| {
            s.items = items;
            s.error = None;
        });
    }

    pub fn set_error(&self, message: String) {
        self.state.send_modify(|s| s.error = Some(message));
    }

    /// Insert at the front (newest first).
    pub fn prepend(&self, item: T) {
        self.state.send_modify(|s| s.items.insert(0, item));
    }
}

impl<T: Keyed> CachedList<T> {
    /// Replace the row with the same id in place. Returns `false` when no
    /// cached row matches; the list is left as is.
    pub fn replace(&self, item: T) -> bool {
        let id = item.key();
        self.state
            .send_if_modified(move |s| match s.items.iter_mut().find(|row| row.key() == id) {
                Some(slot) => {
                    *slot = item;
                    true
                }
                None => false,
            })
    }

    /// Drop every cached row with `id`. Returns how many were removed.
    pub fn remove(&self, id: Uuid) -> usize {
        let mut removed = 0;
        self.state.send_if_modified(|s| {
            let before = s.items.len();
            s.items.retain(|row| row.key() != id);
            removed = before - s.items.len();
            removed > 0
        });
        removed
    }
}

impl<T: Clone> CachedList<T> {
    #[must_use]
    pub fn snapshot(&self) -> ListState<T> {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.state.borrow().items.clone()
    }
}

impl<T: Clone + Keyed> CachedList<T> {
    #[must_use]
    pub fn find(&self, id: Uuid) -> Option<T> {
        self.state
            .borrow()
            .items
            .iter()
            .find(|row| row.key() == id)
            .cloned()
    }
}

/// Clears the loading flag when dropped, whichever way the operation ends.
pub struct Busy<'a, T> {
    state: &'a watch::Sender<ListState<T>>,
}

impl<T> Drop for Busy<'_, T> {
    fn drop(&mut self) {
        self.state.send_modify(|s| s.loading = false);
    }
}

#[cfg(test)]
#[path = "list_test.rs"]
mod tests;
