//! Profiles accessor: read-only cache of the `profiles` table.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AccessError;
use crate::list::{CachedList, ListState};
use crate::remote::{RemoteService, Select, decode_rows};
use crate::types::Profile;

const TABLE: &str = "profiles";

pub struct Profiles {
    remote: Arc<dyn RemoteService>,
    list: CachedList<Profile>,
}

impl Profiles {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self { remote, list: CachedList::new() }
    }

    #[must_use]
    pub fn state(&self) -> ListState<Profile> {
        self.list.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<Profile>> {
        self.list.subscribe()
    }

    /// Cached profile by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Profile> {
        self.list.find(id)
    }

    /// Reload every profile. Failures land in `state().error`.
    pub async fn fetch_all(&self) {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        let fetched = match self.remote.select(&Select::from(TABLE)).await {
            Ok(rows) => decode_rows::<Profile>(TABLE, rows),
            Err(e) => Err(AccessError::from(e)),
        };
        match fetched {
            Ok(profiles) => {
                debug!(count = profiles.len(), "profiles fetched");
                self.list.replace_all(profiles);
            }
            Err(e) => {
                warn!(error = %e, "profiles fetch failed");
                self.list.set_error(e.to_string());
            }
        }
    }
}

#[cfg(test)]
#[path = "profiles_test.rs"]
mod tests;
