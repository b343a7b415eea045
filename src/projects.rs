//! Projects accessor.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AccessError;
use crate::list::{CachedList, ListState};
use crate::remote::{RemoteService, Select, decode_row, decode_rows, require_session, single_row, to_row};
use crate::types::{DEFAULT_PROJECT_COLOR, NewProject, Project, ProjectPatch};

const TABLE: &str = "projects";

pub struct Projects {
    remote: Arc<dyn RemoteService>,
    list: CachedList<Project>,
}

impl Projects {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self { remote, list: CachedList::new() }
    }

    #[must_use]
    pub fn state(&self) -> ListState<Project> {
        self.list.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<Project>> {
        self.list.subscribe()
    }

    /// Reload all visible projects, newest first. Failures land in
    /// `state().error` and keep the previous list.
    pub async fn fetch_all(&self) {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        let query = Select::from(TABLE).newest_first();
        let fetched = match self.remote.select(&query).await {
            Ok(rows) => decode_rows::<Project>(TABLE, rows),
            Err(e) => Err(AccessError::from(e)),
        };
        match fetched {
            Ok(projects) => {
                debug!(count = projects.len(), "projects fetched");
                self.list.replace_all(projects);
            }
            Err(e) => {
                warn!(error = %e, "projects fetch failed");
                self.list.set_error(e.to_string());
            }
        }
    }

    /// Create a project owned by the signed-in user. `color` defaults to
    /// [`DEFAULT_PROJECT_COLOR`].
    ///
    /// # Errors
    ///
    /// [`AccessError::NotAuthenticated`] without a session; otherwise the
    /// remote error unchanged.
    pub async fn create(&self, name: &str, color: Option<&str>) -> Result<Project, AccessError> {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        let session = require_session(self.remote.as_ref()).await?;
        let row = to_row(
            TABLE,
            &NewProject { name, color: color.unwrap_or(DEFAULT_PROJECT_COLOR), created_by: session.user.id },
        )?;
        let inserted = single_row(self.remote.insert(TABLE, row).await?)?;
        let project: Project = decode_row(TABLE, inserted)?;

        info!(project_id = %project.id, "project created");
        self.list.prepend(project.clone());
        Ok(project)
    }

    /// Rename or recolor a project; the cached row is replaced in place.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn update(&self, id: Uuid, patch: &ProjectPatch) -> Result<Project, AccessError> {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        let updated = self
            .remote
            .update(TABLE, id, to_row(TABLE, patch)?)
            .await?;
        let project: Project = decode_row(TABLE, updated)?;
        self.list.replace(project.clone());
        Ok(project)
    }

    /// # Errors
    ///
    /// Returns the remote error unchanged; the cached list is untouched then.
    pub async fn delete(&self, id: Uuid) -> Result<(), AccessError> {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        self.remote.delete(TABLE, id).await?;
        self.list.remove(id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "projects_test.rs"]
mod tests;
