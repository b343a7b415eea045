//! Todos accessor: the signed-in user's todos with their assignee,
//! responsible, and team joined in.
//!
//! DESIGN
//! ======
//! The status enum is the canonical completion state; `toggle_complete`
//! flips between `done` and `todo`. `fetch_all` and `create` need a live
//! session; without one `fetch_all` fails with `NotAuthenticated` before
//! touching the cached list or its error field.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AccessError;
use crate::list::{CachedList, ListState};
use crate::remote::{RemoteService, Select, decode_row, decode_rows, require_session, single_row, to_row};
use crate::types::{NewTodo, Todo, TodoPatch, TodoStatus};

const TABLE: &str = "todos";
const TODO_WITH_JOINS: &str = "*, assignee:profiles!assignee_id(*), responsible:profiles!responsible_id(*), team:teams!team_id(*)";

/// Insert payload: the caller's fields plus the owner from the session.
#[derive(Debug, Serialize)]
struct TodoInsert<'a> {
    user_id: Uuid,
    title: &'a str,
    description: Option<&'a str>,
    status: TodoStatus,
    team_id: Option<Uuid>,
    assignee_id: Option<Uuid>,
    responsible_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    deadline: Option<OffsetDateTime>,
}

pub struct Todos {
    remote: Arc<dyn RemoteService>,
    list: CachedList<Todo>,
}

impl Todos {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self { remote, list: CachedList::new() }
    }

    #[must_use]
    pub fn state(&self) -> ListState<Todo> {
        self.list.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<Todo>> {
        self.list.subscribe()
    }

    /// Reload todos, newest first.
    ///
    /// Remote failures are stored in `state().error` and keep the previous
    /// list; the call still returns `Ok`.
    ///
    /// # Errors
    ///
    /// [`AccessError::NotAuthenticated`] without a session. Nothing in the
    /// cached state changes in that case.
    pub async fn fetch_all(&self) -> Result<(), AccessError> {
        let _gate = self.list.lock().await;
        require_session(self.remote.as_ref()).await?;
        let _busy = self.list.busy();

        let query = Select::from(TABLE)
            .columns(TODO_WITH_JOINS)
            .newest_first();
        let fetched = match self.remote.select(&query).await {
            Ok(rows) => decode_rows::<Todo>(TABLE, rows),
            Err(e) => Err(AccessError::from(e)),
        };
        match fetched {
            Ok(todos) => {
                debug!(count = todos.len(), "todos fetched");
                self.list.replace_all(todos);
            }
            Err(e) => {
                warn!(error = %e, "todos fetch failed");
                self.list.set_error(e.to_string());
            }
        }
        Ok(())
    }

    /// Create a todo owned by the signed-in user and put it first in the list.
    ///
    /// # Errors
    ///
    /// [`AccessError::NotAuthenticated`] without a session; otherwise the
    /// remote error unchanged.
    pub async fn create(&self, new: &NewTodo) -> Result<Todo, AccessError> {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        let session = require_session(self.remote.as_ref()).await?;
        let row = to_row(
            TABLE,
            &TodoInsert {
                user_id: session.user.id,
                title: &new.title,
                description: new.description.as_deref(),
                status: new.status,
                team_id: new.team_id,
                assignee_id: new.assignee_id,
                responsible_id: new.responsible_id,
                deadline: new.deadline,
            },
        )?;
        let inserted = single_row(self.remote.insert(TABLE, row).await?)?;
        let todo: Todo = decode_row(TABLE, inserted)?;

        info!(todo_id = %todo.id, "todo created");
        self.list.prepend(todo.clone());
        Ok(todo)
    }

    /// Apply a partial update; the cached row with `id`, if any, is replaced
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn update(&self, id: Uuid, patch: &TodoPatch) -> Result<Todo, AccessError> {
        let _gate = self.list.lock().await;
        self.update_locked(id, patch).await
    }

    /// Move a todo to `status`.
    ///
    /// # Errors
    ///
    /// See [`Self::update`].
    pub async fn set_status(&self, id: Uuid, status: TodoStatus) -> Result<Todo, AccessError> {
        self.update(id, &TodoPatch::status(status)).await
    }

    /// Flip completion of a cached todo: `done` becomes `todo`, anything else
    /// becomes `done`. Returns `Ok(None)` without a remote call when `id` is
    /// not cached.
    ///
    /// # Errors
    ///
    /// See [`Self::update`].
    pub async fn toggle_complete(&self, id: Uuid) -> Result<Option<Todo>, AccessError> {
        let _gate = self.list.lock().await;
        let Some(todo) = self.list.find(id) else {
            debug!(todo_id = %id, "toggle on uncached todo ignored");
            return Ok(None);
        };
        let next = if todo.is_completed() { TodoStatus::Todo } else { TodoStatus::Done };
        self.update_locked(id, &TodoPatch::status(next))
            .await
            .map(Some)
    }

    /// Delete a todo and drop it from the cached list.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn delete(&self, id: Uuid) -> Result<(), AccessError> {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        self.remote.delete(TABLE, id).await?;
        let removed = self.list.remove(id);
        info!(todo_id = %id, removed, "todo deleted");
        Ok(())
    }

    async fn update_locked(&self, id: Uuid, patch: &TodoPatch) -> Result<Todo, AccessError> {
        let _busy = self.list.busy();

        let updated = self
            .remote
            .update(TABLE, id, to_row(TABLE, patch)?)
            .await?;
        let mut todo: Todo = decode_row(TABLE, updated)?;
        match self.list.find(id) {
            Some(cached) => {
                keep_joins(&mut todo, &cached);
                self.list.replace(todo.clone());
            }
            None => debug!(todo_id = %id, "updated todo not cached"),
        }
        Ok(todo)
    }
}

/// Update responses carry bare columns; reuse the cached joined rows whose
/// foreign key did not change.
fn keep_joins(updated: &mut Todo, cached: &Todo) {
    if updated.assignee.is_none() && updated.assignee_id == cached.assignee_id {
        updated.assignee.clone_from(&cached.assignee);
    }
    if updated.responsible.is_none() && updated.responsible_id == cached.responsible_id {
        updated.responsible.clone_from(&cached.responsible);
    }
    if updated.team.is_none() && updated.team_id == cached.team_id {
        updated.team.clone_from(&cached.team);
    }
}

#[cfg(test)]
#[path = "todos_test.rs"]
mod tests;
