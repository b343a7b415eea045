//! Remote data/auth service seam.
//!
//! SYSTEM CONTEXT
//! ==============
//! The session store, accessors, and navigation guard talk to the backend
//! only through [`RemoteService`]. `rest` is the HTTP implementation; tests
//! swap in the in-memory `test_helpers::MockRemote`.
//!
//! DESIGN
//! ======
//! Rows cross the seam as `serde_json::Value` so one trait covers every
//! table. Accessors decode into their typed rows on their side.

pub mod rest;

#[cfg(test)]
pub mod test_helpers;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{AccessError, RemoteError};
use crate::types::{AuthChange, AuthResponse, Session};

// =============================================================================
// QUERY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// A `select` against one table: column list (with embedded joins such as
/// `profile:profiles(*)`), equality filters, and an optional ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    pub columns: String,
    pub filters: Vec<(String, String)>,
    pub order: Option<Order>,
}

impl Select {
    #[must_use]
    pub fn from(table: &str) -> Self {
        Self { table: table.to_string(), columns: "*".to_string(), filters: Vec::new(), order: None }
    }

    #[must_use]
    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn order(mut self, column: &str, direction: Direction) -> Self {
        self.order = Some(Order { column: column.to_string(), direction });
        self
    }

    /// Newest-first on `created_at`, the default for timestamped tables.
    #[must_use]
    pub fn newest_first(self) -> Self {
        self.order("created_at", Direction::Descending)
    }
}

// =============================================================================
// SERVICE TRAIT
// =============================================================================

/// The remote backend: four row verbs plus password auth and a push channel
/// for session changes.
#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetch rows matching `query`, in the order the backend returns them.
    async fn select(&self, query: &Select) -> Result<Vec<Value>, RemoteError>;

    /// Insert one row and return the inserted representation.
    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, RemoteError>;

    /// Apply `patch` to the row with `id` and return the updated row.
    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value, RemoteError>;

    async fn delete(&self, table: &str, id: Uuid) -> Result<(), RemoteError>;

    /// Current session, if any. May refresh an expired token.
    async fn get_session(&self) -> Result<Option<Session>, RemoteError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError>;

    async fn sign_out(&self) -> Result<(), RemoteError>;

    /// Receive session changes (sign-in, refresh, sign-out) as they happen.
    ///
    /// A successful `sign_out`, and a `sign_up`/`sign_in_with_password` that
    /// returns a session, each push exactly one change before returning.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

// =============================================================================
// HELPERS
// =============================================================================

/// Require exactly one row, as for a `.single()` request.
///
/// # Errors
///
/// Returns a [`RemoteError`] when zero or several rows came back.
pub fn single_row(rows: Vec<Value>) -> Result<Value, RemoteError> {
    let count = rows.len();
    let mut rows = rows.into_iter();
    match (rows.next(), rows.next()) {
        (Some(row), None) => Ok(row),
        _ => Err(RemoteError::new(format!("JSON object requested, multiple (or no) rows returned ({count})"))
            .with_code("PGRST116")),
    }
}

/// Return the live session or fail with [`AccessError::NotAuthenticated`].
pub(crate) async fn require_session(remote: &dyn RemoteService) -> Result<Session, AccessError> {
    remote
        .get_session()
        .await?
        .ok_or(AccessError::NotAuthenticated)
}

pub(crate) fn to_row(table: &'static str, value: &impl Serialize) -> Result<Value, AccessError> {
    serde_json::to_value(value).map_err(|e| AccessError::Decode { table, message: e.to_string() })
}

pub(crate) fn decode_row<T: DeserializeOwned>(table: &'static str, row: Value) -> Result<T, AccessError> {
    serde_json::from_value(row).map_err(|e| AccessError::Decode { table, message: e.to_string() })
}

pub(crate) fn decode_rows<T: DeserializeOwned>(table: &'static str, rows: Vec<Value>) -> Result<Vec<T>, AccessError> {
    rows.into_iter()
        .map(|row| decode_row(table, row))
        .collect()
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
