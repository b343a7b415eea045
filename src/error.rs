//! Error types shared by the session store, accessors, and remote client.
//!
//! DESIGN
//! ======
//! Two propagation styles coexist. Fetches store the error message in their
//! list state and return normally; mutations and auth calls return the error
//! to the caller. `RemoteError` displays as the bare backend message so views
//! can show it verbatim.

use crate::types::Team;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// REMOTE ERROR
// =============================================================================

/// An error reported by the remote data/auth service or its transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    /// Human-readable message as reported by the backend.
    pub message: String,
    /// Backend error code (e.g. `"23505"` or `"invalid_credentials"`), if any.
    pub code: Option<String>,
    /// HTTP status; `None` when the request never got a response.
    pub status: Option<u16>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl RemoteError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, status: None, details: None, hint: None }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        let mut err = Self::new(e.to_string());
        err.status = e.status().map(|s| s.as_u16());
        err
    }
}

impl ErrorCode for RemoteError {
    fn error_code(&self) -> &'static str {
        match self.status {
            None => "E_REMOTE_TRANSPORT",
            Some(401 | 403) => "E_REMOTE_UNAUTHORIZED",
            Some(404) => "E_REMOTE_NOT_FOUND",
            Some(409) => "E_REMOTE_CONFLICT",
            Some(_) => "E_REMOTE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self.status, None | Some(429 | 500..=599))
    }
}

// =============================================================================
// ACCESS ERROR
// =============================================================================

/// Errors returned by the session store and resource accessors.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The operation needs a live session and none exists.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The remote service rejected the call. Displayed verbatim.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A row returned by the remote service did not match the expected shape.
    #[error("unexpected {table} row: {message}")]
    Decode { table: &'static str, message: String },

    /// The team row was created but the creator's admin membership was not.
    /// The team stays in the local list; see `Teams::retry_admin_membership`.
    #[error("team {} created without admin membership: {source}", .team.id)]
    MembershipIncomplete {
        team: Box<Team>,
        #[source]
        source: RemoteError,
    },
}

impl ErrorCode for AccessError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
            Self::Remote(e) => e.error_code(),
            Self::Decode { .. } => "E_DECODE",
            Self::MembershipIncomplete { .. } => "E_MEMBERSHIP_INCOMPLETE",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Remote(e) | Self::MembershipIncomplete { source: e, .. } => e.retryable(),
            Self::NotAuthenticated | Self::Decode { .. } => false,
        }
    }
}

// =============================================================================
// CONFIG ERROR
// =============================================================================

/// Errors produced while loading [`crate::config::RemoteConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing config: env var {var} not set")]
    Missing { var: &'static str },

    #[error("invalid config: {var}={value}")]
    Invalid { var: &'static str, value: String },

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
