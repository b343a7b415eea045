//! Row and session types exchanged with the remote service.
//!
//! DESIGN
//! ======
//! Field names mirror the remote table columns so serde maps rows without
//! renames. Ids and timestamps are always server-assigned; the `New*` and
//! `*Patch` types carry only what the client is allowed to submit.

use serde::{Deserialize, Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

/// Default color for new projects.
pub const DEFAULT_PROJECT_COLOR: &str = "#4f46e5";

// =============================================================================
// IDENTITY + SESSION
// =============================================================================

/// An authenticated end-user principal as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// A live bearer credential tied to one [`Identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as unix seconds on the wire.
    #[serde(with = "time::serde::timestamp")]
    pub expires_at: OffsetDateTime,
    pub user: Identity,
}

impl Session {
    /// `true` once `now + leeway` has passed the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime, leeway: time::Duration) -> bool {
        now + leeway >= self.expires_at
    }
}

/// Result of a sign-up or sign-in call.
///
/// Sign-up may return a user without a session when the backend requires
/// email confirmation first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: Option<Identity>,
    pub session: Option<Session>,
}

/// Kind of session change pushed by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// A session change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

// =============================================================================
// PROFILES
// =============================================================================

/// Public profile row (`profiles` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

// =============================================================================
// TEAMS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTeam<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub created_by: Uuid,
}

/// Role of a member within a team.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Admin,
    #[default]
    Member,
}

/// One `(team, user, role)` membership row, optionally joined with the
/// member's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: TeamRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

// =============================================================================
// PROJECTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject<'a> {
    pub name: &'a str,
    pub color: &'a str,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

// =============================================================================
// TODOS
// =============================================================================

/// Workflow status of a todo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TodoStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TodoStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }
}

impl std::str::FromStr for TodoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown status '{other}' (expected todo, in-progress or done)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub team_id: Option<Uuid>,
    /// User who carries out the work.
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
    /// User accountable for the outcome.
    #[serde(default)]
    pub responsible_id: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deadline: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
}

impl Todo {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TodoStatus::Done
    }
}

/// Fields a caller supplies when creating a todo. The owner is filled in
/// from the live session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTodo {
    pub title: String,
    pub description: Option<String>,
    pub status: TodoStatus,
    pub team_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub responsible_id: Option<Uuid>,
    pub deadline: Option<OffsetDateTime>,
}

impl NewTodo {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Self::default() }
    }
}

/// Partial todo update. `None` leaves a column untouched; the nested
/// `Option` on nullable columns distinguishes "clear" from "keep".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TodoStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_deadline_patch")]
    pub deadline: Option<Option<OffsetDateTime>>,
}

fn serialize_deadline_patch<S: Serializer>(value: &Option<Option<OffsetDateTime>>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(inner) => time::serde::rfc3339::option::serialize(inner, s),
        None => s.serialize_none(),
    }
}

impl TodoPatch {
    #[must_use]
    pub fn status(status: TodoStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
