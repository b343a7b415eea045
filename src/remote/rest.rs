//! HTTP implementation of [`RemoteService`] for a PostgREST data API and a
//! GoTrue auth API served under one base URL.
//!
//! ARCHITECTURE
//! ============
//! Data verbs map to `{base}/rest/v1/{table}` with `select`/`order`/`eq.`
//! query parameters. Auth maps to `{base}/auth/v1/*`. Every request carries
//! the anon key as `apikey`; the bearer is the live access token when one
//! exists, the anon key otherwise.
//!
//! SESSION
//! =======
//! The live session is held in memory and, when a session file is
//! configured, mirrored to disk so it survives restarts. `get_session`
//! refreshes tokens that are within a minute of expiry. A refresh that fails
//! in a retryable way (transport, 429, 5xx) keeps the session and returns the
//! error; any other refresh failure drops it. Logout answered with 401, 403,
//! or 404 still clears the local session. Every change is pushed to
//! subscribers as an [`AuthChange`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Direction, RemoteService, Select, single_row};
use crate::config::RemoteConfig;
use crate::error::{ConfigError, ErrorCode, RemoteError};
use crate::types::{AuthChange, AuthEvent, AuthResponse, Identity, Session};

const REFRESH_LEEWAY_SECS: i64 = 60;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const AUTH_EVENT_CAPACITY: usize = 16;
const RETURN_REPRESENTATION: &str = "return=representation";

#[derive(Default)]
struct SessionSlot {
    session: Option<Session>,
    /// Whether the session file has been read yet.
    loaded: bool,
}

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    session_file: Option<PathBuf>,
    slot: RwLock<SessionSlot>,
    events: broadcast::Sender<AuthChange>,
}

impl RestClient {
    /// Build a client from config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClientBuild`] if the HTTP client cannot be constructed.
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ConfigError::HttpClientBuild(e.to_string()))?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            session_file: config.session_file.clone(),
            slot: RwLock::new(SessionSlot::default()),
            events,
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    /// Attach the anon key and the best available bearer.
    async fn authed(&self, req: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let bearer = match self.get_session().await? {
            Some(session) => session.access_token,
            None => self.api_key.clone(),
        };
        Ok(req.header("apikey", &self.api_key).bearer_auth(bearer))
    }

    async fn current_session(&self) -> Option<Session> {
        {
            let slot = self.slot.read().await;
            if slot.loaded {
                return slot.session.clone();
            }
        }
        let mut slot = self.slot.write().await;
        if !slot.loaded {
            slot.session = match &self.session_file {
                Some(path) => read_session_file(path).await,
                None => None,
            };
            slot.loaded = true;
        }
        slot.session.clone()
    }

    async fn set_session(&self, session: Option<Session>, event: AuthEvent) {
        {
            let mut slot = self.slot.write().await;
            slot.session.clone_from(&session);
            slot.loaded = true;
        }
        if let Some(path) = &self.session_file {
            persist_session_file(path, session.as_ref()).await;
        }
        let _ = self.events.send(AuthChange { event, session });
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> Result<Value, RemoteError> {
        let resp = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        read_json(resp).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, RemoteError> {
        let body = self
            .token_request("refresh_token", serde_json::json!({ "refresh_token": refresh_token }))
            .await?;
        parse_auth_response(body, OffsetDateTime::now_utc())?
            .session
            .ok_or_else(|| RemoteError::new("token refresh returned no session"))
    }
}

#[async_trait::async_trait]
impl RemoteService for RestClient {
    async fn select(&self, query: &Select) -> Result<Vec<Value>, RemoteError> {
        debug!(table = %query.table, columns = %query.columns, "select");
        let req = self.http.get(self.rest_url(&query.table));
        let resp = self
            .authed(req)
            .await?
            .query(&select_params(query))
            .send()
            .await?;
        rows_from(read_json(resp).await?)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, RemoteError> {
        debug!(%table, "insert");
        let req = self.http.post(self.rest_url(table));
        let resp = self
            .authed(req)
            .await?
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&row)
            .send()
            .await?;
        rows_from(read_json(resp).await?)
    }

    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value, RemoteError> {
        debug!(%table, %id, "update");
        let req = self.http.patch(self.rest_url(table));
        let resp = self
            .authed(req)
            .await?
            .query(&id_filter(id))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&patch)
            .send()
            .await?;
        single_row(rows_from(read_json(resp).await?)?)
    }

    async fn delete(&self, table: &str, id: Uuid) -> Result<(), RemoteError> {
        debug!(%table, %id, "delete");
        let req = self.http.delete(self.rest_url(table));
        let resp = self
            .authed(req)
            .await?
            .query(&id_filter(id))
            .send()
            .await?;
        read_json(resp).await?;
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, RemoteError> {
        let Some(session) = self.current_session().await else {
            return Ok(None);
        };
        let leeway = time::Duration::seconds(REFRESH_LEEWAY_SECS);
        if !session.is_expired_at(OffsetDateTime::now_utc(), leeway) {
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                info!(user_id = %fresh.user.id, "session refreshed");
                self.set_session(Some(fresh.clone()), AuthEvent::TokenRefreshed)
                    .await;
                Ok(Some(fresh))
            }
            Err(e) if e.retryable() => {
                warn!(error = %e, "session refresh failed; keeping session for retry");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "session refresh rejected; dropping session");
                self.set_session(None, AuthEvent::SignedOut).await;
                Ok(None)
            }
        }
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError> {
        let resp = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let auth = parse_auth_response(read_json(resp).await?, OffsetDateTime::now_utc())?;
        if let Some(session) = &auth.session {
            info!(user_id = %session.user.id, "signed up");
            self.set_session(Some(session.clone()), AuthEvent::SignedIn)
                .await;
        }
        Ok(auth)
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError> {
        let body = self
            .token_request("password", serde_json::json!({ "email": email, "password": password }))
            .await?;
        let auth = parse_auth_response(body, OffsetDateTime::now_utc())?;
        if let Some(session) = &auth.session {
            info!(user_id = %session.user.id, "signed in");
            self.set_session(Some(session.clone()), AuthEvent::SignedIn)
                .await;
        }
        Ok(auth)
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        if let Some(session) = self.current_session().await {
            let resp = self
                .http
                .post(self.auth_url("logout"))
                .header("apikey", &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await?;
            match read_json(resp).await {
                Ok(_) => info!(user_id = %session.user.id, "signed out"),
                // The token is already dead server-side.
                Err(e) if matches!(e.status, Some(401 | 403 | 404)) => {
                    info!(user_id = %session.user.id, status = ?e.status, "logout rejected stale token; signed out locally");
                }
                Err(e) => return Err(e),
            }
        }
        self.set_session(None, AuthEvent::SignedOut).await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

// =============================================================================
// QUERY STRING
// =============================================================================

pub(crate) fn select_params(query: &Select) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), query.columns.clone())];
    for (column, value) in &query.filters {
        params.push((column.clone(), format!("eq.{value}")));
    }
    if let Some(order) = &query.order {
        let dir = match order.direction {
            Direction::Ascending => "asc",
            Direction::Descending => "desc",
        };
        params.push(("order".to_string(), format!("{}.{dir}", order.column)));
    }
    params
}

fn id_filter(id: Uuid) -> [(&'static str, String); 1] {
    [("id", format!("eq.{id}"))]
}

// =============================================================================
// RESPONSES
// =============================================================================

async fn read_json(resp: reqwest::Response) -> Result<Value, RemoteError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    if !(200..300).contains(&status) {
        return Err(parse_error_body(status, &text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| RemoteError::new(format!("invalid response body: {e}")).with_status(status))
}

pub(crate) fn rows_from(body: Value) -> Result<Vec<Value>, RemoteError> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        row @ Value::Object(_) => Ok(vec![row]),
        other => Err(RemoteError::new(format!("expected rows, got {other}"))),
    }
}

/// Error body shapes of PostgREST (`message`, `code`, `details`, `hint`)
/// and GoTrue (`msg`/`error_description`, `error_code`).
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    code: Option<Value>,
    error_code: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

pub(crate) fn parse_error_body(status: u16, body: &str) -> RemoteError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty() && !trimmed.starts_with('{')).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("request failed with status {status}"));
    let code = parsed.error_code.or(match parsed.code {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    });

    RemoteError { message, code, status: Some(status), details: parsed.details, hint: parsed.hint }
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    full_name: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: Uuid,
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

impl From<WireUser> for Identity {
    fn from(user: WireUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.user_metadata.full_name.or(user.user_metadata.name),
            avatar_url: user.user_metadata.avatar_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSession {
    access_token: String,
    refresh_token: String,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: WireUser,
}

impl WireSession {
    fn into_session(self, now: OffsetDateTime) -> Result<Session, RemoteError> {
        let expires_at = match self.expires_at {
            Some(ts) => OffsetDateTime::from_unix_timestamp(ts)
                .map_err(|e| RemoteError::new(format!("invalid session expiry: {e}")))?,
            None => now + time::Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
        };
        Ok(Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        })
    }
}

/// Decode a sign-up/sign-in/refresh body. Token-bearing bodies yield a
/// session; bare user bodies (sign-up awaiting confirmation) do not.
pub(crate) fn parse_auth_response(body: Value, now: OffsetDateTime) -> Result<AuthResponse, RemoteError> {
    if body.get("access_token").is_some() {
        let wire: WireSession = serde_json::from_value(body)
            .map_err(|e| RemoteError::new(format!("invalid session body: {e}")))?;
        let session = wire.into_session(now)?;
        return Ok(AuthResponse { user: Some(session.user.clone()), session: Some(session) });
    }

    let user_value = match body.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => body,
    };
    let user: WireUser =
        serde_json::from_value(user_value).map_err(|e| RemoteError::new(format!("invalid user body: {e}")))?;
    Ok(AuthResponse { user: Some(user.into()), session: None })
}

// =============================================================================
// SESSION FILE
// =============================================================================

async fn read_session_file(path: &Path) -> Option<Session> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "session file unreadable");
            return None;
        }
    };
    match serde_json::from_str::<Session>(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "session file corrupt; ignoring");
            None
        }
    }
}

async fn persist_session_file(path: &Path, session: Option<&Session>) {
    let result = match session {
        Some(session) => write_session_file(path, session).await,
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "session file update failed");
    }
}

async fn write_session_file(path: &Path, session: &Session) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(session).map_err(std::io::Error::other)?;
    tokio::fs::write(path, json).await
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
