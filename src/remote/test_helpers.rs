//! In-memory `RemoteService` for unit tests.
//!
//! Tables are plain JSON rows keyed by table name. Inserts assign ids and
//! increasing timestamps, selects honor equality filters, ordering, and
//! `alias:table!fk(*)` embeds. Failures and delays are injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{Direction, RemoteService, Select};
use crate::error::RemoteError;
use crate::types::{AuthChange, AuthEvent, AuthResponse, Identity, Session};

/// Tables whose rows carry `created_at`.
const TIMESTAMPED: &[&str] = &["teams", "projects", "todos"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
    GetSession,
    SignUp,
    SignIn,
    SignOut,
}

struct Failure {
    op: Op,
    table: Option<String>,
    error: RemoteError,
}

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Value>>,
    session: Option<Session>,
    accounts: HashMap<String, Account>,
    failures: Vec<Failure>,
    insert_delays: VecDeque<Duration>,
    session_delay: Option<Duration>,
    calls: Vec<(Op, Option<String>)>,
    clock: i64,
}

pub struct MockRemote {
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthChange>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self { inner: Mutex::new(Inner::default()), events }
    }

    /// Register an account (and its profile row) without signing in.
    pub fn register(&self, email: &str, password: &str, full_name: Option<&str>) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            display_name: full_name.map(str::to_string),
            avatar_url: None,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.accounts.insert(
            email.to_string(),
            Account { password: password.to_string(), identity: identity.clone() },
        );
        inner
            .tables
            .entry("profiles".to_string())
            .or_default()
            .push(json!({
                "id": identity.id,
                "email": email,
                "full_name": full_name,
                "avatar_url": null,
            }));
        identity
    }

    /// Register an account and make it the live session without emitting an
    /// event, as if restored from storage.
    pub fn signed_in(email: &str) -> (Self, Identity) {
        let remote = Self::new();
        let identity = remote.register(email, "secret-password", None);
        remote.set_session(Some(session_for(&identity)));
        (remote, identity)
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.inner.lock().unwrap().session = session;
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.lock().unwrap().session.clone()
    }

    /// Push a session change to subscribers.
    pub fn emit(&self, change: AuthChange) {
        let _ = self.events.send(change);
    }

    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.inner
            .lock()
            .unwrap()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `op` on any table.
    pub fn fail_next(&self, op: Op, error: RemoteError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .push(Failure { op, table: None, error });
    }

    /// Fail the next `op` on `table` only.
    pub fn fail_next_on(&self, op: Op, table: &str, error: RemoteError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .push(Failure { op, table: Some(table.to_string()), error });
    }

    /// Delay upcoming inserts, one entry per insert in call order.
    pub fn delay_inserts(&self, delays: impl IntoIterator<Item = Duration>) {
        self.inner
            .lock()
            .unwrap()
            .insert_delays
            .extend(delays);
    }

    /// Make every session lookup take `delay`.
    pub fn delay_session_lookups(&self, delay: Duration) {
        self.inner.lock().unwrap().session_delay = Some(delay);
    }

    /// Number of `op` calls so far, on any table.
    pub fn calls(&self, op: Op) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    /// Number of `op` calls so far on `table`.
    pub fn calls_on(&self, op: Op, table: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(o, t)| *o == op && t.as_deref() == Some(table))
            .count()
    }

    /// Log the call and take a matching injected failure, if any.
    fn enter(&self, op: Op, table: Option<&str>) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push((op, table.map(str::to_string)));
        let hit = inner.failures.iter().position(|f| {
            f.op == op && (f.table.is_none() || f.table.as_deref() == table)
        });
        match hit {
            Some(index) => Err(inner.failures.remove(index).error),
            None => Ok(()),
        }
    }
}

/// A one-hour session for `identity`.
pub fn session_for(identity: &Identity) -> Session {
    Session {
        access_token: format!("access-{}", identity.id),
        refresh_token: format!("refresh-{}", identity.id),
        expires_at: OffsetDateTime::now_utc() + time::Duration::hours(1),
        user: identity.clone(),
    }
}

fn timestamp(tick: i64) -> String {
    let base = OffsetDateTime::from_unix_timestamp(1_767_225_600).unwrap();
    (base + time::Duration::seconds(tick))
        .format(&Rfc3339)
        .unwrap()
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse one embed such as `assignee:profiles!assignee_id(*)` into
/// `(alias, table, foreign key column)`. Embeds without a hint join on
/// `user_id`.
fn parse_embed(part: &str) -> Option<(String, String, String)> {
    let (alias, rest) = part.split_once(':')?;
    let rest = rest.strip_suffix("(*)")?;
    let (table, fk) = match rest.split_once('!') {
        Some((table, fk)) => (table, fk),
        None => (rest, "user_id"),
    };
    Some((alias.trim().to_string(), table.to_string(), fk.to_string()))
}

#[async_trait::async_trait]
impl RemoteService for MockRemote {
    async fn select(&self, query: &Select) -> Result<Vec<Value>, RemoteError> {
        self.enter(Op::Select, Some(&query.table))?;
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Value> = inner
            .tables
            .get(&query.table)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|(col, val)| row.get(col).map(cell).as_deref() == Some(val.as_str()))
            })
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let a = a.get(&order.column).map(cell).unwrap_or_default();
                let b = b.get(&order.column).map(cell).unwrap_or_default();
                match order.direction {
                    Direction::Ascending => a.cmp(&b),
                    Direction::Descending => b.cmp(&a),
                }
            });
        }

        for (alias, table, fk) in query.columns.split(", ").filter_map(parse_embed) {
            let source = inner.tables.get(&table).cloned().unwrap_or_default();
            for row in &mut rows {
                let target = row.get(&fk).cloned().unwrap_or(Value::Null);
                let joined = source
                    .iter()
                    .find(|r| !target.is_null() && r.get("id") == Some(&target))
                    .cloned()
                    .unwrap_or(Value::Null);
                if let Some(obj) = row.as_object_mut() {
                    obj.insert(alias.clone(), joined);
                }
            }
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, RemoteError> {
        self.enter(Op::Insert, Some(table))?;
        let delay = self.inner.lock().unwrap().insert_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let now = timestamp(inner.clock);
        let mut obj: Map<String, Value> = row.as_object().cloned().unwrap_or_default();
        obj.entry("id").or_insert_with(|| json!(Uuid::new_v4()));
        if TIMESTAMPED.contains(&table) {
            obj.entry("created_at").or_insert_with(|| json!(now));
        }
        if table == "todos" {
            obj.entry("updated_at").or_insert_with(|| json!(now));
        }
        let stored = Value::Object(obj);
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(stored.clone());
        Ok(vec![stored])
    }

    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value, RemoteError> {
        self.enter(Op::Update, Some(table))?;
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let now = timestamp(inner.clock);
        let target = json!(id);
        let row = inner
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.get("id") == Some(&target)))
            .ok_or_else(|| {
                RemoteError::new("JSON object requested, multiple (or no) rows returned")
                    .with_code("PGRST116")
                    .with_status(406)
            })?;
        if let (Some(obj), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
            for (key, value) in changes {
                obj.insert(key.clone(), value.clone());
            }
            if table == "todos" {
                obj.insert("updated_at".to_string(), json!(now));
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: &str, id: Uuid) -> Result<(), RemoteError> {
        self.enter(Op::Delete, Some(table))?;
        let target = json!(id);
        if let Some(rows) = self.inner.lock().unwrap().tables.get_mut(table) {
            rows.retain(|r| r.get("id") != Some(&target));
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, RemoteError> {
        self.enter(Op::GetSession, None)?;
        let delay = self.inner.lock().unwrap().session_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.session())
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError> {
        self.enter(Op::SignUp, None)?;
        if self.inner.lock().unwrap().accounts.contains_key(email) {
            return Err(RemoteError::new("User already registered")
                .with_code("user_already_exists")
                .with_status(422));
        }
        let identity = self.register(email, password, None);
        let session = session_for(&identity);
        self.set_session(Some(session.clone()));
        self.emit(AuthChange { event: AuthEvent::SignedIn, session: Some(session.clone()) });
        Ok(AuthResponse { user: Some(identity), session: Some(session) })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, RemoteError> {
        self.enter(Op::SignIn, None)?;
        let identity = {
            let inner = self.inner.lock().unwrap();
            match inner.accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => {
                    return Err(RemoteError::new("Invalid login credentials")
                        .with_code("invalid_credentials")
                        .with_status(400));
                }
            }
        };
        let session = session_for(&identity);
        self.set_session(Some(session.clone()));
        self.emit(AuthChange { event: AuthEvent::SignedIn, session: Some(session.clone()) });
        Ok(AuthResponse { user: Some(identity), session: Some(session) })
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        self.enter(Op::SignOut, None)?;
        self.set_session(None);
        self.emit(AuthChange { event: AuthEvent::SignedOut, session: None });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}
