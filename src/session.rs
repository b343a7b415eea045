//! Session store: who is signed in, shared by every consumer of one client.
//!
//! SYSTEM CONTEXT
//! ==============
//! Views read `AuthState` (or await changes through `watch()`), and call
//! `sign_in`/`sign_up`/`sign_out`. The navigation guard does not use this
//! store; it asks the remote service directly on every transition.
//!
//! DESIGN
//! ======
//! The store is an explicitly constructed context object rather than process
//! global state, so tests and multiple clients get isolated instances. It
//! subscribes to the remote service's session-change channel on
//! construction; `initialize()` starts the listener task that applies pushed
//! changes, and `close()` (or drop) stops it.
//!
//! `sign_in`/`sign_up`/`sign_out` apply their result directly and record it
//! as an expected echo. The listener skips a pushed change matching the
//! oldest expected echo, so a quick sign-in then sign-out never replays the
//! stale sign-in.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AccessError;
use crate::remote::RemoteService;
use crate::types::{AuthChange, AuthResponse, Identity, Session};

/// Authentication state published to consumers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<Identity>,
    pub session: Option<Session>,
    /// `true` until the persisted session has been looked up.
    pub loading: bool,
}

impl AuthState {
    /// Derived from `user` on every read; never stored.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    fn apply(&mut self, session: Option<Session>) {
        self.user = session.as_ref().map(|s| s.user.clone());
        self.session = session;
    }
}

pub struct SessionStore {
    remote: Arc<dyn RemoteService>,
    state: Arc<watch::Sender<AuthState>>,
    initializing: AtomicBool,
    /// Taken by the listener task when it starts.
    changes: Mutex<Option<broadcast::Receiver<AuthChange>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    echoes: Arc<Mutex<Echoes>>,
}

/// Changes the store applied itself, matched against what the listener sees.
#[derive(Debug, Default)]
struct Echoes {
    /// Applied directly; their pushed change has not reached the listener.
    expected: VecDeque<Option<Session>>,
    /// Applied by the listener while an auth call was in flight.
    early: Vec<Option<Session>>,
    in_flight: usize,
}

/// One in-flight auth call. Dropping it without `finish` (error or
/// cancellation) applies nothing.
struct AuthCall<'a> {
    store: &'a SessionStore,
}

impl AuthCall<'_> {
    /// Apply the session the call produced and expect its echo, unless the
    /// listener already applied it.
    fn finish(self, session: Option<Session>) {
        let mut echoes = lock(&self.store.echoes);
        match echoes.early.iter().position(|s| *s == session) {
            Some(i) => {
                echoes.early.remove(i);
            }
            None => echoes.expected.push_back(session.clone()),
        }
        self.store.state.send_modify(|s| s.apply(session));
    }
}

impl Drop for AuthCall<'_> {
    fn drop(&mut self) {
        let mut echoes = lock(&self.store.echoes);
        echoes.in_flight = echoes.in_flight.saturating_sub(1);
        if echoes.in_flight == 0 {
            echoes.early.clear();
        }
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        let changes = remote.subscribe();
        let (state, _) = watch::channel(AuthState { user: None, session: None, loading: true });
        Self {
            remote,
            state: Arc::new(state),
            initializing: AtomicBool::new(false),
            changes: Mutex::new(Some(changes)),
            listener: Mutex::new(None),
            echoes: Arc::new(Mutex::new(Echoes::default())),
        }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn user(&self) -> Option<Identity> {
        self.state.borrow().user.clone()
    }

    /// Load the persisted session and start listening for pushed changes.
    ///
    /// A call made while another initialization is in flight returns at once
    /// without contacting the remote service.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the session lookup fails; the state is
    /// left signed out with `loading` cleared.
    pub async fn initialize(&self) -> Result<(), AccessError> {
        if self
            .initializing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("session initialization already in flight");
            return Ok(());
        }

        self.start_listener();
        self.state.send_modify(|s| s.loading = true);
        let result = self.remote.get_session().await;
        self.state.send_modify(|s| {
            s.apply(result.as_ref().ok().cloned().flatten());
            s.loading = false;
        });
        self.initializing.store(false, Ordering::Release);

        match result {
            Ok(session) => {
                debug!(authenticated = session.is_some(), "session initialized");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                Err(e.into())
            }
        }
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, AccessError> {
        let call = self.begin_call();
        let auth = self.remote.sign_up(email, password).await?;
        if let Some(session) = &auth.session {
            call.finish(Some(session.clone()));
        }
        Ok(auth)
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, AccessError> {
        let call = self.begin_call();
        let auth = self.remote.sign_in_with_password(email, password).await?;
        if let Some(session) = &auth.session {
            info!(user_id = %session.user.id, "signed in");
            call.finish(Some(session.clone()));
        }
        Ok(auth)
    }

    /// End the live session.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged; local state is kept in that case.
    pub async fn sign_out(&self) -> Result<(), AccessError> {
        let call = self.begin_call();
        self.remote.sign_out().await?;
        info!("signed out");
        call.finish(None);
        Ok(())
    }

    /// Stop listening for pushed session changes.
    pub fn close(&self) {
        if let Some(handle) = lock(&self.listener).take() {
            handle.abort();
        }
    }

    fn begin_call(&self) -> AuthCall<'_> {
        lock(&self.echoes).in_flight += 1;
        AuthCall { store: self }
    }

    fn start_listener(&self) {
        let Some(mut changes) = lock(&self.changes).take() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let echoes = Arc::clone(&self.echoes);
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        let mut pending = lock(&echoes);
                        if pending.expected.front() == Some(&change.session) {
                            pending.expected.pop_front();
                            debug!(event = ?change.event, "session change already applied");
                            continue;
                        }
                        debug!(event = ?change.event, "session change");
                        if pending.in_flight > 0 {
                            pending.early.push(change.session.clone());
                        }
                        state.send_modify(|s| s.apply(change.session));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Dropped changes may include echoes; stop matching.
                        lock(&echoes).expected.clear();
                        warn!(skipped, "session change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *lock(&self.listener) = Some(handle);
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Poison-tolerant lock; the guarded values stay consistent across panics.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
