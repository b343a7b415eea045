//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` wires one remote service into the session store, the four
//! accessors, and the navigation guard. It is cheap to clone; every field is
//! Arc-wrapped, so clones observe the same session and cached lists.

use std::sync::Arc;

use crate::config::RemoteConfig;
use crate::error::ConfigError;
use crate::guard::NavigationGuard;
use crate::profiles::Profiles;
use crate::projects::Projects;
use crate::remote::RemoteService;
use crate::remote::rest::RestClient;
use crate::session::SessionStore;
use crate::teams::Teams;
use crate::todos::Todos;

#[derive(Clone)]
pub struct AppState {
    pub remote: Arc<dyn RemoteService>,
    pub session: Arc<SessionStore>,
    pub profiles: Arc<Profiles>,
    pub projects: Arc<Projects>,
    pub teams: Arc<Teams>,
    pub todos: Arc<Todos>,
    pub guard: Arc<NavigationGuard>,
}

impl AppState {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self {
            session: Arc::new(SessionStore::new(Arc::clone(&remote))),
            profiles: Arc::new(Profiles::new(Arc::clone(&remote))),
            projects: Arc::new(Projects::new(Arc::clone(&remote))),
            teams: Arc::new(Teams::new(Arc::clone(&remote))),
            todos: Arc::new(Todos::new(Arc::clone(&remote))),
            guard: Arc::new(NavigationGuard::new(Arc::clone(&remote))),
            remote,
        }
    }

    /// Build state backed by the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the HTTP client cannot be built.
    pub fn connect(config: &RemoteConfig) -> Result<Self, ConfigError> {
        let remote: Arc<dyn RemoteService> = Arc::new(RestClient::new(config)?);
        Ok(Self::new(remote))
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
