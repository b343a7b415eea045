//! Navigation guard: the one authorization check made before each view
//! transition.
//!
//! SYSTEM CONTEXT
//! ==============
//! The view layer calls `before_each` with the target path and follows the
//! returned [`Navigation`]. The guard asks the remote service for the
//! session on every call instead of trusting cached state.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::remote::RemoteService;

pub const LOGIN_PATH: &str = "/login";
pub const DASHBOARD_PATH: &str = "/dashboard";

/// Who may enter a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    RequiresAuth,
    RequiresGuest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: &'static str,
    pub name: Option<&'static str>,
    pub access: Access,
    /// Static alias target (e.g. `/` → `/dashboard`).
    pub redirect: Option<&'static str>,
}

/// The application's route table.
pub const ROUTES: &[Route] = &[
    Route { path: "/", name: None, access: Access::Public, redirect: Some(DASHBOARD_PATH) },
    Route { path: LOGIN_PATH, name: Some("login"), access: Access::RequiresGuest, redirect: None },
    Route { path: "/register", name: Some("register"), access: Access::RequiresGuest, redirect: None },
    Route { path: DASHBOARD_PATH, name: Some("dashboard"), access: Access::RequiresAuth, redirect: None },
];

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(&'static str),
}

/// Pure guard decision for a route's access rule.
#[must_use]
pub fn decide(access: Access, authenticated: bool) -> Navigation {
    match access {
        Access::RequiresAuth if !authenticated => Navigation::Redirect(LOGIN_PATH),
        Access::RequiresGuest if authenticated => Navigation::Redirect(DASHBOARD_PATH),
        _ => Navigation::Proceed,
    }
}

pub struct NavigationGuard {
    remote: Arc<dyn RemoteService>,
    routes: Vec<Route>,
}

impl NavigationGuard {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self::with_routes(remote, ROUTES.to_vec())
    }

    #[must_use]
    pub fn with_routes(remote: Arc<dyn RemoteService>, routes: Vec<Route>) -> Self {
        Self { remote, routes }
    }

    /// Look up `path`, following static aliases. Unknown paths yield `None`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        let mut route = self.routes.iter().find(|r| r.path == path)?;
        // Bounded so an alias cycle cannot loop forever.
        for _ in 0..self.routes.len() {
            let Some(next) = route
                .redirect
                .and_then(|target| self.routes.iter().find(|r| r.path == target))
            else {
                break;
            };
            route = next;
        }
        Some(route)
    }

    /// Decide whether navigation to `path` may proceed.
    ///
    /// A failed session lookup counts as signed out. Aliases such as `/`
    /// redirect to their target once the target's access rule passes.
    pub async fn before_each(&self, path: &str) -> Navigation {
        let authenticated = match self.remote.get_session().await {
            Ok(session) => session.is_some(),
            Err(e) => {
                warn!(error = %e, %path, "session lookup failed during navigation");
                false
            }
        };
        let route = self.resolve(path);
        let aliased = route.filter(|r| r.path != path);
        let decision = match (decide(route.map_or(Access::Public, |r| r.access), authenticated), aliased) {
            (Navigation::Proceed, Some(target)) => Navigation::Redirect(target.path),
            (decision, _) => decision,
        };
        debug!(%path, authenticated, ?decision, "navigation guard");
        decision
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
