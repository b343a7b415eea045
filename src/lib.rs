//! Client-side data layer for a team/task-management app.
//!
//! ARCHITECTURE
//! ============
//! `session` tracks who is signed in. `profiles`, `projects`, `teams`, and
//! `todos` each cache one remote table and expose CRUD calls that patch the
//! cache only after the backend confirms. `guard` gates view transitions.
//! Everything reaches the backend through `remote::RemoteService`, with
//! `remote::rest::RestClient` as the HTTP implementation and `state::AppState`
//! wiring it all together.

pub mod config;
pub mod error;
pub mod guard;
pub mod list;
pub mod profiles;
pub mod projects;
pub mod remote;
pub mod session;
pub mod state;
pub mod teams;
pub mod todos;
pub mod types;

pub use error::{AccessError, ConfigError, ErrorCode, RemoteError};
pub use state::AppState;
