//! Teams accessor: the team list plus the member list of the team last
//! opened with `fetch_team_members`.
//!
//! TRADE-OFFS
//! ==========
//! Creating a team is two inserts (team, then the creator's admin
//! membership) with no transaction around them. When the second insert fails
//! the team already exists remotely, so it is kept in the local list and the
//! caller gets [`AccessError::MembershipIncomplete`] carrying the team.
//! `retry_admin_membership` and `delete_team` are the two ways out.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AccessError;
use crate::list::{CachedList, ListState};
use crate::remote::{RemoteService, Select, decode_row, decode_rows, require_session, single_row, to_row};
use crate::types::{NewTeam, Team, TeamMember, TeamRole};

const TABLE: &str = "teams";
const MEMBERS_TABLE: &str = "team_members";
const MEMBERS_WITH_PROFILE: &str = "*, profile:profiles(*)";

#[derive(Debug, Serialize)]
struct NewMembership {
    team_id: Uuid,
    user_id: Uuid,
    role: TeamRole,
}

pub struct Teams {
    remote: Arc<dyn RemoteService>,
    list: CachedList<Team>,
    members: watch::Sender<Vec<TeamMember>>,
}

impl Teams {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        let (members, _) = watch::channel(Vec::new());
        Self { remote, list: CachedList::new(), members }
    }

    #[must_use]
    pub fn state(&self) -> ListState<Team> {
        self.list.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListState<Team>> {
        self.list.subscribe()
    }

    /// Members of the team last passed to [`Self::fetch_team_members`].
    #[must_use]
    pub fn current_members(&self) -> Vec<TeamMember> {
        self.members.borrow().clone()
    }

    pub fn subscribe_members(&self) -> watch::Receiver<Vec<TeamMember>> {
        self.members.subscribe()
    }

    /// Reload all visible teams, newest first. Failures land in
    /// `state().error` and keep the previous list.
    pub async fn fetch_all(&self) {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        let query = Select::from(TABLE).newest_first();
        let fetched = match self.remote.select(&query).await {
            Ok(rows) => decode_rows::<Team>(TABLE, rows),
            Err(e) => Err(AccessError::from(e)),
        };
        match fetched {
            Ok(teams) => {
                debug!(count = teams.len(), "teams fetched");
                self.list.replace_all(teams);
            }
            Err(e) => {
                warn!(error = %e, "teams fetch failed");
                self.list.set_error(e.to_string());
            }
        }
    }

    /// Create a team and make its creator an admin member.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotAuthenticated`] without a session.
    /// - The remote error unchanged if the team insert fails (nothing created).
    /// - [`AccessError::MembershipIncomplete`] if only the membership insert
    ///   fails; the team is created and cached.
    pub async fn create_team(&self, name: &str, description: Option<&str>) -> Result<Team, AccessError> {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        let session = require_session(self.remote.as_ref()).await?;
        let row = to_row(TABLE, &NewTeam { name, description, created_by: session.user.id })?;
        let inserted = single_row(self.remote.insert(TABLE, row).await?)?;
        let team: Team = decode_row(TABLE, inserted)?;
        info!(team_id = %team.id, "team created");
        self.list.prepend(team.clone());

        match self
            .insert_member(team.id, session.user.id, TeamRole::Admin)
            .await
        {
            Ok(()) => Ok(team),
            Err(AccessError::Remote(source)) => {
                warn!(team_id = %team.id, error = %source, "admin membership insert failed");
                Err(AccessError::MembershipIncomplete { team: Box::new(team), source })
            }
            Err(e) => Err(e),
        }
    }

    /// Re-attempt the creator's admin membership after
    /// [`AccessError::MembershipIncomplete`].
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn retry_admin_membership(&self, team: &Team) -> Result<(), AccessError> {
        self.add_member(team.id, team.created_by, TeamRole::Admin)
            .await
    }

    /// Delete a team; the cached row is dropped on success.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn delete_team(&self, id: Uuid) -> Result<(), AccessError> {
        let _gate = self.list.lock().await;
        let _busy = self.list.busy();

        self.remote.delete(TABLE, id).await?;
        self.list.remove(id);
        info!(team_id = %id, "team deleted");
        Ok(())
    }

    /// Load a team's memberships with each member's profile and make them the
    /// current member list.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged; the member list is kept then.
    pub async fn fetch_team_members(&self, team_id: Uuid) -> Result<Vec<TeamMember>, AccessError> {
        let query = Select::from(MEMBERS_TABLE)
            .columns(MEMBERS_WITH_PROFILE)
            .eq("team_id", team_id);
        let rows = self.remote.select(&query).await?;
        let members: Vec<TeamMember> = decode_rows(MEMBERS_TABLE, rows)?;
        debug!(%team_id, count = members.len(), "team members fetched");
        self.members.send_replace(members.clone());
        Ok(members)
    }

    /// Add `user_id` to a team. Pass `TeamRole::default()` for a plain member.
    /// The current member list is not refreshed.
    ///
    /// # Errors
    ///
    /// Returns the remote error unchanged.
    pub async fn add_member(&self, team_id: Uuid, user_id: Uuid, role: TeamRole) -> Result<(), AccessError> {
        self.insert_member(team_id, user_id, role).await?;
        debug!(%team_id, %user_id, ?role, "team member added");
        Ok(())
    }

    async fn insert_member(&self, team_id: Uuid, user_id: Uuid, role: TeamRole) -> Result<(), AccessError> {
        let row = to_row(MEMBERS_TABLE, &NewMembership { team_id, user_id, role })?;
        self.remote.insert(MEMBERS_TABLE, row).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "teams_test.rs"]
mod tests;
