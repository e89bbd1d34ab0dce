//! Team and user entities and the normalized cache holding them.
//!
//! A team detail response embeds full user objects for the leader and the
//! members. [`EntityCache::write_team_detail`] splits it: every user goes
//! into the user store under its own key, and the team store keeps only
//! `leader_id` and `member_ids`. [`EntityCache::team_view`] re-assembles
//! the composite at read time.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::store::{Entity, EntityStore};
use crate::config::RealtimeConfig;
use crate::domain::{RoomId, TeamId, UserId};

/// A user as returned by profile endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id.
    pub id: UserId,
    /// Display name.
    #[serde(default)]
    pub user_name: String,
    /// Contact address.
    #[serde(default)]
    pub email: Option<String>,
    /// Role within the service.
    #[serde(default)]
    pub role: Option<String>,
    /// Team the user belongs to.
    #[serde(default)]
    pub team_id: Option<TeamId>,
}

impl Entity for User {
    type Key = UserId;

    fn key(&self) -> UserId {
        self.id
    }
}

/// A team as stored in the cache: members are referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Team id.
    pub team_id: TeamId,
    /// Team chat room.
    #[serde(default)]
    pub chat_room_id: Option<RoomId>,
    /// Team name.
    pub team_name: String,
    /// Project domain.
    #[serde(default)]
    pub team_domain: Option<String>,
    /// Team leader.
    pub leader_id: UserId,
    /// Members, in response order.
    #[serde(default)]
    pub member_ids: Vec<UserId>,
}

impl Entity for Team {
    type Key = TeamId;

    fn key(&self) -> TeamId {
        self.team_id
    }
}

/// Team detail response with embedded users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDetail {
    /// Team id.
    pub team_id: TeamId,
    /// Team chat room.
    #[serde(default)]
    pub chat_room_id: Option<RoomId>,
    /// Team name.
    pub team_name: String,
    /// Project domain.
    #[serde(default)]
    pub team_domain: Option<String>,
    /// Embedded leader.
    pub leader: User,
    /// Embedded members.
    #[serde(default)]
    pub members: Vec<User>,
}

/// A team re-assembled from the normalized stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    /// The cached team.
    pub team: Team,
    /// Leader, if cached.
    pub leader: Option<User>,
    /// Cached members, in the team's order.
    pub members: Vec<User>,
    /// Referenced users missing from the user store.
    pub missing: Vec<UserId>,
}

/// Team and user stores sharing one TTL and clock.
#[derive(Debug)]
pub struct EntityCache {
    users: RwLock<EntityStore<User>>,
    teams: RwLock<EntityStore<Team>>,
}

impl EntityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: RwLock::new(EntityStore::new(ttl, Arc::clone(&clock))),
            teams: RwLock::new(EntityStore::new(ttl, clock)),
        }
    }

    /// Creates an empty cache on the wall clock with the configured TTL.
    #[must_use]
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.cache_ttl, Arc::new(SystemClock))
    }

    fn read_users(&self) -> std::sync::RwLockReadGuard<'_, EntityStore<User>> {
        self.users.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_users_store(&self) -> std::sync::RwLockWriteGuard<'_, EntityStore<User>> {
        self.users.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_teams(&self) -> std::sync::RwLockReadGuard<'_, EntityStore<Team>> {
        self.teams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_teams_store(&self) -> std::sync::RwLockWriteGuard<'_, EntityStore<Team>> {
        self.teams.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caches one user.
    pub fn set_user(&self, user: User) {
        self.write_users_store().set_entity(user);
    }

    /// Caches a batch of users, e.g. a search result.
    pub fn write_users(&self, users: impl IntoIterator<Item = User>) {
        let mut store = self.write_users_store();
        for user in users {
            store.set_entity(user);
        }
    }

    /// Caches one team.
    pub fn set_team(&self, team: Team) {
        self.write_teams_store().set_entity(team);
    }

    /// Caches a batch of teams, e.g. a list response.
    pub fn write_teams(&self, teams: impl IntoIterator<Item = Team>) {
        let mut store = self.write_teams_store();
        for team in teams {
            store.set_entity(team);
        }
    }

    /// Splits a team detail into the user and team stores. Returns the
    /// team id.
    pub fn write_team_detail(&self, detail: TeamDetail) -> TeamId {
        let TeamDetail {
            team_id,
            chat_room_id,
            team_name,
            team_domain,
            leader,
            members,
        } = detail;
        let team = Team {
            team_id,
            chat_room_id,
            team_name,
            team_domain,
            leader_id: leader.id,
            member_ids: members.iter().map(|m| m.id).collect(),
        };
        {
            let mut users = self.write_users_store();
            users.set_entity(leader);
            for member in members {
                users.set_entity(member);
            }
        }
        self.set_team(team);
        tracing::debug!(%team_id, "team detail cached");
        team_id
    }

    /// Cached user.
    #[must_use]
    pub fn user(&self, id: UserId) -> Option<User> {
        self.read_users().get_by_id(id).cloned()
    }

    /// Cached team (references only).
    #[must_use]
    pub fn team(&self, id: TeamId) -> Option<Team> {
        self.read_teams().get_by_id(id).cloned()
    }

    /// Re-assembles a team with its leader and members.
    #[must_use]
    pub fn team_view(&self, id: TeamId) -> Option<TeamView> {
        let team = self.team(id)?;
        let users = self.read_users();
        let mut missing = Vec::new();
        let leader = users.get_by_id(team.leader_id).cloned();
        if leader.is_none() {
            missing.push(team.leader_id);
        }
        let mut members = Vec::with_capacity(team.member_ids.len());
        for member_id in &team.member_ids {
            match users.get_by_id(*member_id) {
                Some(user) => members.push(user.clone()),
                None => missing.push(*member_id),
            }
        }
        Some(TeamView {
            team,
            leader,
            members,
            missing,
        })
    }

    /// Display name for a chat sender, if the user is cached.
    #[must_use]
    pub fn sender_name(&self, id: UserId) -> Option<String> {
        self.read_users()
            .get_by_id(id)
            .map(|user| user.user_name.clone())
    }

    /// Returns `true` if the user is stale or not cached.
    #[must_use]
    pub fn is_user_stale(&self, id: UserId) -> bool {
        self.read_users().is_stale(id)
    }

    /// Returns `true` if the team is stale or not cached.
    #[must_use]
    pub fn is_team_stale(&self, id: TeamId) -> bool {
        self.read_teams().is_stale(id)
    }

    /// Applies `change` to a cached user, refreshing its fetch time.
    pub fn update_user<F: FnOnce(&mut User)>(&self, id: UserId, change: F) -> bool {
        self.write_users_store().update(id, change)
    }

    /// Applies `change` to a cached team, refreshing its fetch time.
    pub fn update_team<F: FnOnce(&mut Team)>(&self, id: TeamId, change: F) -> bool {
        self.write_teams_store().update(id, change)
    }

    /// Drops a user, e.g. after account deletion.
    pub fn invalidate_user(&self, id: UserId) -> bool {
        self.write_users_store().invalidate(id).is_some()
    }

    /// Drops a team, e.g. after it was deleted. Its users stay cached.
    pub fn invalidate_team(&self, id: TeamId) -> bool {
        let removed = self.write_teams_store().invalidate(id).is_some();
        if removed {
            tracing::debug!(team_id = %id, "team invalidated");
        }
        removed
    }

    /// Teams whose entries are older than the TTL.
    #[must_use]
    pub fn stale_team_ids(&self) -> Vec<TeamId> {
        self.read_teams().stale_ids()
    }

    /// Users whose entries are older than the TTL.
    #[must_use]
    pub fn stale_user_ids(&self) -> Vec<UserId> {
        self.read_users().stale_ids()
    }

    /// Number of cached users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.read_users().len()
    }

    /// Number of cached teams.
    #[must_use]
    pub fn team_count(&self) -> usize {
        self.read_teams().len()
    }
}
