//! # Feature: Permission Gate
//!
//! Decides whether a caller may run a command keyword, given the config's
//! keyword → role names policy. Keywords absent from the policy are open to
//! everyone. Membership lookups that fail are treated as "not allowed".

use anyhow::{Context as _, Result};
use log::warn;
use serenity::async_trait;
use serenity::http::Http;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PermissionPolicy;

/// Identity of the user who sent a command.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: u64,
    /// Guild whose roles apply. Falls back to the configured guild for DMs.
    pub guild_id: Option<u64>,
    /// Display name used in logs.
    pub name: String,
}

/// Resolves a member's role names in a guild.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn role_names(&self, guild_id: u64, user_id: u64) -> Result<Vec<String>>;
}

/// Returns whether `caller` may run `keyword` under `policy`.
pub async fn is_allowed(
    caller: &Caller,
    keyword: &str,
    policy: &PermissionPolicy,
    directory: &dyn RoleDirectory,
) -> bool {
    let Some(allowed_roles) = policy
        .iter()
        .find(|(command, _)| command.eq_ignore_ascii_case(keyword))
        .map(|(_, roles)| roles)
    else {
        return true;
    };

    let Some(guild_id) = caller.guild_id else {
        warn!(
            "No guild to check {}'s roles against for the {} command",
            caller.name, keyword
        );
        return false;
    };

    match directory.role_names(guild_id, caller.user_id).await {
        Ok(roles) => roles.iter().any(|role| allowed_roles.contains(role)),
        Err(e) => {
            warn!("Failed to retrieve member info for {}: {:#}", caller.name, e);
            false
        }
    }
}

/// Looks roles up through the Discord REST API.
#[derive(Clone)]
pub struct DiscordRoleDirectory {
    http: Arc<Http>,
}

impl DiscordRoleDirectory {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RoleDirectory for DiscordRoleDirectory {
    async fn role_names(&self, guild_id: u64, user_id: u64) -> Result<Vec<String>> {
        let member = self
            .http
            .get_member(guild_id, user_id)
            .await
            .context("Failed to fetch guild member")?;
        let roles: HashMap<_, _> = self
            .http
            .get_guild_roles(guild_id)
            .await
            .context("Failed to fetch guild roles")?
            .into_iter()
            .map(|role| (role.id, role.name))
            .collect();

        Ok(member
            .roles
            .iter()
            .filter_map(|id| roles.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;

    /// Directory backed by a fixed user → roles table.
    pub(crate) struct StaticDirectory(pub HashMap<u64, Vec<String>>);

    #[async_trait]
    impl RoleDirectory for StaticDirectory {
        async fn role_names(&self, _guild_id: u64, user_id: u64) -> Result<Vec<String>> {
            self.0
                .get(&user_id)
                .cloned()
                .ok_or_else(|| anyhow!("Unknown Member"))
        }
    }

    fn caller(user_id: u64) -> Caller {
        Caller {
            user_id,
            guild_id: Some(99),
            name: format!("user{}", user_id),
        }
    }

    fn policy() -> PermissionPolicy {
        let mut policy = PermissionPolicy::new();
        policy.insert("alias".to_string(), vec!["Admin".to_string()]);
        policy
    }

    fn directory() -> StaticDirectory {
        let mut members = HashMap::new();
        members.insert(1, vec!["Member".to_string(), "Admin".to_string()]);
        members.insert(2, vec!["Member".to_string()]);
        members.insert(3, vec![]);
        StaticDirectory(members)
    }

    #[tokio::test]
    async fn test_unlisted_command_is_open() {
        assert!(is_allowed(&caller(3), "ping", &policy(), &directory()).await);
        // Unknown members are fine when no lookup is needed.
        assert!(is_allowed(&caller(42), "ping", &policy(), &directory()).await);
    }

    #[tokio::test]
    async fn test_role_grants_access() {
        assert!(is_allowed(&caller(1), "alias", &policy(), &directory()).await);
        assert!(is_allowed(&caller(1), "ALIAS", &policy(), &directory()).await);
        assert!(!is_allowed(&caller(2), "alias", &policy(), &directory()).await);
    }

    #[tokio::test]
    async fn test_no_roles_fails_closed() {
        assert!(!is_allowed(&caller(3), "alias", &policy(), &directory()).await);
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_closed() {
        assert!(!is_allowed(&caller(42), "alias", &policy(), &directory()).await);
    }

    #[tokio::test]
    async fn test_missing_guild_fails_closed() {
        let mut dm = caller(1);
        dm.guild_id = None;
        assert!(!is_allowed(&dm, "alias", &policy(), &directory()).await);
    }
}
