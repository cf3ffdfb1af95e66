// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sender access control.
//!
//! Decision order: owners, admins, allow-lists, block-list, then the default
//! policy for unknown senders (`deny`, `allow`, or `ask`). Mutations are
//! atomic, checked against the caller's level, and persisted to a YAML state
//! file next to the config after every change.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use valet_config::model::AccessSettings;
use valet_core::types::{AccessLevel, AccessPolicy, IncomingMessage};
use valet_core::ValetError;

/// Result of an access check.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub allowed: bool,
    pub level: AccessLevel,
    /// Under the `ask` policy: send the one-time pending notice.
    pub should_ask: bool,
    pub reason: String,
}

/// Membership sets, persisted across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessState {
    #[serde(default)]
    pub owners: BTreeSet<String>,
    #[serde(default)]
    pub admins: BTreeSet<String>,
    #[serde(default)]
    pub allowed_users: BTreeSet<String>,
    #[serde(default)]
    pub allowed_groups: BTreeSet<String>,
    #[serde(default)]
    pub blocked: BTreeSet<String>,
    /// Senders already shown the pending notice under the `ask` policy.
    #[serde(default)]
    pub asked: BTreeSet<String>,
}

struct AccessInner {
    state: AccessState,
    policy: AccessPolicy,
    pending_message: String,
}

/// Per-sender allow/deny/ask decisions with a role lattice.
pub struct AccessManager {
    inner: Mutex<AccessInner>,
    state_path: Option<PathBuf>,
}

impl AccessManager {
    /// Creates the manager from config, merging any persisted state file.
    pub fn new(settings: &AccessSettings, state_path: Option<PathBuf>) -> Self {
        let mut state = AccessState {
            owners: settings.owners.iter().cloned().collect(),
            admins: settings.admins.iter().cloned().collect(),
            allowed_users: settings.allowed_users.iter().cloned().collect(),
            allowed_groups: settings.allowed_groups.iter().cloned().collect(),
            ..AccessState::default()
        };

        if let Some(path) = &state_path
            && let Ok(content) = fs::read_to_string(path)
        {
            match serde_yaml::from_str::<AccessState>(&content) {
                Ok(persisted) => {
                    state.owners.extend(persisted.owners);
                    state.admins.extend(persisted.admins);
                    state.allowed_users.extend(persisted.allowed_users);
                    state.allowed_groups.extend(persisted.allowed_groups);
                    state.blocked.extend(persisted.blocked);
                    state.asked.extend(persisted.asked);
                }
                Err(e) => warn!(error = %e, "ignoring unreadable access state file"),
            }
        }

        Self {
            inner: Mutex::new(AccessInner {
                state,
                policy: settings.policy,
                pending_message: settings.pending_message.clone(),
            }),
            state_path,
        }
    }

    /// Decides whether a message may enter the pipeline.
    pub fn check(&self, msg: &IncomingMessage) -> AccessDecision {
        let inner = self.inner.lock();
        let state = &inner.state;
        let sender = &msg.sender;

        if state.owners.contains(sender) {
            return decision_allowed(AccessLevel::Owner);
        }
        if state.admins.contains(sender) {
            return decision_allowed(AccessLevel::Admin);
        }
        if state.blocked.contains(sender) {
            return decision_denied("sender is blocked");
        }
        if state.allowed_users.contains(sender)
            || (msg.is_group && state.allowed_groups.contains(&msg.chat_id))
        {
            return decision_allowed(AccessLevel::User);
        }

        match inner.policy {
            AccessPolicy::Allow => decision_allowed(AccessLevel::User),
            AccessPolicy::Deny => decision_denied("unknown sender (policy: deny)"),
            AccessPolicy::Ask => {
                if state.asked.contains(sender) {
                    decision_denied("pending approval (already asked)")
                } else {
                    AccessDecision {
                        allowed: false,
                        level: AccessLevel::Blocked,
                        should_ask: true,
                        reason: "unknown sender (policy: ask)".to_string(),
                    }
                }
            }
        }
    }

    /// The one-time notice sent under the `ask` policy.
    pub fn pending_message(&self) -> String {
        self.inner.lock().pending_message.clone()
    }

    /// Records that the pending notice was sent to a sender.
    pub fn mark_asked(&self, sender: &str) {
        {
            let mut inner = self.inner.lock();
            inner.state.asked.insert(sender.to_string());
        }
        self.persist();
    }

    /// Adds a sender to the allow-list. Caller must be at least admin.
    pub fn allow(&self, caller_level: AccessLevel, id: &str) -> Result<(), ValetError> {
        self.mutate(caller_level, AccessLevel::Admin, |state| {
            state.blocked.remove(id);
            state.asked.remove(id);
            state.allowed_users.insert(id.to_string());
        })
    }

    /// Adds a sender to the block-list. Caller must be at least admin;
    /// owners cannot be blocked.
    pub fn block(&self, caller_level: AccessLevel, id: &str) -> Result<(), ValetError> {
        {
            let inner = self.inner.lock();
            if inner.state.owners.contains(id) {
                return Err(ValetError::AccessDenied {
                    sender: id.to_string(),
                    reason: "owners cannot be blocked".to_string(),
                });
            }
        }
        self.mutate(caller_level, AccessLevel::Admin, |state| {
            state.allowed_users.remove(id);
            state.admins.remove(id);
            state.blocked.insert(id.to_string());
        })
    }

    /// Promotes a sender to admin. Caller must be owner.
    pub fn promote_admin(&self, caller_level: AccessLevel, id: &str) -> Result<(), ValetError> {
        self.mutate(caller_level, AccessLevel::Owner, |state| {
            state.blocked.remove(id);
            state.admins.insert(id.to_string());
        })
    }

    /// Adds a group chat to the allow-list. Caller must be at least admin.
    pub fn allow_group(&self, caller_level: AccessLevel, id: &str) -> Result<(), ValetError> {
        self.mutate(caller_level, AccessLevel::Admin, |state| {
            state.allowed_groups.insert(id.to_string());
        })
    }

    /// Removes a group chat from the allow-list. Caller must be at least admin.
    pub fn block_group(&self, caller_level: AccessLevel, id: &str) -> Result<(), ValetError> {
        self.mutate(caller_level, AccessLevel::Admin, |state| {
            state.allowed_groups.remove(id);
        })
    }

    /// Snapshot of the membership sets (for `/users`).
    pub fn snapshot(&self) -> AccessState {
        self.inner.lock().state.clone()
    }

    /// Applies hot-reloaded settings: policy, pending message, and config
    /// lists (persisted runtime additions are kept).
    pub fn apply_settings(&self, settings: &AccessSettings) {
        let mut inner = self.inner.lock();
        inner.policy = settings.policy;
        inner.pending_message = settings.pending_message.clone();
        inner.state.owners.extend(settings.owners.iter().cloned());
        inner.state.admins.extend(settings.admins.iter().cloned());
        inner
            .state
            .allowed_users
            .extend(settings.allowed_users.iter().cloned());
        inner
            .state
            .allowed_groups
            .extend(settings.allowed_groups.iter().cloned());
        info!(policy = %inner.policy, "access settings hot-reloaded");
    }

    fn mutate(
        &self,
        caller_level: AccessLevel,
        required: AccessLevel,
        apply: impl FnOnce(&mut AccessState),
    ) -> Result<(), ValetError> {
        if caller_level < required {
            return Err(ValetError::AccessDenied {
                sender: String::new(),
                reason: format!("requires {required} access"),
            });
        }
        {
            let mut inner = self.inner.lock();
            apply(&mut inner.state);
        }
        self.persist();
        Ok(())
    }

    fn persist(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = self.inner.lock().state.clone();
        match serde_yaml::to_string(&state) {
            Ok(content) => {
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(e) = fs::write(path, content) {
                    warn!(error = %e, path = %path.display(), "failed to persist access state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize access state"),
        }
    }
}

fn decision_allowed(level: AccessLevel) -> AccessDecision {
    AccessDecision {
        allowed: true,
        level,
        should_ask: false,
        reason: String::new(),
    }
}

fn decision_denied(reason: &str) -> AccessDecision {
    AccessDecision {
        allowed: false,
        level: AccessLevel::Blocked,
        should_ask: false,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn message_from(sender: &str, is_group: bool) -> IncomingMessage {
        IncomingMessage {
            channel: "test".into(),
            chat_id: "g-1".into(),
            sender: sender.into(),
            id: "m1".into(),
            content: "hi".into(),
            media: None,
            is_group,
            timestamp: Utc::now(),
        }
    }

    fn settings(policy: AccessPolicy) -> AccessSettings {
        AccessSettings {
            policy,
            owners: vec!["+owner".into()],
            admins: vec!["+admin".into()],
            allowed_users: vec!["+user".into()],
            allowed_groups: vec!["g-1".into()],
            pending_message: "pending".into(),
        }
    }

    #[test]
    fn role_lattice_resolution() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Deny), None);
        assert_eq!(mgr.check(&message_from("+owner", false)).level, AccessLevel::Owner);
        assert_eq!(mgr.check(&message_from("+admin", false)).level, AccessLevel::Admin);
        assert_eq!(mgr.check(&message_from("+user", false)).level, AccessLevel::User);
    }

    #[test]
    fn deny_policy_silently_drops_unknown() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Deny), None);
        let decision = mgr.check(&message_from("+stranger", false));
        assert!(!decision.allowed);
        assert!(!decision.should_ask);
    }

    #[test]
    fn allow_policy_admits_unknown_as_user() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Allow), None);
        let decision = mgr.check(&message_from("+stranger", false));
        assert!(decision.allowed);
        assert_eq!(decision.level, AccessLevel::User);
    }

    #[test]
    fn ask_policy_asks_once_then_drops() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Ask), None);
        let first = mgr.check(&message_from("+stranger", false));
        assert!(!first.allowed);
        assert!(first.should_ask);

        mgr.mark_asked("+stranger");
        let second = mgr.check(&message_from("+stranger", false));
        assert!(!second.allowed);
        assert!(!second.should_ask);
    }

    #[test]
    fn group_allowlist_admits_group_members() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Deny), None);
        let in_group = mgr.check(&message_from("+stranger", true));
        assert!(in_group.allowed);
        assert_eq!(in_group.level, AccessLevel::User);
        // Same sender in a DM is still unknown.
        let dm = mgr.check(&message_from("+stranger", false));
        assert!(!dm.allowed);
    }

    #[test]
    fn blocked_overrides_allowlist() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Allow), None);
        mgr.block(AccessLevel::Admin, "+user").unwrap();
        let decision = mgr.check(&message_from("+user", false));
        assert!(!decision.allowed);
    }

    #[test]
    fn mutations_check_caller_level() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Deny), None);
        assert!(mgr.allow(AccessLevel::User, "+x").is_err());
        assert!(mgr.allow(AccessLevel::Admin, "+x").is_ok());
        assert!(mgr.promote_admin(AccessLevel::Admin, "+x").is_err());
        assert!(mgr.promote_admin(AccessLevel::Owner, "+x").is_ok());
    }

    #[test]
    fn owners_cannot_be_blocked() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Deny), None);
        assert!(mgr.block(AccessLevel::Owner, "+owner").is_err());
    }

    #[test]
    fn allow_clears_block_and_asked() {
        let mgr = AccessManager::new(&settings(AccessPolicy::Ask), None);
        mgr.mark_asked("+stranger");
        mgr.block(AccessLevel::Admin, "+stranger").unwrap();
        mgr.allow(AccessLevel::Admin, "+stranger").unwrap();
        let decision = mgr.check(&message_from("+stranger", false));
        assert!(decision.allowed);
    }

    #[test]
    fn state_persists_across_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access_state.yaml");

        let mgr = AccessManager::new(&settings(AccessPolicy::Ask), Some(path.clone()));
        mgr.allow(AccessLevel::Admin, "+friend").unwrap();
        mgr.mark_asked("+stranger");
        drop(mgr);

        // The state file on disk is YAML.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(serde_yaml::from_str::<AccessState>(&raw).is_ok());
        assert!(raw.contains("allowed_users"));

        let reloaded = AccessManager::new(&settings(AccessPolicy::Ask), Some(path));
        assert!(reloaded.check(&message_from("+friend", false)).allowed);
        // The asked set survives too: no second notice.
        let decision = reloaded.check(&message_from("+stranger", false));
        assert!(!decision.should_ask);
    }
}
