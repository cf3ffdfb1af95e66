// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Workspaces and message-to-workspace routing.
//!
//! A workspace is an isolated identity (instructions, model, trigger,
//! skills) multiplexed onto the physical channels. Resolution order for a
//! message: explicit group routing, then sender membership, then the
//! default workspace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use valet_config::model::WorkspaceSettings;

use crate::session::{Session, SessionStore};

/// The default workspace id used when no routing rule matches.
pub const DEFAULT_WORKSPACE: &str = "default";

/// An isolated assistant identity with its own session store.
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub instructions: String,
    /// Model override; empty uses the global default.
    pub model: String,
    pub language: String,
    /// Trigger override for group chats; empty uses the global trigger.
    pub trigger: String,
    /// Skill allowlist; empty means all loaded skills.
    pub skills: Vec<String>,
    pub sessions: SessionStore,
}

impl Workspace {
    fn from_settings(settings: &WorkspaceSettings, data_dir: Option<&PathBuf>) -> Self {
        let dir = data_dir.map(|d| d.join("sessions").join(&settings.id));
        Self {
            id: settings.id.clone(),
            name: if settings.name.is_empty() {
                settings.id.clone()
            } else {
                settings.name.clone()
            },
            instructions: settings.instructions.clone(),
            model: settings.model.clone(),
            language: settings.language.clone(),
            trigger: settings.trigger.clone(),
            skills: settings.skills.clone(),
            sessions: SessionStore::new(&settings.id, dir),
        }
    }

    fn default_workspace(data_dir: Option<&PathBuf>) -> Self {
        let dir = data_dir.map(|d| d.join("sessions").join(DEFAULT_WORKSPACE));
        Self {
            id: DEFAULT_WORKSPACE.to_string(),
            name: "Default".to_string(),
            instructions: String::new(),
            model: String::new(),
            language: String::new(),
            trigger: String::new(),
            skills: Vec::new(),
            sessions: SessionStore::new(DEFAULT_WORKSPACE, dir),
        }
    }
}

/// A resolved routing decision: the workspace plus its session for the chat.
pub struct Resolved {
    pub workspace: Arc<Workspace>,
    pub session: Arc<Session>,
}

struct Routing {
    /// chat id -> workspace id
    groups: HashMap<String, String>,
    /// sender id -> workspace id
    members: HashMap<String, String>,
}

/// Routes messages to workspaces and owns their session stores.
pub struct WorkspaceManager {
    workspaces: RwLock<HashMap<String, Arc<Workspace>>>,
    routing: RwLock<Routing>,
    data_dir: Option<PathBuf>,
}

impl WorkspaceManager {
    /// Builds the manager from config. A `default` workspace always exists.
    pub fn new(settings: &[WorkspaceSettings], data_dir: Option<PathBuf>) -> Self {
        let mut workspaces = HashMap::new();
        let mut groups = HashMap::new();
        let mut members = HashMap::new();

        for ws in settings {
            if ws.id.is_empty() {
                continue;
            }
            for chat in &ws.groups {
                groups.insert(chat.clone(), ws.id.clone());
            }
            for sender in &ws.members {
                members.insert(sender.clone(), ws.id.clone());
            }
            workspaces.insert(
                ws.id.clone(),
                Arc::new(Workspace::from_settings(ws, data_dir.as_ref())),
            );
        }

        workspaces
            .entry(DEFAULT_WORKSPACE.to_string())
            .or_insert_with(|| Arc::new(Workspace::default_workspace(data_dir.as_ref())));

        Self {
            workspaces: RwLock::new(workspaces),
            routing: RwLock::new(Routing { groups, members }),
            data_dir,
        }
    }

    /// Resolves `(channel, chat, sender)` to a workspace and its session.
    ///
    /// Order: `groups[chat]` -> `members[sender]` -> default.
    pub fn resolve(
        &self,
        channel: &str,
        chat_id: &str,
        sender: &str,
        is_group: bool,
    ) -> Resolved {
        let routing = self.routing.read();
        let ws_id = if is_group {
            routing.groups.get(chat_id)
        } else {
            None
        }
        .or_else(|| routing.members.get(sender))
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_WORKSPACE);

        let workspace = self
            .get(ws_id)
            .unwrap_or_else(|| self.get(DEFAULT_WORKSPACE).expect("default workspace exists"));

        let session_key = format!("{channel}:{chat_id}");
        let session = workspace.sessions.get_or_create(&session_key);

        debug!(workspace = %workspace.id, session = %session_key, "message routed");
        Resolved { workspace, session }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Workspace>> {
        self.workspaces.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Workspace>> {
        let mut all: Vec<Arc<Workspace>> = self.workspaces.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn count(&self) -> usize {
        self.workspaces.read().len()
    }

    /// Creates an empty workspace at runtime (`/ws create`).
    pub fn create(&self, id: &str) -> Result<(), String> {
        let mut workspaces = self.workspaces.write();
        if workspaces.contains_key(id) {
            return Err(format!("workspace '{id}' already exists"));
        }
        let settings = WorkspaceSettings {
            id: id.to_string(),
            ..WorkspaceSettings::default()
        };
        workspaces.insert(
            id.to_string(),
            Arc::new(Workspace::from_settings(&settings, self.data_dir.as_ref())),
        );
        info!(workspace = id, "workspace created");
        Ok(())
    }

    /// Routes a sender to a workspace (`/ws assign`).
    pub fn assign_member(&self, ws_id: &str, sender: &str) -> Result<(), String> {
        if self.get(ws_id).is_none() {
            return Err(format!("workspace '{ws_id}' does not exist"));
        }
        self.routing
            .write()
            .members
            .insert(sender.to_string(), ws_id.to_string());
        Ok(())
    }

    /// Routes a group chat to a workspace.
    pub fn assign_group(&self, ws_id: &str, chat_id: &str) -> Result<(), String> {
        if self.get(ws_id).is_none() {
            return Err(format!("workspace '{ws_id}' does not exist"));
        }
        self.routing
            .write()
            .groups
            .insert(chat_id.to_string(), ws_id.to_string());
        Ok(())
    }

    /// Spawns the background task that prunes idle sessions in every
    /// workspace until `cancel` fires.
    pub fn start_pruner(self: &Arc<Self>, ttl: Duration, cancel: CancellationToken) {
        let manager = Arc::clone(self);
        let interval = ttl.min(Duration::from_secs(600)).max(Duration::from_secs(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        for workspace in manager.list() {
                            workspace.sessions.prune_idle(ttl);
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(id: &str, members: &[&str], groups: &[&str]) -> WorkspaceSettings {
        WorkspaceSettings {
            id: id.to_string(),
            members: members.iter().map(|s| s.to_string()).collect(),
            groups: groups.iter().map(|s| s.to_string()).collect(),
            ..WorkspaceSettings::default()
        }
    }

    #[test]
    fn default_workspace_always_exists() {
        let mgr = WorkspaceManager::new(&[], None);
        assert!(mgr.get(DEFAULT_WORKSPACE).is_some());
        assert_eq!(mgr.count(), 1);
    }

    #[test]
    fn group_routing_wins_over_membership() {
        let mgr = WorkspaceManager::new(
            &[
                settings("family", &["+1"], &[]),
                settings("work", &[], &["g-42"]),
            ],
            None,
        );
        // +1 is a family member, but g-42 routes to work.
        let resolved = mgr.resolve("telegram", "g-42", "+1", true);
        assert_eq!(resolved.workspace.id, "work");
    }

    #[test]
    fn membership_routes_direct_messages() {
        let mgr = WorkspaceManager::new(&[settings("family", &["+1"], &[])], None);
        assert_eq!(mgr.resolve("telegram", "dm-1", "+1", false).workspace.id, "family");
        assert_eq!(
            mgr.resolve("telegram", "dm-2", "+2", false).workspace.id,
            DEFAULT_WORKSPACE
        );
    }

    #[test]
    fn group_routing_ignored_for_direct_messages() {
        let mgr = WorkspaceManager::new(&[settings("work", &[], &["42"])], None);
        // A DM whose chat id collides with a routed group id is not a group.
        let resolved = mgr.resolve("telegram", "42", "+9", false);
        assert_eq!(resolved.workspace.id, DEFAULT_WORKSPACE);
    }

    #[test]
    fn same_chat_resolves_same_session() {
        let mgr = WorkspaceManager::new(&[], None);
        let a = mgr.resolve("telegram", "7", "+1", false);
        let b = mgr.resolve("telegram", "7", "+1", false);
        assert!(Arc::ptr_eq(&a.session, &b.session));
        // Different chat, different session.
        let c = mgr.resolve("telegram", "8", "+1", false);
        assert!(!Arc::ptr_eq(&a.session, &c.session));
    }

    #[test]
    fn create_and_assign_at_runtime() {
        let mgr = WorkspaceManager::new(&[], None);
        mgr.create("support").unwrap();
        assert!(mgr.create("support").is_err());

        mgr.assign_member("support", "+5").unwrap();
        assert_eq!(mgr.resolve("telegram", "x", "+5", false).workspace.id, "support");

        assert!(mgr.assign_member("ghost", "+5").is_err());
    }
}
