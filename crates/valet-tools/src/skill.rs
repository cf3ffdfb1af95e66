// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Skill contract and registry.
//!
//! A skill is a named capability bundle: tools, a system-prompt fragment,
//! and a lifecycle. Skill packages themselves (discovery, installation) are
//! an external concern; the daemon only consumes this trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::warn;
use valet_core::types::AccessLevel;
use valet_core::ValetError;

use crate::tool::Tool;

/// Identity and access metadata for a skill.
#[derive(Debug, Clone)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    /// Minimum level required to use this skill's tools.
    pub required_level: AccessLevel,
}

/// A loadable capability bundle.
#[async_trait]
pub trait Skill: Send + Sync {
    fn metadata(&self) -> SkillMetadata;

    /// Prompt fragment injected into the skills layer when active.
    fn system_prompt(&self) -> String {
        String::new()
    }

    /// Tools contributed by this skill.
    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Called once after loading, before any tool is registered.
    async fn init(&self) -> Result<(), ValetError> {
        Ok(())
    }

    /// Called during daemon shutdown.
    async fn shutdown(&self) -> Result<(), ValetError> {
        Ok(())
    }
}

/// Registry of loaded skills, keyed by name.
#[derive(Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<dyn Skill>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, skill: Arc<dyn Skill>) {
        let name = skill.metadata().name;
        self.skills.write().insert(name, skill);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<SkillMetadata> {
        let mut all: Vec<SkillMetadata> =
            self.skills.read().values().map(|s| s.metadata()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Shuts down every registered skill, logging failures.
    pub async fn shutdown_all(&self) {
        let skills: Vec<Arc<dyn Skill>> = self.skills.read().values().cloned().collect();
        for skill in skills {
            if let Err(e) = skill.shutdown().await {
                warn!(skill = %skill.metadata().name, error = %e, "skill shutdown error");
            }
        }
    }
}
