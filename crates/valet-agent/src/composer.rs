// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered system prompt composition.
//!
//! Each layer has a priority; lower values are trimmed last when the prompt
//! exceeds the token budget. Layers are regenerated on every request --
//! nothing is cached across turns.
//!
//! Bootstrap files (`SOUL.md`, `AGENTS.md`, `IDENTITY.md`, `USER.md`,
//! `TOOLS.md`, `MEMORY.md`) are loaded from the workspace root and injected
//! as project context. If `SOUL.md` is present the agent is instructed to
//! embody its persona.

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::RwLock;
use tracing::debug;
use valet_core::MemoryStore;

use crate::session::Session;

/// Layer priorities. Lower = higher priority = trimmed last.
pub const LAYER_CORE: u8 = 0;
pub const LAYER_SAFETY: u8 = 5;
pub const LAYER_IDENTITY: u8 = 10;
pub const LAYER_THINKING: u8 = 12;
pub const LAYER_BOOTSTRAP: u8 = 15;
pub const LAYER_BUSINESS: u8 = 20;
pub const LAYER_SKILLS: u8 = 40;
pub const LAYER_MEMORY: u8 = 50;
pub const LAYER_TEMPORAL: u8 = 60;
pub const LAYER_CONVERSATION: u8 = 70;
pub const LAYER_RUNTIME: u8 = 80;

/// Bootstrap files read from the workspace root, in injection order.
const BOOTSTRAP_FILES: &[&str] = &[
    "SOUL.md",
    "AGENTS.md",
    "IDENTITY.md",
    "USER.md",
    "TOOLS.md",
    "MEMORY.md",
];

/// Per-file size cap for bootstrap content.
const BOOTSTRAP_MAX_BYTES: usize = 20_000;

/// Returns the skill's prompt fragment for an active skill name.
pub type SkillPromptGetter = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Settings the composer reads on every request. Instructions and the token
/// budget are hot-reloadable.
#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub assistant_name: String,
    pub instructions: String,
    pub timezone: String,
    pub language: String,
    pub model: String,
    pub token_budget: usize,
    /// Directories searched for bootstrap files, in order.
    pub bootstrap_dirs: Vec<PathBuf>,
    /// Max history entries rendered into the conversation layer.
    pub max_history: usize,
}

struct LayerEntry {
    priority: u8,
    content: String,
}

/// Assembles the final system prompt from prioritized layers.
pub struct PromptComposer {
    settings: RwLock<ComposerSettings>,
    memory: RwLock<Option<Arc<dyn MemoryStore>>>,
    skill_prompts: RwLock<Option<SkillPromptGetter>>,
}

impl PromptComposer {
    pub fn new(settings: ComposerSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            memory: RwLock::new(None),
            skill_prompts: RwLock::new(None),
        }
    }

    /// Connects the long-term memory store.
    pub fn set_memory_store(&self, store: Arc<dyn MemoryStore>) {
        *self.memory.write() = Some(store);
    }

    /// Installs the skill prompt lookup.
    pub fn set_skill_prompt_getter(&self, getter: SkillPromptGetter) {
        *self.skill_prompts.write() = Some(getter);
    }

    /// Applies hot-reloadable settings (instructions, token budget).
    pub fn update_instructions(&self, instructions: String, token_budget: usize) {
        let mut settings = self.settings.write();
        settings.instructions = instructions;
        settings.token_budget = token_budget;
    }

    /// Builds the complete system prompt for a session and user input.
    pub fn compose(&self, session: &Session, input: &str) -> String {
        let settings = self.settings.read().clone();
        let mut layers = Vec::with_capacity(11);

        layers.push(LayerEntry {
            priority: LAYER_CORE,
            content: self.build_core_layer(&settings),
        });
        layers.push(LayerEntry {
            priority: LAYER_SAFETY,
            content: build_safety_layer(),
        });

        if !settings.instructions.is_empty() {
            layers.push(LayerEntry {
                priority: LAYER_IDENTITY,
                content: format!("## Custom Instructions\n\n{}", settings.instructions),
            });
        }

        if let Some(thinking) = build_thinking_layer(session) {
            layers.push(LayerEntry {
                priority: LAYER_THINKING,
                content: thinking,
            });
        }

        if let Some(bootstrap) = build_bootstrap_layer(&settings.bootstrap_dirs) {
            layers.push(LayerEntry {
                priority: LAYER_BOOTSTRAP,
                content: bootstrap,
            });
        }

        let session_cfg = session.config();
        if !session_cfg.business_context.is_empty() {
            layers.push(LayerEntry {
                priority: LAYER_BUSINESS,
                content: format!("## Workspace Context\n\n{}", session_cfg.business_context),
            });
        }

        if let Some(skills) = self.build_skills_layer(session) {
            layers.push(LayerEntry {
                priority: LAYER_SKILLS,
                content: skills,
            });
        }

        if let Some(memory) = self.build_memory_layer(session, input) {
            layers.push(LayerEntry {
                priority: LAYER_MEMORY,
                content: memory,
            });
        }

        layers.push(LayerEntry {
            priority: LAYER_TEMPORAL,
            content: build_temporal_layer(&settings.timezone),
        });

        if let Some(conversation) = build_conversation_layer(session, settings.max_history) {
            layers.push(LayerEntry {
                priority: LAYER_CONVERSATION,
                content: conversation,
            });
        }

        layers.push(LayerEntry {
            priority: LAYER_RUNTIME,
            content: build_runtime_layer(&settings),
        });

        assemble_layers(layers, settings.token_budget)
    }

    fn build_core_layer(&self, settings: &ComposerSettings) -> String {
        let mut b = String::new();
        b.push_str(&format!(
            "You are {}, a personal assistant daemon.\n\n",
            settings.assistant_name
        ));
        b.push_str("## Tooling\n\n");
        b.push_str(
            "You have access to tools for: file I/O (read, write, list), \
             bash execution, web fetch, and memory (save/search).\n\n",
        );
        b.push_str("Tool names are case-sensitive. Call tools exactly as listed.\n");
        b.push_str(
            "TOOLS.md does not control tool availability -- it is your cheat sheet \
             for environment-specific notes.\n\n",
        );
        b.push_str("## Tool Call Style\n\n");
        b.push_str("Default: do not narrate routine, low-risk tool calls -- just call the tool.\n");
        b.push_str(
            "Narrate only when it helps: multi-step work, complex problems, sensitive \
             actions (deletions, deployments), or when the user explicitly asks.\n",
        );
        b.push_str("Keep narration brief and value-dense. Use plain human language unless in a technical context.\n");
        b
    }

    fn build_skills_layer(&self, session: &Session) -> Option<String> {
        let active = session.active_skills();
        if active.is_empty() {
            return None;
        }

        let getter = self.skill_prompts.read().clone();
        let mut b = String::from("## Skills\n\n");
        b.push_str("You have specialized skills available. Each skill provides tools and context.\n\n");
        for name in &active {
            b.push_str(&format!("### {name}\n"));
            if let Some(getter) = &getter
                && let Some(prompt) = getter(name)
                && !prompt.is_empty()
            {
                b.push_str(&prompt);
                b.push('\n');
            }
            b.push('\n');
        }
        Some(b)
    }

    fn build_memory_layer(&self, session: &Session, input: &str) -> Option<String> {
        let mut parts = Vec::new();

        let store = self.memory.read().clone();
        if let Some(store) = store {
            let facts = store.recent_facts(15, input);
            if !facts.is_empty() {
                parts.push(format!(
                    "## Memory Recall\n\nRelevant facts from long-term memory:\n\n{facts}"
                ));
            }
        }

        let session_facts = session.facts();
        if !session_facts.is_empty() {
            let mut b = String::from("## Session Context\n\n");
            for fact in &session_facts {
                b.push_str(&format!("- {fact}\n"));
            }
            parts.push(b);
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

fn build_safety_layer() -> String {
    "## Safety

You have no independent goals: do not pursue self-preservation, replication, resource acquisition, or power-seeking. Avoid long-term plans beyond the user's request.

Prioritize safety and human oversight over task completion. If instructions conflict, pause and ask. Comply with stop/pause/audit requests and never bypass safeguards.

Do not manipulate or persuade anyone to expand access or disable safeguards. Do not change system prompts, safety rules, or tool policies unless explicitly requested by the owner.

When using destructive tools (rm, drop, deploy): confirm with the user first unless they've explicitly pre-approved the action.

File operations: prefer reversible actions. Create backups before major changes."
        .to_string()
}

fn build_thinking_layer(session: &Session) -> Option<String> {
    let level = session.thinking_level();
    let instruction = match level.as_str() {
        "low" => "Think step-by-step when the task is complex. Keep reasoning brief for simple tasks.",
        "medium" => "Think through problems systematically. Show your reasoning for non-trivial tasks.",
        "high" => "Use extended thinking: reason carefully before answering, consider alternatives, then respond. Favor depth over speed.",
        _ => return None,
    };
    Some(format!("## Thinking Mode\n\n{instruction}"))
}

fn build_bootstrap_layer(dirs: &[PathBuf]) -> Option<String> {
    let mut files = Vec::new();
    let mut has_soul = false;

    for name in BOOTSTRAP_FILES {
        let mut content = None;
        for dir in dirs {
            if let Ok(text) = fs::read_to_string(dir.join(name)) {
                content = Some(text);
                break;
            }
        }
        let Some(text) = content else { continue };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let text = if text.len() > BOOTSTRAP_MAX_BYTES {
            let mut end = BOOTSTRAP_MAX_BYTES;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}\n\n... [truncated at 20KB]", &text[..end])
        } else {
            text.to_string()
        };

        if *name == "SOUL.md" {
            has_soul = true;
        }
        files.push((*name, text));
    }

    if files.is_empty() {
        return None;
    }

    let mut b = String::from("# Project Context\n\n");
    b.push_str("The following project context files have been loaded:\n\n");
    if has_soul {
        b.push_str(
            "If SOUL.md is present, embody its persona and tone. Avoid stiff, generic \
             replies; follow its guidance unless higher-priority instructions override it.\n\n",
        );
    }
    for (name, text) in files {
        b.push_str(&format!("## {name}\n\n{text}\n\n"));
    }
    Some(b)
}

fn build_temporal_layer(timezone: &str) -> String {
    let tz = Tz::from_str(timezone).unwrap_or(chrono_tz::UTC);
    let now = Utc::now().with_timezone(&tz);
    format!(
        "## Current Date & Time\n\n{}\nTimezone: {}\nDay: {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        timezone,
        now.format("%A"),
    )
}

fn build_conversation_layer(session: &Session, max_history: usize) -> Option<String> {
    let history = session.recent_history(max_history);
    if history.is_empty() {
        return None;
    }
    let mut b = String::from("## Recent Conversation\n\n");
    for entry in &history {
        b.push_str(&format!(
            "**User:** {}\n**Assistant:** {}\n\n",
            entry.user, entry.assistant
        ));
    }
    Some(b)
}

fn build_runtime_layer(settings: &ComposerSettings) -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let cwd = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    format!(
        "---\nRuntime: agent={} | model={} | os={}/{} | host={} | cwd={} | lang={}",
        settings.assistant_name,
        settings.model,
        std::env::consts::OS,
        std::env::consts::ARCH,
        hostname,
        cwd,
        settings.language,
    )
}

/// Rough token estimate: one token per four bytes of prompt text.
fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Sorts layers by priority, drops empties, and trims from the highest
/// priority value downward until the estimate fits the budget. Core and
/// Safety are never dropped.
fn assemble_layers(mut layers: Vec<LayerEntry>, token_budget: usize) -> String {
    layers.retain(|l| !l.content.is_empty());
    layers.sort_by_key(|l| l.priority);

    if token_budget > 0 {
        loop {
            let total: usize = layers.iter().map(|l| estimate_tokens(&l.content)).sum();
            if total <= token_budget {
                break;
            }
            // Highest priority value = least important = dropped first.
            let Some(victim) = layers
                .iter()
                .rposition(|l| l.priority > LAYER_SAFETY)
            else {
                break;
            };
            debug!(
                priority = layers[victim].priority,
                "prompt layer dropped to fit token budget"
            );
            layers.remove(victim);
        }
    }

    layers
        .iter()
        .map(|l| l.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use tempfile::TempDir;

    fn composer() -> PromptComposer {
        PromptComposer::new(ComposerSettings {
            assistant_name: "Valet".into(),
            instructions: String::new(),
            timezone: "UTC".into(),
            language: "en".into(),
            model: "gpt-4o".into(),
            token_budget: 0,
            bootstrap_dirs: Vec::new(),
            max_history: 20,
        })
    }

    fn session() -> Arc<Session> {
        crate::session::SessionStore::new("default", None).get_or_create("test:1")
    }

    #[test]
    fn layers_appear_in_priority_order() {
        let composer = composer();
        let session = session();
        session.set_thinking_level("high");
        session.add_message("earlier question", "earlier answer");

        let prompt = composer.compose(&session, "hello");

        let core_pos = prompt.find("You are Valet").unwrap();
        let safety_pos = prompt.find("## Safety").unwrap();
        let thinking_pos = prompt.find("## Thinking Mode").unwrap();
        let temporal_pos = prompt.find("## Current Date & Time").unwrap();
        let conversation_pos = prompt.find("## Recent Conversation").unwrap();
        let runtime_pos = prompt.find("Runtime: agent=").unwrap();

        assert!(core_pos < safety_pos);
        assert!(safety_pos < thinking_pos);
        assert!(thinking_pos < temporal_pos);
        assert!(temporal_pos < conversation_pos);
        assert!(conversation_pos < runtime_pos);
    }

    #[test]
    fn empty_layers_are_omitted() {
        let composer = composer();
        let session = session();
        let prompt = composer.compose(&session, "hi");
        assert!(!prompt.contains("## Custom Instructions"));
        assert!(!prompt.contains("## Recent Conversation"));
        assert!(!prompt.contains("## Skills"));
    }

    #[test]
    fn business_context_layer_from_session_config() {
        let composer = composer();
        let session = session();
        session.set_config(SessionConfig {
            model: String::new(),
            business_context: "Acme support desk".into(),
        });
        let prompt = composer.compose(&session, "hi");
        assert!(prompt.contains("## Workspace Context"));
        assert!(prompt.contains("Acme support desk"));
    }

    #[test]
    fn thinking_layer_follows_session_tag() {
        let composer = composer();
        let session = session();
        assert!(!composer.compose(&session, "x").contains("## Thinking Mode"));
        session.set_thinking_level("off");
        assert!(!composer.compose(&session, "x").contains("## Thinking Mode"));
        session.set_thinking_level("medium");
        assert!(composer.compose(&session, "x").contains("systematically"));
    }

    #[test]
    fn bootstrap_files_are_loaded_and_truncated() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("SOUL.md"), "Be cheerful.").unwrap();
        fs::write(dir.path().join("USER.md"), "x".repeat(30_000)).unwrap();

        let composer = PromptComposer::new(ComposerSettings {
            assistant_name: "Valet".into(),
            instructions: String::new(),
            timezone: "UTC".into(),
            language: "en".into(),
            model: "gpt-4o".into(),
            token_budget: 0,
            bootstrap_dirs: vec![dir.path().to_path_buf()],
            max_history: 20,
        });
        let session = session();
        let prompt = composer.compose(&session, "hi");

        assert!(prompt.contains("# Project Context"));
        assert!(prompt.contains("Be cheerful."));
        assert!(prompt.contains("embody its persona"));
        assert!(prompt.contains("[truncated at 20KB]"));
    }

    #[test]
    fn budget_trims_highest_priority_values_first() {
        let session = session();
        session.add_message(&"long user message ".repeat(50), &"long reply ".repeat(50));

        // A budget that forces dropping the tail layers.
        let composer = PromptComposer::new(ComposerSettings {
            assistant_name: "Valet".into(),
            instructions: "Short instructions.".into(),
            timezone: "UTC".into(),
            language: "en".into(),
            model: "gpt-4o".into(),
            token_budget: 600,
            bootstrap_dirs: Vec::new(),
            max_history: 20,
        });
        let prompt = composer.compose(&session, "hi");

        // Core and Safety always survive.
        assert!(prompt.contains("You are Valet"));
        assert!(prompt.contains("## Safety"));
        // Runtime footer (priority 80) went first.
        assert!(!prompt.contains("Runtime: agent="));
    }

    #[test]
    fn trimming_preserves_priority_prefix_property() {
        // For a series of shrinking budgets: whenever a layer is present,
        // every lower-priority-value layer is present too.
        let session = session();
        session.set_thinking_level("high");
        session.add_message("question", "answer");

        for budget in [10_000, 2000, 800, 400, 200, 50] {
            let composer = PromptComposer::new(ComposerSettings {
                assistant_name: "Valet".into(),
                instructions: "Custom rules here.".into(),
                timezone: "UTC".into(),
                language: "en".into(),
                model: "gpt-4o".into(),
                token_budget: budget,
                bootstrap_dirs: Vec::new(),
                max_history: 20,
            });
            let prompt = composer.compose(&session, "hi");

            let markers = [
                ("You are Valet", LAYER_CORE),
                ("## Safety", LAYER_SAFETY),
                ("## Custom Instructions", LAYER_IDENTITY),
                ("## Thinking Mode", LAYER_THINKING),
                ("## Current Date & Time", LAYER_TEMPORAL),
                ("## Recent Conversation", LAYER_CONVERSATION),
                ("Runtime: agent=", LAYER_RUNTIME),
            ];
            let mut highest_present: Option<u8> = None;
            for (marker, priority) in markers {
                if prompt.contains(marker) {
                    highest_present = Some(highest_present.unwrap_or(0).max(priority));
                }
            }
            if let Some(highest) = highest_present {
                for (marker, priority) in markers {
                    if priority < highest {
                        assert!(
                            prompt.contains(marker),
                            "budget {budget}: layer {priority} missing while {highest} present"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn hot_reload_updates_instructions() {
        let composer = composer();
        let session = session();
        composer.update_instructions("Always reply in haiku.".into(), 0);
        let prompt = composer.compose(&session, "hi");
        assert!(prompt.contains("Always reply in haiku."));
    }

    #[test]
    fn memory_layer_uses_store_and_session_facts() {
        use chrono::{DateTime, Utc};
        use valet_core::ValetError;

        struct StaticStore;
        impl MemoryStore for StaticStore {
            fn recent_facts(&self, _limit: usize, query: &str) -> String {
                format!("- [note] fact about {query}")
            }
            fn save_fact(&self, _kind: &str, _text: &str) -> Result<(), ValetError> {
                Ok(())
            }
            fn save_daily_log(&self, _when: DateTime<Utc>, _text: &str) -> Result<(), ValetError> {
                Ok(())
            }
        }

        let composer = composer();
        composer.set_memory_store(Arc::new(StaticStore));
        let session = session();
        session.add_fact("user is traveling this week");

        let prompt = composer.compose(&session, "coffee");
        assert!(prompt.contains("## Memory Recall"));
        assert!(prompt.contains("fact about coffee"));
        assert!(prompt.contains("## Session Context"));
        assert!(prompt.contains("traveling this week"));
    }

    #[test]
    fn skills_layer_renders_active_skill_prompts() {
        let composer = composer();
        composer.set_skill_prompt_getter(Arc::new(|name: &str| {
            (name == "calendar").then(|| "Manage the calendar carefully.".to_string())
        }));
        let session = session();
        session.set_active_skills(vec!["calendar".into()]);

        let prompt = composer.compose(&session, "hi");
        assert!(prompt.contains("### calendar"));
        assert!(prompt.contains("Manage the calendar carefully."));
    }
}
