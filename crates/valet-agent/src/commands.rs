// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat-level admin commands.
//!
//! Commands are parsed here into a closed enum with a minimum caller level;
//! execution happens in the assistant, which owns the subsystems they touch.

use valet_core::types::AccessLevel;

/// A recognized chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Allow(String),
    Block(String),
    Admin(String),
    Users,
    Status,
    Help,
    WsCreate(String),
    WsAssign { workspace: String, target: String },
    WsList,
    WsInfo(Option<String>),
    /// Empty id means the current chat.
    GroupAllow(Option<String>),
    GroupBlock(Option<String>),
    Think(String),
    Stop,
    Compact,
    Approve,
    Deny,
    New,
    Reset,
}

impl Command {
    /// The minimum caller level required to execute this command.
    pub fn min_level(&self) -> AccessLevel {
        match self {
            Command::Admin(_) => AccessLevel::Owner,
            Command::Allow(_)
            | Command::Block(_)
            | Command::WsCreate(_)
            | Command::WsAssign { .. }
            | Command::WsList
            | Command::WsInfo(_)
            | Command::GroupAllow(_)
            | Command::GroupBlock(_) => AccessLevel::Admin,
            _ => AccessLevel::User,
        }
    }
}

/// True when the content looks like a command.
pub fn is_command(content: &str) -> bool {
    content.trim_start().starts_with('/')
}

/// Parses content into a command. `None` means unrecognized -- the caller
/// decides whether to reply with help or pass the text to the agent.
pub fn parse(content: &str) -> Option<Command> {
    let mut parts = content.trim().split_whitespace();
    let head = parts.next()?;
    let arg1 = parts.next().map(|s| s.to_string());
    let arg2 = parts.next().map(|s| s.to_string());

    let cmd = match head {
        "/allow" => Command::Allow(arg1?),
        "/block" => Command::Block(arg1?),
        "/admin" => Command::Admin(arg1?),
        "/users" => Command::Users,
        "/status" => Command::Status,
        "/help" => Command::Help,
        "/ws" => match arg1?.as_str() {
            "create" => Command::WsCreate(arg2?),
            "assign" => Command::WsAssign {
                workspace: arg2?,
                target: parts.next()?.to_string(),
            },
            "list" => Command::WsList,
            "info" => Command::WsInfo(arg2),
            _ => return None,
        },
        "/group" => match arg1?.as_str() {
            "allow" => Command::GroupAllow(arg2),
            "block" => Command::GroupBlock(arg2),
            _ => return None,
        },
        "/think" => {
            let level = arg1?;
            match level.as_str() {
                "off" | "low" | "medium" | "high" => Command::Think(level),
                _ => return None,
            }
        }
        "/stop" => Command::Stop,
        "/compact" => Command::Compact,
        "/approve" => Command::Approve,
        "/deny" => Command::Deny,
        "/new" => Command::New,
        "/reset" => Command::Reset,
        _ => return None,
    };
    Some(cmd)
}

/// The `/help` text.
pub fn help_text() -> String {
    "Commands:\n\
     /allow <id>, /block <id> -- manage the allow/block lists (admin)\n\
     /admin <id> -- promote to admin (owner)\n\
     /group allow|block [chat] -- manage group access (admin)\n\
     /ws create|assign|list|info -- manage workspaces (admin)\n\
     /users -- show access lists\n\
     /status -- session and usage info\n\
     /think off|low|medium|high -- set the thinking level\n\
     /stop -- cancel the active run\n\
     /compact -- compact the session history\n\
     /approve, /deny -- resolve a pending tool confirmation\n\
     /new, /reset -- start a fresh session\n\
     /help -- this message"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_commands() {
        assert!(is_command("/help"));
        assert!(is_command("  /stop"));
        assert!(!is_command("hello /help"));
    }

    #[test]
    fn parses_access_commands() {
        assert_eq!(parse("/allow +1"), Some(Command::Allow("+1".into())));
        assert_eq!(parse("/block +2"), Some(Command::Block("+2".into())));
        assert_eq!(parse("/admin +3"), Some(Command::Admin("+3".into())));
        assert_eq!(parse("/allow"), None);
    }

    #[test]
    fn parses_workspace_commands() {
        assert_eq!(parse("/ws list"), Some(Command::WsList));
        assert_eq!(parse("/ws create work"), Some(Command::WsCreate("work".into())));
        assert_eq!(
            parse("/ws assign work +5"),
            Some(Command::WsAssign {
                workspace: "work".into(),
                target: "+5".into()
            })
        );
        assert_eq!(parse("/ws info"), Some(Command::WsInfo(None)));
        assert_eq!(parse("/ws info work"), Some(Command::WsInfo(Some("work".into()))));
        assert_eq!(parse("/ws bogus"), None);
    }

    #[test]
    fn parses_group_commands_with_optional_chat() {
        assert_eq!(parse("/group allow"), Some(Command::GroupAllow(None)));
        assert_eq!(
            parse("/group block g-9"),
            Some(Command::GroupBlock(Some("g-9".into())))
        );
    }

    #[test]
    fn think_validates_levels() {
        assert_eq!(parse("/think high"), Some(Command::Think("high".into())));
        assert_eq!(parse("/think sideways"), None);
        assert_eq!(parse("/think"), None);
    }

    #[test]
    fn min_levels_follow_the_table() {
        assert_eq!(parse("/admin +1").unwrap().min_level(), AccessLevel::Owner);
        assert_eq!(parse("/allow +1").unwrap().min_level(), AccessLevel::Admin);
        assert_eq!(parse("/ws list").unwrap().min_level(), AccessLevel::Admin);
        assert_eq!(parse("/stop").unwrap().min_level(), AccessLevel::User);
        assert_eq!(parse("/compact").unwrap().min_level(), AccessLevel::User);
        assert_eq!(parse("/approve").unwrap().min_level(), AccessLevel::User);
    }

    #[test]
    fn unknown_command_is_none() {
        assert_eq!(parse("/frobnicate"), None);
        assert_eq!(parse("not a command"), None);
    }
}
