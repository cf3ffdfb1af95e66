// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end pipeline scenarios: mock channel in, mock model behind the
//! agent loop, real queue/access/guard/session machinery in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use valet_agent::{AGENT_STOPPED_REPLY, Assistant};
use valet_config::ValetConfig;
use valet_core::types::{AccessPolicy, ToolCall};
use valet_test_utils::{MockChannel, MockModel, MockTurn};

struct Harness {
    assistant: Arc<Assistant>,
    channel: MockChannel,
    model: Arc<MockModel>,
    shutdown: CancellationToken,
    dir: TempDir,
}

impl Harness {
    async fn start(policy: AccessPolicy, model: Arc<MockModel>, tweak: impl FnOnce(&mut ValetConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = ValetConfig::default();
        config.access.policy = policy;
        config.access.owners = vec!["+owner".into()];
        config.queue.debounce_ms = 100;
        config.memory.path = dir.path().join("data").to_string_lossy().into_owned();
        config.security.tool_guard.audit_log =
            dir.path().join("audit.log").to_string_lossy().into_owned();
        tweak(&mut config);

        let shutdown = CancellationToken::new();
        let assistant = Assistant::new(config, model.clone(), None, shutdown.clone());

        let channel = MockChannel::new("mock");
        assistant.channels().add_channel(Box::new(channel.clone()));
        assistant.start().await.unwrap();

        Self {
            assistant,
            channel,
            model,
            shutdown,
            dir,
        }
    }

    fn audit_log(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("audit.log")).unwrap_or_default()
    }

    /// Polls until `pred` holds or the timeout elapses.
    async fn wait_for(&self, timeout: Duration, mut pred: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test]
async fn silent_deny_produces_no_outbound_message() {
    let h = Harness::start(AccessPolicy::Deny, MockModel::replying("never sent"), |_| {}).await;

    h.channel.inject_text("42", "+stranger", "hello?");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.channel.sent().is_empty(), "denied sender must get nothing");
    assert_eq!(h.model.call_count(), 0);
    assert!(h.audit_log().contains("access_denied"));
}

#[tokio::test]
async fn allowed_sender_gets_a_reply_with_reply_to() {
    let h = Harness::start(AccessPolicy::Allow, MockModel::replying("Hi there!"), |_| {}).await;

    h.channel.inject_text("42", "+anyone", "hello");
    assert!(
        h.wait_for(Duration::from_secs(3), |h| !h.channel.sent().is_empty())
            .await
    );

    let sent = h.channel.sent();
    assert_eq!(sent[0].chat_id, "42");
    assert_eq!(sent[0].message.content, "Hi there!");
    assert!(sent[0].message.reply_to.as_deref().unwrap().starts_with("msg-"));
    // Typing indicator was attempted.
    assert!(!h.channel.typing_events().is_empty());
}

#[tokio::test]
async fn ask_policy_notifies_once_then_drops() {
    let h = Harness::start(AccessPolicy::Ask, MockModel::replying("unused"), |_| {}).await;

    h.channel.inject_text("42", "+newcomer", "hi");
    assert!(
        h.wait_for(Duration::from_secs(3), |h| !h.channel.sent().is_empty())
            .await
    );
    let first = h.channel.sent();
    assert_eq!(first.len(), 1);
    assert!(first[0].message.content.contains("pending"));

    // A second message is silently dropped.
    h.channel.inject_text("42", "+newcomer", "still there?");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.channel.sent().len(), 1);
    assert_eq!(h.model.call_count(), 0);
}

#[tokio::test]
async fn burst_while_busy_coalesces_into_one_combined_turn() {
    let model = MockModel::new();
    model.push_turn(MockTurn::Text("busy reply".into()));
    model.push_turn(MockTurn::Text("combined reply".into()));
    model.set_response_delay(Duration::from_millis(800));
    let model = Arc::new(model);

    let h = Harness::start(AccessPolicy::Allow, model, |_| {}).await;

    // Occupy the session.
    h.channel.inject_text("1", "+u", "warmup");
    assert!(
        h.wait_for(Duration::from_secs(2), |h| {
            h.assistant.queue().is_processing("mock:1")
        })
        .await
    );

    // Burst lands while the first run is still executing.
    h.channel.inject_text("1", "+u", "first");
    tokio::time::sleep(Duration::from_millis(40)).await;
    h.channel.inject_text("1", "+u", "second");
    tokio::time::sleep(Duration::from_millis(40)).await;
    h.channel.inject_text("1", "+u", "third");

    // Eventually exactly one combined agent turn runs.
    assert!(
        h.wait_for(Duration::from_secs(5), |h| {
            h.model.requests().iter().any(|r| {
                r.messages
                    .last()
                    .map(|m| m.content.starts_with("[Multiple messages received while busy]"))
                    .unwrap_or(false)
            })
        })
        .await
    );

    let combined = h
        .model
        .requests()
        .into_iter()
        .filter(|r| {
            r.messages
                .last()
                .map(|m| m.content.contains("[Multiple messages received while busy]"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();
    assert_eq!(combined.len(), 1, "burst must run as exactly one turn");
    assert_eq!(
        combined[0].messages.last().unwrap().content,
        "[Multiple messages received while busy]\n1. first\n2. second\n3. third"
    );
}

#[tokio::test]
async fn duplicate_content_while_busy_is_deduplicated() {
    let model = MockModel::new();
    model.set_response_delay(Duration::from_millis(500));
    let model = Arc::new(model);
    let h = Harness::start(AccessPolicy::Allow, model, |cfg| {
        cfg.queue.debounce_ms = 2000; // keep messages pending for inspection
    })
    .await;

    h.channel.inject_text("1", "+u", "warmup");
    assert!(
        h.wait_for(Duration::from_secs(2), |h| {
            h.assistant.queue().is_processing("mock:1")
        })
        .await
    );

    h.channel.inject_text("1", "+u", "ping");
    h.channel.inject_text("1", "+u", "ping");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.assistant.queue().pending_len("mock:1"), 1);
}

#[tokio::test]
async fn at_most_one_run_per_session() {
    let model = MockModel::new();
    model.set_response_delay(Duration::from_millis(400));
    let model = Arc::new(model);
    let h = Harness::start(AccessPolicy::Allow, model, |_| {}).await;

    h.channel.inject_text("1", "+u", "first");
    assert!(
        h.wait_for(Duration::from_secs(2), |h| {
            h.assistant.queue().is_processing("mock:1")
        })
        .await
    );
    // A second message lands while the first is running: it queues rather
    // than starting a second run.
    h.channel.inject_text("1", "+u", "second");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.model.call_count(), 1);
    assert_eq!(h.assistant.queue().pending_len("mock:1"), 1);
}

#[tokio::test]
async fn history_preserves_arrival_order() {
    let h = Harness::start(AccessPolicy::Allow, Arc::new(MockModel::new()), |_| {}).await;

    for content in ["m1", "m2", "m3"] {
        let sent_before = h.channel.sent().len();
        h.channel.inject_text("7", "+u", content);
        assert!(
            h.wait_for(Duration::from_secs(3), |h| h.channel.sent().len() > sent_before)
                .await
        );
    }

    let session = h
        .assistant
        .workspaces()
        .resolve("mock", "7", "+u", false)
        .session;
    let users: Vec<String> = session
        .recent_history(10)
        .iter()
        .map(|e| e.user.clone())
        .collect();
    assert_eq!(users, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn destructive_bash_is_blocked_and_surfaced_to_the_model() {
    let model = MockModel::with_turns(vec![
        MockTurn::Tools(vec![ToolCall {
            id: "call-1".into(),
            name: "bash".into(),
            arguments: r#"{"command":"rm -rf /"}"#.into(),
        }]),
        MockTurn::Text("I won't do that.".into()),
    ]);
    let h = Harness::start(AccessPolicy::Allow, model, |cfg| {
        // Let ordinary users reach bash so the destructive rule itself is hit.
        cfg.security
            .tool_guard
            .tool_permissions
            .insert("bash".into(), "user".into());
    })
    .await;

    h.channel.inject_text("1", "+u", "please wipe the disk");
    assert!(
        h.wait_for(Duration::from_secs(3), |h| {
            h.channel
                .sent()
                .iter()
                .any(|s| s.message.content == "I won't do that.")
        })
        .await
    );

    // The model saw the block as a tool result.
    let second = &h.model.requests()[1];
    let tool_msg = second
        .messages
        .iter()
        .find(|m| m.role == valet_core::Role::Tool)
        .unwrap();
    assert!(tool_msg.content.contains("blocked by default safety rule"));

    // And the audit log recorded the rejection.
    assert!(h.audit_log().contains("allowed=false"));
    assert!(h.audit_log().contains("BLOCKED"));
}

#[tokio::test]
async fn stop_command_cancels_the_active_run() {
    let model = MockModel::with_turns(vec![MockTurn::Hang]);
    let h = Harness::start(AccessPolicy::Allow, model, |_| {}).await;

    h.channel.inject_text("1", "+u", "think hard about something");
    assert!(
        h.wait_for(Duration::from_secs(2), |h| {
            h.assistant.has_active_run("default", "mock:1")
        })
        .await
    );

    h.channel.inject_text("1", "+u", "/stop");

    // The canceled run resolves to the stop reply within a second.
    assert!(
        h.wait_for(Duration::from_secs(1), |h| {
            h.channel
                .sent()
                .iter()
                .any(|s| s.message.content == AGENT_STOPPED_REPLY)
        })
        .await
    );
    assert!(
        h.wait_for(Duration::from_secs(1), |h| {
            !h.assistant.queue().is_processing("mock:1")
                && !h.assistant.has_active_run("default", "mock:1")
        })
        .await
    );
}

#[tokio::test]
async fn group_messages_require_the_trigger() {
    let h = Harness::start(AccessPolicy::Allow, MockModel::replying("triggered"), |cfg| {
        cfg.agent.trigger = "@valet".into();
    })
    .await;

    let mut msg = valet_core::IncomingMessage {
        channel: "mock".into(),
        chat_id: "g-1".into(),
        sender: "+u".into(),
        id: "g1".into(),
        content: "just chatting".into(),
        media: None,
        is_group: true,
        timestamp: chrono::Utc::now(),
    };
    h.channel.inject(msg.clone());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.channel.sent().is_empty());
    assert_eq!(h.model.call_count(), 0);

    msg.id = "g2".into();
    msg.content = "@Valet what's up".into();
    h.channel.inject(msg);
    assert!(
        h.wait_for(Duration::from_secs(3), |h| !h.channel.sent().is_empty())
            .await
    );
    assert_eq!(h.channel.sent()[0].message.content, "triggered");
}

#[tokio::test]
async fn commands_execute_without_reaching_the_agent() {
    let h = Harness::start(AccessPolicy::Allow, MockModel::replying("unused"), |_| {}).await;

    h.channel.inject_text("1", "+owner", "/status");
    assert!(
        h.wait_for(Duration::from_secs(3), |h| !h.channel.sent().is_empty())
            .await
    );
    let sent = h.channel.sent();
    assert!(sent[0].message.content.contains("Workspace:"));
    assert_eq!(h.model.call_count(), 0);
}

#[tokio::test]
async fn command_level_enforcement() {
    let h = Harness::start(AccessPolicy::Allow, MockModel::replying("unused"), |_| {}).await;

    // A plain user cannot promote admins.
    h.channel.inject_text("1", "+u", "/admin +u");
    assert!(
        h.wait_for(Duration::from_secs(3), |h| !h.channel.sent().is_empty())
            .await
    );
    assert!(
        h.channel.sent()[0]
            .message
            .content
            .contains("requires owner access")
    );

    // The owner can.
    h.channel.inject_text("1", "+owner", "/admin +u");
    assert!(
        h.wait_for(Duration::from_secs(3), |h| h.channel.sent().len() >= 2)
            .await
    );
    assert!(h.channel.sent()[1].message.content.contains("Promoted"));
}

#[tokio::test]
async fn image_media_is_enriched_before_the_agent() {
    let model = MockModel::replying("noted");
    let h = Harness::start(AccessPolicy::Allow, model, |_| {}).await;
    h.channel.set_media(vec![0xFF, 0xD8, 0xFF], "image/jpeg");

    h.channel.inject(valet_core::IncomingMessage {
        channel: "mock".into(),
        chat_id: "5".into(),
        sender: "+u".into(),
        id: "img-1".into(),
        content: "what is this?".into(),
        media: Some(valet_core::MediaRef {
            kind: valet_core::MediaKind::Image,
            filename: Some("photo.jpg".into()),
            size: 3,
        }),
        is_group: false,
        timestamp: chrono::Utc::now(),
    });

    assert!(
        h.wait_for(Duration::from_secs(3), |h| !h.channel.sent().is_empty())
            .await
    );

    let session = h
        .assistant
        .workspaces()
        .resolve("mock", "5", "+u", false)
        .session;
    let history = session.recent_history(1);
    assert_eq!(
        history[0].user,
        "[Image: a mock image description]\n\nwhat is this?"
    );
}

#[tokio::test]
async fn compact_command_reports_lengths() {
    let h = Harness::start(AccessPolicy::Allow, Arc::new(MockModel::new()), |cfg| {
        cfg.memory.max_messages = 40;
    })
    .await;

    // Seed history directly.
    let session = h
        .assistant
        .workspaces()
        .resolve("mock", "9", "+u", false)
        .session;
    for i in 0..30 {
        session.add_message(&format!("q{i}"), &format!("a{i}"));
    }

    h.channel.inject_text("9", "+u", "/compact");
    assert!(
        h.wait_for(Duration::from_secs(5), |h| !h.channel.sent().is_empty())
            .await
    );
    let reply = &h.channel.sent()[0].message.content;
    assert!(reply.contains("Compacted history: 30 ->"), "got: {reply}");
    assert!(session.history_len() < 30);
    // The synthetic summary heads the remaining history.
    assert_eq!(session.recent_history(100)[0].user, "[compaction summary]");
}
