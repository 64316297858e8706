//! Bridge scenario tests
//!
//! Drive `BridgeSession` through full conversations without sockets and
//! check what would be sent upstream and to the client.

use std::time::{Duration, Instant};

use serde_json::{Value, json};

use agent_bridge::core::agent::{AgentIncomingMessage, AgentOutgoingMessage};
use agent_bridge::core::bridge::{
    AudioCommitConfig, BridgeAction, BridgeConfig, BridgeSession, PendingFunctionCall,
    ResponseProducer, SettingsPolicy,
};
use agent_bridge::core::realtime::openai::{ClientEvent, ServerEvent};

/// 20ms of 24kHz PCM16 at a constant amplitude.
fn pcm_frame(amplitude: i16) -> Vec<u8> {
    std::iter::repeat_n(amplitude.to_le_bytes(), 480)
        .flatten()
        .collect()
}

fn test_config(policy: SettingsPolicy, client_side_functions: bool) -> BridgeConfig {
    BridgeConfig {
        settings_policy: policy,
        audio: AudioCommitConfig {
            max_buffer_ms: 2000,
            silence_ms: 100,
            silence_threshold: 500.0,
            min_commit_ms: 100,
        },
        client_side_functions,
        ..BridgeConfig::default()
    }
}

fn settings(agent: Value) -> AgentIncomingMessage {
    serde_json::from_value(json!({"type": "Settings", "agent": agent})).expect("Settings")
}

fn upstream_event(value: Value) -> ServerEvent {
    serde_json::from_value(value).expect("server event")
}

/// Records everything a session asks the relay to do.
struct Harness {
    session: BridgeSession,
    upstream: Vec<ClientEvent>,
    client: Vec<AgentOutgoingMessage>,
    invoked: Vec<PendingFunctionCall>,
    audio_frames: usize,
    /// response.create sent but not yet finished
    in_flight: usize,
    max_in_flight: usize,
    next_response: u32,
    clock: Instant,
}

impl Harness {
    fn new(config: BridgeConfig) -> Self {
        Self {
            session: BridgeSession::new(config),
            upstream: Vec::new(),
            client: Vec::new(),
            invoked: Vec::new(),
            audio_frames: 0,
            in_flight: 0,
            max_in_flight: 0,
            next_response: 0,
            clock: Instant::now(),
        }
    }

    fn apply(&mut self, actions: Vec<BridgeAction>) {
        for action in actions {
            match action {
                BridgeAction::Upstream(event) => {
                    if event.starts_response() {
                        self.in_flight += 1;
                        self.max_in_flight = self.max_in_flight.max(self.in_flight);
                    }
                    self.upstream.push(event);
                }
                BridgeAction::Client(message) => self.client.push(message),
                BridgeAction::ClientAudio(_) => self.audio_frames += 1,
                BridgeAction::InvokeHandler(call) => self.invoked.push(call),
            }
        }
    }

    fn client_message(&mut self, message: AgentIncomingMessage) {
        let actions = self.session.handle_client_message(message);
        self.apply(actions);
    }

    fn server(&mut self, value: Value) {
        let actions = self.session.handle_upstream_event(upstream_event(value));
        self.apply(actions);
    }

    fn frame(&mut self, amplitude: i16) {
        self.clock += Duration::from_millis(20);
        let actions = self
            .session
            .handle_client_audio(&pcm_frame(amplitude), self.clock);
        self.apply(actions);
    }

    /// 200ms of speech followed by 100ms of silence.
    fn speak_utterance(&mut self) {
        for _ in 0..10 {
            self.frame(4000);
        }
        for _ in 0..5 {
            self.frame(0);
        }
    }

    /// Upstream acknowledges the latest response.create; returns its id.
    fn response_created(&mut self) -> String {
        self.next_response += 1;
        let id = format!("resp_{}", self.next_response);
        self.server(json!({"type": "response.created", "response": {"id": id}}));
        id
    }

    /// Upstream finishes `id` with audio done then response.done.
    fn finish_audio_response(&mut self, id: &str) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.server(json!({"type": "response.output_audio.done", "response_id": id, "item_id": "item_x"}));
        self.server(json!({"type": "response.done", "response": {"id": id, "status": "completed"}}));
    }

    fn count(&self, event_type: &str) -> usize {
        self.upstream
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    fn settings_applied(&self) -> usize {
        self.client
            .iter()
            .filter(|m| matches!(m, AgentOutgoingMessage::SettingsApplied))
            .count()
    }

    fn client_errors(&self) -> Vec<&str> {
        self.client
            .iter()
            .filter_map(|m| match m {
                AgentOutgoingMessage::Error { code, .. } => Some(code.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Inject user text and let the upstream acknowledge the item.
    fn inject_text(&mut self, content: &str) {
        self.client_message(AgentIncomingMessage::InjectUserMessage {
            content: content.to_string(),
        });
        let item_id = self.last_injected_item_id();
        self.server(json!({"type": "conversation.item.added", "item": {"id": item_id, "type": "message"}}));
    }

    fn last_response_event_id(&self) -> String {
        self.upstream
            .iter()
            .rev()
            .find_map(|event| match event {
                ClientEvent::ResponseCreate(request) => Some(request.event_id().to_string()),
                _ => None,
            })
            .expect("response.create")
    }

    fn conflict(&mut self, event_id: &str) {
        self.server(json!({
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "code": "conversation_already_has_active_response",
                "message": "Conversation already has an active response",
                "event_id": event_id
            }
        }));
    }

    fn last_injected_item_id(&self) -> String {
        self.upstream
            .iter()
            .rev()
            .find_map(|event| match event {
                ClientEvent::ConversationItemCreate { item } if item.role.as_deref() == Some("user") => {
                    item.id.clone()
                }
                _ => None,
            })
            .expect("injected item")
    }
}

#[test]
fn second_settings_during_active_response_is_only_acknowledged() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    h.client_message(settings(json!({"think": {"prompt": "You are helpful."}})));
    assert_eq!(h.count("session.update"), 1);
    assert_eq!(h.settings_applied(), 1);

    h.speak_utterance();
    assert_eq!(h.count("input_audio_buffer.commit"), 1);
    assert_eq!(h.count("response.create"), 1);
    let id = h.response_created();
    assert_eq!(h.session.tracker().active_producer(), Some(ResponseProducer::Audio));

    h.client_message(settings(json!({"think": {"prompt": "Changed my mind."}})));
    assert_eq!(h.settings_applied(), 2);
    assert_eq!(h.count("session.update"), 1);
    assert_eq!(h.count("response.create"), 1);

    h.finish_audio_response(&id);
    assert!(h.session.tracker().is_idle());
    assert_eq!(h.count("session.update"), 1);
    assert!(h.client_errors().is_empty());
}

#[test]
fn first_settings_during_active_response_is_suppressed() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    h.client_message(AgentIncomingMessage::InjectUserMessage {
        content: "hello".to_string(),
    });
    let item_id = h.last_injected_item_id();
    h.server(json!({"type": "conversation.item.added", "item": {"id": item_id, "type": "message"}}));
    let id = h.response_created();

    h.client_message(settings(json!({"think": {"prompt": "late"}})));
    assert_eq!(h.settings_applied(), 1);
    assert_eq!(h.count("session.update"), 0);
    assert!(h.session.settings().has_forwarded_session_update());

    h.finish_audio_response(&id);
    h.client_message(settings(json!({"think": {"prompt": "again"}})));
    assert_eq!(h.count("session.update"), 0);
    assert_eq!(h.settings_applied(), 2);
}

#[test]
fn deferred_settings_are_sent_at_next_idle() {
    let mut h = Harness::new(test_config(SettingsPolicy::DeferUntilIdle, true));

    h.speak_utterance();
    let first = h.response_created();

    h.client_message(settings(json!({"think": {"prompt": "deferred"}, "greeting": "Hi!"})));
    assert_eq!(h.settings_applied(), 1);
    assert_eq!(h.count("session.update"), 0);

    // A second utterance waits behind the active response
    h.speak_utterance();
    assert_eq!(h.count("response.create"), 1);

    h.finish_audio_response(&first);

    let order: Vec<&str> = h.upstream.iter().map(|e| e.event_type()).collect();
    let update_at = order.iter().position(|t| *t == "session.update").expect("session.update");
    let second_create = order
        .iter()
        .rposition(|t| *t == "response.create")
        .expect("response.create");
    assert!(update_at < second_create);
    assert_eq!(h.count("session.update"), 1);
    assert_eq!(h.count("response.create"), 2);
}

#[test]
fn settings_forwarded_at_most_once_over_many_messages() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));
    for i in 0..5 {
        h.client_message(settings(json!({"think": {"prompt": format!("prompt {i}")}})));
    }
    assert_eq!(h.count("session.update"), 1);
    assert_eq!(h.settings_applied(), 5);
}

#[test]
fn malformed_settings_do_not_consume_the_first_forward() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    let malformed: AgentIncomingMessage =
        serde_json::from_value(json!({"type": "Settings", "agent": "not-an-object"})).unwrap();
    h.client_message(malformed);
    assert_eq!(h.client_errors(), vec!["INVALID_SETTINGS"]);
    assert_eq!(h.count("session.update"), 0);

    h.client_message(settings(json!({"think": {"prompt": "ok"}})));
    assert_eq!(h.count("session.update"), 1);
}

#[test]
fn back_to_back_audio_commits_are_serialized() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    h.speak_utterance();
    assert_eq!(h.count("response.create"), 1);
    let first = h.response_created();

    h.speak_utterance();
    assert_eq!(h.count("response.create"), 1);
    assert_eq!(h.count("input_audio_buffer.commit"), 1);
    assert_eq!(h.session.deferred_len(), 1);

    h.finish_audio_response(&first);
    assert_eq!(h.count("input_audio_buffer.commit"), 2);
    assert_eq!(h.count("response.create"), 2);
    assert_eq!(h.session.tracker().active_producer(), Some(ResponseProducer::Audio));
    assert_eq!(h.max_in_flight, 1);
}

#[test]
fn function_call_forwarded_once_then_gated() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, false));

    h.client_message(AgentIncomingMessage::InjectUserMessage {
        content: "What time is it?".to_string(),
    });
    let item_id = h.last_injected_item_id();
    h.server(json!({"type": "conversation.item.added", "item": {"id": item_id, "type": "message"}}));
    let first = h.response_created();

    h.server(json!({
        "type": "response.output_item.done",
        "response_id": first,
        "item": {
            "id": "item_fc",
            "type": "function_call",
            "call_id": "call_1",
            "name": "get_time",
            "arguments": "{}"
        }
    }));
    assert_eq!(h.invoked.len(), 1);
    assert_eq!(h.invoked[0].call_id, "call_1");
    assert!(h.client.iter().any(|m| matches!(
        m,
        AgentOutgoingMessage::FunctionCallRequest { functions } if functions[0].id == "call_1" && !functions[0].client_side
    )));

    // The function-call turn ends with response.done only
    h.in_flight -= 1;
    h.server(json!({"type": "response.done", "response": {"id": first}}));
    assert!(h.session.tracker().is_idle());

    let actions = h
        .session
        .handle_handler_result("call_1", Ok("{\"time\":\"10:00\"}".to_string()));
    h.apply(actions);

    let output = h
        .upstream
        .iter()
        .find_map(|event| match event {
            ClientEvent::ConversationItemCreate { item } if item.item_type == "function_call_output" => {
                Some((item.call_id.clone(), item.output.clone()))
            }
            _ => None,
        })
        .expect("function_call_output");
    assert_eq!(output.0.as_deref(), Some("call_1"));
    assert_eq!(output.1.as_deref(), Some("{\"time\":\"10:00\"}"));
    assert_eq!(h.count("response.create"), 2);
    assert_eq!(
        h.session.tracker().active_producer(),
        Some(ResponseProducer::FunctionCall)
    );

    // A late duplicate resolution is a silent no-op
    let actions = h.session.handle_function_result("call_1", "{}".to_string());
    assert!(actions.is_empty());

    let second = h.response_created();
    h.finish_audio_response(&second);
    assert!(h.session.tracker().is_idle());
    assert_eq!(h.max_in_flight, 1);
}

#[test]
fn function_result_before_response_done_is_deferred() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    h.speak_utterance();
    let first = h.response_created();
    h.server(json!({
        "type": "response.output_item.done",
        "response_id": first,
        "item": {"type": "function_call", "call_id": "call_7", "name": "lookup", "arguments": "{\"q\":1}"}
    }));
    assert!(h.invoked.is_empty());

    h.client_message(
        serde_json::from_value(json!({
            "type": "FunctionCallResponse",
            "id": "call_7",
            "name": "lookup",
            "content": "found"
        }))
        .unwrap(),
    );
    assert_eq!(h.count("conversation.item.create"), 1);
    assert_eq!(h.count("response.create"), 1);

    h.finish_audio_response(&first);
    assert_eq!(h.count("response.create"), 2);
    assert_eq!(
        h.session.tracker().active_producer(),
        Some(ResponseProducer::FunctionCall)
    );
}

#[test]
fn client_function_response_twice_yields_one_item_and_one_request() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    h.server(json!({
        "type": "response.output_item.done",
        "item": {"type": "function_call", "call_id": "call_2", "name": "f", "arguments": "{}"}
    }));

    let response = json!({"type": "FunctionCallResponse", "id": "call_2", "name": "f", "content": "42"});
    h.client_message(serde_json::from_value(response.clone()).unwrap());
    h.client_message(serde_json::from_value(response).unwrap());

    assert_eq!(h.count("conversation.item.create"), 1);
    assert_eq!(h.count("response.create"), 1);
    assert!(h.client_errors().is_empty());
}

#[test]
fn unknown_function_call_id_is_rejected_locally() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));
    h.client_message(
        serde_json::from_value(json!({"type": "FunctionCallResponse", "id": "nope", "content": "x"}))
            .unwrap(),
    );
    assert_eq!(h.client_errors(), vec!["UNKNOWN_FUNCTION_CALL"]);
    assert!(h.upstream.is_empty());
}

#[test]
fn either_completion_signal_clears_the_gate_once() {
    for first_signal in ["response.output_text.done", "response.output_audio.done"] {
        let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

        h.speak_utterance();
        let first = h.response_created();
        h.speak_utterance();
        assert_eq!(h.session.deferred_len(), 1);

        h.in_flight -= 1;
        h.server(json!({"type": first_signal, "response_id": first, "item_id": "i", "text": "ok"}));
        assert_eq!(h.count("response.create"), 2, "{first_signal}");

        // Trailing signals of the finished response must not clear the new one
        h.server(json!({"type": "response.output_audio.done", "response_id": first}));
        h.server(json!({"type": "response.done", "response": {"id": first}}));
        assert!(!h.session.tracker().is_idle(), "{first_signal}");
        assert_eq!(h.max_in_flight, 1);
    }
}

#[test]
fn completion_while_idle_is_noop() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));
    h.server(json!({"type": "response.output_text.done", "text": ""}));
    h.server(json!({"type": "response.done", "response": {"id": "resp_orphan"}}));
    assert!(h.session.tracker().is_idle());
    assert!(h.upstream.is_empty());
}

#[test]
fn upstream_conflict_is_reported_without_teardown() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));
    h.speak_utterance();
    let _ = h.response_created();

    h.server(json!({
        "type": "error",
        "error": {
            "type": "invalid_request_error",
            "code": "conversation_already_has_active_response",
            "message": "Conversation already has an active response"
        }
    }));
    assert_eq!(h.client_errors(), vec!["UPSTREAM_CONFLICT"]);
    assert!(!h.session.is_closed());
    assert_eq!(
        h.session.tracker().active_producer(),
        Some(ResponseProducer::Audio)
    );
}

#[test]
fn conflict_after_early_completion_regrants_on_response_done() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    h.inject_text("one");
    let first = h.response_created();
    h.inject_text("two");
    assert_eq!(h.session.deferred_len(), 1);

    // Audio done clears the gate early and the deferred text is granted
    h.in_flight -= 1;
    h.server(json!({"type": "response.output_audio.done", "response_id": first, "item_id": "item_1"}));
    assert_eq!(h.count("response.create"), 2);
    let rejected = h.last_response_event_id();

    // ...but the first response is still running upstream
    h.in_flight -= 1;
    h.conflict(&rejected);
    assert_eq!(h.client_errors(), vec!["UPSTREAM_CONFLICT"]);
    assert_eq!(h.session.deferred_len(), 1);
    assert!(!h.session.tracker().is_idle());

    h.server(json!({"type": "response.done", "response": {"id": first, "status": "completed"}}));
    assert_eq!(h.count("response.create"), 3);
    assert_ne!(h.last_response_event_id(), rejected);
    assert_eq!(h.session.deferred_len(), 0);

    let second = h.response_created();
    h.inject_text("three");
    assert_eq!(h.count("response.create"), 3);
    h.finish_audio_response(&second);
    assert_eq!(h.count("response.create"), 4);
    assert_eq!(h.max_in_flight, 1);
    assert!(!h.session.is_closed());
}

#[test]
fn rejected_audio_response_is_retried_without_recommitting() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    h.speak_utterance();
    let first = h.response_created();
    h.speak_utterance();
    assert_eq!(h.session.deferred_len(), 1);

    h.in_flight -= 1;
    h.server(json!({"type": "response.output_audio.done", "response_id": first, "item_id": "item_1"}));
    assert_eq!(h.count("input_audio_buffer.commit"), 2);
    let rejected = h.last_response_event_id();

    h.in_flight -= 1;
    h.conflict(&rejected);
    h.server(json!({"type": "response.done", "response": {"id": first}}));

    assert_eq!(h.count("response.create"), 3);
    assert_eq!(h.count("input_audio_buffer.commit"), 2);
    assert_eq!(
        h.session.tracker().active_producer(),
        Some(ResponseProducer::Audio)
    );
    assert_eq!(h.max_in_flight, 1);
}

#[test]
fn upstream_initiated_response_holds_the_gate() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));

    // Server-side turn detection starts a response nobody asked for
    h.server(json!({"type": "response.created", "response": {"id": "resp_vad"}}));
    assert!(!h.session.tracker().is_idle());

    h.inject_text("typed while the agent talks");
    assert_eq!(h.count("response.create"), 0);
    assert_eq!(h.session.deferred_len(), 1);

    h.server(json!({"type": "response.done", "response": {"id": "resp_vad"}}));
    assert_eq!(h.count("response.create"), 1);
    assert_eq!(
        h.session.tracker().active_producer(),
        Some(ResponseProducer::Text)
    );
}

#[test]
fn mixed_producers_never_overlap() {
    let mut h = Harness::new(test_config(SettingsPolicy::DeferUntilIdle, true));
    h.client_message(settings(json!({"think": {"prompt": "p"}})));

    h.speak_utterance();
    let r1 = h.response_created();

    h.client_message(AgentIncomingMessage::InjectUserMessage {
        content: "typed".to_string(),
    });
    let item_id = h.last_injected_item_id();
    h.server(json!({"type": "conversation.item.added", "item": {"id": item_id, "type": "message"}}));

    h.server(json!({
        "type": "response.output_item.done",
        "response_id": r1,
        "item": {"type": "function_call", "call_id": "call_9", "name": "f", "arguments": "{}"}
    }));
    h.client_message(
        serde_json::from_value(json!({"type": "FunctionCallResponse", "id": "call_9", "content": "done"}))
            .unwrap(),
    );
    h.speak_utterance();
    assert_eq!(h.count("response.create"), 1);
    assert_eq!(h.session.deferred_len(), 3);

    let mut finished = 0;
    let mut current = r1;
    while finished < 4 {
        h.finish_audio_response(&current);
        finished += 1;
        if h.session.tracker().is_idle() {
            break;
        }
        current = h.response_created();
    }

    assert_eq!(finished, 4);
    assert_eq!(h.count("response.create"), 4);
    assert_eq!(h.max_in_flight, 1);
    assert!(h.session.tracker().is_idle());
}

#[test]
fn close_abandons_pending_work() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, false));

    h.server(json!({
        "type": "response.output_item.done",
        "item": {"type": "function_call", "call_id": "call_3", "name": "slow", "arguments": "{}"}
    }));
    assert_eq!(h.session.pending_function_calls(), 1);

    for _ in 0..5 {
        h.frame(4000);
    }
    assert!(h.session.commit_deadline().is_some());

    h.session.close();
    let sent_before = h.upstream.len();

    let late = h
        .session
        .handle_handler_result("call_3", Ok("too late".to_string()));
    h.apply(late);
    let deadline = h.session.handle_commit_deadline(h.clock + Duration::from_secs(10));
    h.apply(deadline);

    assert_eq!(h.upstream.len(), sent_before);
    assert_eq!(h.session.pending_function_calls(), 0);
    assert!(h.session.commit_deadline().is_none());
}

#[test]
fn deadline_commits_buffered_speech() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));
    // Continuous speech never produces trailing silence
    for _ in 0..10 {
        h.frame(4000);
    }
    let deadline = h.session.commit_deadline().expect("deadline");
    let actions = h.session.handle_commit_deadline(deadline);
    h.apply(actions);

    assert!(h.count("input_audio_buffer.append") >= 1);
    assert_eq!(h.count("input_audio_buffer.commit"), 1);
    assert_eq!(h.count("response.create"), 1);
}

#[test]
fn silence_only_window_is_discarded() {
    let mut h = Harness::new(test_config(SettingsPolicy::AcknowledgeWithoutForwarding, true));
    for _ in 0..20 {
        h.frame(0);
    }
    let deadline = h.session.commit_deadline().expect("deadline");
    let actions = h.session.handle_commit_deadline(deadline);
    h.apply(actions);

    assert_eq!(h.count("input_audio_buffer.commit"), 0);
    assert_eq!(h.count("response.create"), 0);
    assert!(h.session.tracker().is_idle());
}
