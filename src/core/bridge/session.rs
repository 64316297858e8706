//! Per-connection bridge core.
//!
//! `BridgeSession` is a synchronous state machine. The relay feeds it client
//! messages, client audio, upstream events, handler results and deadline
//! ticks; each call returns the actions to perform, in order. All
//! response-starting events pass through the [`ResponseTracker`].

use std::collections::HashSet;
use std::time::Instant;

use bytes::Bytes;
use uuid::Uuid;

use super::audio_commit::{APPEND_CHUNK_BYTES, AudioCommitConfig, AudioCommitScheduler, CommitDecision};
use super::error::BridgeError;
use super::function_call::{
    FunctionCallRegistry, PendingFunctionCall, output_from_value, synthetic_error_output,
};
use super::response_state::{CompletionSignal, DeferredQueue, DeferredResponse, ResponseTracker};
use super::settings::{SettingsOutcome, SettingsPolicy, SettingsTranslator, TranslatedSettings};
use crate::core::agent::{AgentIncomingMessage, AgentOutgoingMessage, FunctionCallInfo};
use crate::core::realtime::openai::{
    ClientEvent, ConversationItem, OpenAIRealtimeVoice, ServerEvent,
};

/// Bridge behavior for one connection.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub settings_policy: SettingsPolicy,
    pub default_voice: OpenAIRealtimeVoice,
    pub audio: AudioCommitConfig,
    /// Resolve function calls through the client instead of an HTTP handler
    pub client_side_functions: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settings_policy: SettingsPolicy::default(),
            default_voice: OpenAIRealtimeVoice::default(),
            audio: AudioCommitConfig::default(),
            client_side_functions: true,
        }
    }
}

/// Something the relay must do on behalf of the session.
#[derive(Debug)]
pub enum BridgeAction {
    /// Send an event upstream
    Upstream(ClientEvent),
    /// Send a JSON message to the client
    Client(AgentOutgoingMessage),
    /// Send assistant audio to the client
    ClientAudio(Bytes),
    /// Resolve a function call through the external handler
    InvokeHandler(PendingFunctionCall),
}

/// Bridge state for one client connection.
#[derive(Debug)]
pub struct BridgeSession {
    config: BridgeConfig,
    tracker: ResponseTracker,
    settings: SettingsTranslator,
    audio: AudioCommitScheduler,
    functions: FunctionCallRegistry,
    deferred: DeferredQueue,
    /// Request behind the most recent grant
    granted: Option<DeferredResponse>,
    /// Injected user text items waiting for the upstream acknowledgment
    pending_text: HashSet<String>,
    closed: bool,
}

impl BridgeSession {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            tracker: ResponseTracker::new(),
            settings: SettingsTranslator::new(config.settings_policy, config.default_voice),
            audio: AudioCommitScheduler::new(config.audio),
            functions: FunctionCallRegistry::new(),
            deferred: DeferredQueue::default(),
            granted: None,
            pending_text: HashSet::new(),
            closed: false,
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ResponseTracker {
        &self.tracker
    }

    pub fn settings(&self) -> &SettingsTranslator {
        &self.settings
    }

    pub fn audio(&self) -> &AudioCommitScheduler {
        &self.audio
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn pending_function_calls(&self) -> usize {
        self.functions.pending_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Deadline at which [`handle_commit_deadline`](Self::handle_commit_deadline) must run.
    pub fn commit_deadline(&self) -> Option<Instant> {
        if self.closed {
            return None;
        }
        self.audio.deadline()
    }

    // =========================================================================
    // Client -> bridge
    // =========================================================================

    pub fn handle_client_message(&mut self, message: AgentIncomingMessage) -> Vec<BridgeAction> {
        if self.closed {
            return Vec::new();
        }

        if let Err(e) = message.validate_size() {
            tracing::warn!(message_type = message.message_type(), error = %e, "Rejected client message");
            return vec![client_error(BridgeError::InvalidMessage(e.to_string()))];
        }

        match message {
            AgentIncomingMessage::Settings(raw) => self.on_settings(raw),
            AgentIncomingMessage::InjectUserMessage { content } => self.inject_user_text(content),
            AgentIncomingMessage::FunctionCallResponse {
                id, content, error, ..
            } => {
                let output = match (error, content) {
                    (Some(error), _) => synthetic_error_output(&error),
                    (None, Some(content)) => output_from_value(content),
                    (None, None) => synthetic_error_output("empty function call response"),
                };
                self.handle_function_result(&id, output)
            }
            AgentIncomingMessage::KeepAlive => {
                tracing::trace!("KeepAlive");
                Vec::new()
            }
            AgentIncomingMessage::Unknown => {
                tracing::debug!("Ignoring unsupported client message type");
                Vec::new()
            }
        }
    }

    /// Client sent text that is not valid JSON or not a valid message.
    pub fn handle_malformed_client_message(&mut self, error: &str) -> Vec<BridgeAction> {
        if self.closed {
            return Vec::new();
        }
        tracing::warn!(error = %error, "Malformed client message");
        vec![client_error(BridgeError::InvalidMessage(error.to_string()))]
    }

    pub fn handle_client_audio(&mut self, frame: &[u8], now: Instant) -> Vec<BridgeAction> {
        if self.closed {
            return Vec::new();
        }

        let outcome = self.audio.push(frame, now);
        let mut actions = Vec::new();
        if outcome.speech_started {
            actions.push(BridgeAction::Client(AgentOutgoingMessage::UserStartedSpeaking));
        }
        if outcome.end_of_utterance {
            tracing::debug!(buffered_ms = self.audio.buffered_ms(), "End of utterance detected");
            actions.extend(self.commit_audio());
        }
        actions
    }

    /// Run when the commit deadline elapses.
    pub fn handle_commit_deadline(&mut self, now: Instant) -> Vec<BridgeAction> {
        match self.commit_deadline() {
            Some(deadline) if deadline <= now => {
                tracing::debug!(buffered_ms = self.audio.buffered_ms(), "Audio commit deadline reached");
                self.commit_audio()
            }
            _ => Vec::new(),
        }
    }

    /// Resolve a function call with `output` (from the client or the handler).
    pub fn handle_function_result(&mut self, call_id: &str, output: String) -> Vec<BridgeAction> {
        if self.closed {
            return Vec::new();
        }

        match self.functions.resolve(call_id) {
            Err(e) => {
                tracing::warn!(call_id = %call_id, "Function call response for unknown id");
                vec![client_error(e)]
            }
            Ok(None) => Vec::new(),
            Ok(Some(call)) => {
                let mut actions = vec![BridgeAction::Upstream(ClientEvent::ConversationItemCreate {
                    item: ConversationItem::function_call_output(&call.call_id, output),
                })];
                actions.extend(self.request_or_defer(DeferredResponse::FunctionCall {
                    call_id: call.call_id,
                }));
                actions
            }
        }
    }

    /// Result of an external handler invocation.
    pub fn handle_handler_result(
        &mut self,
        call_id: &str,
        result: Result<String, BridgeError>,
    ) -> Vec<BridgeAction> {
        let output = match result {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "Function call handler failed");
                synthetic_error_output(&e.to_string())
            }
        };
        self.handle_function_result(call_id, output)
    }

    // =========================================================================
    // Upstream -> bridge
    // =========================================================================

    pub fn handle_upstream_event(&mut self, event: ServerEvent) -> Vec<BridgeAction> {
        if self.closed {
            return Vec::new();
        }

        match event {
            ServerEvent::Error { error } => {
                if error.is_active_response_conflict() {
                    tracing::error!(
                        tracker = %self.tracker.describe(),
                        deferred = self.deferred.len(),
                        event_id = error.event_id.as_deref().unwrap_or("-"),
                        upstream_message = %error.message,
                        "Upstream reported a concurrent response"
                    );
                    if self.tracker.reject(error.event_id.as_deref())
                        && let Some(request) = self.granted.take()
                    {
                        self.deferred.push_front(request.into_retry());
                    }
                    return vec![client_error(BridgeError::UpstreamConflict(error.message))];
                }

                tracing::warn!(
                    error_type = %error.error_type,
                    code = error.code.as_deref().unwrap_or("-"),
                    message = %error.message,
                    "Upstream error"
                );
                let mut actions = vec![client_error(BridgeError::Upstream(error.message))];
                if let Some(event_id) = error.event_id.as_deref()
                    && self.tracker.abort(event_id)
                {
                    actions.extend(self.on_idle());
                }
                actions
            }
            ServerEvent::SessionCreated { .. } => {
                tracing::debug!("Upstream session created");
                Vec::new()
            }
            ServerEvent::SessionUpdated { .. } => {
                tracing::debug!("Upstream session updated");
                Vec::new()
            }
            ServerEvent::InputAudioBufferCommitted { item_id } => {
                tracing::debug!(item_id = item_id.as_deref().unwrap_or("-"), "Audio buffer committed");
                Vec::new()
            }
            ServerEvent::ConversationItemAdded { item } | ServerEvent::ConversationItemDone { item } => {
                match item.id {
                    Some(id) if self.pending_text.remove(&id) => {
                        tracing::debug!(item_id = %id, "Injected text acknowledged");
                        self.request_or_defer(DeferredResponse::Text { item_id: id })
                    }
                    _ => Vec::new(),
                }
            }
            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                non_empty_text("user", transcript)
            }
            ServerEvent::ResponseCreated { response } => {
                self.tracker.bind_response(&response.id);
                Vec::new()
            }
            ServerEvent::OutputAudioDelta { delta, .. } => {
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(audio) => vec![BridgeAction::ClientAudio(Bytes::from(audio))],
                    Err(e) => {
                        tracing::warn!(error = %e, "Invalid base64 in audio delta");
                        Vec::new()
                    }
                }
            }
            ServerEvent::OutputAudioTranscriptDone { transcript, .. } => {
                non_empty_text("assistant", transcript)
            }
            ServerEvent::OutputTextDone {
                response_id, text, ..
            } => {
                let mut actions = non_empty_text("assistant", text);
                actions.extend(self.complete(CompletionSignal::OutputTextDone, response_id.as_deref()));
                actions
            }
            ServerEvent::OutputAudioDone { response_id, .. } => {
                let mut actions = vec![BridgeAction::Client(AgentOutgoingMessage::AgentAudioDone)];
                actions.extend(self.complete(CompletionSignal::OutputAudioDone, response_id.as_deref()));
                actions
            }
            ServerEvent::ResponseDone { response } => {
                self.complete(CompletionSignal::ResponseDone, Some(&response.id))
            }
            ServerEvent::OutputItemDone { item, .. } if item.is_function_call() => {
                self.on_function_call_item(item)
            }
            ServerEvent::OutputItemDone { .. } | ServerEvent::Other => Vec::new(),
        }
    }

    /// Release all per-connection state. Later calls produce no actions.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.audio.discard();
        self.functions.clear();
        self.deferred.clear();
        self.granted = None;
        self.pending_text.clear();
        tracing::debug!(
            responses = self.tracker.granted_total(),
            tracker = %self.tracker.describe(),
            "Bridge session closed"
        );
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn on_settings(
        &mut self,
        raw: serde_json::Map<String, serde_json::Value>,
    ) -> Vec<BridgeAction> {
        let outcome = match self.settings.on_settings(raw, self.tracker.is_idle()) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected Settings");
                return vec![client_error(e)];
            }
        };

        let applied = BridgeAction::Client(AgentOutgoingMessage::SettingsApplied);
        match outcome {
            SettingsOutcome::Forward(translated) => {
                self.audio.set_format(translated.input_format);
                let mut actions = vec![BridgeAction::Upstream(translated.session_update()), applied];
                actions.extend(greeting_actions(translated));
                actions
            }
            SettingsOutcome::Suppressed { input_format }
            | SettingsOutcome::Deferred { input_format } => {
                self.audio.set_format(input_format);
                vec![applied]
            }
            SettingsOutcome::Duplicate => vec![applied],
        }
    }

    fn inject_user_text(&mut self, content: String) -> Vec<BridgeAction> {
        let simple = Uuid::new_v4().simple().to_string();
        let item_id = format!("msg_{}", &simple[..24]);
        self.pending_text.insert(item_id.clone());
        tracing::debug!(item_id = %item_id, "Injecting user text");

        vec![
            BridgeAction::Upstream(ClientEvent::ConversationItemCreate {
                item: ConversationItem::user_text(item_id, content.clone()),
            }),
            BridgeAction::Client(AgentOutgoingMessage::conversation_text("user", content)),
        ]
    }

    fn on_function_call_item(&mut self, item: ConversationItem) -> Vec<BridgeAction> {
        let (Some(call_id), Some(name)) = (item.call_id.as_deref(), item.name.as_deref()) else {
            tracing::warn!("Function call item without call_id or name");
            return Vec::new();
        };
        let arguments = item.arguments.as_deref().unwrap_or("{}");

        let Some(call) = self.functions.register(call_id, name, arguments) else {
            return Vec::new();
        };
        tracing::info!(
            call_id = %call.call_id,
            function = %call.name,
            client_side = self.config.client_side_functions,
            "Function call requested"
        );

        let mut actions = vec![BridgeAction::Client(AgentOutgoingMessage::FunctionCallRequest {
            functions: vec![FunctionCallInfo {
                id: call.call_id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                client_side: self.config.client_side_functions,
            }],
        })];
        if !self.config.client_side_functions {
            actions.push(BridgeAction::InvokeHandler(call));
        }
        actions
    }

    fn commit_audio(&mut self) -> Vec<BridgeAction> {
        self.audio.mark_commit_requested();
        self.request_or_defer(DeferredResponse::AudioCommit)
    }

    fn request_or_defer(&mut self, request: DeferredResponse) -> Vec<BridgeAction> {
        if self.tracker.is_idle() {
            self.grant(request)
        } else {
            self.deferred.push(request);
            Vec::new()
        }
    }

    /// Issue `request` while idle.
    fn grant(&mut self, request: DeferredResponse) -> Vec<BridgeAction> {
        let mut actions = Vec::new();
        if request == DeferredResponse::AudioCommit {
            match self.audio.take_commit() {
                CommitDecision::Commit(audio) => {
                    tracing::debug!(bytes = audio.len(), "Committing audio");
                    actions.extend(
                        audio
                            .chunks(APPEND_CHUNK_BYTES)
                            .map(|chunk| BridgeAction::Upstream(ClientEvent::audio_append(chunk))),
                    );
                    actions.push(BridgeAction::Upstream(ClientEvent::InputAudioBufferCommit));
                }
                CommitDecision::Discard(reason) => {
                    tracing::debug!(reason, "Audio window discarded");
                    return actions;
                }
            }
        }

        let producer = request.producer();
        match self.tracker.request_response(producer) {
            Ok(event) => {
                self.granted = Some(request);
                actions.push(BridgeAction::Upstream(event));
            }
            Err(e) => {
                tracing::error!(producer = %producer, error = %e, "Grant attempted while active");
                self.deferred.push(request);
            }
        }
        actions
    }

    fn complete(&mut self, signal: CompletionSignal, response_id: Option<&str>) -> Vec<BridgeAction> {
        if self.tracker.complete(signal, response_id) {
            self.on_idle()
        } else {
            Vec::new()
        }
    }

    /// Idle transition: held settings first, then at most one deferred request.
    fn on_idle(&mut self) -> Vec<BridgeAction> {
        let mut actions = Vec::new();
        if let Some(held) = self.settings.take_held() {
            tracing::info!("Forwarding deferred session.update");
            self.audio.set_format(held.input_format);
            actions.push(BridgeAction::Upstream(held.session_update()));
            actions.extend(greeting_actions(held));
        }

        while self.tracker.is_idle() {
            let Some(next) = self.deferred.pop() else {
                break;
            };
            actions.extend(self.grant(next));
        }
        actions
    }
}

fn client_error(error: BridgeError) -> BridgeAction {
    BridgeAction::Client(error.to_client_message())
}

fn non_empty_text(role: &str, text: String) -> Vec<BridgeAction> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    vec![BridgeAction::Client(AgentOutgoingMessage::conversation_text(role, text))]
}

fn greeting_actions(translated: TranslatedSettings) -> Vec<BridgeAction> {
    let Some(greeting) = translated.greeting else {
        return Vec::new();
    };
    vec![
        BridgeAction::Upstream(ClientEvent::ConversationItemCreate {
            item: ConversationItem::assistant_text(greeting.clone()),
        }),
        BridgeAction::Client(AgentOutgoingMessage::conversation_text("assistant", greeting)),
    ]
}
