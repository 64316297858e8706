//! Response-state tracker.
//!
//! The tracker is the only place that can produce a `response.create` event.
//! It moves `Idle -> Active(producer)` when it grants a request and back to
//! `Idle` on the first completion signal for the active response.
//!
//! A response the upstream runs without a grant (server VAD, or one that
//! outlived an early completion signal and made the upstream reject the next
//! request) holds the gate as `Ungranted` until that response finishes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::error::BridgeError;
use crate::core::realtime::openai::{ClientEvent, ResponseRequest};

/// Completed response ids remembered for stale-signal detection.
const COMPLETED_HISTORY: usize = 16;

/// Which path asked for the active response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseProducer {
    Audio,
    Text,
    FunctionCall,
}

impl std::fmt::Display for ResponseProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Audio => "Audio",
            Self::Text => "Text",
            Self::FunctionCall => "FunctionCall",
        };
        f.write_str(name)
    }
}

/// Upstream events that mark a response as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    OutputTextDone,
    OutputAudioDone,
    ResponseDone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseState {
    Idle,
    Active {
        producer: ResponseProducer,
        since: Instant,
        /// `event_id` of the `response.create` that opened this period
        request_event_id: String,
        /// Bound from `response.created`
        response_id: Option<String>,
    },
    Ungranted {
        producer: ResponseProducer,
        since: Instant,
        /// `None` while waiting for a response whose id the gate already retired
        response_id: Option<String>,
    },
}

#[derive(Debug)]
pub struct ResponseTracker {
    state: ResponseState,
    completed: VecDeque<String>,
    /// Producer of the most recently finished period
    last_producer: Option<ResponseProducer>,
    granted_total: u64,
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseTracker {
    pub fn new() -> Self {
        Self {
            state: ResponseState::Idle,
            completed: VecDeque::with_capacity(COMPLETED_HISTORY),
            last_producer: None,
            granted_total: 0,
        }
    }

    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ResponseState::Idle)
    }

    pub fn active_producer(&self) -> Option<ResponseProducer> {
        match &self.state {
            ResponseState::Idle => None,
            ResponseState::Active { producer, .. } | ResponseState::Ungranted { producer, .. } => {
                Some(*producer)
            }
        }
    }

    /// How long the current response has been active.
    pub fn active_for(&self) -> Option<Duration> {
        match &self.state {
            ResponseState::Idle => None,
            ResponseState::Active { since, .. } | ResponseState::Ungranted { since, .. } => {
                Some(since.elapsed())
            }
        }
    }

    /// Number of responses granted over the connection's lifetime.
    pub fn granted_total(&self) -> u64 {
        self.granted_total
    }

    /// Grant a response to `producer`, returning the `response.create` event to send.
    pub fn request_response(
        &mut self,
        producer: ResponseProducer,
    ) -> Result<ClientEvent, BridgeError> {
        if let ResponseState::Active {
            producer: holder, ..
        }
        | ResponseState::Ungranted {
            producer: holder, ..
        } = &self.state
        {
            tracing::debug!(requested_by = %producer, held_by = %holder, "Response request refused");
            return Err(BridgeError::ResponseInFlight(*holder));
        }

        let event_id = format!("evt_{}", Uuid::new_v4().simple());
        self.state = ResponseState::Active {
            producer,
            since: Instant::now(),
            request_event_id: event_id.clone(),
            response_id: None,
        };
        self.granted_total += 1;
        tracing::info!(producer = %producer, event_id = %event_id, "Response state Idle -> Active");

        Ok(ClientEvent::ResponseCreate(ResponseRequest::granted(event_id)))
    }

    /// Bind the active period to the id announced by `response.created`.
    ///
    /// A response created while idle holds the gate until it finishes.
    pub fn bind_response(&mut self, id: &str) {
        if self.is_idle() {
            if self.completed.iter().any(|done| done == id) {
                tracing::debug!(response_id = %id, "Late response.created for finished response");
                return;
            }
            // Upstream-initiated responses come from server-side turn detection
            tracing::warn!(response_id = %id, "Upstream created a response the gate did not grant, holding the gate");
            self.state = ResponseState::Ungranted {
                producer: ResponseProducer::Audio,
                since: Instant::now(),
                response_id: Some(id.to_string()),
            };
            return;
        }

        match &mut self.state {
            ResponseState::Active { response_id, .. }
            | ResponseState::Ungranted { response_id, .. }
                if response_id.is_none() =>
            {
                *response_id = Some(id.to_string());
            }
            ResponseState::Active {
                response_id: Some(bound),
                ..
            }
            | ResponseState::Ungranted {
                response_id: Some(bound),
                ..
            } => {
                if bound != id {
                    tracing::warn!(bound = %bound, created = %id, "Second response created while active");
                }
            }
            _ => {}
        }
    }

    /// Apply a completion signal. Returns `true` when this cleared the gate.
    pub fn complete(&mut self, signal: CompletionSignal, response_id: Option<&str>) -> bool {
        // The running response's id was already retired by an early signal,
        // so only its response.done can end the wait.
        if matches!(
            self.state,
            ResponseState::Ungranted {
                response_id: None,
                ..
            }
        ) {
            if signal != CompletionSignal::ResponseDone {
                tracing::debug!(?signal, "Waiting for response.done of the running response");
                return false;
            }
            self.finish(signal, response_id);
            return true;
        }

        if let Some(id) = response_id
            && self.completed.iter().any(|done| done == id)
        {
            tracing::debug!(?signal, response_id = %id, "Ignoring completion for finished response");
            return false;
        }

        if self.is_idle() {
            tracing::debug!(?signal, "Completion signal while idle");
            return false;
        }
        self.finish(signal, response_id);
        true
    }

    /// Upstream refused a `response.create` because another response is still
    /// running. Matches the pending unbound request by `event_id` (any
    /// unbound request when the error carries none) and moves the gate to
    /// `Ungranted` until the running response finishes. Returns `true` when
    /// the request was rejected and must be retried.
    pub fn reject(&mut self, event_id: Option<&str>) -> bool {
        let ResponseState::Active {
            producer,
            request_event_id,
            response_id: None,
            ..
        } = &self.state
        else {
            return false;
        };
        if event_id.is_some_and(|id| id != request_event_id.as_str()) {
            return false;
        }

        let holder = self.last_producer.unwrap_or(*producer);
        tracing::warn!(
            rejected = %producer,
            event_id = %request_event_id,
            held_by = %holder,
            "Response request rejected by a running response, waiting for response.done"
        );
        self.state = ResponseState::Ungranted {
            producer: holder,
            since: Instant::now(),
            response_id: None,
        };
        true
    }

    /// Release the gate when the upstream rejected the `response.create` with
    /// `event_id` and no response was started. Returns `true` when released.
    pub fn abort(&mut self, event_id: &str) -> bool {
        match &self.state {
            ResponseState::Active {
                request_event_id,
                response_id: None,
                producer,
                ..
            } if request_event_id == event_id => {
                tracing::warn!(producer = %producer, event_id = %event_id, "Response request rejected, releasing gate");
                self.state = ResponseState::Idle;
                true
            }
            _ => false,
        }
    }

    /// One-line rendering for error logs.
    pub fn describe(&self) -> String {
        match &self.state {
            ResponseState::Idle => "Idle".to_string(),
            ResponseState::Ungranted {
                producer,
                since,
                response_id,
            } => format!(
                "Ungranted({producer}) for {}ms, response_id={}",
                since.elapsed().as_millis(),
                response_id.as_deref().unwrap_or("running")
            ),
            ResponseState::Active {
                producer,
                since,
                request_event_id,
                response_id,
            } => format!(
                "Active({producer}) for {}ms, event_id={request_event_id}, response_id={}",
                since.elapsed().as_millis(),
                response_id.as_deref().unwrap_or("unbound")
            ),
        }
    }

    fn finish(&mut self, signal: CompletionSignal, response_id: Option<&str>) {
        let (producer, since, bound) = match &self.state {
            ResponseState::Idle => return,
            ResponseState::Active {
                producer,
                since,
                response_id,
                ..
            }
            | ResponseState::Ungranted {
                producer,
                since,
                response_id,
            } => (*producer, *since, response_id.clone()),
        };

        let finished = response_id.map(str::to_string).or(bound);
        tracing::info!(
            ?signal,
            producer = %producer,
            elapsed_ms = since.elapsed().as_millis() as u64,
            response_id = finished.as_deref().unwrap_or("-"),
            "Response state Active -> Idle"
        );

        if let Some(id) = finished
            && !self.completed.contains(&id)
        {
            self.remember_completed(id);
        }
        self.last_producer = Some(producer);
        self.state = ResponseState::Idle;
    }

    fn remember_completed(&mut self, id: String) {
        if self.completed.len() == COMPLETED_HISTORY {
            self.completed.pop_front();
        }
        self.completed.push_back(id);
    }
}

// =============================================================================
// Deferred requests
// =============================================================================

/// A response request that arrived while another response was active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredResponse {
    /// Commit buffered audio, then request a response
    AudioCommit,
    /// Request a response for audio that was already committed
    CommittedAudio,
    /// Request a response for an acknowledged user text item
    Text { item_id: String },
    /// Request a response for a forwarded function result
    FunctionCall { call_id: String },
}

impl DeferredResponse {
    pub fn producer(&self) -> ResponseProducer {
        match self {
            Self::AudioCommit | Self::CommittedAudio => ResponseProducer::Audio,
            Self::Text { .. } => ResponseProducer::Text,
            Self::FunctionCall { .. } => ResponseProducer::FunctionCall,
        }
    }

    /// The request to issue again after the upstream rejected this one.
    pub fn into_retry(self) -> Self {
        match self {
            Self::AudioCommit => Self::CommittedAudio,
            other => other,
        }
    }
}

/// FIFO of deferred requests; audio commits coalesce into one entry.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: VecDeque<DeferredResponse>,
}

impl DeferredQueue {
    pub fn push(&mut self, request: DeferredResponse) {
        if request == DeferredResponse::AudioCommit && self.entries.contains(&request) {
            tracing::debug!("Audio commit already deferred");
            return;
        }
        tracing::debug!(?request, queued = self.entries.len() + 1, "Deferring response request");
        self.entries.push_back(request);
    }

    /// Queue a rejected request ahead of everything deferred after it.
    pub fn push_front(&mut self, request: DeferredResponse) {
        tracing::debug!(?request, queued = self.entries.len() + 1, "Requeueing rejected response request");
        self.entries.push_front(request);
    }

    pub fn pop(&mut self) -> Option<DeferredResponse> {
        self.entries.pop_front()
    }

    pub fn contains(&self, request: &DeferredResponse) -> bool {
        self.entries.contains(request)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
