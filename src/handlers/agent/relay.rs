//! Connection relay
//!
//! One upstream socket per client socket. The native backend is a plain
//! full-duplex pump; the realtime backend runs a single event loop per
//! connection that feeds a [`BridgeSession`] and executes its actions.
//! Socket writes happen in dedicated writer tasks so a slow peer never
//! blocks reading from the other one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::ServerConfig;
use crate::core::agent::{
    AgentIncomingMessage, AgentMessageRoute, AgentOutgoingMessage, BackendKind,
    NativeAgentConnector,
};
use crate::core::bridge::{
    BridgeAction, BridgeError, BridgeSession, FunctionCallHandler, FunctionCallRequest,
    PendingFunctionCall,
};
use crate::core::realtime::openai::{ClientEvent, OpenAIRealtimeConnector, decode_event, encode_event};
use crate::core::realtime::{RealtimeResult, UpstreamSocket};
use crate::state::AppState;

/// Channel buffer for the upstream writer task
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Assistant audio bytes allowed to wait for the client before frames are dropped
const MAX_QUEUED_CLIENT_AUDIO: usize = 2 * 1024 * 1024;

/// How long teardown waits for writer tasks to flush their close frames
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Client error code for a failed upstream connection
const UPSTREAM_CONNECT_FAILED: &str = "UPSTREAM_CONNECT_FAILED";

/// Client error code for an upstream socket that failed mid-connection
const UPSTREAM_DISCONNECTED: &str = "UPSTREAM_DISCONNECTED";

type HandlerOutcome = (String, Result<String, BridgeError>);

/// Serve one agent connection from upgrade to teardown.
pub(super) async fn run_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    backend: BackendKind,
    trace_id: String,
) {
    let opened_at = Instant::now();
    info!("Agent connection opened");

    match connect_backend(&state.config, backend).await {
        Ok(upstream) => match backend {
            BackendKind::NativeAgent => pass_through(socket, upstream).await,
            BackendKind::RealtimeBridge => {
                BridgeRelay::new(&state, &trace_id).run(socket, upstream).await;
            }
        },
        Err(e) => {
            error!(error = %e, "Upstream connection failed");
            reject(socket, &e.to_string()).await;
        }
    }

    info!(
        duration_ms = opened_at.elapsed().as_millis() as u64,
        "Agent connection closed"
    );
}

async fn connect_backend(config: &ServerConfig, backend: BackendKind) -> RealtimeResult<UpstreamSocket> {
    match backend {
        BackendKind::NativeAgent => {
            let api_key = config.deepgram_api_key.as_deref().unwrap_or_default();
            NativeAgentConnector::new(Some(&config.native_agent_url), api_key)?
                .connect()
                .await
        }
        BackendKind::RealtimeBridge => {
            let api_key = config.openai_api_key.as_deref().unwrap_or_default();
            OpenAIRealtimeConnector::new(Some(&config.realtime_url), api_key, config.realtime_model)?
                .connect()
                .await
        }
    }
}

/// Report a connect failure and close the client socket.
async fn reject(mut socket: WebSocket, description: &str) {
    let message = AgentOutgoingMessage::error(UPSTREAM_CONNECT_FAILED, description);
    if let Ok(json) = serde_json::to_string(&message) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

// =============================================================================
// Native pass-through
// =============================================================================

#[derive(Debug)]
enum PumpEnd {
    ClientClosed,
    UpstreamClosed,
    ClientError(axum::Error),
    UpstreamError(tokio_tungstenite::tungstenite::Error),
}

/// Forward frames unchanged in both directions until either side closes.
async fn pass_through(socket: WebSocket, upstream: UpstreamSocket) {
    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(message) = client_rx.next().await {
            let forward = match message {
                Ok(Message::Text(text)) => UpstreamMessage::Text(text.to_string().into()),
                Ok(Message::Binary(data)) => UpstreamMessage::Binary(data),
                Ok(Message::Close(_)) => return PumpEnd::ClientClosed,
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => return PumpEnd::ClientError(e),
            };
            if let Err(e) = upstream_tx.send(forward).await {
                return PumpEnd::UpstreamError(e);
            }
        }
        PumpEnd::ClientClosed
    };

    let upstream_to_client = async {
        while let Some(message) = upstream_rx.next().await {
            let forward = match message {
                Ok(UpstreamMessage::Text(text)) => Message::Text(text.to_string().into()),
                Ok(UpstreamMessage::Binary(data)) => Message::Binary(data),
                Ok(UpstreamMessage::Close(_)) => return PumpEnd::UpstreamClosed,
                Ok(_) => continue,
                Err(e) => return PumpEnd::UpstreamError(e),
            };
            if let Err(e) = client_tx.send(forward).await {
                return PumpEnd::ClientError(e);
            }
        }
        PumpEnd::UpstreamClosed
    };

    let end = tokio::select! {
        end = client_to_upstream => end,
        end = upstream_to_client => end,
    };

    match &end {
        PumpEnd::ClientClosed => info!("Client closed the connection"),
        PumpEnd::UpstreamClosed => info!("Upstream closed the connection"),
        PumpEnd::ClientError(e) => warn!(error = %e, "Client socket error"),
        PumpEnd::UpstreamError(e) => warn!(error = %e, "Upstream socket error"),
    }

    let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
    let _ = client_tx.send(Message::Close(None)).await;
}

// =============================================================================
// Realtime bridge
// =============================================================================

/// Why the bridge loop stopped.
#[derive(Debug)]
enum LoopEnd {
    ClientClosed,
    UpstreamClosed,
    /// A writer task is gone, so its socket is unusable
    WriterClosed,
}

/// Client-bound side of the bridge loop.
///
/// Control messages are queued without bound so the loop never waits on the
/// client socket. Assistant audio is dropped while more than
/// [`MAX_QUEUED_CLIENT_AUDIO`] bytes are still waiting for a slow client.
struct ClientOutbox {
    tx: mpsc::UnboundedSender<AgentMessageRoute>,
    /// Audio bytes queued but not yet taken by the writer
    queued_audio: Arc<AtomicUsize>,
    dropped_frames: u64,
}

impl ClientOutbox {
    fn new(tx: mpsc::UnboundedSender<AgentMessageRoute>, queued_audio: Arc<AtomicUsize>) -> Self {
        Self {
            tx,
            queued_audio,
            dropped_frames: 0,
        }
    }

    fn send(&self, message: AgentOutgoingMessage) -> Result<(), LoopEnd> {
        self.tx
            .send(AgentMessageRoute::Outgoing(message))
            .map_err(|_| LoopEnd::WriterClosed)
    }

    fn send_audio(&mut self, audio: Bytes) -> Result<(), LoopEnd> {
        let queued = self.queued_audio.load(Ordering::Acquire);
        if queued + audio.len() > MAX_QUEUED_CLIENT_AUDIO {
            if self.dropped_frames == 0 {
                warn!(queued_bytes = queued, "Client is not reading, dropping assistant audio");
            }
            self.dropped_frames += 1;
            return Ok(());
        }
        if self.dropped_frames > 0 {
            info!(dropped_frames = self.dropped_frames, "Client caught up, assistant audio resumed");
            self.dropped_frames = 0;
        }

        self.queued_audio.fetch_add(audio.len(), Ordering::AcqRel);
        self.tx
            .send(AgentMessageRoute::Audio(audio))
            .map_err(|_| LoopEnd::WriterClosed)
    }

    fn close(&self) {
        let _ = self.tx.send(AgentMessageRoute::Close);
    }
}

struct BridgeRelay {
    session: BridgeSession,
    function_handler: Option<Arc<dyn FunctionCallHandler>>,
    handlers: JoinSet<HandlerOutcome>,
    trace_id: String,
}

impl BridgeRelay {
    fn new(state: &AppState, trace_id: &str) -> Self {
        let function_handler = state.function_handler();
        let mut bridge_config = state.config.bridge_config();
        bridge_config.client_side_functions = function_handler.is_none();

        Self {
            session: BridgeSession::new(bridge_config),
            function_handler,
            handlers: JoinSet::new(),
            trace_id: trace_id.to_string(),
        }
    }

    async fn run(mut self, socket: WebSocket, upstream: UpstreamSocket) {
        let (client_sink, mut client_stream) = socket.split();
        let (upstream_sink, mut upstream_stream) = upstream.split();

        let (client_tx, client_rx) = mpsc::unbounded_channel::<AgentMessageRoute>();
        let (upstream_tx, upstream_rx) = mpsc::channel::<ClientEvent>(CHANNEL_BUFFER_SIZE);
        let queued_audio = Arc::new(AtomicUsize::new(0));
        let mut outbox = ClientOutbox::new(client_tx, queued_audio.clone());

        let mut client_writer =
            tokio::spawn(client_writer(client_sink, client_rx, queued_audio).in_current_span());
        let mut upstream_writer =
            tokio::spawn(upstream_writer(upstream_sink, upstream_rx).in_current_span());

        let welcome = AgentOutgoingMessage::Welcome {
            request_id: self.trace_id.clone(),
        };
        let end = if outbox.send(welcome).is_err() {
            LoopEnd::WriterClosed
        } else {
            self.event_loop(&mut client_stream, &mut upstream_stream, &mut outbox, &upstream_tx)
                .await
        };

        match end {
            LoopEnd::ClientClosed => info!("Client closed the connection"),
            LoopEnd::UpstreamClosed => info!("Upstream closed the connection"),
            LoopEnd::WriterClosed => warn!("Socket writer stopped"),
        }

        // Teardown: pending handler calls and any buffered audio are abandoned.
        self.session.close();
        self.handlers.abort_all();

        outbox.close();
        drop(outbox);
        drop(upstream_tx);

        drain_writer(&mut client_writer, "client").await;
        drain_writer(&mut upstream_writer, "upstream").await;
    }

    async fn event_loop(
        &mut self,
        client_stream: &mut SplitStream<WebSocket>,
        upstream_stream: &mut SplitStream<UpstreamSocket>,
        outbox: &mut ClientOutbox,
        upstream_tx: &mpsc::Sender<ClientEvent>,
    ) -> LoopEnd {
        loop {
            let deadline = self.session.commit_deadline();
            let sleep_target = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

            let actions = tokio::select! {
                message = client_stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.on_client_text(text.as_str()),
                    Some(Ok(Message::Binary(frame))) => {
                        self.session.handle_client_audio(&frame, Instant::now())
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => return LoopEnd::ClientClosed,
                    Some(Err(e)) => {
                        warn!(error = %e, "Client socket error");
                        return LoopEnd::ClientClosed;
                    }
                },
                message = upstream_stream.next() => match message {
                    Some(Ok(UpstreamMessage::Text(text))) => match decode_event(text.as_str()) {
                        Ok(event) => self.session.handle_upstream_event(event),
                        Err(e) => {
                            warn!(error = %e, "Undecodable upstream event");
                            continue;
                        }
                    },
                    Some(Ok(UpstreamMessage::Close(frame))) => {
                        debug!(frame = ?frame, "Upstream close frame");
                        return LoopEnd::UpstreamClosed;
                    }
                    Some(Ok(_)) => continue,
                    None => return LoopEnd::UpstreamClosed,
                    Some(Err(e)) => {
                        warn!(error = %e, "Upstream socket error");
                        let notice = AgentOutgoingMessage::error(UPSTREAM_DISCONNECTED, e.to_string());
                        let _ = outbox.send(notice);
                        return LoopEnd::UpstreamClosed;
                    }
                },
                Some(joined) = self.handlers.join_next(), if !self.handlers.is_empty() => match joined {
                    Ok((call_id, result)) => self.session.handle_handler_result(&call_id, result),
                    Err(e) => {
                        error!(error = %e, "Function call task failed");
                        continue;
                    }
                },
                _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                    self.session.handle_commit_deadline(Instant::now())
                }
            };

            if let Err(end) = self.dispatch(actions, outbox, upstream_tx).await {
                return end;
            }
        }
    }

    fn on_client_text(&mut self, text: &str) -> Vec<BridgeAction> {
        match serde_json::from_str::<AgentIncomingMessage>(text) {
            Ok(message) => {
                debug!(message_type = message.message_type(), "Client message");
                self.session.handle_client_message(message)
            }
            Err(e) => self.session.handle_malformed_client_message(&e.to_string()),
        }
    }

    /// Execute actions in order. Follow-up actions produced while dispatching
    /// run after the ones already queued.
    async fn dispatch(
        &mut self,
        actions: Vec<BridgeAction>,
        outbox: &mut ClientOutbox,
        upstream_tx: &mpsc::Sender<ClientEvent>,
    ) -> Result<(), LoopEnd> {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                BridgeAction::Upstream(event) => {
                    debug!(event_type = event.event_type(), "Sending upstream");
                    upstream_tx
                        .send(event)
                        .await
                        .map_err(|_| LoopEnd::WriterClosed)?;
                }
                BridgeAction::Client(message) => outbox.send(message)?,
                BridgeAction::ClientAudio(audio) => outbox.send_audio(audio)?,
                BridgeAction::InvokeHandler(call) => match &self.function_handler {
                    Some(handler) => self.spawn_handler(handler.clone(), call),
                    None => {
                        let result = Err(BridgeError::Handler(
                            "no function call handler configured".to_string(),
                        ));
                        queue.extend(self.session.handle_handler_result(&call.call_id, result));
                    }
                },
            }
        }
        Ok(())
    }

    fn spawn_handler(&mut self, handler: Arc<dyn FunctionCallHandler>, call: PendingFunctionCall) {
        info!(call_id = %call.call_id, function = %call.name, "Forwarding function call");
        let trace_id = self.trace_id.clone();
        self.handlers.spawn(
            async move {
                let request = FunctionCallRequest::from(&call);
                let result = handler.call(&request, &trace_id).await;
                debug!(
                    call_id = %call.call_id,
                    elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "Function call handler returned"
                );
                (call.call_id, result)
            }
            .in_current_span(),
        );
    }
}

async fn client_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<AgentMessageRoute>,
    queued_audio: Arc<AtomicUsize>,
) {
    while let Some(route) = rx.recv().await {
        let result = match route {
            AgentMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                Ok(json) => sink.send(Message::Text(json.into())).await,
                Err(e) => {
                    error!(error = %e, "Failed to serialize outgoing message");
                    continue;
                }
            },
            AgentMessageRoute::Audio(audio) => {
                queued_audio.fetch_sub(audio.len(), Ordering::AcqRel);
                sink.send(Message::Binary(audio)).await
            }
            AgentMessageRoute::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };

        if let Err(e) = result {
            debug!(error = %e, "Client write failed");
            break;
        }
    }
}

async fn upstream_writer(
    mut sink: SplitSink<UpstreamSocket, UpstreamMessage>,
    mut rx: mpsc::Receiver<ClientEvent>,
) {
    while let Some(event) = rx.recv().await {
        let message = match encode_event(&event) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, event_type = event.event_type(), "Failed to encode upstream event");
                continue;
            }
        };
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "Upstream write failed");
            return;
        }
    }
    let _ = sink.send(UpstreamMessage::Close(None)).await;
}

async fn drain_writer(handle: &mut JoinHandle<()>, name: &str) {
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut *handle)
        .await
        .is_err()
    {
        debug!(writer = name, "Writer did not finish in time; aborting");
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<AgentMessageRoute>) -> (usize, usize) {
        let (mut audio, mut control) = (0, 0);
        while let Ok(route) = rx.try_recv() {
            match route {
                AgentMessageRoute::Audio(_) => audio += 1,
                AgentMessageRoute::Outgoing(_) | AgentMessageRoute::Close => control += 1,
            }
        }
        (audio, control)
    }

    #[test]
    fn test_outbox_drops_audio_for_stalled_client_but_keeps_control() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let mut outbox = ClientOutbox::new(tx, queued.clone());
        let frame = Bytes::from(vec![0u8; 64 * 1024]);

        for _ in 0..64 {
            outbox.send_audio(frame.clone()).expect("writer alive");
        }
        outbox
            .send(AgentOutgoingMessage::AgentAudioDone)
            .expect("writer alive");

        assert_eq!(queued.load(Ordering::Acquire), MAX_QUEUED_CLIENT_AUDIO);
        assert_eq!(outbox.dropped_frames, 32);
        assert_eq!(drain(&mut rx), (32, 1));

        // The writer catching up makes room again
        queued.store(0, Ordering::Release);
        outbox.send_audio(frame).expect("writer alive");
        assert_eq!(outbox.dropped_frames, 0);
        assert_eq!(drain(&mut rx), (1, 0));
    }

    #[test]
    fn test_outbox_reports_closed_writer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut outbox = ClientOutbox::new(tx, Arc::new(AtomicUsize::new(0)));
        drop(rx);
        assert!(matches!(
            outbox.send_audio(Bytes::from_static(&[0, 1])),
            Err(LoopEnd::WriterClosed)
        ));
        assert!(outbox.send(AgentOutgoingMessage::AgentAudioDone).is_err());
    }
}
