//! Realtime protocol bridge.
//!
//! Translates the voice-agent client protocol to the OpenAI Realtime API and
//! guarantees that at most one upstream response is in flight per connection.
//!
//! - [`response_state`]: the gate, the only producer of `response.create`
//! - [`settings`]: one-time `Settings` -> `session.update` translation
//! - [`audio_commit`]: utterance buffering and end-of-utterance detection
//! - [`function_call`]: tool-call bookkeeping and the HTTP handler
//! - [`session`]: the per-connection state machine composing all of the above

pub mod audio_commit;
mod error;
pub mod function_call;
pub mod response_state;
pub mod session;
pub mod settings;

pub use audio_commit::{AudioCommitConfig, AudioCommitScheduler};
pub use error::BridgeError;
pub use function_call::{
    FunctionCallHandler, FunctionCallRequest, HttpFunctionHandler, PendingFunctionCall,
    TRACE_ID_HEADER,
};
pub use response_state::{
    CompletionSignal, DeferredResponse, ResponseProducer, ResponseState, ResponseTracker,
};
pub use session::{BridgeAction, BridgeConfig, BridgeSession};
pub use settings::{SettingsPolicy, SettingsTranslator};
