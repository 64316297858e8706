pub mod agent;
pub mod bridge;
pub mod realtime;

// Re-export commonly used types for convenience
pub use agent::{AgentIncomingMessage, AgentOutgoingMessage, BackendKind, NativeAgentConnector};

pub use bridge::{
    BridgeAction, BridgeConfig, BridgeError, BridgeSession, FunctionCallHandler,
    HttpFunctionHandler, ResponseProducer, ResponseTracker, SettingsPolicy,
};

pub use realtime::openai::{OpenAIRealtimeConnector, OpenAIRealtimeModel, OpenAIRealtimeVoice};
pub use realtime::{RealtimeError, RealtimeResult, UpstreamSocket};
