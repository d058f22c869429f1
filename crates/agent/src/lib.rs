//! Agent runtime for relay.
//!
//! A backend (`AgentBackend`) hosts conversational sessions. `SessionManager`
//! opens, drives and closes them with a bounded wait per exchange, and
//! `AgentRuntime` ties a resolved `AgentConfig` to that manager for the two
//! ways sessions are used:
//!
//! - `ask`: one prompt on a fresh session, closed before returning
//! - `converse`: a console loop that holds one session until the user exits
//!
//! `AskClient` drives the same console loop against a running relay service
//! instead of a backend.

pub mod ask_client;
pub mod backend;
pub mod chat_completions;
pub mod conversation;
pub mod credential;
pub mod lifecycle;
pub mod runtime;
pub mod scripted;

pub use ask_client::AskClient;
pub use backend::{AgentBackend, BackendError, SessionId};
pub use chat_completions::ChatCompletionsBackend;
pub use conversation::{ConsoleFrame, ConversationLoop, LoopState, LoopSummary, TurnHandler};
pub use credential::{CredentialChain, CredentialProvider, EnvCredential, StaticCredential};
pub use lifecycle::{ExchangeError, Session, SessionCreateError, SessionManager};
pub use runtime::{AgentRuntime, AskError, ConsoleError};
pub use scripted::{ScriptedBackend, ScriptedReply};
