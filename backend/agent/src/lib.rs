//! Flowchat chat turn orchestration.
//!
//! Context assembly, reply interpretation, the streaming relay and action
//! dispatch, tied together by [`ChatOrchestrator`].

pub mod context_window;
pub mod dispatcher;
pub mod executor;
pub mod input;
pub mod interpreter;
pub mod json_scan;
pub mod orchestrator;
pub mod streaming;
pub mod system_prompt;
pub mod workflows;

pub use context_window::ContextBuilder;
pub use dispatcher::{ActionDispatcher, FollowUpScheduler, PollOutcome, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL};
pub use executor::{HttpWorkflowExecutor, RecordingExecutor, UnconfiguredExecutor};
pub use interpreter::{interpret, Interpretation, RawReply, ACTION_ACKNOWLEDGEMENT};
pub use orchestrator::{ChatOrchestrator, TurnContext, TurnPolicy, TurnReply, TurnRequest};
pub use streaming::{StreamFrame, StreamRelay, DEFAULT_STREAM_TIMEOUT};
pub use system_prompt::PromptBuilder;
pub use workflows::{StaticWorkflows, WorkflowCatalog};
