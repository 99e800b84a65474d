pub mod chat_node;
pub mod clock;
pub mod error;
pub mod reply;
pub mod traits;
pub mod types;

pub use chat_node::{
    ActionDefinition, ActionField, ChatNodeConfig, FieldType, FileSearchConfig, ModelParams,
    RateLimitConfig, ToolConfig,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ChatError, ProviderError, GENERIC_FAILURE_MESSAGE};
pub use reply::{CanonicalReply, Citation, SearchKind, SearchResult, StreamDelta, Usage};
pub use traits::{
    DeltaStream, ExecutionHandle, ExecutionRequest, ExecutionStatus, ProviderAdapter,
    ProviderRequest, WorkflowExecutor,
};
pub use types::{
    new_session_id, ChatMessage, PageContext, ProductContext, Role, Session, StoredMessage,
};
