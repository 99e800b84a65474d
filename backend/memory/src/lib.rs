pub mod pending;
pub mod rate_limit;
pub mod sqlite_store;
pub mod store;

pub use pending::{
    ConfigSnapshots, FollowUpMessage, FollowUpStash, PendingExecution, PendingExecutions,
    DEFAULT_PENDING_TTL, FOLLOW_UP_TTL, SNAPSHOT_TTL,
};
pub use rate_limit::{RateLimiter, ADDRESS_CEILING, ADDRESS_WINDOW_SECS};
pub use sqlite_store::SqliteSessionStore;
pub use store::{InMemorySessionStore, SessionStore, DEFAULT_MAX_HISTORY};
