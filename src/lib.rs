#![doc = include_str!("../README.md")]

pub mod classifier;
pub mod codec;
pub mod error;
pub mod middleware;
pub mod store;
pub mod types;

// Re-exports for convenient access
pub use classifier::{ExcludeRule, in_scope, path_matches};
pub use error::Error;
pub use middleware::{CasConfig, CasUser, Session, UpstreamSession, protect};
pub use store::{BatchOp, BatchReply, KvBackend, MemoryBackend, SessionStore};
#[cfg(feature = "redis")]
pub use store::{RedisBackend, RedisConfig};
pub use types::{CasTicket, SessionData, SessionId};
