//! Message Log Server
//!
//! Append short text messages to a per-(user, session) log and read back
//! everything logged since a point in time. Logs live in an ordered-log
//! backend (Redis streams, or memory) and expire as a whole an hour after
//! their latest append.
//!
//! # Features
//!
//! - **One stream per session**: the log key is `"<userId>-<sessionId>"`
//! - **Time-ordered ids**: each entry is stored at `"<millis>-0"`, so a
//!   "since" query is a single range scan
//! - **Sliding TTL**: every append pushes the log's expiry out again
//! - **Explicit collisions**: two appends in the same millisecond are
//!   reported as a conflict, never merged or dropped
//!
//! # Example
//!
//! ```rust,no_run
//! use msglog_stream::{LogStore, MemoryBackend, server, types::ServerOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = LogStore::new(MemoryBackend::new());
//!     let options = ServerOptions {
//!         port: 8080,
//!         ..Default::default()
//!     };
//!
//!     server::start_server(store, options, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! # Protocol
//!
//! ## Logging a message
//!
//! ```text
//! POST /message HTTP/1.1
//! Content-Type: application/json
//!
//! {"userId": "11111111-1111-1111-1111-111111111111",
//!  "sessionId": "22222222-2222-2222-2222-222222222222",
//!  "message": "hi"}
//!
//! Response: 200 OK
//! {"timestamp": 1700000000000}
//! ```
//!
//! ## Querying messages
//!
//! ```text
//! GET /message?userId=1111...&sessionId=2222...&timestamp=1700000000000 HTTP/1.1
//!
//! Response: 200 OK
//! {"messages": ["hi"]}
//! ```
//!
//! ## Errors
//!
//! ```text
//! 400 Bad Request            malformed ids, empty message, bad timestamp
//! 409 Conflict               same-millisecond append to one log
//! 500 Internal Server Error  backend unreachable
//! 504 Gateway Timeout        backend did not answer in time
//! ```

pub mod api;
pub mod backend;
pub mod keys;
pub mod server;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use backend::{BackendError, LogBackend, MemoryBackend};
#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use keys::{EntryId, entry_id, log_key, lower_bound_entry_id};
pub use server::{AppState, create_router, serve, start_server};
pub use store::{LogStore, Operation, StoreError};
pub use types::{DEFAULT_LOG_TTL, Message, Record, ServerOptions};
