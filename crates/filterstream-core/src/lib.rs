//! filterstream-core: mock of the legacy `statuses/filter` streaming endpoint
//!
//! A client POSTs a `track` form field with comma-separated keywords and gets
//! back an open-ended newline-delimited JSON stream of synthetic tweets, one
//! every one to three seconds.
//!
//! ## Modules
//! - `tweet` - synthetic tweet generator
//! - `filter` - form parsing and the per-request keyword list
//! - `stream` - per-connection emission loop
//! - `handler` - request validation and hand-off to the emitter
//! - `server` - listener, connection tracking and graceful shutdown

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod error;
pub mod filter;
pub mod handler;
pub mod response;
pub mod router;
pub mod server;
pub mod stream;
pub mod tweet;

// Re-exports
pub use error::{Error, Result};
pub use filter::{FilterSpec, FormError, FormParams};
pub use handler::{handle_filter, Rejection, StreamContext};
pub use response::ResponseBody;
pub use router::{Endpoint, Routes, FILTER_PATH};
pub use server::{
    create_listener, ConnectionGuard, ConnectionTracker, Server, ServerConfig, ServerPhase,
    ShutdownContext,
};
pub use stream::{Emitter, StreamConfig, StreamEnd};
pub use tweet::{Tweet, MENTION_PREFIX};
