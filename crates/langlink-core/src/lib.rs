//! Langlink Core - session engine between a managed process and its host.
//!
//! A session runs over a pair of byte-stream pipes carrying tagged-field
//! envelopes. Each session owns one reader task that never blocks on
//! application logic, one writer task draining an ordered outbound queue,
//! a heartbeat watchdog and a small dispatch pool that runs payload
//! handlers.
//!
//! # Example
//!
//! ```rust,ignore
//! use langlink_core::{ClientContext, NoState, Session};
//!
//! #[tokio::main]
//! async fn main() -> langlink_core::Result<()> {
//!     let context = ClientContext::builder(NoState).build()?;
//!     let session = Session::connect(context, "/tmp/host.in", "/tmp/host.out").await?;
//!     session.run().await
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod pipes;
pub mod poison;
pub mod queue;
pub mod session;
pub mod watchdog;
pub mod wire;
pub mod writer;

pub use config::{SessionConfig, SessionSettings};
pub use context::{ClientContext, ClientContextBuilder};
pub use dispatch::Dispatcher;
pub use error::{LinkError, Result};
pub use handler::{
    HandlerOutcome, NoState, PayloadHandler, RoutingTable, SessionState, SessionStateFactory,
};
pub use poison::PoisonToken;
pub use queue::OutboundQueue;
pub use session::{Session, SessionContext, SessionPhase};
pub use watchdog::{Watchdog, WatchdogHandle};
pub use wire::{
    ControlMessage, ControlOperation, Directive, Envelope, FieldMessage, FieldValue, Payload,
    PayloadKind, UserMessage,
};
