//! Socket.IO client
//!
//! The connection handle, its handler registry and the background worker
//! that keeps the connection alive.

mod backoff;
mod registry;
mod socket;
mod worker;

pub use backoff::Backoff;
pub use registry::{Event, Handler, HandlerId, HandlerRegistry};
pub use socket::{AuthContext, Socket, SocketError, SocketResult};
pub use worker::DisconnectReason;
