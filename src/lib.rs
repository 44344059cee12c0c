//! Real-time connection to the web UI backend
//!
//! Opens a Socket.IO connection, keeps it alive, and publishes the server's
//! `user-count` and `usage` broadcasts into reactive stores.
//!
//! ```no_run
//! use webui_socket::{init_socket, SocketOptions, Stores};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let stores = Stores::new();
//! let options = SocketOptions::parse("http://localhost:8080")?;
//! let socket = init_socket(options, &stores, Some("token"), "user-id");
//!
//! let mut users = stores.active_user_count.subscribe();
//! users.changed().await?;
//! println!("{:?} users online", *users.borrow());
//! socket.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod events;
pub mod protocol;
pub mod store;
pub mod transport;

mod init;

pub use client::{AuthContext, DisconnectReason, Event, HandlerId, Socket, SocketError};
pub use config::{ClientConfig, SocketOptions};
pub use init::init_socket;
pub use store::{Stores, Writable};
