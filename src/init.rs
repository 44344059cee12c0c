//! Connection initializer
//!
//! Opens the real-time connection for a signed-in user and wires the
//! server's broadcast events into the shared stores.

use tracing::{info, warn};

use crate::client::{AuthContext, Socket};
use crate::config::SocketOptions;
use crate::events::{self, UsagePayload, UserCountPayload};
use crate::store::Stores;

/// Open a connection and publish it to `stores.socket`
///
/// The handle is returned immediately; connecting happens in the
/// background with automatic reconnection. `user-count` and `usage`
/// events overwrite `stores.active_user_count` and `stores.usage_pool`.
///
/// Calling this again replaces the published handle but does not close the
/// previous connection; call [`Socket::close`] on it first if needed.
///
/// Must be called from within a tokio runtime.
pub fn init_socket(
    options: SocketOptions,
    stores: &Stores,
    token: Option<&str>,
    user_id: &str,
) -> Socket {
    let socket = Socket::new(options, AuthContext::new(token, user_id));

    socket.on(events::CONNECT, |_| {
        info!("Connected to server");
    });

    let active_user_count = stores.active_user_count.clone();
    socket.on(events::USER_COUNT, move |event| {
        match event.parse::<UserCountPayload>() {
            Ok(payload) => active_user_count.set(Some(payload.count)),
            Err(e) => warn!("Ignoring malformed user-count payload: {}", e),
        }
    });

    let usage_pool = stores.usage_pool.clone();
    socket.on(events::USAGE, move |event| match event.parse::<UsagePayload>() {
        Ok(payload) => usage_pool.set(payload.models),
        Err(e) => warn!("Ignoring malformed usage payload: {}", e),
    });

    stores.socket.set(Some(socket.clone()));
    socket.open();
    socket
}
