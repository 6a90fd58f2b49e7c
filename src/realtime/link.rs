use async_trait::async_trait;

use super::events::ServerEvent;
use super::messages::ClientMessage;
use crate::error::Result;

/// Write half of the connection to the remote session.
///
/// The send loop owns it exclusively.
#[async_trait]
pub trait LinkSender: Send {
    /// Serialize and write one message. Fails with `LinkClosed` once closed.
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of the connection to the remote session.
///
/// The receive loop owns it exclusively.
#[async_trait]
pub trait LinkReceiver: Send {
    /// Wait for the next event.
    ///
    /// Fails with `LinkClosed` on a normal close and `LinkError` on malformed
    /// data or a transport fault.
    async fn receive(&mut self) -> Result<ServerEvent>;
}
