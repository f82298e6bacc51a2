//! Broker gateway boundary
//!
//! The session talks to the gateway through [`WireClient`] and hears back
//! through [`OrderEvents`], which carries only the four callbacks the
//! dispatch loop consumes. Every other gateway message is dropped by the
//! client before it reaches the session.

pub mod frame;
pub mod tws;

pub use tws::{TwsClient, TwsConfig};

use async_trait::async_trait;
use std::time::Duration;

use crate::command::{Contract, Order, OrderId, OrderResponse};
use crate::error::WireError;

/// Error code the gateway sends when it loses its own upstream link.
pub const CONNECTIVITY_LOST: i32 = 1100;

/// Request id carried by errors that are not tied to a request.
pub const NO_REQUEST: i64 = -1;

/// Callbacks surfaced by [`WireClient::process_messages`].
pub trait OrderEvents: Send {
    /// A fresh order id is available.
    fn next_valid_id(&mut self, order_id: OrderId);

    fn order_status(&mut self, order_id: OrderId, response: OrderResponse);

    /// Gateway error or notice. `id` is [`NO_REQUEST`] for errors not tied
    /// to an order or request.
    fn error(&mut self, id: i64, code: i32, message: &str);

    /// The socket closed underneath the client.
    fn connection_closed(&mut self);
}

/// Client side of the gateway protocol.
///
/// Requests are buffered and only leave the process during
/// [`process_messages`](WireClient::process_messages), which is also where
/// inbound messages turn into [`OrderEvents`] callbacks.
#[async_trait]
pub trait WireClient: Send {
    async fn connect(&mut self, host: &str, port: u16, client_id: i32) -> Result<(), WireError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn place_order(
        &mut self,
        order_id: OrderId,
        contract: &Contract,
        order: &Order,
    ) -> Result<(), WireError>;

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), WireError>;

    /// Asks the gateway for `num_ids` more order ids.
    fn req_ids(&mut self, num_ids: i32) -> Result<(), WireError>;

    /// Waits at most `timeout` for socket readiness, flushes pending
    /// requests and dispatches any complete inbound messages.
    async fn process_messages(
        &mut self,
        timeout: Duration,
        events: &mut dyn OrderEvents,
    ) -> Result<(), WireError>;
}
