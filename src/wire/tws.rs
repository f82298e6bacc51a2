//! TWS-style gateway client
//!
//! Speaks the framed socket protocol of the Interactive Brokers gateway:
//! an `API\0` prefix and a version range, a server version reply, then
//! length-prefixed messages of NUL-terminated fields.
//!
//! Only the messages the dispatch loop needs are implemented:
//!
//! | direction | message | id |
//! |---|---|---|
//! | out | START_API | 71 |
//! | out | PLACE_ORDER (core fields only) | 3 |
//! | out | CANCEL_ORDER | 4 |
//! | out | REQ_IDS | 8 |
//! | in | ORDER_STATUS | 3 |
//! | in | ERR_MSG | 4 |
//! | in | NEXT_VALID_ID | 9 |
//!
//! Inbound messages with any other id are skipped.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::frame::{self, FieldReader, API_PREFIX};
use super::{OrderEvents, WireClient};
use crate::command::{Contract, Order, OrderId, OrderResponse, OrderType};
use crate::error::WireError;

pub const MIN_CLIENT_VERSION: i32 = 100;
pub const MAX_CLIENT_VERSION: i32 = 151;

/// Servers below this still send a version field in ORDER_STATUS.
const MIN_SERVER_VER_MARKET_CAP_PRICE: i32 = 131;
/// Servers from this version on expect no version field in PLACE_ORDER.
const MIN_SERVER_VER_ORDER_CONTAINER: i32 = 145;
const PLACE_ORDER_VERSION: &str = "45";

mod outgoing {
    pub const PLACE_ORDER: &str = "3";
    pub const CANCEL_ORDER: &str = "4";
    pub const REQ_IDS: &str = "8";
    pub const START_API: &str = "71";
}

mod incoming {
    pub const ORDER_STATUS: i32 = 3;
    pub const ERR_MSG: i32 = 4;
    pub const NEXT_VALID_ID: i32 = 9;
}

const READ_CHUNK: usize = 8192;

/// Client configuration
#[derive(Debug, Clone)]
pub struct TwsConfig {
    /// Bound on TCP connect and on the handshake reply
    pub connect_timeout: Duration,
    /// Sent with START_API
    pub optional_capabilities: String,
}

impl Default for TwsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            optional_capabilities: String::new(),
        }
    }
}

impl TwsConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_optional_capabilities(mut self, capabilities: impl Into<String>) -> Self {
        self.optional_capabilities = capabilities.into();
        self
    }
}

#[derive(Debug, Default)]
pub struct TwsClient {
    config: TwsConfig,
    stream: Option<TcpStream>,
    server_version: i32,
    connection_time: String,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
}

impl TwsClient {
    pub fn new() -> Self {
        Self::with_config(TwsConfig::default())
    }

    pub fn with_config(config: TwsConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Version the server accepted in the handshake; 0 before connecting.
    pub fn server_version(&self) -> i32 {
        self.server_version
    }

    /// Server clock at handshake, as the server formatted it.
    pub fn connection_time(&self) -> &str {
        &self.connection_time
    }

    /// Bytes queued for the next flush.
    pub fn pending_bytes(&self) -> usize {
        self.outbound.len()
    }

    fn send<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<(), WireError> {
        if self.stream.is_none() {
            return Err(WireError::NotConnected);
        }
        self.outbound.extend(frame::encode_fields(fields));
        Ok(())
    }

    async fn read_handshake_frame(
        stream: &mut TcpStream,
        buf: &mut Vec<u8>,
    ) -> Result<Vec<String>, WireError> {
        loop {
            if let Some(fields) = frame::take_frame(buf)? {
                return Ok(fields);
            }
            if stream.read_buf(buf).await? == 0 {
                return Err(WireError::Handshake(
                    "connection closed before server version".to_string(),
                ));
            }
        }
    }

    fn place_order_fields(&self, order_id: OrderId, contract: &Contract, order: &Order) -> Vec<String> {
        let lmt_price = match order.order_type {
            OrderType::Limit | OrderType::StopLimit => order.lmt_price.to_string(),
            OrderType::Market | OrderType::Stop => String::new(),
        };

        let mut fields = vec![outgoing::PLACE_ORDER.to_string()];
        if self.server_version < MIN_SERVER_VER_ORDER_CONTAINER {
            fields.push(PLACE_ORDER_VERSION.to_string());
        }
        fields.extend([
            order_id.to_string(),
            // contract
            "0".to_string(),
            contract.symbol.clone(),
            contract.sec_type.clone(),
            String::new(),
            "0".to_string(),
            String::new(),
            String::new(),
            contract.exchange.clone(),
            String::new(),
            contract.currency.clone(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            // order
            order.action.as_str().to_string(),
            order.total_quantity.to_string(),
            order.order_type.as_str().to_string(),
            lmt_price,
            String::new(),
            String::new(),
            String::new(),
            order.account.clone(),
        ]);
        fields
    }

    fn dispatch(&self, fields: &[String], events: &mut dyn OrderEvents) -> Result<(), WireError> {
        let mut msg = FieldReader::new(fields)?;
        match msg.msg_id() {
            incoming::ORDER_STATUS => {
                if self.server_version < MIN_SERVER_VER_MARKET_CAP_PRICE {
                    msg.skip()?;
                }
                let order_id = msg.long()?;
                let response = OrderResponse {
                    status: msg.string()?,
                    filled: msg.quantity()?,
                    remaining: msg.quantity()?,
                    avg_fill_price: msg.double()?,
                    perm_id: msg.long()?,
                    parent_id: msg.long()?,
                    last_fill_price: msg.double()?,
                    client_id: msg.int()?,
                    why_held: msg.string()?,
                };
                events.order_status(order_id, response);
            }
            incoming::ERR_MSG => {
                msg.skip()?;
                let id = msg.long()?;
                let code = msg.int()?;
                let text = msg.string()?;
                events.error(id, code, &text);
            }
            incoming::NEXT_VALID_ID => {
                msg.skip()?;
                events.next_valid_id(msg.long()?);
            }
            other => trace!("Skipping gateway message {}", other),
        }
        Ok(())
    }
}

#[async_trait]
impl WireClient for TwsClient {
    async fn connect(&mut self, host: &str, port: u16, client_id: i32) -> Result<(), WireError> {
        self.disconnect();

        let addr = format!("{}:{}", host, port);
        let mut stream = timeout(self.config.connect_timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| WireError::ConnectTimeout(addr.clone()))??;
        stream.set_nodelay(true)?;

        let mut hello = API_PREFIX.to_vec();
        hello.extend(frame::encode_raw(
            format!("v{}..{}", MIN_CLIENT_VERSION, MAX_CLIENT_VERSION).as_bytes(),
        ));
        stream.write_all(&hello).await?;

        let mut inbound = Vec::new();
        let reply = timeout(
            self.config.connect_timeout,
            Self::read_handshake_frame(&mut stream, &mut inbound),
        )
        .await
        .map_err(|_| WireError::Handshake("timed out waiting for server version".to_string()))??;

        let server_version: i32 = reply
            .first()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| WireError::Handshake(format!("bad server version reply {:?}", reply)))?;
        if server_version < MIN_CLIENT_VERSION {
            return Err(WireError::Handshake(format!(
                "server version {} is below {}",
                server_version, MIN_CLIENT_VERSION
            )));
        }

        let start_api = frame::encode_fields(&[
            outgoing::START_API,
            "2",
            client_id.to_string().as_str(),
            self.config.optional_capabilities.as_str(),
        ]);
        stream.write_all(&start_api).await?;

        self.server_version = server_version;
        self.connection_time = reply.get(1).cloned().unwrap_or_default();
        self.inbound = inbound;
        self.outbound.clear();
        self.stream = Some(stream);

        info!(
            "Connected to {} (server version {}, clientId {})",
            addr, server_version, client_id
        );
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!("Disconnected from gateway");
        }
        self.inbound.clear();
        self.outbound.clear();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn place_order(
        &mut self,
        order_id: OrderId,
        contract: &Contract,
        order: &Order,
    ) -> Result<(), WireError> {
        let fields = self.place_order_fields(order_id, contract, order);
        self.send(&fields)
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), WireError> {
        self.send(&[outgoing::CANCEL_ORDER, "1", order_id.to_string().as_str()])
    }

    fn req_ids(&mut self, num_ids: i32) -> Result<(), WireError> {
        self.send(&[outgoing::REQ_IDS, "1", num_ids.to_string().as_str()])
    }

    async fn process_messages(
        &mut self,
        wait: Duration,
        events: &mut dyn OrderEvents,
    ) -> Result<(), WireError> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(WireError::NotConnected);
        };

        let interest = if self.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        // A timeout still falls through: frames left over from the handshake
        // or an earlier partial read are dispatched either way.
        let ready = match timeout(wait, stream.ready(interest)).await {
            Ok(ready) => Some(ready?),
            Err(_) => None,
        };

        let mut closed = false;
        if let Some(ready) = ready {
            if ready.is_writable() && !self.outbound.is_empty() {
                match stream.try_write(&self.outbound) {
                    Ok(n) => {
                        self.outbound.drain(..n);
                        trace!("Flushed {} bytes, {} pending", n, self.outbound.len());
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }

            if ready.is_readable() || ready.is_read_closed() {
                let mut chunk = [0u8; READ_CHUNK];
                loop {
                    match stream.try_read(&mut chunk) {
                        Ok(0) => {
                            closed = true;
                            break;
                        }
                        Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        while let Some(fields) = frame::take_frame(&mut self.inbound)? {
            if let Err(e) = self.dispatch(&fields, events) {
                warn!("Dropping malformed gateway message: {}", e);
            }
        }

        if closed {
            debug!("Gateway closed the socket");
            self.disconnect();
            events.connection_closed();
        }
        Ok(())
    }
}
