//! Shared test utilities: a scripted gateway client and command builders

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use order_book::{
    Action, BrokerSession, Contract, HeapSegment, Order, OrderCommand, OrderEvents, OrderId,
    OrderResponse, OrderStore, OrderType, WireClient, WireError,
};

/// Something the scripted gateway will report on the next pump.
#[derive(Debug, Clone)]
pub enum Inbound {
    NextValidId(OrderId),
    Status(OrderId, OrderResponse),
    Error(i64, i32, String),
    Closed,
}

/// Everything the session sent, plus what the gateway will send back.
#[derive(Debug, Default)]
pub struct GatewayLog {
    pub connects: usize,
    pub placed: Vec<(OrderId, Contract, Order)>,
    pub cancelled: Vec<OrderId>,
    pub id_requests: Vec<i32>,
    pub inbox: VecDeque<Inbound>,
}

impl GatewayLog {
    pub fn placed_ids(&self) -> Vec<OrderId> {
        self.placed.iter().map(|(id, _, _)| *id).collect()
    }
}

/// In-memory `WireClient` driven by a shared script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedClient {
    log: Arc<Mutex<GatewayLog>>,
    connected: bool,
    refuse_connects: usize,
    /// Answer every id request with the next id from here.
    next_id: Option<OrderId>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already connected, for driving `tick` by hand.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    /// Fails the first `attempts` connects.
    pub fn refusing(attempts: usize) -> Self {
        Self {
            refuse_connects: attempts,
            ..Self::default()
        }
    }

    pub fn answering_ids_from(mut self, first: OrderId) -> Self {
        self.next_id = Some(first);
        self
    }

    pub fn log(&self) -> Arc<Mutex<GatewayLog>> {
        self.log.clone()
    }

    pub fn push(&self, event: Inbound) {
        self.log.lock().inbox.push_back(event);
    }
}

#[async_trait]
impl WireClient for ScriptedClient {
    async fn connect(&mut self, _host: &str, _port: u16, _client_id: i32) -> Result<(), WireError> {
        let mut log = self.log.lock();
        log.connects += 1;
        if log.connects <= self.refuse_connects {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            )));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn place_order(
        &mut self,
        order_id: OrderId,
        contract: &Contract,
        order: &Order,
    ) -> Result<(), WireError> {
        self.log
            .lock()
            .placed
            .push((order_id, contract.clone(), order.clone()));
        Ok(())
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), WireError> {
        self.log.lock().cancelled.push(order_id);
        Ok(())
    }

    fn req_ids(&mut self, num_ids: i32) -> Result<(), WireError> {
        let mut log = self.log.lock();
        log.id_requests.push(num_ids);
        if let Some(next) = self.next_id.as_mut() {
            log.inbox.push_back(Inbound::NextValidId(*next));
            *next += 1;
        }
        Ok(())
    }

    async fn process_messages(
        &mut self,
        timeout: Duration,
        events: &mut dyn OrderEvents,
    ) -> Result<(), WireError> {
        let pending: Vec<Inbound> = self.log.lock().inbox.drain(..).collect();
        if pending.is_empty() {
            tokio::time::sleep(timeout.min(Duration::from_millis(1))).await;
            return Ok(());
        }

        for event in pending {
            match event {
                Inbound::NextValidId(id) => events.next_valid_id(id),
                Inbound::Status(id, response) => events.order_status(id, response),
                Inbound::Error(id, code, message) => events.error(id, code, &message),
                Inbound::Closed => {
                    self.connected = false;
                    events.connection_closed();
                }
            }
        }
        Ok(())
    }
}

pub type TestSession = BrokerSession<ScriptedClient, VecDeque<OrderCommand>, HeapSegment>;

/// Fresh process-local store under `name`.
pub fn fresh_store(name: &str) -> OrderStore<HeapSegment> {
    HeapSegment::remove(name);
    OrderStore::open(name).expect("heap segment attach")
}

pub fn session(name: &str, client: ScriptedClient) -> TestSession {
    BrokerSession::new(client, VecDeque::new(), fresh_store(name))
}

pub fn place(account: &str, ticker: &str, quantity: i64, order_type: OrderType, price: f64) -> OrderCommand {
    OrderCommand::place(
        Order {
            account: account.to_string(),
            action: Action::Buy,
            total_quantity: quantity,
            order_type,
            lmt_price: price,
            ..Default::default()
        },
        Contract::stock(ticker, "ARCA"),
    )
}

pub fn response(status: &str, filled: i64, remaining: i64) -> OrderResponse {
    OrderResponse {
        status: status.to_string(),
        filled,
        remaining,
        avg_fill_price: if filled > 0 { 0.01 } else { 0.0 },
        ..Default::default()
    }
}
