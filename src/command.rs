//! Order command DTO
//!
//! An `OrderCommand` is what travels from the command queue to the broker
//! and back: the instruction, the wire order and contract fields, the
//! assigned order id and the latest broker response.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Broker-issued order identifier. `0` means "not yet assigned".
pub type OrderId = i64;

/// What the dispatcher should do with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Instruction {
    Place,
    Cancel,
    /// Uninitialized or invalid; discarded by the dispatcher.
    #[default]
    Undefined,
}

/// Order side as the gateway spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Buy,
    Sell,
    SellShort,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::SellShort => "SSHORT",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            "SSHORT" => Ok(Action::SellShort),
            other => Err(format!("unknown order action '{}'", other)),
        }
    }
}

/// Order type codes understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
            OrderType::Limit => "LMT",
            OrderType::Stop => "STP",
            OrderType::StopLimit => "STP LMT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MKT" => Ok(OrderType::Market),
            "LMT" => Ok(OrderType::Limit),
            "STP" => Ok(OrderType::Stop),
            "STP LMT" | "STPLMT" => Ok(OrderType::StopLimit),
            other => Err(format!("unknown order type '{}'", other)),
        }
    }
}

/// Order fields submitted to the broker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account: String,
    pub action: Action,
    pub total_quantity: i64,
    pub order_type: OrderType,
    pub lmt_price: f64,
    pub client_id: i32,
}

/// Instrument the order trades.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub sec_type: String,
    pub exchange: String,
    pub currency: String,
}

impl Contract {
    /// US stock routed to `exchange`.
    pub fn stock(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: "STK".to_string(),
            exchange: exchange.into(),
            currency: "USD".to_string(),
        }
    }
}

/// Latest order-status callback received for an order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderResponse {
    pub status: String,
    pub filled: i64,
    pub remaining: i64,
    pub avg_fill_price: f64,
    pub perm_id: i64,
    pub parent_id: i64,
    pub last_fill_price: f64,
    pub client_id: i32,
    pub why_held: String,
}

/// A queued instruction plus everything needed to submit it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderCommand {
    pub instruction: Instruction,
    pub order: Order,
    pub contract: Contract,
    pub order_id: OrderId,
    pub response: OrderResponse,
}

impl OrderCommand {
    /// PLACE command for `order` on `contract`.
    pub fn place(order: Order, contract: Contract) -> Self {
        let mut cmd = Self {
            order_id: order.order_id,
            order,
            contract,
            ..Default::default()
        };
        cmd.mark_place();
        cmd
    }

    /// CANCEL command for an already submitted order.
    pub fn cancel(order_id: OrderId) -> Self {
        let mut cmd = Self::default();
        cmd.assign_id(order_id);
        cmd.mark_cancel();
        cmd
    }

    pub fn mark_place(&mut self) {
        self.instruction = Instruction::Place;
    }

    pub fn mark_cancel(&mut self) {
        self.instruction = Instruction::Cancel;
    }

    /// Sets the id on the command and on the embedded order; from here on
    /// both carry the same value.
    pub fn assign_id(&mut self, order_id: OrderId) {
        self.order_id = order_id;
        self.order.order_id = order_id;
    }

    /// Replaces the stored response. No history is kept.
    pub fn record_response(&mut self, response: OrderResponse) {
        self.response = response;
    }

    pub fn account(&self) -> &str {
        &self.order.account
    }

    pub fn ticker(&self) -> &str {
        &self.contract.symbol
    }
}

impl fmt::Display for OrderCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:?}] #{} {} {} {} {} @ {}",
            self.instruction,
            self.order_id,
            self.order.account,
            self.order.action,
            self.order.total_quantity,
            self.contract.symbol,
            self.order.lmt_price
        )
    }
}
