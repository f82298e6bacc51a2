//! Stored order record
//!
//! The record duplicates `account` and `ticker` out of the encoded payload
//! so the store can index them. [`OrderRecord::store`] is the only way the
//! payload changes and it always re-derives the key fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec;
use crate::command::{OrderCommand, OrderId, OrderResponse};
use crate::error::CodecError;

/// Lifecycle status used by the `(status, account)` index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum OrderStatus {
    #[default]
    Created,
    Submitted,
    Pending,
    Filled,
    PartialFill,
    Error,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::Submitted,
        OrderStatus::Pending,
        OrderStatus::Filled,
        OrderStatus::PartialFill,
        OrderStatus::Error,
    ];

    /// Stable numeric code used in the shared segment.
    pub fn code(self) -> i64 {
        match self {
            OrderStatus::Created => 0,
            OrderStatus::Submitted => 1,
            OrderStatus::Pending => 2,
            OrderStatus::Filled => 3,
            OrderStatus::PartialFill => 4,
            OrderStatus::Error => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Status implied by a broker status callback, or `None` when the
    /// callback should leave the current status alone (e.g. `Cancelled`,
    /// which has no counterpart here).
    pub fn from_response(response: &OrderResponse) -> Option<Self> {
        match response.status.as_str() {
            "PendingSubmit" | "PendingCancel" | "ApiPending" => Some(OrderStatus::Pending),
            "PreSubmitted" | "Submitted" if response.filled > 0 => Some(OrderStatus::PartialFill),
            "PreSubmitted" | "Submitted" => Some(OrderStatus::Submitted),
            "Filled" if response.remaining > 0 => Some(OrderStatus::PartialFill),
            "Filled" => Some(OrderStatus::Filled),
            "Inactive" => Some(OrderStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PartialFill => "PARTIAL_FILL",
            OrderStatus::Error => "ERROR",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown order status '{}'", s))
    }
}

/// One order as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub account: String,
    pub ticker: String,
    pub status: OrderStatus,
    pub payload: Vec<u8>,
}

impl OrderRecord {
    /// New `Created` record for `command`.
    pub fn from_command(command: &OrderCommand) -> Result<Self, CodecError> {
        let mut record = Self::default();
        record.store(command)?;
        Ok(record)
    }

    /// Re-encodes `command` into the payload and re-derives the key fields.
    pub fn store(&mut self, command: &OrderCommand) -> Result<(), CodecError> {
        self.payload = codec::encode(command)?;
        let (account, ticker, order_id) = codec::derive_keys(command);
        self.account = account;
        self.ticker = ticker;
        self.order_id = order_id;
        Ok(())
    }

    /// Decodes the payload.
    pub fn command(&self) -> Result<OrderCommand, CodecError> {
        codec::decode(&self.payload)
    }

    /// Pulls `account`, `ticker` and `order_id` back out of the payload.
    pub fn sync_keys(&mut self) -> Result<(), CodecError> {
        let command = self.command()?;
        let (account, ticker, order_id) = codec::derive_keys(&command);
        self.account = account;
        self.ticker = ticker;
        self.order_id = order_id;
        Ok(())
    }

    /// Copies the mutable fields into a stored slot. The slot keeps its
    /// own `order_id`.
    pub(crate) fn apply_to(&self, slot: &mut OrderRecord) {
        slot.account.clone_from(&self.account);
        slot.ticker.clone_from(&self.ticker);
        slot.status = self.status;
        slot.payload.clone_from(&self.payload);
    }
}
