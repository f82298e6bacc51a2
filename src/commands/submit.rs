//! Submit and cancel command implementations
//!
//! Both only enqueue; the serving session assigns ids and talks to the
//! gateway.

use anyhow::{anyhow, Result};
use tracing::info;

use order_book::{Action, CommandQueue, Config, Contract, Order, OrderCommand, OrderType};

/// Order fields taken from the command line
#[derive(Debug)]
pub struct OrderArgs {
    pub ticker: String,
    pub quantity: i64,
    pub order_type: String,
    pub price: f64,
    pub action: String,
    pub account: String,
    pub sec_type: String,
    pub exchange: String,
    pub currency: String,
}

impl OrderArgs {
    fn into_command(self) -> Result<OrderCommand> {
        if self.quantity <= 0 {
            anyhow::bail!("quantity must be positive, got {}", self.quantity);
        }
        let order_type: OrderType = self.order_type.parse().map_err(|e: String| anyhow!(e))?;
        let action: Action = self.action.parse().map_err(|e: String| anyhow!(e))?;
        if matches!(order_type, OrderType::Limit | OrderType::StopLimit) && self.price <= 0.0 {
            anyhow::bail!("{} orders need a positive --price", order_type);
        }

        let order = Order {
            account: self.account,
            action,
            total_quantity: self.quantity,
            order_type,
            lmt_price: self.price,
            ..Default::default()
        };
        let contract = Contract {
            symbol: self.ticker.to_uppercase(),
            sec_type: self.sec_type,
            exchange: self.exchange,
            currency: self.currency,
        };
        Ok(OrderCommand::place(order, contract))
    }
}

pub fn run(config: Config, args: OrderArgs) -> Result<()> {
    config.validate()?;
    let command = args.into_command()?;
    let queue = CommandQueue::open_in(config.queue_dir(), &config.queue.name)?;
    let seq = queue.push(&command)?;
    info!("Queued {} as #{} on '{}'", command, seq, queue.name());
    Ok(())
}

pub fn cancel(config: Config, order_id: i64) -> Result<()> {
    config.validate()?;
    if order_id <= 0 {
        anyhow::bail!("order id must be positive, got {}", order_id);
    }
    let queue = CommandQueue::open_in(config.queue_dir(), &config.queue.name)?;
    let seq = queue.push(&OrderCommand::cancel(order_id))?;
    info!("Queued cancel for order {} as #{} on '{}'", order_id, seq, queue.name());
    Ok(())
}
