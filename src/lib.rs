//! Order Book
//!
//! An order cache and dispatch engine for a broker gateway. Order commands
//! arrive on a named queue, receive a gateway-issued order id, are recorded
//! in a named store that other processes can query, and are submitted to
//! the gateway. Status callbacks flow back into the stored records.
//!
//! - [`store`]: indexed order store over a process-local or shared segment
//! - [`session`]: id allocation and the dispatch loop
//! - [`wire`]: gateway client boundary and a TWS-style socket client
//! - [`queue`]: command intake

pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod queue;
pub mod record;
pub mod session;
pub mod store;
pub mod wire;

pub use command::{
    Action, Contract, Instruction, Order, OrderCommand, OrderId, OrderResponse, OrderType,
};
pub use config::Config;
pub use error::{CodecError, DispatchError, QueueError, SessionError, StoreError, WireError};
pub use queue::{CommandQueue, CommandSource};
pub use record::{OrderRecord, OrderStatus};
pub use session::{
    BrokerSession, Disconnector, Dispatch, IdPool, IdState, SessionConfig, SessionHandle,
    SessionStats,
};
pub use store::{
    Backing, HeapSegment, IndexKey, LocalOrderStore, OrderStore, SharedOrderStore, SharedSegment,
};
pub use wire::{OrderEvents, TwsClient, TwsConfig, WireClient, CONNECTIVITY_LOST, NO_REQUEST};
