//! Broker session and dispatch loop
//!
//! A [`BrokerSession`] owns the gateway client, the command source and the
//! order store. Once connected it runs one dispatch task that alternates
//! between two steps per tick:
//!
//! 1. when an order id is available, pull at most one command and act on
//!    it (place, cancel or discard)
//! 2. wait a bounded time for gateway traffic and apply the callbacks
//!
//! The loop ends when the client reports it is no longer connected.
//!
//! Order ids come from the gateway. They are pooled FIFO; each placement
//! consumes one, and the placement that empties the pool asks for exactly
//! one more.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{Instruction, OrderCommand, OrderId, OrderResponse};
use crate::error::{DispatchError, QueueError, SessionError, StoreError};
use crate::queue::CommandSource;
use crate::record::OrderRecord;
use crate::store::{Backing, OrderStore};
use crate::wire::{OrderEvents, WireClient, CONNECTIVITY_LOST, NO_REQUEST};

/// Ids requested per refill.
const REFILL_BATCH: i32 = 1;

/// Gateway notice codes (farm status and the like), logged at info.
const NOTICE_CODES: std::ops::Range<i32> = 2100..2200;

/// Where the id pool stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdState {
    /// Empty, nothing requested.
    NoIds,
    /// Empty, a refill is outstanding.
    AwaitingIds,
    HaveIds,
}

/// FIFO of gateway-issued order ids.
#[derive(Debug, Default)]
pub struct IdPool {
    ids: VecDeque<OrderId>,
    awaiting: bool,
}

impl IdPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> IdState {
        if !self.ids.is_empty() {
            IdState::HaveIds
        } else if self.awaiting {
            IdState::AwaitingIds
        } else {
            IdState::NoIds
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Appends a delivered id; any outstanding refill is satisfied.
    pub fn deliver(&mut self, order_id: OrderId) {
        self.ids.push_back(order_id);
        self.awaiting = false;
    }

    /// Oldest id first.
    pub fn take(&mut self) -> Option<OrderId> {
        self.ids.pop_front()
    }

    /// Moves `NoIds` to `AwaitingIds`. Returns `false` in every other
    /// state, so a caller sends at most one refill per empty pool.
    pub fn begin_refill(&mut self) -> bool {
        if self.state() == IdState::NoIds {
            self.awaiting = true;
            true
        } else {
            false
        }
    }

    /// Back to `NoIds` after a refill request could not be sent.
    pub fn abandon_refill(&mut self) {
        self.awaiting = false;
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on one readiness wait
    pub poll_timeout: Duration,
    /// Connection attempts before giving up
    pub connect_attempts: u32,
    /// First retry delay; doubles per attempt
    pub retry_base_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            connect_attempts: 1,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

/// Counters kept by the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub placed: u64,
    pub cancelled: u64,
    /// Undefined or undecodable commands
    pub discarded: u64,
    pub duplicates: u64,
    pub store_failures: u64,
    pub status_updates: u64,
    pub unknown_status: u64,
    pub ids_received: u64,
    pub refills_requested: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "placed={} cancelled={} discarded={} duplicates={} store_failures={} \
             status_updates={} unknown_status={} ids_received={} refills={}",
            self.placed,
            self.cancelled,
            self.discarded,
            self.duplicates,
            self.store_failures,
            self.status_updates,
            self.unknown_status,
            self.ids_received,
            self.refills_requested
        )
    }
}

/// What the first step of a tick did.
#[derive(Debug)]
pub enum Dispatch {
    /// Pool empty; the queue was not touched.
    NoIds,
    QueueEmpty,
    Placed(OrderId),
    Cancelled(OrderId),
    /// The command was dropped or only partly carried out.
    Skipped(DispatchError),
}

/// Requests a running loop to disconnect.
#[derive(Debug, Clone, Default)]
pub struct Disconnector(Arc<AtomicBool>);

impl Disconnector {
    pub fn disconnect(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BrokerSession<C, Q, B: Backing> {
    client: C,
    commands: Q,
    store: OrderStore<B>,
    ids: IdPool,
    config: SessionConfig,
    stats: SessionStats,
    stop: Disconnector,
}

impl<C, Q, B> BrokerSession<C, Q, B>
where
    C: WireClient,
    Q: CommandSource,
    B: Backing,
{
    pub fn new(client: C, commands: Q, store: OrderStore<B>) -> Self {
        Self {
            client,
            commands,
            store,
            ids: IdPool::new(),
            config: SessionConfig::default(),
            stats: SessionStats::default(),
            stop: Disconnector::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn commands(&self) -> &Q {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut Q {
        &mut self.commands
    }

    pub fn store(&self) -> &OrderStore<B> {
        &self.store
    }

    pub fn ids(&self) -> &IdPool {
        &self.ids
    }

    pub fn id_state(&self) -> IdState {
        self.ids.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Opens the gateway connection, retrying with exponential backoff up
    /// to `connect_attempts` times, then spawns the dispatch loop on the
    /// current runtime. Nothing is spawned on failure.
    pub async fn connect(
        mut self,
        host: &str,
        port: u16,
        client_id: i32,
    ) -> Result<SessionHandle<C, Q, B>, SessionError>
    where
        C: 'static,
        Q: 'static,
        B: 'static,
    {
        let attempts = self.config.connect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.connect(host, port, client_id).await {
                Ok(()) => break,
                Err(source) if attempt >= attempts => {
                    error!(
                        "Cannot connect to {}:{} clientId:{} after {} attempt(s): {}",
                        host, port, client_id, attempt, source
                    );
                    return Err(SessionError::Connection {
                        host: host.to_string(),
                        port,
                        client_id,
                        source,
                    });
                }
                Err(e) => {
                    let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                    warn!(
                        "Connect attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        info!("Connected to {}:{} clientId:{}", host, port, client_id);
        let stop = self.stop.clone();
        let task = tokio::spawn(async move {
            self.dispatch_loop().await;
            self
        });
        Ok(SessionHandle { task, stop })
    }

    async fn dispatch_loop(&mut self) {
        info!("Dispatch loop started on '{}'", self.store.name());
        while self.client.is_connected() {
            if self.stop.requested() {
                info!("Disconnect requested");
                self.client.disconnect();
                break;
            }
            self.tick().await;
        }
        info!("Dispatch loop ended: {}", self.stats);
    }

    /// One loop iteration: dispatch at most one command, then wait up to
    /// the poll timeout for gateway traffic.
    pub async fn tick(&mut self) -> Dispatch {
        let dispatched = self.dispatch_one();
        self.pump().await;
        dispatched
    }

    /// First half of a tick.
    pub fn dispatch_one(&mut self) -> Dispatch {
        if self.ids.is_empty() {
            return Dispatch::NoIds;
        }

        let command = match self.commands.pull() {
            Ok(Some(command)) => command,
            Ok(None) => return Dispatch::QueueEmpty,
            Err(e) => return self.skip(DispatchError::Queue(e)),
        };

        let outcome = match command.instruction {
            Instruction::Place => self.place(command),
            Instruction::Cancel => self.cancel(&command),
            instruction => Err(DispatchError::MalformedCommand { instruction }),
        };
        outcome.unwrap_or_else(|e| self.skip(e))
    }

    fn place(&mut self, mut command: OrderCommand) -> Result<Dispatch, DispatchError> {
        let Some(order_id) = self.ids.take() else {
            return Ok(Dispatch::NoIds);
        };
        command.assign_id(order_id);

        let outcome = self.record_and_submit(&command);
        self.refill_if_empty();
        outcome
    }

    /// The record goes in before the order goes out; a rejected insert
    /// means no submission.
    fn record_and_submit(&mut self, command: &OrderCommand) -> Result<Dispatch, DispatchError> {
        let order_id = command.order_id;
        let record = OrderRecord::from_command(command).map_err(StoreError::from)?;
        if !self.store.insert(record)? {
            return Err(DispatchError::DuplicateKey { order_id });
        }

        self.client
            .place_order(order_id, &command.contract, &command.order)?;
        self.stats.placed += 1;
        info!("Placed {}", command);
        Ok(Dispatch::Placed(order_id))
    }

    fn cancel(&mut self, command: &OrderCommand) -> Result<Dispatch, DispatchError> {
        self.client.cancel_order(command.order_id)?;
        self.stats.cancelled += 1;
        info!("Cancel requested for order {}", command.order_id);
        Ok(Dispatch::Cancelled(command.order_id))
    }

    fn refill_if_empty(&mut self) {
        if !self.ids.begin_refill() {
            return;
        }
        match self.client.req_ids(REFILL_BATCH) {
            Ok(()) => {
                self.stats.refills_requested += 1;
                debug!("Id pool empty, requested {} more", REFILL_BATCH);
            }
            Err(e) => {
                warn!("Id refill request failed: {}", e);
                self.ids.abandon_refill();
            }
        }
    }

    fn skip(&mut self, error: DispatchError) -> Dispatch {
        match &error {
            DispatchError::MalformedCommand { .. }
            | DispatchError::Queue(QueueError::Codec { .. }) => {
                self.stats.discarded += 1;
                warn!("Discarding command: {}", error);
            }
            DispatchError::DuplicateKey { .. } => {
                self.stats.duplicates += 1;
                warn!("Not submitting: {}", error);
            }
            DispatchError::Store(_) => {
                self.stats.store_failures += 1;
                error!("Not submitting: {}", error);
            }
            DispatchError::Wire(_) => warn!("Submission failed: {}", error),
            DispatchError::Queue(_) | DispatchError::UnknownOrder { .. } => {
                warn!("{}", error)
            }
        }
        Dispatch::Skipped(error)
    }

    /// Second half of a tick.
    async fn pump(&mut self) {
        let mut sink = EventSink {
            ids: &mut self.ids,
            store: &self.store,
            stats: &mut self.stats,
            disconnect: false,
        };
        let result = self
            .client
            .process_messages(self.config.poll_timeout, &mut sink)
            .await;
        let disconnect = sink.disconnect;

        if let Err(e) = result {
            error!("Gateway connection failed: {}", e);
            self.client.disconnect();
        } else if disconnect {
            self.client.disconnect();
        }
    }
}

/// Running dispatch loop.
pub struct SessionHandle<C, Q, B: Backing> {
    task: JoinHandle<BrokerSession<C, Q, B>>,
    stop: Disconnector,
}

impl<C, Q, B: Backing> SessionHandle<C, Q, B> {
    /// Waits for the loop to end and hands the session back.
    pub async fn run(self) -> Result<BrokerSession<C, Q, B>, SessionError> {
        Ok(self.task.await?)
    }

    /// Lets another task end the loop.
    pub fn disconnector(&self) -> Disconnector {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Applies gateway callbacks to the pool and the store during one pump.
struct EventSink<'a, B: Backing> {
    ids: &'a mut IdPool,
    store: &'a OrderStore<B>,
    stats: &'a mut SessionStats,
    disconnect: bool,
}

impl<B: Backing> OrderEvents for EventSink<'_, B> {
    fn next_valid_id(&mut self, order_id: OrderId) {
        self.ids.deliver(order_id);
        self.stats.ids_received += 1;
        debug!("Received order id {} ({} pooled)", order_id, self.ids.len());
    }

    fn order_status(&mut self, order_id: OrderId, response: OrderResponse) {
        let status = response.status.clone();
        match self
            .store
            .modify_command(order_id, |command| command.record_response(response))
        {
            Ok(Some(())) => {
                self.stats.status_updates += 1;
                debug!("Order {} status {}", order_id, status);
            }
            Ok(None) => {
                self.stats.unknown_status += 1;
                debug!("{}", DispatchError::UnknownOrder { order_id });
            }
            Err(e) => {
                self.stats.store_failures += 1;
                warn!("Status {} for order {} not stored: {}", status, order_id, e);
            }
        }
    }

    fn error(&mut self, id: i64, code: i32, message: &str) {
        if id == NO_REQUEST && code == CONNECTIVITY_LOST {
            error!("Gateway lost connectivity ({}): {}", code, message);
            self.disconnect = true;
        } else if NOTICE_CODES.contains(&code) {
            info!("Gateway notice {}: {}", code, message);
        } else {
            warn!("Gateway error id={} code={}: {}", id, code, message);
        }
    }

    fn connection_closed(&mut self) {
        warn!("Gateway connection closed");
        self.disconnect = true;
    }
}
