//! Error types for the order cache and the dispatch session
//!
//! Fatal conditions (`StoreError::Unavailable`, `SessionError::Connection`)
//! end a session. Everything a dispatch tick can run into is expressed as a
//! `DispatchError`, which the session logs and absorbs.

use std::path::PathBuf;

use crate::command::{Instruction, OrderId};

/// Payload envelope could not be produced or read back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("incompatible payload envelope tag {found:02x?}")]
    Envelope { found: [u8; 4] },

    #[error("payload length mismatch: header says {declared} bytes, body has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload too large to frame: {0} bytes")]
    Oversized(usize),

    #[error("payload encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("payload decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Errors raised by [`crate::store::OrderStore`] and its backings.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order segment '{name}' unavailable at {}: {reason}", .path.display())]
    Unavailable {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("order segment backend failure: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("corrupt row for order {order_id}: {detail}")]
    CorruptRow { order_id: OrderId, detail: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors raised by a [`crate::queue::CommandSource`].
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("command queue '{name}' unavailable at {}: {reason}", .path.display())]
    Unavailable {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("command queue backend failure: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("command could not be encoded: {0}")]
    Encode(#[from] CodecError),

    #[error("undecodable command in queue slot {seq}: {source}")]
    Codec { seq: i64, source: CodecError },
}

/// Errors raised by a [`crate::wire::WireClient`].
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("malformed message {msg_id}: {detail}")]
    Protocol { msg_id: i32, detail: String },

    #[error("not connected")]
    NotConnected,
}

/// Non-fatal outcomes of a dispatch tick. Logged and absorbed by the loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed command: instruction {instruction:?} is neither PLACE nor CANCEL")]
    MalformedCommand { instruction: Instruction },

    #[error("order {order_id} already present in the order segment")]
    DuplicateKey { order_id: OrderId },

    #[error("status callback for unknown order {order_id}")]
    UnknownOrder { order_id: OrderId },

    #[error("order segment write failed: {0}")]
    Store(#[from] StoreError),

    #[error("command queue failure: {0}")]
    Queue(#[from] QueueError),

    #[error("gateway rejected request: {0}")]
    Wire(#[from] WireError),
}

/// Fatal session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot connect to {host}:{port} clientId:{client_id}: {source}")]
    Connection {
        host: String,
        port: u16,
        client_id: i32,
        #[source]
        source: WireError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("dispatch task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}
