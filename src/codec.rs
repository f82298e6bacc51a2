//! Payload codec for stored orders
//!
//! A payload is a small binary envelope around a MessagePack body:
//!
//! ```text
//! +----------------+----------------------+------------------+
//! | tag  "OBC\x01" | body length (u32 BE) | rmp-serde body   |
//! +----------------+----------------------+------------------+
//! ```
//!
//! Encoding is a pure function of the command's fields, so two equal
//! commands always produce identical bytes.

use crate::command::{OrderCommand, OrderId};
use crate::error::CodecError;

/// Magic plus envelope version. Bumped whenever the body layout changes.
pub const ENVELOPE_TAG: [u8; 4] = *b"OBC\x01";

const HEADER_LEN: usize = 8;

/// Serializes every field of `command` into an envelope.
pub fn encode(command: &OrderCommand) -> Result<Vec<u8>, CodecError> {
    let body = rmp_serde::to_vec(command)?;
    let len = u32::try_from(body.len()).map_err(|_| CodecError::Oversized(body.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&ENVELOPE_TAG);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Inverse of [`encode`].
pub fn decode(bytes: &[u8]) -> Result<OrderCommand, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let mut tag = [0u8; 4];
    tag.copy_from_slice(&bytes[..4]);
    if tag != ENVELOPE_TAG {
        return Err(CodecError::Envelope { found: tag });
    }

    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[4..HEADER_LEN]);
    let declared = u32::from_be_bytes(len) as usize;
    let body = &bytes[HEADER_LEN..];

    if body.len() < declared {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN + declared,
            available: bytes.len(),
        });
    }
    if body.len() > declared {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    Ok(rmp_serde::from_slice(body)?)
}

/// The indexable fields of a command: `(account, ticker, order_id)`.
pub fn derive_keys(command: &OrderCommand) -> (String, String, OrderId) {
    (
        command.order.account.clone(),
        command.contract.symbol.clone(),
        command.order_id,
    )
}
