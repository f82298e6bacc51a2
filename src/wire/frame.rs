//! Gateway message framing
//!
//! Every message after the handshake prefix is a frame: a 4-byte
//! big-endian length followed by that many bytes of NUL-terminated ASCII
//! fields. The first field of an inbound message is its numeric id.

use crate::error::WireError;

/// Sent once, unframed, before the version range.
pub const API_PREFIX: &[u8] = b"API\0";

/// Largest frame accepted from the gateway.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Frames an arbitrary payload.
pub fn encode_raw(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Frames a message made of NUL-terminated fields.
pub fn encode_fields<S: AsRef<str>>(fields: &[S]) -> Vec<u8> {
    let mut payload = Vec::new();
    for field in fields {
        payload.extend_from_slice(field.as_ref().as_bytes());
        payload.push(0);
    }
    encode_raw(&payload)
}

/// Removes one complete frame from the front of `buf` and splits it into
/// fields. `Ok(None)` while the frame is still incomplete.
pub fn take_frame(buf: &mut Vec<u8>) -> Result<Option<Vec<String>>, WireError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let mut len = [0u8; LEN_PREFIX];
    len.copy_from_slice(&buf[..LEN_PREFIX]);
    let len = u32::from_be_bytes(len) as usize;

    if len > MAX_FRAME_LEN {
        return Err(WireError::Protocol {
            msg_id: 0,
            detail: format!("frame of {} bytes exceeds limit", len),
        });
    }
    if buf.len() < LEN_PREFIX + len {
        return Ok(None);
    }

    let frame: Vec<u8> = buf.drain(..LEN_PREFIX + len).skip(LEN_PREFIX).collect();
    Ok(Some(split_fields(&frame)))
}

fn split_fields(payload: &[u8]) -> Vec<String> {
    let body = payload.strip_suffix(&[0u8]).unwrap_or(payload);
    if body.is_empty() {
        return Vec::new();
    }
    body.split(|b| *b == 0)
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect()
}

/// Sequential reader over the fields of one inbound message.
pub struct FieldReader<'a> {
    msg_id: i32,
    fields: std::slice::Iter<'a, String>,
}

impl<'a> FieldReader<'a> {
    /// Reads the message id from the first field.
    pub fn new(fields: &'a [String]) -> Result<Self, WireError> {
        let mut reader = Self {
            msg_id: 0,
            fields: fields.iter(),
        };
        reader.msg_id = reader.int()?;
        Ok(reader)
    }

    pub fn msg_id(&self) -> i32 {
        self.msg_id
    }

    pub fn string(&mut self) -> Result<String, WireError> {
        self.fields.next().cloned().ok_or_else(|| WireError::Protocol {
            msg_id: self.msg_id,
            detail: "message ended early".to_string(),
        })
    }

    pub fn int(&mut self) -> Result<i32, WireError> {
        Ok(self.long()? as i32)
    }

    /// Empty fields read as zero.
    pub fn long(&mut self) -> Result<i64, WireError> {
        let raw = self.string()?;
        if raw.is_empty() {
            return Ok(0);
        }
        raw.trim().parse().map_err(|_| self.bad(&raw))
    }

    /// Empty fields read as zero.
    pub fn double(&mut self) -> Result<f64, WireError> {
        let raw = self.string()?;
        if raw.is_empty() {
            return Ok(0.0);
        }
        raw.trim().parse().map_err(|_| self.bad(&raw))
    }

    /// Quantities arrive as decimals; the store keeps whole units.
    pub fn quantity(&mut self) -> Result<i64, WireError> {
        Ok(self.double()?.round() as i64)
    }

    pub fn skip(&mut self) -> Result<(), WireError> {
        self.string().map(|_| ())
    }

    fn bad(&self, raw: &str) -> WireError {
        WireError::Protocol {
            msg_id: self.msg_id,
            detail: format!("unparseable field '{}'", raw),
        }
    }
}
