// src/domain/envelope.rs

//! Wire envelope shared by every transport.
//!
//! Layout (big-endian):
//!
//! ```text
//! +----------+-----------+---------------------+
//! | id: i32  | len: u16  | payload: len bytes  |
//! +----------+-----------+---------------------+
//! ```
//!
//! The id exists purely for duplicate suppression. The payload is a UTF-8
//! string carried with the same 16-bit length prefix the forwarding bridge
//! uses for its frame fields; see [`put_utf`] and [`get_utf`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;

use crate::{Error, Result};

/// Largest id handed out by [`Envelope::new`].
pub const MAX_MESSAGE_ID: i32 = 999_999;

/// Maximum encoded length of a single length-prefixed string.
pub const MAX_UTF_LEN: usize = u16::MAX as usize;

/// A message id plus its UTF-8 payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub id: i32,
    pub payload: String,
}

impl Envelope {
    // ---

    /// Wrap `payload` with a fresh random id in `0..=999_999`.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: rand::thread_rng().gen_range(0..=MAX_MESSAGE_ID),
            payload: payload.into(),
        }
    }

    pub fn with_id(id: i32, payload: impl Into<String>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        // ---
        let mut buf = BytesMut::with_capacity(4 + 2 + self.payload.len());
        buf.put_i32(self.id);
        put_utf(&mut buf, &self.payload)?;
        Ok(buf.freeze())
    }

    /// Decode an envelope, rejecting short input, invalid UTF-8 and trailing bytes.
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        // ---
        if bytes.remaining() < 4 {
            return Err(Error::Decode(format!(
                "envelope too short: {} bytes",
                bytes.len()
            )));
        }
        let id = bytes.get_i32();
        let payload = get_utf(&mut bytes)?;

        if bytes.has_remaining() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after envelope",
                bytes.remaining()
            )));
        }

        Ok(Self { id, payload })
    }
}

/// Append a 16-bit length-prefixed UTF-8 string.
pub fn put_utf(buf: &mut impl BufMut, value: &str) -> Result<()> {
    // ---
    put_blob(buf, value.as_bytes())
}

/// Append a 16-bit length-prefixed byte block.
pub fn put_blob(buf: &mut impl BufMut, value: &[u8]) -> Result<()> {
    // ---
    let len = u16::try_from(value.len()).map_err(|_| Error::PayloadTooLarge(value.len()))?;
    buf.put_u16(len);
    buf.put_slice(value);
    Ok(())
}

/// Read a 16-bit length-prefixed UTF-8 string.
pub fn get_utf(buf: &mut impl Buf) -> Result<String> {
    // ---
    let raw = get_blob(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|err| Error::Decode(format!("string is not valid UTF-8: {err}")))
}

/// Read a 16-bit length-prefixed byte block.
pub fn get_blob(buf: &mut impl Buf) -> Result<Bytes> {
    // ---
    if buf.remaining() < 2 {
        return Err(Error::Decode("missing length prefix".into()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::Decode(format!(
            "length prefix {len} exceeds remaining {} bytes",
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}
