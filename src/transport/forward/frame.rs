//! Wire frame of the forwarding bridge.
//!
//! ```text
//! UTF  subchannel   always "Forward"
//! UTF  target       "ALL" or a server name
//! UTF  channel      logical channel
//! u16  length
//! [u8] payload      length bytes
//! ```
//!
//! Every UTF field is a big-endian u16 length followed by UTF-8 bytes.

use bytes::{Bytes, BytesMut};

use crate::{
    //
    get_blob,
    get_utf,
    put_blob,
    put_utf,
    Error,
    Result,
};

/// Subchannel tag of forwarded traffic.
pub const FORWARD_SUBCHANNEL: &str = "Forward";

/// Target selector meaning every destination.
pub const TARGET_ALL: &str = "ALL";

/// Where a forwarded frame is headed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    All,
    Server(String),
}

impl Target {
    pub fn as_str(&self) -> &str {
        match self {
            Target::All => TARGET_ALL,
            Target::Server(name) => name.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == TARGET_ALL {
            Target::All
        } else {
            Target::Server(value.to_string())
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardFrame {
    pub target: Target,
    pub channel: String,
    pub payload: Bytes,
}

impl ForwardFrame {
    // ---

    pub fn new(target: Target, channel: impl Into<String>, payload: Bytes) -> Self {
        Self {
            target,
            channel: channel.into(),
            payload,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        // ---
        let mut buf = BytesMut::with_capacity(
            8 + FORWARD_SUBCHANNEL.len()
                + self.target.as_str().len()
                + self.channel.len()
                + self.payload.len(),
        );
        put_utf(&mut buf, FORWARD_SUBCHANNEL)?;
        put_utf(&mut buf, self.target.as_str())?;
        put_utf(&mut buf, &self.channel)?;
        put_blob(&mut buf, &self.payload)?;
        Ok(buf.freeze())
    }

    /// Decode a frame read from the host channel.
    ///
    /// Returns `Ok(None)` for well-formed traffic on another subchannel.
    pub fn decode(mut bytes: &[u8]) -> Result<Option<Self>> {
        // ---
        let subchannel = get_utf(&mut bytes)?;
        if subchannel != FORWARD_SUBCHANNEL {
            return Ok(None);
        }

        let target = Target::parse(&get_utf(&mut bytes)?);
        let channel = get_utf(&mut bytes)?;
        let payload = get_blob(&mut bytes)?;

        if !bytes.is_empty() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after forward frame",
                bytes.len()
            )));
        }

        Ok(Some(Self {
            target,
            channel,
            payload,
        }))
    }
}
