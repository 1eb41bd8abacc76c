//! Codec for the UDP discovery datagrams.
//!
//! Wire format:
//! ```text
//! [tag:N][separator:1][port:5]
//! ```
//! `tag` is an arbitrary byte string identifying the datagram's role (query or
//! response).  `port` is the decimal port number, left-padded with `'0'` to
//! exactly five ASCII digits.
//!
//! The decoder never looks for the separator: it always takes the last five
//! bytes as the port field and everything before the separator position as
//! the tag.  A tag may therefore contain `':'` without confusing the decoder.

use thiserror::Error;

/// Width of the zero-padded decimal port field.
pub const PORT_FIELD_LEN: usize = 5;

/// Byte written between the tag and the port field.
pub const SEPARATOR: u8 = b':';

/// Errors that can occur while decoding a discovery datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The datagram does not carry a well-formed port field.
    #[error("malformed discovery message: {0}")]
    MalformedMessage(String),
}

/// A decoded discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMessage {
    /// Role tag, e.g. `b"bt-discovery"` for queries.
    pub tag: Vec<u8>,
    /// The port embedded in the datagram: the reply port for a query, the
    /// advertised service port for a response.
    pub port: u16,
}

impl DiscoveryMessage {
    /// Creates a message from a tag and a port.
    pub fn new(tag: impl Into<Vec<u8>>, port: u16) -> Self {
        Self {
            tag: tag.into(),
            port,
        }
    }

    /// Encodes the message into datagram bytes.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.tag, self.port)
    }

    /// Decodes a datagram.  See [`decode`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::MalformedMessage`] if the port field is invalid.
    pub fn decode(raw: &[u8]) -> Result<Self, MessageError> {
        decode(raw)
    }

    /// Returns `true` when this message carries exactly `tag`.
    pub fn has_tag(&self, tag: &[u8]) -> bool {
        self.tag == tag
    }
}

/// Appends the separator and the five-digit port field to `tag`.
///
/// # Examples
///
/// ```rust
/// use btremote_core::protocol::discovery::encode;
///
/// assert_eq!(encode(b"bt-discovery", 80), b"bt-discovery:00080".to_vec());
/// ```
pub fn encode(tag: &[u8], port: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tag.len() + 1 + PORT_FIELD_LEN);
    buf.extend_from_slice(tag);
    buf.push(SEPARATOR);
    // u16::MAX has five digits, so the field never overflows.
    buf.extend_from_slice(format!("{port:0width$}", width = PORT_FIELD_LEN).as_bytes());
    buf
}

/// Splits `raw` into its tag and port.
///
/// `tag = raw[..len - 6]`, `port = raw[len - 5..]` parsed as base 10.
///
/// # Errors
///
/// Returns [`MessageError::MalformedMessage`] when the datagram is shorter
/// than the separator plus the port field, when the port field contains
/// anything other than ASCII digits, or when the value does not fit a port.
///
/// # Examples
///
/// ```rust
/// use btremote_core::protocol::discovery::decode;
///
/// let msg = decode(b"bt-discovery-server:09001").unwrap();
/// assert_eq!(msg.tag, b"bt-discovery-server".to_vec());
/// assert_eq!(msg.port, 9001);
/// ```
pub fn decode(raw: &[u8]) -> Result<DiscoveryMessage, MessageError> {
    let min_len = PORT_FIELD_LEN + 1;
    if raw.len() < min_len {
        return Err(MessageError::MalformedMessage(format!(
            "need at least {min_len} bytes, got {}",
            raw.len()
        )));
    }

    let field = &raw[raw.len() - PORT_FIELD_LEN..];
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(MessageError::MalformedMessage(format!(
            "port field {:?} is not decimal",
            String::from_utf8_lossy(field)
        )));
    }

    // Five ASCII digits always fit in a u32.
    let value = field
        .iter()
        .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));
    let port = u16::try_from(value).map_err(|_| {
        MessageError::MalformedMessage(format!("port {value} is out of range"))
    })?;

    Ok(DiscoveryMessage {
        tag: raw[..raw.len() - min_len].to_vec(),
        port,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
