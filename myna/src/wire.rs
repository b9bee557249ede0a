//! Packet wire protocol: stateless framing and unframing.
//!
//! A packet is `[optional preamble][envelope record][payload]`. Every
//! record is a 1-byte id followed by a fixed body; all multi-byte integers
//! are little-endian. Decoding is strictly sequential, record by record:
//! a truncated buffer is `WireError::UnexpectedEnd`, an unknown record id
//! or enum byte is `WireError::InvalidFormat`. The byte layout is a wire
//! contract; peers interoperate only if both sides match it exactly.

use crate::error::WireError;
use bytes::{BufMut, Bytes, BytesMut};

// --- Record ids ---

/// Sized envelope: `[u32 LE payload length][u16 LE extra]`, payload
/// bytes follow.
pub const RECORD_SIZED_ENVELOPE: u8 = 0x05;
/// End of the packet stream.
pub const RECORD_END: u8 = 0x06;
/// Packet fault: `[u8 fault code]`.
pub const RECORD_FAULT: u8 = 0x07;
/// Zero-length acknowledge.
pub const RECORD_ACK: u8 = 0x08;
/// End of the preamble.
pub const RECORD_PREAMBLE_END: u8 = 0x09;

pub const PROTOCOL_MAJOR: u8 = 1;
pub const PROTOCOL_MINOR: u8 = 1;

/// Upper bound of the 2-byte "via" length prefix.
pub const MAX_VIA_LEN: usize = u16::MAX as usize;

/// Upper bound on a sized envelope's payload. Writers refuse to frame
/// anything larger; readers refuse to allocate for a length field that
/// claims more.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

// --- Preamble field enums ---

/// Session communication mode, first preamble enum byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommunicationMode {
    SingletonUnsized = 0,
    Duplex = 1,
    Simplex = 2,
    SingletonSized = 3,
}

impl CommunicationMode {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            0 => Ok(Self::SingletonUnsized),
            1 => Ok(Self::Duplex),
            2 => Ok(Self::Simplex),
            3 => Ok(Self::SingletonSized),
            other => Err(WireError::InvalidFormat(format!(
                "unknown communication mode {other:#04x}"
            ))),
        }
    }
}

/// Character encoding of envelope payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeEncoding {
    Utf8 = 0,
    Utf16Be = 1,
    Utf16Le = 2,
    Raw = 3,
}

impl EnvelopeEncoding {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            0 => Ok(Self::Utf8),
            1 => Ok(Self::Utf16Be),
            2 => Ok(Self::Utf16Le),
            3 => Ok(Self::Raw),
            other => Err(WireError::InvalidFormat(format!(
                "unknown envelope encoding {other:#04x}"
            ))),
        }
    }
}

/// Structure of envelope payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeStructure {
    FormattedString = 0,
    XmlString = 1,
    SerializedObject = 2,
    Raw = 3,
}

impl EnvelopeStructure {
    pub fn from_byte(b: u8) -> Result<Self, WireError> {
        match b {
            0 => Ok(Self::FormattedString),
            1 => Ok(Self::XmlString),
            2 => Ok(Self::SerializedObject),
            3 => Ok(Self::Raw),
            other => Err(WireError::InvalidFormat(format!(
                "unknown envelope structure {other:#04x}"
            ))),
        }
    }
}

// --- Preamble ---

/// Session preamble, sent once as the head of the first packet:
/// `[u8 major][u8 minor][u8 mode][u16 LE via length][via bytes]
/// [u8 encoding][u8 structure][0x09]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preamble {
    pub major: u8,
    pub minor: u8,
    pub mode: CommunicationMode,
    /// Destination URI of the session, at most [`MAX_VIA_LEN`] bytes.
    pub via: String,
    pub encoding: EnvelopeEncoding,
    pub structure: EnvelopeStructure,
}

impl Preamble {
    pub fn new(via: impl Into<String>) -> Self {
        Self {
            via: via.into(),
            ..Self::default()
        }
    }
}

impl Default for Preamble {
    fn default() -> Self {
        Self {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            mode: CommunicationMode::Duplex,
            via: String::new(),
            encoding: EnvelopeEncoding::Utf8,
            structure: EnvelopeStructure::SerializedObject,
        }
    }
}

// --- Encoding ---

fn put_preamble(buf: &mut BytesMut, preamble: &Preamble) -> Result<(), WireError> {
    let via = preamble.via.as_bytes();
    if via.len() > MAX_VIA_LEN {
        return Err(WireError::ViaTooLong(via.len()));
    }
    buf.put_u8(preamble.major);
    buf.put_u8(preamble.minor);
    buf.put_u8(preamble.mode as u8);
    buf.put_u16_le(via.len() as u16);
    buf.put_slice(via);
    buf.put_u8(preamble.encoding as u8);
    buf.put_u8(preamble.structure as u8);
    buf.put_u8(RECORD_PREAMBLE_END);
    Ok(())
}

/// Encodes a preamble on its own, for transports that write it once at
/// the head of the session byte stream rather than per packet.
pub fn encode_preamble(preamble: &Preamble) -> Result<Vec<u8>, WireError> {
    let mut buf = BytesMut::with_capacity(preamble.via.len() + 8);
    put_preamble(&mut buf, preamble)?;
    Ok(buf.to_vec())
}

/// Encodes the sized-envelope record announcing `payload_len` bytes.
pub fn encode_sized_envelope(payload_len: u32) -> [u8; 7] {
    let mut rec = [0u8; 7];
    rec[0] = RECORD_SIZED_ENVELOPE;
    rec[1..5].copy_from_slice(&payload_len.to_le_bytes());
    // bytes 5..7: extra field, reserved as zero
    rec
}

pub fn encode_ack() -> [u8; 1] {
    [RECORD_ACK]
}

pub fn encode_end() -> [u8; 1] {
    [RECORD_END]
}

pub fn encode_fault(code: u8) -> [u8; 2] {
    [RECORD_FAULT, code]
}

/// Frames one packet: `[preamble?][sized envelope][payload]`.
///
/// Fails when the preamble's via URI exceeds [`MAX_VIA_LEN`] or the
/// payload exceeds [`MAX_PAYLOAD_LEN`]; neither is ever silently
/// truncated.
pub fn frame(preamble: Option<&Preamble>, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::InvalidFormat(format!(
            "payload of {} bytes exceeds the {MAX_PAYLOAD_LEN}-byte envelope limit",
            payload.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 32);
    if let Some(p) = preamble {
        put_preamble(&mut buf, p)?;
    }
    buf.put_slice(&encode_sized_envelope(payload.len() as u32));
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

// --- Decoding ---

/// Sequential reader over one packet buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek_u8(&self) -> Result<u8, WireError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(WireError::UnexpectedEnd)
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::UnexpectedEnd)?;
        if end > self.buf.len() {
            return Err(WireError::UnexpectedEnd);
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn read_u16_le(&mut self) -> Result<u16, WireError> {
        let s = self.read_slice(2)?;
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    fn read_u32_le(&mut self) -> Result<u32, WireError> {
        let s = self.read_slice(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn read_preamble(r: &mut Reader<'_>) -> Result<Preamble, WireError> {
    let major = r.read_u8()?;
    let minor = r.read_u8()?;
    let mode = CommunicationMode::from_byte(r.read_u8()?)?;
    let via_len = r.read_u16_le()? as usize;
    let via = std::str::from_utf8(r.read_slice(via_len)?)
        .map_err(|_| WireError::InvalidFormat("via URI is not valid UTF-8".to_string()))?
        .to_string();
    let encoding = EnvelopeEncoding::from_byte(r.read_u8()?)?;
    let structure = EnvelopeStructure::from_byte(r.read_u8()?)?;
    match r.read_u8()? {
        RECORD_PREAMBLE_END => {}
        other => {
            return Err(WireError::InvalidFormat(format!(
                "expected end-of-preamble record, found {other:#04x}"
            )));
        }
    }
    Ok(Preamble {
        major,
        minor,
        mode,
        via,
        encoding,
        structure,
    })
}

/// Unframes one packet produced by [`frame`], returning the preamble (if
/// the packet carried one) and the payload.
///
/// A buffer starting with the sized-envelope record id has no preamble;
/// anything else is decoded as a preamble first. Unambiguous because the
/// protocol major version (the preamble's first byte) is never a record
/// id.
pub fn unframe(buf: &[u8]) -> Result<(Option<Preamble>, Bytes), WireError> {
    let mut r = Reader::new(buf);
    let preamble = if r.peek_u8()? == RECORD_SIZED_ENVELOPE {
        None
    } else {
        Some(read_preamble(&mut r)?)
    };
    match r.read_u8()? {
        RECORD_SIZED_ENVELOPE => {}
        other => {
            return Err(WireError::InvalidFormat(format!(
                "expected sized-envelope record, found {other:#04x}"
            )));
        }
    }
    let len = r.read_u32_le()? as usize;
    let _extra = r.read_u16_le()?;
    let payload = r.read_slice(len)?;
    if r.remaining() != 0 {
        return Err(WireError::InvalidFormat(format!(
            "{} trailing bytes after payload",
            r.remaining()
        )));
    }
    Ok((preamble, Bytes::copy_from_slice(payload)))
}
