//! BACnet/IP wire encoding and decoding
//!
//! Three layers share every datagram: BVLL (Annex J virtual link layer),
//! a minimal NPDU, and the APDU carrying the service payload. Application
//! and context tag primitives live here together with the per-service
//! payload codecs (Who-Is, I-Am, ReadProperty, WriteProperty, SubscribeCOV,
//! COV notification).

use crate::constants::*;
use crate::error::{BacnetError, BacnetResult};
use crate::object::ObjectIdentifier;
use crate::value::BacnetValue;

// ============================================================================
// Tag encoding primitives
// ============================================================================

fn push_tag(buf: &mut Vec<u8>, number: u8, context: bool, length: usize) {
    let class_bit = if context { 0x08 } else { 0x00 };
    if length < 5 {
        buf.push((number << 4) | class_bit | length as u8);
        return;
    }
    // Extended length: one octet up to 253, then the 254/255 escapes for
    // two- and four-octet lengths
    buf.push((number << 4) | class_bit | 0x05);
    if length <= 253 {
        buf.push(length as u8);
    } else if let Ok(short) = u16::try_from(length) {
        buf.push(254);
        buf.extend_from_slice(&short.to_be_bytes());
    } else {
        buf.push(255);
        buf.extend_from_slice(&(length as u32).to_be_bytes());
    }
}

/// Minimal big-endian octets of an unsigned value (at least one)
fn unsigned_octets(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(3).take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

pub fn encode_app_null(buf: &mut Vec<u8>) {
    buf.push(TAG_NULL << 4);
}

pub fn encode_app_boolean(buf: &mut Vec<u8>, value: bool) {
    // Application booleans carry the value in the length field
    buf.push((TAG_BOOLEAN << 4) | u8::from(value));
}

pub fn encode_app_unsigned(buf: &mut Vec<u8>, value: u32) {
    let octets = unsigned_octets(value);
    push_tag(buf, TAG_UNSIGNED, false, octets.len());
    buf.extend_from_slice(&octets);
}

pub fn encode_app_enumerated(buf: &mut Vec<u8>, value: u32) {
    let octets = unsigned_octets(value);
    push_tag(buf, TAG_ENUMERATED, false, octets.len());
    buf.extend_from_slice(&octets);
}

pub fn encode_app_real(buf: &mut Vec<u8>, value: f32) {
    push_tag(buf, TAG_REAL, false, 4);
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn encode_app_character_string(buf: &mut Vec<u8>, value: &str) {
    // Length includes the character set octet
    push_tag(buf, TAG_CHARACTER_STRING, false, value.len() + 1);
    buf.push(CHARSET_UTF8);
    buf.extend_from_slice(value.as_bytes());
}

/// Encode an application Date: year since 1900, month, day, weekday
/// (255 marks an unspecified weekday)
pub fn encode_app_date(buf: &mut Vec<u8>, octets: [u8; 4]) {
    push_tag(buf, TAG_DATE, false, 4);
    buf.extend_from_slice(&octets);
}

/// Encode an application Time: hour, minute, second, hundredths
pub fn encode_app_time(buf: &mut Vec<u8>, octets: [u8; 4]) {
    push_tag(buf, TAG_TIME, false, 4);
    buf.extend_from_slice(&octets);
}

pub fn encode_app_object_id(buf: &mut Vec<u8>, id: ObjectIdentifier) {
    push_tag(buf, TAG_OBJECT_IDENTIFIER, false, 4);
    buf.extend_from_slice(&id.encode().to_be_bytes());
}

pub fn encode_context_unsigned(buf: &mut Vec<u8>, tag: u8, value: u32) {
    let octets = unsigned_octets(value);
    push_tag(buf, tag, true, octets.len());
    buf.extend_from_slice(&octets);
}

pub fn encode_context_object_id(buf: &mut Vec<u8>, tag: u8, id: ObjectIdentifier) {
    push_tag(buf, tag, true, 4);
    buf.extend_from_slice(&id.encode().to_be_bytes());
}

pub fn encode_context_boolean(buf: &mut Vec<u8>, tag: u8, value: bool) {
    push_tag(buf, tag, true, 1);
    buf.push(u8::from(value));
}

pub fn encode_opening_tag(buf: &mut Vec<u8>, tag: u8) {
    buf.push((tag << 4) | 0x0E);
}

pub fn encode_closing_tag(buf: &mut Vec<u8>, tag: u8) {
    buf.push((tag << 4) | 0x0F);
}

/// Encode a [`BacnetValue`] with its application tag
pub fn encode_app_value(buf: &mut Vec<u8>, value: &BacnetValue) {
    match value {
        BacnetValue::Null => encode_app_null(buf),
        BacnetValue::Binary(v) => encode_app_enumerated(buf, u32::from(*v)),
        BacnetValue::Real(v) => encode_app_real(buf, *v),
        BacnetValue::Unsigned(v) => encode_app_unsigned(buf, *v),
        BacnetValue::Enumerated(v) => encode_app_enumerated(buf, *v),
        BacnetValue::CharacterString(s) => encode_app_character_string(buf, s),
        BacnetValue::StateText(labels) => {
            for label in labels {
                encode_app_character_string(buf, label);
            }
        }
    }
}

// ============================================================================
// Tag decoding primitives
// ============================================================================

/// Parsed tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub number: u8,
    pub context: bool,
    pub length: usize,
    pub opening: bool,
    pub closing: bool,
    /// Raw length/value/type field, needed for application booleans
    pub lvt: u8,
    /// Octets occupied by the tag byte and any extended length form
    header_len: usize,
}

/// Cursor over an APDU payload
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn short(&self, what: &str) -> BacnetError {
        BacnetError::protocol(format!("truncated payload while reading {what}"))
    }

    fn take(&mut self, n: usize, what: &str) -> BacnetResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(self.short(what));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read the tag header at the cursor without consuming it
    pub fn peek_tag(&self) -> BacnetResult<TagHeader> {
        let mut pos = self.pos;
        if pos >= self.data.len() {
            return Err(self.short("tag"));
        }
        let byte = self.data[pos];
        pos += 1;

        let number = byte >> 4;
        let context = byte & 0x08 != 0;
        let lvt = byte & 0x07;

        let (opening, closing) = (context && lvt == 6, context && lvt == 7);
        let mut header_len = 1;
        let length = if opening || closing {
            0
        } else if lvt == 5 {
            if pos >= self.data.len() {
                return Err(self.short("extended tag length"));
            }
            let ext = self.data[pos];
            pos += 1;
            header_len += 1;
            match ext {
                // Two- and four-octet extended length escapes
                254 => {
                    if pos + 2 > self.data.len() {
                        return Err(self.short("extended tag length"));
                    }
                    header_len += 2;
                    u16::from_be_bytes([self.data[pos], self.data[pos + 1]]) as usize
                }
                255 => {
                    if pos + 4 > self.data.len() {
                        return Err(self.short("extended tag length"));
                    }
                    header_len += 4;
                    u32::from_be_bytes([
                        self.data[pos],
                        self.data[pos + 1],
                        self.data[pos + 2],
                        self.data[pos + 3],
                    ]) as usize
                }
                n => n as usize,
            }
        } else {
            lvt as usize
        };

        Ok(TagHeader {
            number,
            context,
            length,
            opening,
            closing,
            lvt,
            header_len,
        })
    }

    fn consume_tag(&mut self) -> BacnetResult<TagHeader> {
        let header = self.peek_tag()?;
        self.pos += header.header_len;
        Ok(header)
    }

    fn read_unsigned_content(&mut self, length: usize) -> BacnetResult<u32> {
        if length == 0 || length > 4 {
            return Err(BacnetError::protocol(format!(
                "unsigned content length {length} out of range"
            )));
        }
        let octets = self.take(length, "unsigned")?;
        let mut value = 0u32;
        for b in octets {
            value = (value << 8) | u32::from(*b);
        }
        Ok(value)
    }

    /// Read an application-tagged unsigned integer
    pub fn read_app_unsigned(&mut self) -> BacnetResult<u32> {
        let header = self.consume_tag()?;
        if header.context || header.number != TAG_UNSIGNED {
            return Err(BacnetError::protocol("expected application unsigned"));
        }
        self.read_unsigned_content(header.length)
    }

    /// Read an application-tagged enumerated value
    pub fn read_app_enumerated(&mut self) -> BacnetResult<u32> {
        let header = self.consume_tag()?;
        if header.context || header.number != TAG_ENUMERATED {
            return Err(BacnetError::protocol("expected application enumerated"));
        }
        self.read_unsigned_content(header.length)
    }

    /// Read an application-tagged object identifier
    pub fn read_app_object_id(&mut self) -> BacnetResult<ObjectIdentifier> {
        let header = self.consume_tag()?;
        if header.context || header.number != TAG_OBJECT_IDENTIFIER || header.length != 4 {
            return Err(BacnetError::protocol("expected application object identifier"));
        }
        let octets = self.take(4, "object identifier")?;
        ObjectIdentifier::decode(u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]))
    }

    /// Read a context-tagged unsigned integer with the expected tag number
    pub fn read_context_unsigned(&mut self, tag: u8) -> BacnetResult<u32> {
        let header = self.consume_tag()?;
        if !header.context || header.number != tag || header.opening || header.closing {
            return Err(BacnetError::protocol(format!(
                "expected context tag {tag} (unsigned)"
            )));
        }
        self.read_unsigned_content(header.length)
    }

    /// Read a context-tagged object identifier with the expected tag number
    pub fn read_context_object_id(&mut self, tag: u8) -> BacnetResult<ObjectIdentifier> {
        let header = self.consume_tag()?;
        if !header.context || header.number != tag || header.length != 4 {
            return Err(BacnetError::protocol(format!(
                "expected context tag {tag} (object identifier)"
            )));
        }
        let octets = self.take(4, "object identifier")?;
        ObjectIdentifier::decode(u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]))
    }

    /// Read an application Date's four content octets
    pub fn read_app_date(&mut self) -> BacnetResult<[u8; 4]> {
        let header = self.consume_tag()?;
        if header.context || header.number != TAG_DATE || header.length != 4 {
            return Err(BacnetError::protocol("expected application date"));
        }
        let octets = self.take(4, "date")?;
        Ok([octets[0], octets[1], octets[2], octets[3]])
    }

    /// Read an application Time's four content octets
    pub fn read_app_time(&mut self) -> BacnetResult<[u8; 4]> {
        let header = self.consume_tag()?;
        if header.context || header.number != TAG_TIME || header.length != 4 {
            return Err(BacnetError::protocol("expected application time"));
        }
        let octets = self.take(4, "time")?;
        Ok([octets[0], octets[1], octets[2], octets[3]])
    }

    /// True when the next application tag has the given number
    pub fn next_is_app(&self, tag: u8) -> bool {
        self.peek_tag()
            .map(|h| !h.context && h.number == tag)
            .unwrap_or(false)
    }

    /// True when the next tag is the expected context tag
    pub fn next_is_context(&self, tag: u8) -> bool {
        self.peek_tag()
            .map(|h| h.context && h.number == tag && !h.opening && !h.closing)
            .unwrap_or(false)
    }

    /// True when the next tag opens the given context
    pub fn next_is_opening(&self, tag: u8) -> bool {
        self.peek_tag()
            .map(|h| h.opening && h.number == tag)
            .unwrap_or(false)
    }

    /// True when the next tag closes the given context
    pub fn next_is_closing(&self, tag: u8) -> bool {
        self.peek_tag()
            .map(|h| h.closing && h.number == tag)
            .unwrap_or(false)
    }

    /// Consume an opening tag, failing if absent
    pub fn expect_opening(&mut self, tag: u8) -> BacnetResult<()> {
        let header = self.consume_tag()?;
        if !header.opening || header.number != tag {
            return Err(BacnetError::protocol(format!("expected opening tag {tag}")));
        }
        Ok(())
    }

    /// Consume a closing tag, failing if absent
    pub fn expect_closing(&mut self, tag: u8) -> BacnetResult<()> {
        let header = self.consume_tag()?;
        if !header.closing || header.number != tag {
            return Err(BacnetError::protocol(format!("expected closing tag {tag}")));
        }
        Ok(())
    }

    /// Read one application-tagged value
    pub fn read_app_value(&mut self) -> BacnetResult<BacnetValue> {
        let header = self.consume_tag()?;
        if header.context {
            return Err(BacnetError::protocol("expected application-tagged value"));
        }
        match header.number {
            TAG_NULL => Ok(BacnetValue::Null),
            TAG_BOOLEAN => Ok(BacnetValue::Binary(header.lvt != 0)),
            TAG_UNSIGNED => Ok(BacnetValue::Unsigned(self.read_unsigned_content(header.length)?)),
            TAG_ENUMERATED => {
                Ok(BacnetValue::Enumerated(self.read_unsigned_content(header.length)?))
            }
            TAG_REAL => {
                if header.length != 4 {
                    return Err(BacnetError::protocol("real value must be 4 octets"));
                }
                let octets = self.take(4, "real")?;
                Ok(BacnetValue::Real(f32::from_be_bytes([
                    octets[0], octets[1], octets[2], octets[3],
                ])))
            }
            TAG_CHARACTER_STRING => {
                if header.length == 0 {
                    return Err(BacnetError::protocol("character string missing charset octet"));
                }
                let octets = self.take(header.length, "character string")?;
                let text = std::str::from_utf8(&octets[1..])
                    .map_err(|_| BacnetError::protocol("character string is not valid UTF-8"))?;
                Ok(BacnetValue::CharacterString(text.to_string()))
            }
            other => Err(BacnetError::protocol(format!(
                "unsupported application tag {other}"
            ))),
        }
    }

    /// Read all application values until the payload ends or a closing tag of
    /// the given context is reached (the closing tag is not consumed)
    pub fn read_app_values_until_closing(&mut self, tag: u8) -> BacnetResult<Vec<BacnetValue>> {
        let mut values = Vec::new();
        while !self.at_end() && !self.next_is_closing(tag) {
            values.push(self.read_app_value()?);
        }
        Ok(values)
    }
}

/// Collapse the values read from a property payload into a single
/// [`BacnetValue`]: a lone value stays as-is, several character strings form a
/// state-text list.
pub fn collapse_values(mut values: Vec<BacnetValue>) -> BacnetResult<BacnetValue> {
    match values.len() {
        0 => Err(BacnetError::protocol("empty property value")),
        1 => Ok(values.remove(0)),
        _ => {
            let mut labels = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    BacnetValue::CharacterString(s) => labels.push(s),
                    other => {
                        return Err(BacnetError::protocol(format!(
                            "mixed value list cannot be collapsed (found {other})"
                        )))
                    }
                }
            }
            Ok(BacnetValue::StateText(labels))
        }
    }
}

// ============================================================================
// BVLL + NPDU framing
// ============================================================================

/// Wrap an NPDU+APDU in a BVLL header with the given function
pub fn encode_frame(function: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.push(BVLL_TYPE_BACNET_IP);
    frame.push(function);
    frame.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Minimal NPDU: version + control
pub fn encode_npdu(expecting_reply: bool) -> [u8; 2] {
    let control = if expecting_reply {
        NPDU_EXPECTING_REPLY
    } else {
        0x00
    };
    [NPDU_VERSION, control]
}

/// Register-Foreign-Device frame for a BBMD, with a time-to-live in seconds
pub fn encode_register_foreign_device(ttl: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6);
    frame.push(BVLL_TYPE_BACNET_IP);
    frame.push(BVLL_REGISTER_FOREIGN_DEVICE);
    frame.extend_from_slice(&6u16.to_be_bytes());
    frame.extend_from_slice(&ttl.to_be_bytes());
    frame
}

/// A decoded BVLL frame: function plus the NPDU+APDU body
#[derive(Debug, Clone, Copy)]
pub struct BvllFrame<'a> {
    pub function: u8,
    pub body: &'a [u8],
}

/// Strip and validate the BVLL header
pub fn decode_frame(datagram: &[u8]) -> BacnetResult<BvllFrame<'_>> {
    if datagram.len() < 4 {
        return Err(BacnetError::protocol("datagram shorter than BVLL header"));
    }
    if datagram[0] != BVLL_TYPE_BACNET_IP {
        return Err(BacnetError::protocol(format!(
            "not a BACnet/IP datagram (type 0x{:02X})",
            datagram[0]
        )));
    }
    let length = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    if length != datagram.len() {
        return Err(BacnetError::protocol(format!(
            "BVLL length {length} does not match datagram length {}",
            datagram.len()
        )));
    }
    let function = datagram[1];
    // Forwarded-NPDU carries the 6-octet origin address before the NPDU
    let body = if function == BVLL_FORWARDED_NPDU {
        if datagram.len() < 10 {
            return Err(BacnetError::protocol("forwarded NPDU too short"));
        }
        &datagram[10..]
    } else {
        &datagram[4..]
    };
    Ok(BvllFrame { function, body })
}

/// Skip the NPDU in a frame body and return the APDU slice
pub fn strip_npdu(body: &[u8]) -> BacnetResult<&[u8]> {
    if body.len() < 2 {
        return Err(BacnetError::protocol("NPDU shorter than two octets"));
    }
    if body[0] != NPDU_VERSION {
        return Err(BacnetError::protocol(format!(
            "unsupported NPDU version {}",
            body[0]
        )));
    }
    let control = body[1];
    if control & 0x80 != 0 {
        // Network layer message, no APDU follows
        return Err(BacnetError::protocol("network-layer NPDU has no APDU"));
    }
    let mut pos = 2;
    // Optional destination specification (DNET/DLEN/DADR)
    if control & 0x20 != 0 {
        if body.len() < pos + 3 {
            return Err(BacnetError::protocol("truncated NPDU destination"));
        }
        let dlen = body[pos + 2] as usize;
        pos += 3 + dlen;
    }
    // Optional source specification (SNET/SLEN/SADR)
    if control & 0x08 != 0 {
        if body.len() < pos + 3 {
            return Err(BacnetError::protocol("truncated NPDU source"));
        }
        let slen = body[pos + 2] as usize;
        pos += 3 + slen;
    }
    // Hop count trails a destination specification
    if control & 0x20 != 0 {
        pos += 1;
    }
    if pos > body.len() {
        return Err(BacnetError::protocol("NPDU header exceeds frame body"));
    }
    Ok(&body[pos..])
}

// ============================================================================
// APDU
// ============================================================================

/// A decoded APDU
#[derive(Debug, Clone, PartialEq)]
pub enum Apdu {
    ConfirmedRequest {
        invoke_id: u8,
        service: u8,
        payload: Vec<u8>,
    },
    UnconfirmedRequest {
        service: u8,
        payload: Vec<u8>,
    },
    SimpleAck {
        invoke_id: u8,
        service: u8,
    },
    ComplexAck {
        invoke_id: u8,
        service: u8,
        payload: Vec<u8>,
    },
    Error {
        invoke_id: u8,
        service: u8,
        class: u8,
        code: u8,
    },
    Reject {
        invoke_id: u8,
        reason: u8,
    },
}

impl Apdu {
    /// Serialize into APDU octets
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        match self {
            Apdu::ConfirmedRequest {
                invoke_id,
                service,
                payload,
            } => {
                buf.push(APDU_CONFIRMED_REQUEST);
                // Max segments 0 / max APDU 1476
                buf.push(0x05);
                buf.push(*invoke_id);
                buf.push(*service);
                buf.extend_from_slice(payload);
            }
            Apdu::UnconfirmedRequest { service, payload } => {
                buf.push(APDU_UNCONFIRMED_REQUEST);
                buf.push(*service);
                buf.extend_from_slice(payload);
            }
            Apdu::SimpleAck { invoke_id, service } => {
                buf.push(APDU_SIMPLE_ACK);
                buf.push(*invoke_id);
                buf.push(*service);
            }
            Apdu::ComplexAck {
                invoke_id,
                service,
                payload,
            } => {
                buf.push(APDU_COMPLEX_ACK);
                buf.push(*invoke_id);
                buf.push(*service);
                buf.extend_from_slice(payload);
            }
            Apdu::Error {
                invoke_id,
                service,
                class,
                code,
            } => {
                buf.push(APDU_ERROR);
                buf.push(*invoke_id);
                buf.push(*service);
                encode_app_enumerated(&mut buf, u32::from(*class));
                encode_app_enumerated(&mut buf, u32::from(*code));
            }
            Apdu::Reject { invoke_id, reason } => {
                buf.push(APDU_REJECT);
                buf.push(*invoke_id);
                buf.push(*reason);
            }
        }
        buf
    }

    /// Parse APDU octets
    pub fn decode(apdu: &[u8]) -> BacnetResult<Self> {
        if apdu.len() < 2 {
            return Err(BacnetError::protocol("APDU shorter than two octets"));
        }
        match apdu[0] & 0xF0 {
            APDU_CONFIRMED_REQUEST => {
                if apdu.len() < 4 {
                    return Err(BacnetError::protocol("confirmed request too short"));
                }
                Ok(Apdu::ConfirmedRequest {
                    invoke_id: apdu[2],
                    service: apdu[3],
                    payload: apdu[4..].to_vec(),
                })
            }
            APDU_UNCONFIRMED_REQUEST => Ok(Apdu::UnconfirmedRequest {
                service: apdu[1],
                payload: apdu[2..].to_vec(),
            }),
            APDU_SIMPLE_ACK => {
                if apdu.len() < 3 {
                    return Err(BacnetError::protocol("simple ack too short"));
                }
                Ok(Apdu::SimpleAck {
                    invoke_id: apdu[1],
                    service: apdu[2],
                })
            }
            APDU_COMPLEX_ACK => {
                if apdu.len() < 3 {
                    return Err(BacnetError::protocol("complex ack too short"));
                }
                Ok(Apdu::ComplexAck {
                    invoke_id: apdu[1],
                    service: apdu[2],
                    payload: apdu[3..].to_vec(),
                })
            }
            APDU_ERROR => {
                if apdu.len() < 3 {
                    return Err(BacnetError::protocol("error PDU too short"));
                }
                let mut dec = Decoder::new(&apdu[3..]);
                let class = dec.read_app_enumerated()? as u8;
                let code = dec.read_app_enumerated()? as u8;
                Ok(Apdu::Error {
                    invoke_id: apdu[1],
                    service: apdu[2],
                    class,
                    code,
                })
            }
            APDU_REJECT => {
                if apdu.len() < 3 {
                    return Err(BacnetError::protocol("reject PDU too short"));
                }
                Ok(Apdu::Reject {
                    invoke_id: apdu[1],
                    reason: apdu[2],
                })
            }
            other => Err(BacnetError::protocol(format!(
                "unsupported APDU type 0x{other:02X}"
            ))),
        }
    }
}

// ============================================================================
// Service payloads
// ============================================================================

/// Who-Is request, optionally scoped to an instance range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WhoIs {
    pub low_limit: Option<u32>,
    pub high_limit: Option<u32>,
}

impl WhoIs {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let (Some(low), Some(high)) = (self.low_limit, self.high_limit) {
            encode_context_unsigned(&mut buf, 0, low);
            encode_context_unsigned(&mut buf, 1, high);
        }
        buf
    }

    pub fn decode(payload: &[u8]) -> BacnetResult<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        let mut dec = Decoder::new(payload);
        let low = dec.read_context_unsigned(0)?;
        let high = dec.read_context_unsigned(1)?;
        Ok(Self {
            low_limit: Some(low),
            high_limit: Some(high),
        })
    }

    /// Whether a device instance falls inside this scope
    pub fn matches(&self, instance: u32) -> bool {
        match (self.low_limit, self.high_limit) {
            (Some(low), Some(high)) => (low..=high).contains(&instance),
            (Some(low), None) => instance >= low,
            (None, Some(high)) => instance <= high,
            (None, None) => true,
        }
    }
}

/// I-Am announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IAm {
    pub device_id: ObjectIdentifier,
    pub max_apdu: u16,
    pub segmentation: u8,
    pub vendor_id: u16,
}

impl IAm {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        encode_app_object_id(&mut buf, self.device_id);
        encode_app_unsigned(&mut buf, u32::from(self.max_apdu));
        encode_app_enumerated(&mut buf, u32::from(self.segmentation));
        encode_app_unsigned(&mut buf, u32::from(self.vendor_id));
        buf
    }

    pub fn decode(payload: &[u8]) -> BacnetResult<Self> {
        let mut dec = Decoder::new(payload);
        let device_id = dec.read_app_object_id()?;
        let max_apdu = dec.read_app_unsigned()? as u16;
        let segmentation = dec.read_app_enumerated()? as u8;
        let vendor_id = dec.read_app_unsigned()? as u16;
        Ok(Self {
            device_id,
            max_apdu,
            segmentation,
            vendor_id,
        })
    }
}

/// ReadProperty request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub object_id: ObjectIdentifier,
    pub property_id: u32,
}

impl ReadPropertyRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10);
        encode_context_object_id(&mut buf, 0, self.object_id);
        encode_context_unsigned(&mut buf, 1, self.property_id);
        buf
    }

    pub fn decode(payload: &[u8]) -> BacnetResult<Self> {
        let mut dec = Decoder::new(payload);
        let object_id = dec.read_context_object_id(0)?;
        let property_id = dec.read_context_unsigned(1)?;
        Ok(Self {
            object_id,
            property_id,
        })
    }
}

/// ReadProperty complex-ack; the value octets stay raw for the caller
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyAck {
    pub object_id: ObjectIdentifier,
    pub property_id: u32,
    pub value_octets: Vec<u8>,
}

impl ReadPropertyAck {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + self.value_octets.len());
        encode_context_object_id(&mut buf, 0, self.object_id);
        encode_context_unsigned(&mut buf, 1, self.property_id);
        encode_opening_tag(&mut buf, 3);
        buf.extend_from_slice(&self.value_octets);
        encode_closing_tag(&mut buf, 3);
        buf
    }

    pub fn decode(payload: &[u8]) -> BacnetResult<Self> {
        let mut dec = Decoder::new(payload);
        let object_id = dec.read_context_object_id(0)?;
        let property_id = dec.read_context_unsigned(1)?;
        dec.expect_opening(3)?;
        let start = dec.pos;
        // Scan forward to the matching closing tag at depth zero
        let mut depth = 0usize;
        loop {
            if dec.at_end() {
                return Err(BacnetError::protocol("unterminated property value"));
            }
            let header = dec.peek_tag()?;
            if header.closing && header.number == 3 && depth == 0 {
                break;
            }
            if header.opening {
                depth += 1;
                dec.consume_tag()?;
            } else if header.closing {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| BacnetError::protocol("unbalanced closing tag"))?;
                dec.consume_tag()?;
            } else {
                let h = dec.consume_tag()?;
                // Application booleans keep the value in the length field
                if h.context || h.number != TAG_BOOLEAN {
                    dec.take(h.length, "property value content")?;
                }
            }
        }
        let value_octets = dec.data[start..dec.pos].to_vec();
        dec.expect_closing(3)?;
        Ok(Self {
            object_id,
            property_id,
            value_octets,
        })
    }

    /// Decode the value octets as a list of application values
    pub fn values(&self) -> BacnetResult<Vec<BacnetValue>> {
        let mut dec = Decoder::new(&self.value_octets);
        let mut values = Vec::new();
        while !dec.at_end() {
            values.push(dec.read_app_value()?);
        }
        Ok(values)
    }

    /// Decode the value octets as a list of object identifiers (objectList)
    pub fn object_identifiers(&self) -> BacnetResult<Vec<ObjectIdentifier>> {
        let mut dec = Decoder::new(&self.value_octets);
        let mut ids = Vec::new();
        while !dec.at_end() {
            ids.push(dec.read_app_object_id()?);
        }
        Ok(ids)
    }
}

/// WriteProperty request
#[derive(Debug, Clone, PartialEq)]
pub struct WritePropertyRequest {
    pub object_id: ObjectIdentifier,
    pub property_id: u32,
    pub value: BacnetValue,
    pub priority: Option<u8>,
}

impl WritePropertyRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        encode_context_object_id(&mut buf, 0, self.object_id);
        encode_context_unsigned(&mut buf, 1, self.property_id);
        encode_opening_tag(&mut buf, 3);
        encode_app_value(&mut buf, &self.value);
        encode_closing_tag(&mut buf, 3);
        if let Some(priority) = self.priority {
            encode_context_unsigned(&mut buf, 4, u32::from(priority));
        }
        buf
    }

    pub fn decode(payload: &[u8]) -> BacnetResult<Self> {
        let mut dec = Decoder::new(payload);
        let object_id = dec.read_context_object_id(0)?;
        let property_id = dec.read_context_unsigned(1)?;
        dec.expect_opening(3)?;
        let values = dec.read_app_values_until_closing(3)?;
        dec.expect_closing(3)?;
        let value = collapse_values(values)?;
        let priority = if dec.next_is_context(4) {
            Some(dec.read_context_unsigned(4)? as u8)
        } else {
            None
        };
        Ok(Self {
            object_id,
            property_id,
            value,
            priority,
        })
    }
}

/// SubscribeCOV request; omitting `issue_confirmed` and `lifetime` cancels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeCovRequest {
    pub process_id: u32,
    pub object_id: ObjectIdentifier,
    /// None together with a None lifetime means cancellation
    pub issue_confirmed: Option<bool>,
    /// Lifetime in seconds; 0 means indefinite
    pub lifetime: Option<u32>,
}

impl SubscribeCovRequest {
    pub fn is_cancellation(&self) -> bool {
        self.issue_confirmed.is_none() && self.lifetime.is_none()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(14);
        encode_context_unsigned(&mut buf, 0, self.process_id);
        encode_context_object_id(&mut buf, 1, self.object_id);
        if let Some(confirmed) = self.issue_confirmed {
            encode_context_boolean(&mut buf, 2, confirmed);
        }
        if let Some(lifetime) = self.lifetime {
            encode_context_unsigned(&mut buf, 3, lifetime);
        }
        buf
    }

    pub fn decode(payload: &[u8]) -> BacnetResult<Self> {
        let mut dec = Decoder::new(payload);
        let process_id = dec.read_context_unsigned(0)?;
        let object_id = dec.read_context_object_id(1)?;
        let issue_confirmed = if dec.next_is_context(2) {
            Some(dec.read_context_unsigned(2)? != 0)
        } else {
            None
        };
        let lifetime = if dec.next_is_context(3) {
            Some(dec.read_context_unsigned(3)?)
        } else {
            None
        };
        Ok(Self {
            process_id,
            object_id,
            issue_confirmed,
            lifetime,
        })
    }
}

/// COV notification (confirmed and unconfirmed share the payload shape)
#[derive(Debug, Clone, PartialEq)]
pub struct CovNotification {
    pub process_id: u32,
    pub device_id: ObjectIdentifier,
    pub object_id: ObjectIdentifier,
    /// Seconds left on the subscription; 0 for indefinite
    pub time_remaining: u32,
    /// Property name/value pairs, usually presentValue and statusFlags
    pub values: Vec<(u32, BacnetValue)>,
}

impl CovNotification {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        encode_context_unsigned(&mut buf, 0, self.process_id);
        encode_context_object_id(&mut buf, 1, self.device_id);
        encode_context_object_id(&mut buf, 2, self.object_id);
        encode_context_unsigned(&mut buf, 3, self.time_remaining);
        encode_opening_tag(&mut buf, 4);
        for (property_id, value) in &self.values {
            encode_context_unsigned(&mut buf, 0, *property_id);
            encode_opening_tag(&mut buf, 2);
            encode_app_value(&mut buf, value);
            encode_closing_tag(&mut buf, 2);
        }
        encode_closing_tag(&mut buf, 4);
        buf
    }

    pub fn decode(payload: &[u8]) -> BacnetResult<Self> {
        let mut dec = Decoder::new(payload);
        let process_id = dec.read_context_unsigned(0)?;
        let device_id = dec.read_context_object_id(1)?;
        let object_id = dec.read_context_object_id(2)?;
        let time_remaining = dec.read_context_unsigned(3)?;
        dec.expect_opening(4)?;
        let mut values = Vec::new();
        while !dec.next_is_closing(4) {
            let property_id = dec.read_context_unsigned(0)?;
            dec.expect_opening(2)?;
            let inner = dec.read_app_values_until_closing(2)?;
            dec.expect_closing(2)?;
            values.push((property_id, collapse_values(inner)?));
        }
        dec.expect_closing(4)?;
        Ok(Self {
            process_id,
            device_id,
            object_id,
            time_remaining,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;

    fn oid(t: ObjectType, i: u32) -> ObjectIdentifier {
        ObjectIdentifier::new(t, i).unwrap()
    }

    #[test]
    fn test_unsigned_minimal_octets() {
        assert_eq!(unsigned_octets(0), vec![0]);
        assert_eq!(unsigned_octets(0xFF), vec![0xFF]);
        assert_eq!(unsigned_octets(0x1234), vec![0x12, 0x34]);
        assert_eq!(unsigned_octets(0x0100_0000), vec![0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_app_value_round_trip() {
        let values = [
            BacnetValue::Null,
            BacnetValue::Real(72.5),
            BacnetValue::Unsigned(1200),
            BacnetValue::Enumerated(3),
            BacnetValue::CharacterString("Zone Temperature".to_string()),
        ];
        for value in values {
            let mut buf = Vec::new();
            encode_app_value(&mut buf, &value);
            let mut dec = Decoder::new(&buf);
            let decoded = dec.read_app_value().unwrap();
            // Booleans encode as enumerated on the wire
            match &value {
                BacnetValue::Binary(b) => {
                    assert_eq!(decoded, BacnetValue::Enumerated(u32::from(*b)))
                }
                other => assert_eq!(&decoded, other),
            }
            assert!(dec.at_end());
        }
    }

    #[test]
    fn test_long_character_string_round_trip() {
        // 300 content octets need the two-octet extended length escape
        let long = "x".repeat(300);
        let mut buf = Vec::new();
        encode_app_character_string(&mut buf, &long);
        assert_eq!(buf[0], (TAG_CHARACTER_STRING << 4) | 0x05);
        assert_eq!(buf[1], 254);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 301);

        let mut dec = Decoder::new(&buf);
        assert_eq!(
            dec.read_app_value().unwrap(),
            BacnetValue::CharacterString(long)
        );
        assert!(dec.at_end());
    }

    #[test]
    fn test_who_is_encoding_matches_standard() {
        // Unscoped Who-Is has an empty payload
        assert!(WhoIs::default().encode().is_empty());

        let scoped = WhoIs {
            low_limit: Some(100),
            high_limit: Some(999_999),
        };
        let payload = scoped.encode();
        assert_eq!(payload[0], 0x09); // context 0, length 1
        let decoded = WhoIs::decode(&payload).unwrap();
        assert_eq!(decoded, scoped);
        assert!(decoded.matches(100));
        assert!(decoded.matches(999_999));
        assert!(!decoded.matches(99));
    }

    #[test]
    fn test_i_am_round_trip() {
        let iam = IAm {
            device_id: oid(ObjectType::Device, 999_999),
            max_apdu: 1476,
            segmentation: 3,
            vendor_id: 0xFFFF,
        };
        let payload = iam.encode();
        // Device object id app tag: 0xC4
        assert_eq!(payload[0], 0xC4);
        assert_eq!(IAm::decode(&payload).unwrap(), iam);
    }

    #[test]
    fn test_read_property_round_trip() {
        let req = ReadPropertyRequest {
            object_id: oid(ObjectType::AnalogInput, 1),
            property_id: 85,
        };
        let payload = req.encode();
        assert_eq!(payload[0], 0x0C); // context 0, length 4
        assert_eq!(ReadPropertyRequest::decode(&payload).unwrap(), req);

        let mut value_octets = Vec::new();
        encode_app_real(&mut value_octets, 72.5);
        let ack = ReadPropertyAck {
            object_id: req.object_id,
            property_id: req.property_id,
            value_octets,
        };
        let decoded = ReadPropertyAck::decode(&ack.encode()).unwrap();
        assert_eq!(decoded.values().unwrap(), vec![BacnetValue::Real(72.5)]);
    }

    #[test]
    fn test_write_property_with_priority() {
        let req = WritePropertyRequest {
            object_id: oid(ObjectType::AnalogOutput, 1),
            property_id: 85,
            value: BacnetValue::Real(80.0),
            priority: Some(8),
        };
        let decoded = WritePropertyRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);

        let no_priority = WritePropertyRequest {
            priority: None,
            ..req
        };
        let decoded = WritePropertyRequest::decode(&no_priority.encode()).unwrap();
        assert_eq!(decoded.priority, None);
    }

    #[test]
    fn test_subscribe_cov_forms() {
        let subscribe = SubscribeCovRequest {
            process_id: 1,
            object_id: oid(ObjectType::AnalogInput, 1),
            issue_confirmed: Some(false),
            lifetime: Some(3600),
        };
        assert!(!subscribe.is_cancellation());
        assert_eq!(
            SubscribeCovRequest::decode(&subscribe.encode()).unwrap(),
            subscribe
        );

        let cancel = SubscribeCovRequest {
            process_id: 1,
            object_id: oid(ObjectType::AnalogInput, 1),
            issue_confirmed: None,
            lifetime: None,
        };
        let decoded = SubscribeCovRequest::decode(&cancel.encode()).unwrap();
        assert!(decoded.is_cancellation());
    }

    #[test]
    fn test_cov_notification_round_trip() {
        let notification = CovNotification {
            process_id: 1,
            device_id: oid(ObjectType::Device, 999_999),
            object_id: oid(ObjectType::AnalogInput, 1),
            time_remaining: 300,
            values: vec![
                (85, BacnetValue::Real(73.1)),
                (111, BacnetValue::Unsigned(0)),
            ],
        };
        assert_eq!(
            CovNotification::decode(&notification.encode()).unwrap(),
            notification
        );
    }

    #[test]
    fn test_apdu_round_trips() {
        let apdus = [
            Apdu::ConfirmedRequest {
                invoke_id: 7,
                service: SERVICE_READ_PROPERTY,
                payload: vec![0x0C, 0x00, 0x00, 0x00, 0x01],
            },
            Apdu::UnconfirmedRequest {
                service: SERVICE_WHO_IS,
                payload: vec![],
            },
            Apdu::SimpleAck {
                invoke_id: 7,
                service: SERVICE_WRITE_PROPERTY,
            },
            Apdu::Error {
                invoke_id: 9,
                service: SERVICE_WRITE_PROPERTY,
                class: ERROR_CLASS_PROPERTY,
                code: ERROR_CODE_WRITE_ACCESS_DENIED,
            },
            Apdu::Reject {
                invoke_id: 3,
                reason: 0,
            },
        ];
        for apdu in apdus {
            assert_eq!(Apdu::decode(&apdu.encode()).unwrap(), apdu);
        }
    }

    #[test]
    fn test_frame_round_trip() {
        let npdu = encode_npdu(true);
        let apdu = Apdu::UnconfirmedRequest {
            service: SERVICE_WHO_IS,
            payload: vec![],
        };
        let mut body = npdu.to_vec();
        body.extend_from_slice(&apdu.encode());
        let frame = encode_frame(BVLL_ORIGINAL_BROADCAST, &body);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.function, BVLL_ORIGINAL_BROADCAST);
        let apdu_octets = strip_npdu(decoded.body).unwrap();
        assert_eq!(Apdu::decode(apdu_octets).unwrap(), apdu);
    }

    #[test]
    fn test_malformed_frames_rejected() {
        assert!(decode_frame(&[0x81]).is_err());
        assert!(decode_frame(&[0x42, 0x0A, 0x00, 0x04]).is_err());
        // Length mismatch
        assert!(decode_frame(&[0x81, 0x0A, 0x00, 0x09, 0x01, 0x00]).is_err());
        assert!(strip_npdu(&[0x02, 0x00, 0x00]).is_err());
        assert!(Apdu::decode(&[0xF0, 0x00]).is_err());
    }
}
