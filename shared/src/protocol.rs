//! Hazel packet decoding for master server replies
//!
//! Master servers speak Hazel over UDP. Every packet starts with a send-option
//! byte. Normal and reliable packets then carry a sequence of tagged messages:
//!
//! ```text
//! +---------+---------+-----+------------------+
//! | len u16 | tag u8  | ... | len payload bytes |
//! +---------+---------+-----+------------------+
//! ```
//!
//! Only the reselect-server message matters to the status service; every
//! other message is kept as an opaque tag and payload.

use std::net::Ipv4Addr;
use thiserror::Error;

pub const SEND_OPTION_NORMAL: u8 = 0x00;
pub const SEND_OPTION_RELIABLE: u8 = 0x01;
pub const SEND_OPTION_HELLO: u8 = 0x08;
pub const SEND_OPTION_DISCONNECT: u8 = 0x09;
pub const SEND_OPTION_ACK: u8 = 0x0a;
pub const SEND_OPTION_PING: u8 = 0x0c;

pub const TAG_RESELECT_SERVER: u8 = 13;
pub const TAG_REDIRECT: u8 = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet is empty")]
    Empty,
    #[error("unknown send option 0x{0:02x}")]
    UnknownSendOption(u8),
    #[error("unexpected end of packet at offset {0}")]
    Truncated(usize),
    #[error("packed integer at offset {0} does not fit in 32 bits")]
    PackedOverflow(usize),
    #[error("server name is not valid UTF-8")]
    InvalidName,
}

/// Server tuple carried by a reselect-server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub name: String,
    pub ip_address: Ipv4Addr,
    pub port: u16,
    pub number_of_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ReselectServer {
        version: u8,
        servers: Vec<ServerEntry>,
    },
    Other {
        tag: u8,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPacket {
    Normal { messages: Vec<Message> },
    Reliable { nonce: u16, messages: Vec<Message> },
    Hello { nonce: u16 },
    Disconnect,
    Acknowledgement { nonce: u16 },
    Ping { nonce: u16 },
}

impl ParsedPacket {
    pub fn messages(&self) -> &[Message] {
        match self {
            ParsedPacket::Normal { messages } | ParsedPacket::Reliable { messages, .. } => messages,
            _ => &[],
        }
    }

    /// Servers from the first reselect-server message, if the packet has one
    pub fn server_list(&self) -> Option<&[ServerEntry]> {
        self.messages().iter().find_map(|message| match message {
            Message::ReselectServer { servers, .. } => Some(servers.as_slice()),
            Message::Other { .. } => None,
        })
    }
}

/// Turns raw datagram bytes into a structured packet.
///
/// The aggregator only depends on this trait, so tests can feed it canned
/// packets without going through the wire format.
pub trait PacketParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedPacket, ParseError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HazelParser;

impl PacketParser for HazelParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedPacket, ParseError> {
        parse_packet(bytes)
    }
}

pub fn parse_packet(bytes: &[u8]) -> Result<ParsedPacket, ParseError> {
    let mut reader = Reader::new(bytes);
    let send_option = reader.read_u8().map_err(|_| ParseError::Empty)?;

    match send_option {
        SEND_OPTION_NORMAL => Ok(ParsedPacket::Normal {
            messages: read_messages(&mut reader)?,
        }),
        SEND_OPTION_RELIABLE => {
            let nonce = reader.read_u16_be()?;
            Ok(ParsedPacket::Reliable {
                nonce,
                messages: read_messages(&mut reader)?,
            })
        }
        SEND_OPTION_HELLO => Ok(ParsedPacket::Hello {
            nonce: reader.read_u16_be()?,
        }),
        SEND_OPTION_DISCONNECT => Ok(ParsedPacket::Disconnect),
        SEND_OPTION_ACK => Ok(ParsedPacket::Acknowledgement {
            nonce: reader.read_u16_be()?,
        }),
        SEND_OPTION_PING => Ok(ParsedPacket::Ping {
            nonce: reader.read_u16_be()?,
        }),
        other => Err(ParseError::UnknownSendOption(other)),
    }
}

fn read_messages(reader: &mut Reader<'_>) -> Result<Vec<Message>, ParseError> {
    let mut messages = Vec::new();
    while !reader.is_empty() {
        let (tag, payload) = reader.read_message()?;
        let message = if tag == TAG_RESELECT_SERVER {
            read_reselect_server(payload)?
        } else {
            Message::Other {
                tag,
                payload: payload.to_vec(),
            }
        };
        messages.push(message);
    }
    Ok(messages)
}

fn read_reselect_server(payload: &[u8]) -> Result<Message, ParseError> {
    let mut reader = Reader::new(payload);
    let version = reader.read_u8()?;
    let count = reader.read_packed_u32()?;

    let mut servers = Vec::new();
    for _ in 0..count {
        let (_, body) = reader.read_message()?;
        let mut server = Reader::new(body);

        let name = server.read_string()?;
        let octets = server.read_bytes(4)?;
        let ip_address = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
        let port = server.read_u16_le()?;
        let number_of_connections = server.read_packed_u32()?;

        servers.push(ServerEntry {
            name,
            ip_address,
            port,
            number_of_connections,
        });
    }

    Ok(Message::ReselectServer { version, servers })
}

/// Builds a reliable packet carrying one reselect-server message
pub fn encode_reselect_server(servers: &[ServerEntry]) -> Vec<u8> {
    let mut payload = vec![0u8];
    write_packed_u32(&mut payload, servers.len() as u32);

    for entry in servers {
        let mut body = Vec::new();
        write_packed_u32(&mut body, entry.name.len() as u32);
        body.extend_from_slice(entry.name.as_bytes());
        body.extend_from_slice(&entry.ip_address.octets());
        body.extend_from_slice(&entry.port.to_le_bytes());
        write_packed_u32(&mut body, entry.number_of_connections);
        write_message(&mut payload, 0, &body);
    }

    let mut packet = vec![SEND_OPTION_RELIABLE, 0x00, 0x01];
    write_message(&mut packet, TAG_RESELECT_SERVER, &payload);
    packet
}

fn write_message(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.push(tag);
    out.extend_from_slice(payload);
}

fn write_packed_u32(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ParseError::Truncated(self.pos))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16_le(&mut self) -> Result<u16, ParseError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u16_be(&mut self) -> Result<u16, ParseError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_packed_u32(&mut self) -> Result<u32, ParseError> {
        let start = self.pos;
        let mut value: u32 = 0;
        let mut shift = 0;

        loop {
            let byte = self.read_u8()?;
            if shift >= 32 || (shift == 28 && byte & 0x70 != 0) {
                return Err(ParseError::PackedOverflow(start));
            }
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_string(&mut self) -> Result<String, ParseError> {
        let len = self.read_packed_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidName)
    }

    fn read_message(&mut self) -> Result<(u8, &'a [u8]), ParseError> {
        let len = self.read_u16_le()? as usize;
        let tag = self.read_u8()?;
        let payload = self.read_bytes(len)?;
        Ok((tag, payload))
    }
}
