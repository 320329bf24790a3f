use crate::Error;

use std::str::from_utf8;

use bytes::{BufMut, BytesMut};

/// Command tag carried in the `Command` field of every frame.
///
/// The wire tags are the lower-cased command names; anything else fails
/// to decode with [`Error::UnknownCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Handshake. Client to router with id `"0"`, router to client with
    /// the assigned session identity.
    Conn,
    /// Swarm membership query / membership list.
    Find,
    /// Transport endpoint query for one peer / its endpoint list.
    Node,
    /// Liveness probe, answered in kind.
    Ping,
    /// Forwarder request / forwarder offer.
    Cp,
    /// The router signals that the peer named in `Id` cannot reach this
    /// client directly.
    Notify,
    /// Drop one peer, or close the session when the arguments are empty
    /// or `"0"`.
    Stop,
    /// Overlay address request, announcement or assignment.
    Dhcp,
    /// Forwarder registration (control peer role).
    RegCp,
    /// Forwarder load report (control peer role).
    Load,
    /// The router refused the presented identity.
    Unknown,
    /// Named error, code in the arguments.
    Error,
}

impl Command {
    /// # Test
    ///
    /// ```
    /// use rendezvous_client_codec::message::Command;
    ///
    /// assert_eq!(Command::Conn.as_tag(), "conn");
    /// assert_eq!(Command::RegCp.as_tag(), "regcp");
    /// ```
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Conn => "conn",
            Self::Find => "find",
            Self::Node => "node",
            Self::Ping => "ping",
            Self::Cp => "cp",
            Self::Notify => "notify",
            Self::Stop => "stop",
            Self::Dhcp => "dhcp",
            Self::RegCp => "regcp",
            Self::Load => "load",
            Self::Unknown => "unknown",
            Self::Error => "error",
        }
    }

    /// # Test
    ///
    /// ```
    /// use rendezvous_client_codec::message::Command;
    ///
    /// assert_eq!(Command::from_tag("cp"), Some(Command::Cp));
    /// assert_eq!(Command::from_tag("hole-punch"), None);
    /// ```
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "conn" => Self::Conn,
            "find" => Self::Find,
            "node" => Self::Node,
            "ping" => Self::Ping,
            "cp" => Self::Cp,
            "notify" => Self::Notify,
            "stop" => Self::Stop,
            "dhcp" => Self::Dhcp,
            "regcp" => Self::RegCp,
            "load" => Self::Load,
            "unknown" => Self::Unknown,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

/// Named errors a router can report through an `error` frame.
///
/// The code travels in the arguments field. Codes outside this table are
/// logged verbatim by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerError {
    Unsupported,
    AccessDenied,
    UnknownSwarm,
    NoRelay,
    NoAddress,
    Throttled,
}

impl ServerError {
    /// # Test
    ///
    /// ```
    /// use rendezvous_client_codec::message::ServerError;
    ///
    /// assert_eq!(
    ///     ServerError::from_tag("no_relay"),
    ///     Some(ServerError::NoRelay)
    /// );
    /// assert_eq!(ServerError::from_tag("out_of_cheese"), None);
    /// ```
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "unsupported" => Self::Unsupported,
            "access_denied" => Self::AccessDenied,
            "unknown_swarm" => Self::UnknownSwarm,
            "no_relay" => Self::NoRelay,
            "no_address" => Self::NoAddress,
            "throttled" => Self::Throttled,
            _ => return None,
        })
    }

    pub const fn text(self) -> &'static str {
        match self {
            Self::Unsupported => "protocol version not supported by the router",
            Self::AccessDenied => "the router refused this client access to the swarm",
            Self::UnknownSwarm => "the router does not track the requested swarm",
            Self::NoRelay => "no forwarder is available for the requested peer",
            Self::NoAddress => "the router has no overlay address left to assign",
            Self::Throttled => "the router is rate limiting this client",
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

/// One control frame.
///
/// Every frame carries the same five fields; which of them are
/// meaningful depends on the command. Unused fields travel as the empty
/// string or `"0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    /// The session identity, `"0"` before one is assigned.
    pub id: String,
    /// Command dependent auxiliary, e.g. the protocol version tag during
    /// the handshake or a forwarder endpoint in an offer.
    pub query: String,
    /// Command dependent payload, typically a comma or pipe separated
    /// list of identities or endpoints.
    pub arguments: String,
    /// Only used by the handshake, carries the swarm identifier.
    pub payload: String,
}

impl Message {
    /// Create a frame with all auxiliary fields empty.
    pub fn new(command: Command, id: impl Into<String>) -> Self {
        Self {
            command,
            id: id.into(),
            query: String::new(),
            arguments: String::new(),
            payload: String::new(),
        }
    }

    /// Encode the frame into `bytes`, replacing its contents.
    ///
    /// Dictionary keys are written in sorted order and every field is
    /// always present, so equal messages encode to equal buffers.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use rendezvous_client_codec::message::{Command, Message};
    ///
    /// let mut message = Message::new(Command::Ping, "0");
    /// let mut bytes = BytesMut::new();
    /// message.encode(&mut bytes);
    ///
    /// assert_eq!(
    ///     &bytes[..],
    ///     &b"d9:Arguments0:7:Command4:ping2:Id1:07:Payload0:5:Query0:e"[..]
    /// );
    /// ```
    pub fn encode(&self, bytes: &mut BytesMut) {
        bytes.clear();
        bytes.put_u8(b'd');
        put_field(bytes, "Arguments", &self.arguments);
        put_field(bytes, "Command", self.command.as_tag());
        put_field(bytes, "Id", &self.id);
        put_field(bytes, "Payload", &self.payload);
        put_field(bytes, "Query", &self.query);
        bytes.put_u8(b'e');
    }

    /// Decode one frame from a datagram.
    ///
    /// Keys are accepted in any order. Fields that are absent decode to
    /// the empty string, unknown keys and non-string values are skipped;
    /// a frame without a recognizable command tag is rejected.
    ///
    /// # Test
    ///
    /// ```
    /// use rendezvous_client_codec::message::{Command, Message};
    ///
    /// let message =
    ///     Message::decode(b"d7:Command4:find2:Id1:05:Query5:net-ae").unwrap();
    ///
    /// assert_eq!(message.command, Command::Find);
    /// assert_eq!(message.query, "net-a");
    /// assert_eq!(message.arguments, "");
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = Reader {
            bytes,
            offset: 0,
        };

        if reader.next()? != b'd' {
            return Err(Error::NotADictionary);
        }

        let mut command = None;
        let mut id = String::new();
        let mut query = String::new();
        let mut arguments = String::new();
        let mut payload = String::new();

        loop {
            if reader.peek().ok_or(Error::UnexpectedEnd)? == b'e' {
                reader.next()?;
                break;
            }

            let key = from_utf8(reader.read_string()?)?;
            if !matches!(key, "Command" | "Id" | "Query" | "Arguments" | "Payload") {
                reader.skip_value()?;
                continue;
            }

            // A known key bound to a non-string value is skipped, the
            // field keeps its default.
            if !reader.peek().is_some_and(|byte| byte.is_ascii_digit()) {
                reader.skip_value()?;
                continue;
            }

            let value = from_utf8(reader.read_string()?)?;
            match key {
                "Command" => {
                    command = Some(
                        Command::from_tag(value)
                            .ok_or_else(|| Error::UnknownCommand(value.to_string()))?,
                    )
                }
                "Id" => id = value.to_string(),
                "Query" => query = value.to_string(),
                "Arguments" => arguments = value.to_string(),
                "Payload" => payload = value.to_string(),
                _ => unreachable!(),
            }
        }

        if reader.offset != bytes.len() {
            return Err(Error::TrailingBytes);
        }

        Ok(Self {
            command: command.ok_or(Error::MissingCommand)?,
            id,
            query,
            arguments,
            payload,
        })
    }
}

fn put_field(bytes: &mut BytesMut, key: &str, value: &str) {
    put_string(bytes, key);
    put_string(bytes, value);
}

fn put_string(bytes: &mut BytesMut, value: &str) {
    bytes.put_slice(value.len().to_string().as_bytes());
    bytes.put_u8(b':');
    bytes.put_slice(value.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.offset).copied()
    }

    fn next(&mut self) -> Result<u8, Error> {
        let byte = self.peek().ok_or(Error::UnexpectedEnd)?;
        self.offset += 1;
        Ok(byte)
    }

    /// Read one `<length>:<bytes>` byte string.
    fn read_string(&mut self) -> Result<&'a [u8], Error> {
        let mut length: usize = 0;
        let mut digits = 0;

        loop {
            match self.next()? {
                byte @ b'0'..=b'9' => {
                    length = length
                        .checked_mul(10)
                        .and_then(|n| n.checked_add((byte - b'0') as usize))
                        .ok_or(Error::InvalidLength)?;
                    digits += 1;
                }
                b':' if digits > 0 => break,
                _ => return Err(Error::InvalidLength),
            }
        }

        if self.bytes.len() - self.offset < length {
            return Err(Error::UnexpectedEnd);
        }

        let value = &self.bytes[self.offset..self.offset + length];
        self.offset += length;
        Ok(value)
    }

    /// Skip one bencode value of any shape.
    fn skip_value(&mut self) -> Result<(), Error> {
        match self.peek().ok_or(Error::UnexpectedEnd)? {
            b'0'..=b'9' => {
                self.read_string()?;
            }
            b'i' => {
                self.next()?;
                let mut digits = 0;
                loop {
                    match self.next()? {
                        b'0'..=b'9' => digits += 1,
                        b'-' if digits == 0 => (),
                        b'e' if digits > 0 => break,
                        _ => return Err(Error::InvalidInteger),
                    }
                }
            }
            b'l' => {
                self.next()?;
                while self.peek().ok_or(Error::UnexpectedEnd)? != b'e' {
                    self.skip_value()?;
                }
                self.next()?;
            }
            b'd' => {
                self.next()?;
                while self.peek().ok_or(Error::UnexpectedEnd)? != b'e' {
                    self.read_string()?;
                    self.skip_value()?;
                }
                self.next()?;
            }
            _ => return Err(Error::InvalidLength),
        }

        Ok(())
    }
}
