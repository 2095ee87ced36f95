//! Tagged text protocol spoken between client and server
//!
//! Every request and every tagged response is a single frame whose first
//! byte is an ASCII digit (the tag), followed by a tag-specific body:
//!
//! | Tag | Direction | Meaning      | Body after the tag                      |
//! |-----|-----------|--------------|-----------------------------------------|
//! | `0` | C→S, S→C  | create-group | `<group> <member>[,<member>]*` / reply  |
//! | `1` | C→S, S→C  | send         | `<dest> <text>` / reply                 |
//! | `2` | C→S, S→C  | who          | empty / sorted roster ending in `.`     |
//! | `3` | C→S       | client-exit  | empty; acked by one raw `'1'` byte      |
//! | `4` | S→C       | server-exit  | empty, notification only                |
//!
//! Two parts of the conversation deliberately step outside this regime and
//! are part of the preserved wire contract:
//!
//! * the connection handshake: the client sends its proposed name as one
//!   frame, the server answers with a single **raw** status byte
//!   ([`HandshakeStatus`]) before any tagged traffic;
//! * relayed messages: a delivered `send` arrives at the recipient as
//!   `<sender>: <text>` with **no** tag byte, so receivers distinguish
//!   replies from relays by whether they are awaiting a reply.

use thiserror::Error;

/// Upper bound on client and group name length, in bytes.
pub const MAX_NAME_LEN: usize = 30;

/// Raw byte acknowledging a client-exit request.
pub const LOGOUT_ACK: u8 = b'1';

/// Message-kind tag carried as the first byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    CreateGroup,
    Send,
    Who,
    ClientExit,
    ServerExit,
}

impl Tag {
    /// The ASCII digit this tag puts on the wire.
    pub const fn byte(self) -> u8 {
        match self {
            Tag::CreateGroup => b'0',
            Tag::Send => b'1',
            Tag::Who => b'2',
            Tag::ClientExit => b'3',
            Tag::ServerExit => b'4',
        }
    }

    /// Maps a leading frame byte back to its tag, if it is one.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Tag::CreateGroup),
            b'1' => Some(Tag::Send),
            b'2' => Some(Tag::Who),
            b'3' => Some(Tag::ClientExit),
            b'4' => Some(Tag::ServerExit),
            _ => None,
        }
    }
}

/// Raw status byte the server writes to conclude the connection handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Generic failure: invalid name, or the server could not register it.
    Rejected,
    /// The name was registered; the session enters the tagged-frame regime.
    Accepted,
    /// The name is held by another client or a group.
    NameTaken,
}

impl HandshakeStatus {
    /// The raw byte written on the wire for this verdict.
    pub const fn byte(self) -> u8 {
        match self {
            HandshakeStatus::Rejected => b'0',
            HandshakeStatus::Accepted => b'1',
            HandshakeStatus::NameTaken => b'2',
        }
    }

    /// Maps a received raw byte back to a verdict, if it is one.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(HandshakeStatus::Rejected),
            b'1' => Some(HandshakeStatus::Accepted),
            b'2' => Some(HandshakeStatus::NameTaken),
            _ => None,
        }
    }
}

/// A decoded client request
///
/// `Send` text is kept as raw bytes: any byte other than the frame
/// delimiter is legal message content and must survive relay verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateGroup { group: String, members: Vec<String> },
    Send { to: String, text: Vec<u8> },
    Who,
    Exit,
}

/// Decode failures for a single frame
///
/// These are fatal for the offending frame only; the session survives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("unknown tag byte {0:#04x}")]
    UnknownTag(u8),

    #[error("server-to-client tag {0:?} in a request")]
    Unexpected(Tag),

    #[error("malformed send request")]
    MalformedSend,

    /// Carries whatever group name could be recovered so the error reply
    /// can still quote it.
    #[error("malformed create-group request")]
    MalformedCreateGroup { group: String },
}

impl Request {
    /// Decodes one framed payload into a typed request.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag_byte, body) = payload.split_first().ok_or(ProtocolError::Empty)?;
        let tag = Tag::from_byte(tag_byte).ok_or(ProtocolError::UnknownTag(tag_byte))?;

        match tag {
            Tag::CreateGroup => Self::decode_create_group(body),
            Tag::Send => Self::decode_send(body),
            Tag::Who => Ok(Request::Who),
            Tag::ClientExit => Ok(Request::Exit),
            Tag::ServerExit => Err(ProtocolError::Unexpected(tag)),
        }
    }

    /// Encodes the request back into a framed payload.
    ///
    /// Inverse of [`Request::decode`] for canonical frames (no padding
    /// around member names, no empty list entries).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::CreateGroup { group, members } => {
                let mut out = vec![Tag::CreateGroup.byte()];
                out.extend_from_slice(group.as_bytes());
                out.push(b' ');
                out.extend_from_slice(members.join(",").as_bytes());
                out
            }
            Request::Send { to, text } => {
                let mut out = vec![Tag::Send.byte()];
                out.extend_from_slice(to.as_bytes());
                out.push(b' ');
                out.extend_from_slice(text);
                out
            }
            Request::Who => vec![Tag::Who.byte()],
            Request::Exit => vec![Tag::ClientExit.byte()],
        }
    }

    fn decode_create_group(body: &[u8]) -> Result<Self, ProtocolError> {
        let body = std::str::from_utf8(body).map_err(|_| ProtocolError::MalformedCreateGroup {
            group: String::new(),
        })?;

        let (group, list) = body
            .split_once(' ')
            .ok_or_else(|| ProtocolError::MalformedCreateGroup {
                group: body.trim().to_owned(),
            })?;

        // Member order is the order the creator typed; tokens are trimmed
        // and empty tokens dropped. Deduplication is the directory's job.
        let members: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect();

        if members.is_empty() {
            return Err(ProtocolError::MalformedCreateGroup {
                group: group.to_owned(),
            });
        }

        Ok(Request::CreateGroup {
            group: group.to_owned(),
            members,
        })
    }

    fn decode_send(body: &[u8]) -> Result<Self, ProtocolError> {
        // Split at the first space; the remainder is literal message text.
        let split = body
            .iter()
            .position(|&b| b == b' ')
            .ok_or(ProtocolError::MalformedSend)?;
        let to = std::str::from_utf8(&body[..split]).map_err(|_| ProtocolError::MalformedSend)?;
        if to.is_empty() {
            return Err(ProtocolError::MalformedSend);
        }

        Ok(Request::Send {
            to: to.to_owned(),
            text: body[split + 1..].to_vec(),
        })
    }
}

/// Checks the shared name rule: 1 to [`MAX_NAME_LEN`] ASCII alphanumeric
/// bytes. Names are case-sensitive; comparison is byte equality.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Builds a tagged frame payload from a response body.
pub fn tagged(tag: Tag, body: &str) -> Vec<u8> {
    let mut out = vec![tag.byte()];
    out.extend_from_slice(body.as_bytes());
    out
}

/// Builds the untagged relay payload `<sender>: <text>`.
pub fn relay_frame(sender: &str, text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sender.len() + 2 + text.len());
    out.extend_from_slice(sender.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(text);
    out
}
