use std::convert::TryFrom;
use std::fmt::{self, Display};
use std::io;

use crate::{CommandClassId, EndpointId, MessageClass, NodeId, NodeStage};

/// Ways in which a frame can fail to decode. Always recoverable: the frame is dropped and the
/// node it was addressed to is left untouched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecodeError {
    UnexpectedEnd,
    Truncated { offset: usize, len: usize },
    LengthMismatch { declared: usize, actual: usize },
    MissingStartOfFrame(u8),
    MismatchedChecksum { expected: u8, actual: u8 },
    InvalidMessageType(u8),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEnd => write!(f, "unexpected end of payload"),
            DecodeError::Truncated { offset, len } => {
                write!(f, "payload of {} bytes has no byte at offset {}", len, offset)
            }
            DecodeError::LengthMismatch { declared, actual } => write!(
                f,
                "declared length {} does not match {} available bytes",
                declared, actual
            ),
            DecodeError::MissingStartOfFrame(byte) => {
                write!(f, "expected start of frame, got {:#04x}", byte)
            }
            DecodeError::MismatchedChecksum { expected, actual } => write!(
                f,
                "mismatched checksum: expected {:#04x}, got {:#04x}",
                expected, actual
            ),
            DecodeError::InvalidMessageType(byte) => {
                write!(f, "invalid message type {:#04x}", byte)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum ErrorKind {
    Decode(DecodeError),
    UnsupportedCommand {
        command_class: CommandClassId,
        command: u8,
    },
    UnimplementedRequest {
        command_class: CommandClassId,
        command: u8,
    },
    NoHandlerRegistered {
        node_id: NodeId,
        endpoint: EndpointId,
        command_class: u8,
    },
    UnknownNode(NodeId),
    UnknownEndpoint {
        node_id: NodeId,
        endpoint: EndpointId,
    },
    StageRegression {
        node_id: NodeId,
        from: NodeStage,
        to: NodeStage,
    },
    UnknownCommandClass(u8),
    UnsupportedMessageClass(u8),
    UnexpectedMessage(MessageClass),
    PayloadTooLong(usize),
    Io(io::Error),
    ChannelError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Decode(error) => write!(f, "decode error: {}", error),
            ErrorKind::UnsupportedCommand {
                command_class,
                command,
            } => write!(
                f,
                "unsupported command {:#04x} for command class {}",
                command, command_class
            ),
            ErrorKind::UnimplementedRequest {
                command_class,
                command,
            } => write!(
                f,
                "command {:#04x} for command class {} not implemented",
                command, command_class
            ),
            ErrorKind::NoHandlerRegistered {
                node_id,
                endpoint,
                command_class,
            } => match CommandClassId::try_from(*command_class) {
                Ok(id) => write!(
                    f,
                    "node {} endpoint {} has no handler for command class {}",
                    node_id, endpoint, id
                ),
                Err(_) => write!(
                    f,
                    "node {} endpoint {} has no handler for unknown command class {:#04x}",
                    node_id, endpoint, command_class
                ),
            },
            ErrorKind::UnknownNode(node_id) => write!(f, "unknown node {}", node_id),
            ErrorKind::UnknownEndpoint { node_id, endpoint } => {
                write!(f, "node {} has no endpoint {}", node_id, endpoint)
            }
            ErrorKind::StageRegression { node_id, from, to } => write!(
                f,
                "node {} cannot move from stage {:?} back to {:?}",
                node_id, from, to
            ),
            ErrorKind::UnknownCommandClass(byte) => {
                write!(f, "unknown command class {:#04x}", byte)
            }
            ErrorKind::UnsupportedMessageClass(byte) => {
                write!(f, "unsupported message class {:#04x}", byte)
            }
            ErrorKind::UnexpectedMessage(message_class) => {
                write!(f, "unexpected message: {}", message_class)
            }
            ErrorKind::PayloadTooLong(len) => write!(f, "payload of {} bytes is too long", len),
            ErrorKind::Io(error) => write!(f, "IO error: {}", error),
            ErrorKind::ChannelError => write!(f, "channel error"),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
}

impl Error {
    /// Whether the frame that caused this error was structurally invalid, as opposed to valid but
    /// not something we act on.
    pub fn is_decode(&self) -> bool {
        matches!(self.kind, ErrorKind::Decode(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zwave error: {}", self.kind)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        // Reads from in-memory payloads only fail by running out of bytes.
        let kind = match other.kind() {
            io::ErrorKind::UnexpectedEof => ErrorKind::Decode(DecodeError::UnexpectedEnd),
            _ => ErrorKind::Io(other),
        };
        Error { kind }
    }
}

impl From<DecodeError> for Error {
    fn from(other: DecodeError) -> Self {
        Error {
            kind: ErrorKind::Decode(other),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
