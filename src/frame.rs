use std::convert::{TryFrom, TryInto};
use std::fmt::{self, Debug, Display};
use std::io::{Cursor, Read, Write};

use crate::{
    DecodeError, DeviceClass, Error, ErrorKind, ManufacturerInfo, NodeId, ProtocolInfo, ReadWire,
    ReadWireExt, Result, WriteWire, WriteWireExt,
};

const SOF: u8 = 0x01;

/// Bytes counted by the length byte besides the payload: type, class and checksum.
const OVERHEAD_LEN: usize = 3;

const MAX_PAYLOAD_LEN: usize = 0xFF - OVERHEAD_LEN;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageType {
    Request,
    Response,
}

impl From<MessageType> for u8 {
    fn from(message_type: MessageType) -> u8 {
        match message_type {
            MessageType::Request => 0x00,
            MessageType::Response => 0x01,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(MessageType::Request),
            0x01 => Ok(MessageType::Response),
            _ => Err(DecodeError::InvalidMessageType(byte).into()),
        }
    }
}

impl ReadWire for MessageType {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let byte: u8 = r.read_wire()?;
        byte.try_into()
    }
}

impl WriteWire for MessageType {
    fn wire_len(&self) -> usize {
        1
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_wire(u8::from(self))
    }
}

/// Serial API function a frame belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageClass {
    SerialApiGetInitData,
    ApplicationCommandHandler,
    GetControllerCapabilities,
    SerialApiGetCapabilities,
    SendData,
    GetVersion,
    MemoryGetId,
    IdentifyNode,
    ApplicationUpdate,
    RequestNodeInfo,
}

impl From<MessageClass> for u8 {
    fn from(message_class: MessageClass) -> u8 {
        match message_class {
            MessageClass::SerialApiGetInitData => 0x02,
            MessageClass::ApplicationCommandHandler => 0x04,
            MessageClass::GetControllerCapabilities => 0x05,
            MessageClass::SerialApiGetCapabilities => 0x07,
            MessageClass::SendData => 0x13,
            MessageClass::GetVersion => 0x15,
            MessageClass::MemoryGetId => 0x20,
            MessageClass::IdentifyNode => 0x41,
            MessageClass::ApplicationUpdate => 0x49,
            MessageClass::RequestNodeInfo => 0x60,
        }
    }
}

impl TryFrom<u8> for MessageClass {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x02 => Ok(MessageClass::SerialApiGetInitData),
            0x04 => Ok(MessageClass::ApplicationCommandHandler),
            0x05 => Ok(MessageClass::GetControllerCapabilities),
            0x07 => Ok(MessageClass::SerialApiGetCapabilities),
            0x13 => Ok(MessageClass::SendData),
            0x15 => Ok(MessageClass::GetVersion),
            0x20 => Ok(MessageClass::MemoryGetId),
            0x41 => Ok(MessageClass::IdentifyNode),
            0x49 => Ok(MessageClass::ApplicationUpdate),
            0x60 => Ok(MessageClass::RequestNodeInfo),
            _ => Err(ErrorKind::UnsupportedMessageClass(byte).into()),
        }
    }
}

impl ReadWire for MessageClass {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let byte: u8 = r.read_wire()?;
        byte.try_into()
    }
}

impl WriteWire for MessageClass {
    fn wire_len(&self) -> usize {
        1
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_wire(u8::from(self))
    }
}

impl Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#04x})", self, u8::from(*self))
    }
}

/// Scheduling tier for outbound frames, lowest first. The scheduler that owns the transmit queue
/// orders by this; frames only carry it.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Priority {
    Low,
    Poll,
    Get,
    Set,
    High,
}

/// One serial API message.
///
/// Frames are built whole and never modified afterwards. Ownership moves from layer to layer:
/// a decoded frame belongs to the dispatcher, a built frame to whoever enqueues it.
#[derive(Clone, Eq, PartialEq)]
pub struct Frame {
    node_id: NodeId,
    message_type: MessageType,
    message_class: MessageClass,
    expected_reply: Option<MessageClass>,
    priority: Priority,
    payload: Vec<u8>,
}

impl Frame {
    pub fn request(
        node_id: NodeId,
        message_class: MessageClass,
        priority: Priority,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            node_id,
            message_type: MessageType::Request,
            message_class,
            expected_reply: None,
            priority,
            payload,
        }
    }

    /// A SendData request carrying one application command (`[cc, command, data...]`) to a node.
    ///
    /// The command's length has to fit the length byte in front of it.
    pub fn send_data(node_id: NodeId, priority: Priority, command: &[u8]) -> Result<Self> {
        let len =
            u8::try_from(command.len()).map_err(|_| ErrorKind::PayloadTooLong(command.len()))?;

        let mut payload = Vec::with_capacity(command.len() + 2);
        payload.push(node_id);
        payload.push(len);
        payload.extend_from_slice(command);

        Ok(Self::request(node_id, MessageClass::SendData, priority, payload))
    }

    pub fn expecting(mut self, reply: MessageClass) -> Self {
        self.expected_reply = Some(reply);
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn message_class(&self) -> MessageClass {
        self.message_class
    }

    pub fn expected_reply(&self) -> Option<MessageClass> {
        self.expected_reply
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_byte(&self, offset: usize) -> Result<u8> {
        self.payload.get(offset).copied().ok_or_else(|| {
            DecodeError::Truncated {
                offset,
                len: self.payload.len(),
            }
            .into()
        })
    }

    pub fn payload_from(&self, offset: usize) -> Result<&[u8]> {
        self.payload.get(offset..).ok_or_else(|| {
            DecodeError::Truncated {
                offset,
                len: self.payload.len(),
            }
            .into()
        })
    }

    /// Offset of the command class byte of the application command carried by this frame.
    ///
    /// The byte before it declares the command's length, which must be backed by the payload.
    /// Anything past the declared length (RSSI from newer controllers) is ignored.
    pub fn command_offset(&self) -> Result<usize> {
        let length_offset = match (self.message_type, self.message_class) {
            (MessageType::Request, MessageClass::ApplicationCommandHandler) => 2,
            (MessageType::Request, MessageClass::SendData) => 1,
            _ => return Err(ErrorKind::UnexpectedMessage(self.message_class).into()),
        };

        let declared = usize::from(self.payload_byte(length_offset)?);
        let actual = self.payload.len() - length_offset - 1;
        if declared == 0 || declared > actual {
            return Err(DecodeError::LengthMismatch { declared, actual }.into());
        }

        Ok(length_offset + 1)
    }

    /// The application command's bytes from `offset` up to its declared end.
    pub fn command_from(&self, offset: usize) -> Result<&[u8]> {
        let start = self.command_offset()?;
        let end = start + usize::from(self.payload[start - 1]);
        self.payload.get(offset..end).ok_or_else(|| {
            DecodeError::Truncated {
                offset,
                len: end,
            }
            .into()
        })
    }

    /// The application command's byte at `offset`, if it lies within the declared length.
    pub fn command_byte(&self, offset: usize) -> Result<u8> {
        self.command_from(offset)?.first().copied().ok_or_else(|| {
            DecodeError::Truncated {
                offset,
                len: offset,
            }
            .into()
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(ErrorKind::PayloadTooLong(self.payload.len()).into());
        }

        let len = self.message_type.wire_len()
            + self.message_class.wire_len()
            + self.payload.len()
            + 1;

        let mut buffer = Vec::with_capacity(len + 2);
        buffer.write_wire(SOF)?;
        buffer.write_wire(len as u8)?;
        buffer.write_wire(self.message_type)?;
        buffer.write_wire(self.message_class)?;
        buffer.extend_from_slice(&self.payload);

        let checksum = checksum(&buffer[1..]);
        buffer.write_wire(checksum)?;

        Ok(buffer)
    }

    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(buffer);

        let sof: u8 = r.read_wire()?;
        if sof != SOF {
            return Err(DecodeError::MissingStartOfFrame(sof).into());
        }

        let len = usize::from(u8::read_wire(&mut r)?);
        if len < OVERHEAD_LEN || len + 2 != buffer.len() {
            return Err(DecodeError::LengthMismatch {
                declared: len,
                actual: buffer.len().saturating_sub(2),
            }
            .into());
        }

        let last = buffer.len() - 1;
        let expected = checksum(&buffer[1..last]);
        if buffer[last] != expected {
            return Err(DecodeError::MismatchedChecksum {
                expected,
                actual: buffer[last],
            }
            .into());
        }

        let message_type = r.read_wire()?;
        let message_class = r.read_wire()?;
        let payload = buffer[4..last].to_vec();

        // Only some messages name the node they concern. Responses are correlated by the
        // scheduler that sent the request.
        let node_offset = match (message_type, message_class) {
            (MessageType::Request, MessageClass::ApplicationCommandHandler)
            | (MessageType::Request, MessageClass::ApplicationUpdate) => Some(1),
            (MessageType::Request, MessageClass::SendData)
            | (MessageType::Request, MessageClass::IdentifyNode)
            | (MessageType::Request, MessageClass::RequestNodeInfo) => Some(0),
            _ => None,
        };
        let node_id = node_offset
            .and_then(|offset| payload.get(offset).copied())
            .unwrap_or(0);

        Ok(Self {
            node_id,
            message_type,
            message_class,
            expected_reply: None,
            priority: Priority::High,
            payload,
        })
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(node {}, {:?} {:?}, {:?}, [{}])",
            self.node_id,
            self.message_type,
            self.message_class,
            self.priority,
            hex::encode(&self.payload)
        )
    }
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0xFF, |checksum, byte| checksum ^ byte)
}

impl ReadWire for DeviceClass {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let basic = r.read_wire()?;
        let generic = r.read_wire()?;
        let specific = r.read_wire()?;

        Ok(DeviceClass {
            basic,
            generic,
            specific,
        })
    }
}

impl ReadWire for ProtocolInfo {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let capabilities: u8 = r.read_wire()?;
        let security = r.read_wire()?;
        let _reserved: u8 = r.read_wire()?;
        let device_class = r.read_wire()?;

        Ok(ProtocolInfo {
            listening: (capabilities & 0x80) > 0,
            routing: (capabilities & 0x40) > 0,
            version: (capabilities & 0x07) + 1,
            security,
            device_class,
        })
    }
}

impl ReadWire for ManufacturerInfo {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        let manufacturer_id = r.read_wire()?;
        let device_type = r.read_wire()?;
        let device_id = r.read_wire()?;

        Ok(ManufacturerInfo {
            manufacturer_id,
            device_type,
            device_id,
        })
    }
}
