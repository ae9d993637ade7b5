pub mod command_class;
mod controller;
mod errors;
mod event;
mod frame;
mod node;
mod types;

#[macro_use]
extern crate log;

pub use crate::command_class::{BasicCommands, CommandClass, CommandClassId, Context};
pub use crate::controller::Controller;
pub use crate::errors::{DecodeError, Error, ErrorKind, Result};
pub use crate::event::{EventSink, ValueEvent};
pub use crate::frame::{Frame, MessageClass, MessageType, Priority};
pub use crate::node::{Endpoint, Node, NodeStage};
pub use crate::types::{
    DeviceClass, EndpointId, ManufacturerInfo, NodeId, NodeInfo, ProtocolInfo,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub trait ReadWire: Sized {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read;
}

pub trait WriteWire {
    fn wire_len(&self) -> usize;

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write;
}

impl ReadWire for u8 {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(r.read_u8()?)
    }
}

impl WriteWire for u8 {
    fn wire_len(&self) -> usize {
        1
    }

    fn write_wire<W>(self, w: &mut W) -> Result<()>
    where
        W: Write,
    {
        w.write_u8(self)?;
        Ok(())
    }
}

// Multi-byte fields on the wire are big-endian.
impl ReadWire for u16 {
    fn read_wire<R>(r: &mut R) -> Result<Self>
    where
        R: Read,
    {
        Ok(r.read_u16::<BigEndian>()?)
    }
}

pub trait ReadWireExt {
    fn read_wire<T>(&mut self) -> Result<T>
    where
        T: ReadWire;
}

impl<R> ReadWireExt for R
where
    R: Read,
{
    fn read_wire<T>(&mut self) -> Result<T>
    where
        T: ReadWire,
    {
        T::read_wire(self)
    }
}

pub trait WriteWireExt {
    fn write_wire<T>(&mut self, value: T) -> Result<()>
    where
        T: WriteWire;
}

impl<W> WriteWireExt for W
where
    W: Write,
{
    fn write_wire<T>(&mut self, value: T) -> Result<()>
    where
        T: WriteWire,
    {
        value.write_wire(self)
    }
}
