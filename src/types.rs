use std::fmt::{self, Debug};

pub type NodeId = u8;
pub type EndpointId = u8;

#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct DeviceClass {
    pub basic: u8,
    pub generic: u8,
    pub specific: u8,
}

impl Debug for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceClass({:#04x}, {:#04x}, {:#04x})",
            self.basic, self.generic, self.specific
        )
    }
}

/// Result of an IdentifyNode exchange.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtocolInfo {
    pub listening: bool,
    pub routing: bool,
    pub version: u8,
    pub security: u8,
    pub device_class: DeviceClass,
}

/// Device classes and supported command classes from a node information frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeInfo {
    pub device_class: DeviceClass,
    pub command_classes: Vec<u8>,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ManufacturerInfo {
    pub manufacturer_id: u16,
    pub device_type: u16,
    pub device_id: u16,
}

impl Debug for ManufacturerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ManufacturerInfo({:#06x}, {:#06x}, {:#06x})",
            self.manufacturer_id, self.device_type, self.device_id
        )
    }
}
