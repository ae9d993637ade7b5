//! Command class handlers and the registry that builds them.
//!
//! Every capability a node advertises gets one handler per endpoint. Handlers decode inbound
//! application commands, build outbound ones, and request changes to their node through the
//! [`Context`] they are handed, rather than holding on to the node itself.

mod basic;
mod manufacturer_specific;
pub mod multi_channel;
mod switch_binary;
mod switch_multilevel;

use std::convert::TryFrom;
use std::fmt::{self, Display};

use crate::{
    EndpointId, Error, ErrorKind, EventSink, Frame, ManufacturerInfo, NodeId, NodeStage, Result,
    ValueEvent,
};

pub use self::basic::Basic;
pub use self::manufacturer_specific::ManufacturerSpecific;
pub use self::multi_channel::MultiChannel;
pub use self::switch_binary::SwitchBinary;
pub use self::switch_multilevel::SwitchMultilevel;

macro_rules! define_command_classes {
    ($(($class:ident, $id:literal, $label:literal)),+ $(,)?) => {
        #[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub enum CommandClassId {
            $($class),+
        }

        impl CommandClassId {
            pub fn label(&self) -> &'static str {
                match self {
                    $(CommandClassId::$class => $label),+
                }
            }
        }

        impl Display for CommandClassId {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(CommandClassId::$class => write!(f, "{} ({:#04x})", $label, $id)),+
                }
            }
        }

        impl TryFrom<u8> for CommandClassId {
            type Error = Error;

            fn try_from(byte: u8) -> Result<Self> {
                match byte {
                    $($id => Ok(CommandClassId::$class),)+
                    _ => Err(Error { kind: ErrorKind::UnknownCommandClass(byte) }),
                }
            }
        }

        impl From<CommandClassId> for u8 {
            fn from(id: CommandClassId) -> u8 {
                match id {
                    $(CommandClassId::$class => $id,)+
                }
            }
        }
    };
}

define_command_classes! {
    (NoOperation, 0x00, "NO_OPERATION"),
    (Basic, 0x20, "BASIC"),
    (ControllerReplication, 0x21, "CONTROLLER_REPLICATION"),
    (ApplicationStatus, 0x22, "APPLICATION_STATUS"),
    (SwitchBinary, 0x25, "SWITCH_BINARY"),
    (SwitchMultilevel, 0x26, "SWITCH_MULTILEVEL"),
    (SwitchAll, 0x27, "SWITCH_ALL"),
    (SensorBinary, 0x30, "SENSOR_BINARY"),
    (SensorMultilevel, 0x31, "SENSOR_MULTILEVEL"),
    (Meter, 0x32, "METER"),
    (ThermostatMode, 0x40, "THERMOSTAT_MODE"),
    (ThermostatSetpoint, 0x43, "THERMOSTAT_SETPOINT"),
    (MultiChannel, 0x60, "MULTI_INSTANCE"),
    (Configuration, 0x70, "CONFIGURATION"),
    (Alarm, 0x71, "ALARM"),
    (ManufacturerSpecific, 0x72, "MANUFACTURER_SPECIFIC"),
    (Battery, 0x80, "BATTERY"),
    (WakeUp, 0x84, "WAKE_UP"),
    (Association, 0x85, "ASSOCIATION"),
    (Version, 0x86, "VERSION"),
    (MultiChannelAssociation, 0x8E, "MULTI_INSTANCE_ASSOCIATION"),
    (Security, 0x98, "SECURITY"),
    (Mark, 0xEF, "MARK"),
}

/// Separates supported command classes from controlled ones in node information frames.
const MARK: u8 = 0xEF;

/// The command classes a node information list says the node supports.
pub(crate) fn supported_command_classes(list: &[u8]) -> impl Iterator<Item = u8> + '_ {
    list.iter().copied().take_while(|&byte| byte != MARK)
}

/// Builds the handler for a command class, or `None` if there is no handler for it.
///
/// Manufacturer Specific and Multi Channel describe the whole node, so they only exist on the
/// root endpoint.
pub fn instantiate(
    id: CommandClassId,
    node_id: NodeId,
    endpoint: EndpointId,
) -> Option<Box<dyn CommandClass>> {
    let handler: Box<dyn CommandClass> = match id {
        CommandClassId::Basic => Box::new(Basic::new(node_id, endpoint)),
        CommandClassId::SwitchBinary => Box::new(SwitchBinary::new(node_id, endpoint)),
        CommandClassId::SwitchMultilevel => Box::new(SwitchMultilevel::new(node_id, endpoint)),
        CommandClassId::ManufacturerSpecific if endpoint == 0 => {
            Box::new(ManufacturerSpecific::new(node_id))
        }
        CommandClassId::MultiChannel if endpoint == 0 => Box::new(MultiChannel::new(node_id)),
        _ => return None,
    };
    Some(handler)
}

pub trait CommandClass: Send {
    fn id(&self) -> CommandClassId;

    /// Handles an application command addressed to this handler. `offset` is the position of the
    /// command byte in the frame's payload. Reads stop at the command's declared length.
    fn handle_incoming(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()>;

    /// Requests that refresh every value this handler reports.
    fn poll_frames(&self) -> Result<Vec<Frame>> {
        Ok(Vec::new())
    }

    /// Requests this handler needs sent while its node is in `stage`.
    fn stage_frames(&self, stage: NodeStage) -> Result<Vec<Frame>> {
        match stage {
            NodeStage::DynamicValues => self.poll_frames(),
            _ => Ok(Vec::new()),
        }
    }

    fn basic_commands(&self) -> Option<&dyn BasicCommands> {
        None
    }
}

/// Reading and setting the single value of a command class.
pub trait BasicCommands {
    fn get_value_frame(&self) -> Result<Frame>;

    fn set_value_frame(&self, level: i32) -> Result<Frame>;
}

/// Changes a handler asks of its node. Applied by the node once the handler returns successfully.
#[derive(Debug)]
pub(crate) enum Effect {
    AdvanceStage(NodeStage),
    CompleteStage(NodeStage),
    Forward {
        endpoint: EndpointId,
        offset: usize,
    },
    AddEndpoint {
        endpoint: EndpointId,
        command_classes: Vec<u8>,
    },
    Manufacturer(ManufacturerInfo),
    Transmit(Frame),
}

/// What a handler sees of its node while handling one frame.
pub struct Context<'a> {
    node_id: NodeId,
    endpoint: EndpointId,
    stage: NodeStage,
    events: &'a EventSink,
    effects: Vec<Effect>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        node_id: NodeId,
        endpoint: EndpointId,
        stage: NodeStage,
        events: &'a EventSink,
    ) -> Self {
        Self {
            node_id,
            endpoint,
            stage,
            events,
            effects: Vec::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn stage(&self) -> NodeStage {
        self.stage
    }

    pub fn publish(&self, command_class: CommandClassId, value: u8) {
        self.events.publish(ValueEvent {
            node_id: self.node_id,
            endpoint: self.endpoint,
            command_class,
            value,
        });
    }

    /// Moves the node straight to `stage`, skipping anything in between.
    pub fn advance_stage(&mut self, stage: NodeStage) {
        self.effects.push(Effect::AdvanceStage(stage));
    }

    /// Marks `stage` finished. Has no effect unless the node is still in it.
    pub fn complete_stage(&mut self, stage: NodeStage) {
        self.effects.push(Effect::CompleteStage(stage));
    }

    /// Hands the encapsulated command starting at `offset` to `endpoint`.
    pub fn forward(&mut self, endpoint: EndpointId, offset: usize) {
        self.effects.push(Effect::Forward { endpoint, offset });
    }

    pub fn add_endpoint(&mut self, endpoint: EndpointId, command_classes: Vec<u8>) {
        self.effects.push(Effect::AddEndpoint {
            endpoint,
            command_classes,
        });
    }

    pub fn set_manufacturer_info(&mut self, info: ManufacturerInfo) {
        self.effects.push(Effect::Manufacturer(info));
    }

    pub fn transmit(&mut self, frame: Frame) {
        self.effects.push(Effect::Transmit(frame));
    }

    pub(crate) fn into_effects(self) -> Vec<Effect> {
        self.effects
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio::sync::mpsc;

    use super::{CommandClass, Context, Effect};
    use crate::{EventSink, Frame, MessageClass, NodeId, NodeStage, Priority, Result, ValueEvent};

    pub(crate) struct Outcome {
        pub result: Result<()>,
        pub events: Vec<ValueEvent>,
        pub effects: Vec<Effect>,
    }

    /// An ApplicationCommandHandler request from `node_id` carrying `command`.
    pub(crate) fn inbound(node_id: NodeId, command: &[u8]) -> Frame {
        let mut payload = vec![0x00, node_id, command.len() as u8];
        payload.extend_from_slice(command);
        Frame::request(
            node_id,
            MessageClass::ApplicationCommandHandler,
            Priority::High,
            payload,
        )
    }

    pub(crate) fn handle(
        handler: &mut dyn CommandClass,
        stage: NodeStage,
        frame: &Frame,
    ) -> Outcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSink::new(tx);

        let mut ctx = Context::new(frame.node_id(), 0, stage, &events);
        let offset = frame.command_offset().unwrap() + 1;
        let result = handler.handle_incoming(&mut ctx, frame, offset);
        let effects = ctx.into_effects();

        let mut published = Vec::new();
        while let Ok(event) = rx.try_recv() {
            published.push(event);
        }

        Outcome {
            result,
            events: published,
            effects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_class_ids_round_trip_through_bytes() {
        assert_eq!(
            CommandClassId::try_from(0x25).unwrap(),
            CommandClassId::SwitchBinary
        );
        assert_eq!(u8::from(CommandClassId::MultiChannel), 0x60);
        assert_eq!(CommandClassId::SwitchBinary.label(), "SWITCH_BINARY");
        assert_eq!(
            CommandClassId::SwitchBinary.to_string(),
            "SWITCH_BINARY (0x25)"
        );
    }

    #[test]
    fn unknown_command_class_byte_is_an_error() {
        let error = CommandClassId::try_from(0xF1).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::UnknownCommandClass(0xF1)));
    }

    #[test]
    fn instantiate_builds_registered_handlers() {
        let handler = instantiate(CommandClassId::SwitchBinary, 4, 0).unwrap();
        assert_eq!(handler.id(), CommandClassId::SwitchBinary);
        assert!(handler.basic_commands().is_some());

        assert!(instantiate(CommandClassId::Meter, 4, 0).is_none());
    }

    #[test]
    fn node_wide_handlers_only_on_root_endpoint() {
        assert!(instantiate(CommandClassId::MultiChannel, 4, 0).is_some());
        assert!(instantiate(CommandClassId::MultiChannel, 4, 1).is_none());
        assert!(instantiate(CommandClassId::ManufacturerSpecific, 4, 2).is_none());
    }

    #[test]
    fn supported_list_stops_at_mark() {
        let list = [0x25, 0x72, MARK, 0x20];
        let supported: Vec<u8> = supported_command_classes(&list).collect();
        assert_eq!(supported, vec![0x25, 0x72]);
    }
}
