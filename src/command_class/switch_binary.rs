use crate::{
    BasicCommands, CommandClass, CommandClassId, Context, EndpointId, ErrorKind, Frame,
    MessageClass, NodeId, NodeStage, Priority, Result,
};

const SWITCH_BINARY_SET: u8 = 0x01;
const SWITCH_BINARY_GET: u8 = 0x02;
const SWITCH_BINARY_REPORT: u8 = 0x03;

const ON: u8 = 0xFF;
const OFF: u8 = 0x00;

/// Binary switches are either on (0xFF) or off (0x00). They can be set, queried, and report their
/// state.
pub struct SwitchBinary {
    node_id: NodeId,
    endpoint: EndpointId,
}

impl SwitchBinary {
    pub fn new(node_id: NodeId, endpoint: EndpointId) -> Self {
        Self { node_id, endpoint }
    }

    fn process_report(&self, ctx: &Context<'_>, frame: &Frame, offset: usize) -> Result<()> {
        let value = frame.command_byte(offset + 1)?;
        debug!(
            "switch binary report from node {} endpoint {}, value = {:#04x}",
            self.node_id, self.endpoint, value
        );
        ctx.publish(self.id(), value);
        Ok(())
    }
}

impl CommandClass for SwitchBinary {
    fn id(&self) -> CommandClassId {
        CommandClassId::SwitchBinary
    }

    fn handle_incoming(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()> {
        trace!("switch binary request for node {}", self.node_id);

        let command = frame.command_byte(offset)?;
        match command {
            SWITCH_BINARY_SET => {
                // Some devices (e.g. the Aeon Labs Micro Smart Energy Switch) report their state
                // with a Set instead of a Report.
                debug!("processing switch binary set as a report");
                self.process_report(ctx, frame, offset)
            }
            SWITCH_BINARY_GET => Err(ErrorKind::UnimplementedRequest {
                command_class: self.id(),
                command,
            }
            .into()),
            SWITCH_BINARY_REPORT => {
                self.process_report(ctx, frame, offset)?;

                // The device has told us its state; nothing left worth interviewing it for.
                if ctx.stage() != NodeStage::Done {
                    ctx.advance_stage(NodeStage::Done);
                }
                Ok(())
            }
            _ => Err(ErrorKind::UnsupportedCommand {
                command_class: self.id(),
                command,
            }
            .into()),
        }
    }

    fn poll_frames(&self) -> Result<Vec<Frame>> {
        Ok(vec![self.get_value_frame()?])
    }

    fn basic_commands(&self) -> Option<&dyn BasicCommands> {
        Some(self)
    }
}

impl BasicCommands for SwitchBinary {
    fn get_value_frame(&self) -> Result<Frame> {
        debug!("creating switch binary get for node {}", self.node_id);
        let frame = Frame::send_data(
            self.node_id,
            Priority::Get,
            &[u8::from(self.id()), SWITCH_BINARY_GET],
        )?;
        Ok(frame.expecting(MessageClass::ApplicationCommandHandler))
    }

    /// Any positive level switches on, anything else switches off.
    fn set_value_frame(&self, level: i32) -> Result<Frame> {
        debug!(
            "creating switch binary set for node {}, level = {}",
            self.node_id, level
        );
        let value = if level > 0 { ON } else { OFF };
        Frame::send_data(
            self.node_id,
            Priority::Set,
            &[u8::from(self.id()), SWITCH_BINARY_SET, value],
        )
    }
}
