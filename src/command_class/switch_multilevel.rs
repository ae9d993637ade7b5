use crate::{
    BasicCommands, CommandClass, CommandClassId, Context, EndpointId, ErrorKind, Frame,
    MessageClass, NodeId, NodeStage, Priority, Result,
};

const SWITCH_MULTILEVEL_SET: u8 = 0x01;
const SWITCH_MULTILEVEL_GET: u8 = 0x02;
const SWITCH_MULTILEVEL_REPORT: u8 = 0x03;
const SWITCH_MULTILEVEL_START_LEVEL_CHANGE: u8 = 0x04;
const SWITCH_MULTILEVEL_STOP_LEVEL_CHANGE: u8 = 0x05;

const MAX_LEVEL: i32 = 99;

/// Dimmers and other switches with a level between 0 and 99.
pub struct SwitchMultilevel {
    node_id: NodeId,
    endpoint: EndpointId,
    level: Option<u8>,
}

impl SwitchMultilevel {
    pub fn new(node_id: NodeId, endpoint: EndpointId) -> Self {
        Self {
            node_id,
            endpoint,
            level: None,
        }
    }

    /// Last level the device reported.
    pub fn level(&self) -> Option<u8> {
        self.level
    }

    pub fn stop_level_change_frame(&self) -> Result<Frame> {
        debug!("creating switch multilevel stop for node {}", self.node_id);
        Frame::send_data(
            self.node_id,
            Priority::Set,
            &[u8::from(self.id()), SWITCH_MULTILEVEL_STOP_LEVEL_CHANGE],
        )
    }

    fn process_report(&mut self, ctx: &Context<'_>, frame: &Frame, offset: usize) -> Result<()> {
        let value = frame.command_byte(offset + 1)?;
        debug!(
            "switch multilevel report from node {} endpoint {}, value = {:#04x}",
            self.node_id, self.endpoint, value
        );
        self.level = Some(value);
        ctx.publish(self.id(), value);
        Ok(())
    }
}

impl CommandClass for SwitchMultilevel {
    fn id(&self) -> CommandClassId {
        CommandClassId::SwitchMultilevel
    }

    fn handle_incoming(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()> {
        trace!("switch multilevel request for node {}", self.node_id);

        let command = frame.command_byte(offset)?;
        match command {
            SWITCH_MULTILEVEL_SET => {
                debug!("processing switch multilevel set as a report");
                self.process_report(ctx, frame, offset)
            }
            SWITCH_MULTILEVEL_REPORT => {
                self.process_report(ctx, frame, offset)?;
                if ctx.stage() != NodeStage::Done {
                    ctx.advance_stage(NodeStage::Done);
                }
                Ok(())
            }
            SWITCH_MULTILEVEL_GET
            | SWITCH_MULTILEVEL_START_LEVEL_CHANGE
            | SWITCH_MULTILEVEL_STOP_LEVEL_CHANGE => Err(ErrorKind::UnimplementedRequest {
                command_class: self.id(),
                command,
            }
            .into()),
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

impl BasicCommands for SwitchMultilevel {
    fn get_value_frame(&self) -> Result<Frame> {
        debug!("creating switch multilevel get for node {}", self.node_id);
        let frame = Frame::send_data(
            self.node_id,
            Priority::Get,
            &[u8::from(self.id()), SWITCH_MULTILEVEL_GET],
        )?;
        Ok(frame.expecting(MessageClass::ApplicationCommandHandler))
    }

    fn set_value_frame(&self, level: i32) -> Result<Frame> {
        debug!(
            "creating switch multilevel set for node {}, level = {}",
            self.node_id, level
        );
        let value = level.max(0).min(MAX_LEVEL) as u8;
        Frame::send_data(
            self.node_id,
            Priority::Set,
            &[u8::from(self.id()), SWITCH_MULTILEVEL_SET, value],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_class::testing::{handle, inbound};
    use crate::command_class::Effect;

    #[test]
    fn report_caches_level_and_completes_discovery() {
        let mut handler = SwitchMultilevel::new(9, 0);
        let outcome = handle(
            &mut handler,
            NodeStage::DynamicValues,
            &inbound(9, &[0x26, 0x03, 0x32]),
        );

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.events[0].value, 0x32);
        assert!(matches!(
            outcome.effects.as_slice(),
            [Effect::AdvanceStage(NodeStage::Done)]
        ));
        assert_eq!(handler.level(), Some(0x32));
    }

    #[test]
    fn truncated_report_keeps_cached_level() {
        let mut handler = SwitchMultilevel::new(9, 0);
        handle(&mut handler, NodeStage::Done, &inbound(9, &[0x26, 0x03, 0x10]));

        let outcome = handle(&mut handler, NodeStage::Done, &inbound(9, &[0x26, 0x03]));

        assert!(outcome.result.unwrap_err().is_decode());
        assert!(outcome.events.is_empty());
        assert_eq!(handler.level(), Some(0x10));
    }

    #[test]
    fn set_clamps_level() {
        let handler = SwitchMultilevel::new(9, 0);

        assert_eq!(handler.set_value_frame(150).unwrap().payload(), &[9, 3, 0x26, 0x01, 99]);
        assert_eq!(handler.set_value_frame(-20).unwrap().payload(), &[9, 3, 0x26, 0x01, 0]);
        assert_eq!(handler.set_value_frame(55).unwrap().payload(), &[9, 3, 0x26, 0x01, 55]);
    }

    #[test]
    fn stop_level_change_layout() {
        let frame = SwitchMultilevel::new(9, 0).stop_level_change_frame().unwrap();

        assert_eq!(frame.payload(), &[9, 2, 0x26, 0x05]);
        assert_eq!(frame.priority(), Priority::Set);
    }

    #[test]
    fn inbound_level_change_is_unimplemented() {
        let mut handler = SwitchMultilevel::new(9, 0);
        let outcome = handle(&mut handler, NodeStage::Done, &inbound(9, &[0x26, 0x04, 0x00]));

        assert!(matches!(
            outcome.result.unwrap_err().kind,
            ErrorKind::UnimplementedRequest { command: 0x04, .. }
        ));
    }
}
