use crate::{
    BasicCommands, CommandClass, CommandClassId, Context, EndpointId, ErrorKind, Frame,
    MessageClass, NodeId, NodeStage, Priority, Result,
};

const BASIC_SET: u8 = 0x01;
const BASIC_GET: u8 = 0x02;
const BASIC_REPORT: u8 = 0x03;

const MAX_LEVEL: i32 = 99;

/// The Basic command class, which every node maps onto its primary function.
///
/// Unlike the switch classes a Basic report says nothing definite about the device, so it only
/// finishes the dynamic-values stage rather than completing discovery outright.
pub struct Basic {
    node_id: NodeId,
    endpoint: EndpointId,
}

impl Basic {
    pub fn new(node_id: NodeId, endpoint: EndpointId) -> Self {
        Self { node_id, endpoint }
    }

    fn process_report(&self, ctx: &mut Context<'_>, frame: &Frame, offset: usize) -> Result<()> {
        let value = frame.command_byte(offset + 1)?;
        debug!(
            "basic report from node {} endpoint {}, value = {:#04x}",
            self.node_id, self.endpoint, value
        );
        ctx.publish(self.id(), value);
        ctx.complete_stage(NodeStage::DynamicValues);
        Ok(())
    }
}

impl CommandClass for Basic {
    fn id(&self) -> CommandClassId {
        CommandClassId::Basic
    }

    fn handle_incoming(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()> {
        trace!("basic request for node {}", self.node_id);

        let command = frame.command_byte(offset)?;
        match command {
            // Devices associated with the controller send their state changes as Basic Set.
            BASIC_SET | BASIC_REPORT => self.process_report(ctx, frame, offset),
            BASIC_GET => Err(ErrorKind::UnimplementedRequest {
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

impl BasicCommands for Basic {
    fn get_value_frame(&self) -> Result<Frame> {
        debug!("creating basic get for node {}", self.node_id);
        let frame = Frame::send_data(
            self.node_id,
            Priority::Get,
            &[u8::from(self.id()), BASIC_GET],
        )?;
        Ok(frame.expecting(MessageClass::ApplicationCommandHandler))
    }

    /// Levels are clamped to 0..=99.
    fn set_value_frame(&self, level: i32) -> Result<Frame> {
        debug!("creating basic set for node {}, level = {}", self.node_id, level);
        let value = level.max(0).min(MAX_LEVEL) as u8;
        Frame::send_data(
            self.node_id,
            Priority::Set,
            &[u8::from(self.id()), BASIC_SET, value],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_class::testing::{handle, inbound};
    use crate::command_class::Effect;

    #[test]
    fn set_clamps_level() {
        let handler = Basic::new(2, 0);

        assert_eq!(handler.set_value_frame(-1).unwrap().payload(), &[2, 3, 0x20, 0x01, 0]);
        assert_eq!(handler.set_value_frame(40).unwrap().payload(), &[2, 3, 0x20, 0x01, 40]);
        assert_eq!(handler.set_value_frame(255).unwrap().payload(), &[2, 3, 0x20, 0x01, 99]);
    }

    #[test]
    fn report_finishes_dynamic_values_only() {
        let mut handler = Basic::new(2, 0);
        let outcome = handle(
            &mut handler,
            NodeStage::DynamicValues,
            &inbound(2, &[0x20, 0x03, 0x63]),
        );

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].value, 0x63);
        assert_eq!(outcome.events[0].command_class, CommandClassId::Basic);
        assert!(matches!(
            outcome.effects.as_slice(),
            [Effect::CompleteStage(NodeStage::DynamicValues)]
        ));
    }

    #[test]
    fn set_from_device_is_a_report() {
        let mut handler = Basic::new(2, 0);
        let outcome = handle(&mut handler, NodeStage::Done, &inbound(2, &[0x20, 0x01, 0x00]));

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.events[0].value, 0x00);
    }

    #[test]
    fn inbound_get_is_unimplemented() {
        let mut handler = Basic::new(2, 0);
        let outcome = handle(&mut handler, NodeStage::Done, &inbound(2, &[0x20, 0x02]));

        assert!(matches!(
            outcome.result.unwrap_err().kind,
            ErrorKind::UnimplementedRequest { .. }
        ));
        assert!(outcome.events.is_empty());
    }
}
