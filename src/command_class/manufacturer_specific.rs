use std::io::Cursor;

use crate::{
    CommandClass, CommandClassId, Context, ErrorKind, Frame, ManufacturerInfo, MessageClass,
    NodeId, NodeStage, Priority, ReadWireExt, Result,
};

const MANUFACTURER_SPECIFIC_GET: u8 = 0x04;
const MANUFACTURER_SPECIFIC_REPORT: u8 = 0x05;

/// Identifies who made a node and which product it is. Only ever lives on the root endpoint.
pub struct ManufacturerSpecific {
    node_id: NodeId,
}

impl ManufacturerSpecific {
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }

    fn get_frame(&self) -> Result<Frame> {
        debug!("creating manufacturer specific get for node {}", self.node_id);
        let frame = Frame::send_data(
            self.node_id,
            Priority::Get,
            &[u8::from(self.id()), MANUFACTURER_SPECIFIC_GET],
        )?;
        Ok(frame.expecting(MessageClass::ApplicationCommandHandler))
    }
}

impl CommandClass for ManufacturerSpecific {
    fn id(&self) -> CommandClassId {
        CommandClassId::ManufacturerSpecific
    }

    fn handle_incoming(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()> {
        trace!("manufacturer specific request for node {}", self.node_id);

        let command = frame.command_byte(offset)?;
        match command {
            MANUFACTURER_SPECIFIC_REPORT => {
                let mut r = Cursor::new(frame.command_from(offset + 1)?);
                let info: ManufacturerInfo = r.read_wire()?;
                debug!("node {} is {:?}", self.node_id, info);

                ctx.set_manufacturer_info(info);
                ctx.complete_stage(NodeStage::ManufacturerInfo);
                Ok(())
            }
            MANUFACTURER_SPECIFIC_GET => Err(ErrorKind::UnimplementedRequest {
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

    fn stage_frames(&self, stage: NodeStage) -> Result<Vec<Frame>> {
        match stage {
            NodeStage::ManufacturerInfo => Ok(vec![self.get_frame()?]),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_class::testing::{handle, inbound};
    use crate::command_class::Effect;

    #[test]
    fn report_records_manufacturer_and_completes_stage() {
        let mut handler = ManufacturerSpecific::new(4);
        let outcome = handle(
            &mut handler,
            NodeStage::ManufacturerInfo,
            &inbound(4, &[0x72, 0x05, 0x00, 0x86, 0x00, 0x03, 0x00, 0x06]),
        );

        assert!(outcome.result.is_ok());
        assert!(outcome.events.is_empty());
        match outcome.effects.as_slice() {
            [Effect::Manufacturer(info), Effect::CompleteStage(NodeStage::ManufacturerInfo)] => {
                assert_eq!(info.manufacturer_id, 0x0086);
                assert_eq!(info.device_type, 0x0003);
                assert_eq!(info.device_id, 0x0006);
            }
            effects => panic!("unexpected effects {:?}", effects),
        }
    }

    #[test]
    fn short_report_is_a_decode_error() {
        let mut handler = ManufacturerSpecific::new(4);
        let outcome = handle(
            &mut handler,
            NodeStage::ManufacturerInfo,
            &inbound(4, &[0x72, 0x05, 0x00, 0x86, 0x00]),
        );

        assert!(outcome.result.unwrap_err().is_decode());
        assert!(outcome.effects.is_empty());
    }

    #[test]
    fn get_is_only_sent_during_manufacturer_stage() {
        let handler = ManufacturerSpecific::new(4);

        let frames = handler.stage_frames(NodeStage::ManufacturerInfo).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), &[4, 2, 0x72, 0x04]);

        assert!(handler.stage_frames(NodeStage::DynamicValues).unwrap().is_empty());
        assert!(handler.poll_frames().unwrap().is_empty());
    }
}
