//! Multi Channel (formerly Multi Instance): nodes that expose several independent endpoints, such
//! as a power strip with one switch per socket.
//!
//! The root endpoint's handler discovers the other endpoints and unwraps commands they send, handing
//! the inner command to the source endpoint. Commands for an endpoint are wrapped with
//! [`encapsulate`].

use std::collections::BTreeSet;

use crate::command_class::supported_command_classes;
use crate::{
    CommandClass, CommandClassId, Context, EndpointId, ErrorKind, Frame, MessageClass, NodeId,
    NodeStage, Priority, Result,
};

const MULTI_INSTANCE_ENCAP: u8 = 0x06;
const MULTI_CHANNEL_ENDPOINT_GET: u8 = 0x07;
const MULTI_CHANNEL_ENDPOINT_REPORT: u8 = 0x08;
const MULTI_CHANNEL_CAPABILITY_GET: u8 = 0x09;
const MULTI_CHANNEL_CAPABILITY_REPORT: u8 = 0x0A;
const MULTI_CHANNEL_CMD_ENCAP: u8 = 0x0D;

const ENDPOINT_MASK: u8 = 0x7F;

/// Wraps a SendData frame so the node delivers its command to `endpoint`.
///
/// Frames for the root endpoint, and anything that is not a SendData request, come back unchanged.
pub fn encapsulate(frame: Frame, endpoint: EndpointId) -> Result<Frame> {
    if endpoint == 0 || frame.message_class() != MessageClass::SendData {
        return Ok(frame);
    }

    let inner = frame.payload().get(2..).unwrap_or_default();
    let mut command = Vec::with_capacity(inner.len() + 4);
    command.push(u8::from(CommandClassId::MultiChannel));
    command.push(MULTI_CHANNEL_CMD_ENCAP);
    command.push(0x00);
    command.push(endpoint);
    command.extend_from_slice(inner);

    let encapsulated = Frame::send_data(frame.node_id(), frame.priority(), &command)?;
    Ok(match frame.expected_reply() {
        Some(reply) => encapsulated.expecting(reply),
        None => encapsulated,
    })
}

pub struct MultiChannel {
    node_id: NodeId,
    endpoint_count: Option<u8>,
    reported: BTreeSet<EndpointId>,
}

impl MultiChannel {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            endpoint_count: None,
            reported: BTreeSet::new(),
        }
    }

    /// Number of endpoints the node said it has, once it has said so.
    pub fn endpoint_count(&self) -> Option<u8> {
        self.endpoint_count
    }

    fn request(&self, command: &[u8]) -> Result<Frame> {
        let frame = Frame::send_data(self.node_id, Priority::Get, command)?;
        Ok(frame.expecting(MessageClass::ApplicationCommandHandler))
    }

    fn endpoint_get_frame(&self) -> Result<Frame> {
        debug!("creating multi channel endpoint get for node {}", self.node_id);
        self.request(&[u8::from(self.id()), MULTI_CHANNEL_ENDPOINT_GET])
    }

    fn capability_get_frame(&self, endpoint: EndpointId) -> Result<Frame> {
        debug!(
            "creating multi channel capability get for node {} endpoint {}",
            self.node_id, endpoint
        );
        self.request(&[u8::from(self.id()), MULTI_CHANNEL_CAPABILITY_GET, endpoint])
    }

    fn process_endpoint_report(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()> {
        let _flags = frame.command_byte(offset + 1)?;
        let count = frame.command_byte(offset + 2)? & ENDPOINT_MASK;
        debug!("node {} has {} endpoints", self.node_id, count);

        self.endpoint_count = Some(count);
        self.reported.clear();

        if count == 0 {
            ctx.complete_stage(NodeStage::Endpoints);
            return Ok(());
        }

        for endpoint in 1..=count {
            ctx.transmit(self.capability_get_frame(endpoint)?);
        }
        Ok(())
    }

    fn process_capability_report(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()> {
        let endpoint = frame.command_byte(offset + 1)? & ENDPOINT_MASK;
        let generic = frame.command_byte(offset + 2)?;
        let specific = frame.command_byte(offset + 3)?;
        let command_classes: Vec<u8> =
            supported_command_classes(frame.command_from(offset + 4)?).collect();

        // Only endpoints the node announced in its endpoint report are taken on.
        let count = match self.endpoint_count {
            Some(count) if (1..=count).contains(&endpoint) => count,
            _ => {
                return Err(ErrorKind::UnknownEndpoint {
                    node_id: self.node_id,
                    endpoint,
                }
                .into())
            }
        };

        debug!(
            "node {} endpoint {} is {:#04x}/{:#04x} with command classes [{}]",
            self.node_id,
            endpoint,
            generic,
            specific,
            hex::encode(&command_classes)
        );
        ctx.add_endpoint(endpoint, command_classes);

        self.reported.insert(endpoint);
        if (1..=count).all(|announced| self.reported.contains(&announced)) {
            ctx.complete_stage(NodeStage::Endpoints);
        }
        Ok(())
    }

    /// Hands the command starting at `inner` to `endpoint`, as long as it is not itself wrapped.
    fn forward(
        &self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        command: u8,
        endpoint: EndpointId,
        inner: usize,
    ) -> Result<()> {
        let nested = frame.command_byte(inner)? == u8::from(self.id());
        if ctx.endpoint() != 0 || nested {
            return Err(ErrorKind::UnsupportedCommand {
                command_class: self.id(),
                command,
            }
            .into());
        }

        trace!(
            "forwarding encapsulated command from node {} to endpoint {}",
            self.node_id,
            endpoint
        );
        ctx.forward(endpoint, inner);
        Ok(())
    }
}

impl CommandClass for MultiChannel {
    fn id(&self) -> CommandClassId {
        CommandClassId::MultiChannel
    }

    fn handle_incoming(
        &mut self,
        ctx: &mut Context<'_>,
        frame: &Frame,
        offset: usize,
    ) -> Result<()> {
        trace!("multi channel request for node {}", self.node_id);

        let command = frame.command_byte(offset)?;
        match command {
            MULTI_CHANNEL_ENDPOINT_REPORT => self.process_endpoint_report(ctx, frame, offset),
            MULTI_CHANNEL_CAPABILITY_REPORT => self.process_capability_report(ctx, frame, offset),
            MULTI_CHANNEL_CMD_ENCAP => {
                // [source, destination, cc, command, ...]
                let source = frame.command_byte(offset + 1)? & ENDPOINT_MASK;
                let _destination = frame.command_byte(offset + 2)?;
                self.forward(ctx, frame, command, source, offset + 3)
            }
            MULTI_INSTANCE_ENCAP => {
                // Version 1: [instance, cc, command, ...]
                let instance = frame.command_byte(offset + 1)?;
                self.forward(ctx, frame, command, instance, offset + 2)
            }
            MULTI_CHANNEL_ENDPOINT_GET | MULTI_CHANNEL_CAPABILITY_GET => {
                Err(ErrorKind::UnimplementedRequest {
                    command_class: self.id(),
                    command,
                }
                .into())
            }
            _ => Err(ErrorKind::UnsupportedCommand {
                command_class: self.id(),
                command,
            }
            .into()),
        }
    }

    fn stage_frames(&self, stage: NodeStage) -> Result<Vec<Frame>> {
        match stage {
            NodeStage::Endpoints => Ok(vec![self.endpoint_get_frame()?]),
            _ => Ok(Vec::new()),
        }
    }
}
